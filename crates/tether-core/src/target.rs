use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Discriminator a target tracks its liveness under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActivationKey {
    Port(u16),
    Device(String),
}

impl ActivationKey {
    pub fn port(&self) -> Option<u16> {
        match self {
            ActivationKey::Port(port) => Some(*port),
            ActivationKey::Device(_) => None,
        }
    }

    pub fn device(&self) -> Option<&str> {
        match self {
            ActivationKey::Device(id) => Some(id),
            ActivationKey::Port(_) => None,
        }
    }

    pub fn expect_port(&self) -> Result<u16> {
        self.port()
            .ok_or_else(|| Error::InvalidKey(format!("expected a proxy port, got {}", self)))
    }

    pub fn expect_device(&self) -> Result<&str> {
        self.device()
            .ok_or_else(|| Error::InvalidKey(format!("expected a device id, got {}", self)))
    }
}

impl fmt::Display for ActivationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationKey::Port(port) => write!(f, "port {}", port),
            ActivationKey::Device(id) => write!(f, "device {}", id),
        }
    }
}

/// Per-call options supplied by the caller of the façade
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetOptions {
    /// The user agreed to close an already-running browser
    pub close_confirmed: bool,
    /// Executable or app bundle for remote-debug injection
    pub path_to_application: Option<PathBuf>,
    /// Mobile device or simulator id
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRequest {
    pub proxy_port: u16,
    pub options: TargetOptions,
}

impl ActivationRequest {
    pub fn new(proxy_port: u16) -> Self {
        Self {
            proxy_port,
            options: TargetOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TargetOptions) -> Self {
        self.options = options;
        self
    }

    pub fn device_key(&self) -> Result<ActivationKey> {
        self.options
            .device_id
            .clone()
            .map(ActivationKey::Device)
            .ok_or_else(|| Error::InvalidKey("a deviceId option is required".to_string()))
    }
}

/// What a successful activation reports back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationOutcome {
    /// OS process id of the intercepted process, when the caller needs it
    pub pid: Option<u32>,
}

impl ActivationOutcome {
    pub fn with_pid(pid: Option<u32>) -> Self {
        Self { pid }
    }
}

/// Something that can be made to route traffic through the proxy and trust its CA
#[async_trait]
pub trait Target: Send + Sync {
    fn id(&self) -> &str;

    fn version(&self) -> &str;

    /// Derive the activation key for a request. Most targets track by port.
    fn key_for(&self, request: &ActivationRequest) -> Result<ActivationKey> {
        Ok(ActivationKey::Port(request.proxy_port))
    }

    /// Capability check. Must not mutate state.
    async fn is_activable(&self) -> bool;

    fn is_active(&self, key: &ActivationKey) -> bool;

    /// Start intercepting. A no-op when already active for `key`.
    async fn activate(
        &self,
        key: &ActivationKey,
        request: &ActivationRequest,
    ) -> Result<ActivationOutcome>;

    /// Stop intercepting. A no-op when not active for `key`.
    async fn deactivate(&self, key: &ActivationKey) -> Result<()>;

    async fn deactivate_all(&self) -> Result<()>;
}
