use crate::cert::CaCertificate;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// URL every launched browser opens; the proxy answers it with a page
/// confirming interception
pub const MARKER_URL: &str = "https://amiusing.tether.dev/";

/// Settings supplied by the surrounding application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TetherConfig {
    pub proxy_host: String,
    /// Root for managed profiles and bundled tools
    pub config_root: PathBuf,
    /// Defaults to `<config_root>/ca.crt`
    pub ca_cert_path: Option<PathBuf>,
    /// Defaults to `<config_root>/nss`
    pub nss_bundle_dir: Option<PathBuf>,
    pub activation_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    /// Logical browser name -> binary, consulted before platform defaults
    pub browser_paths: HashMap<String, PathBuf>,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            proxy_host: "127.0.0.1".to_string(),
            config_root: default_config_root(),
            ca_cert_path: None,
            nss_bundle_dir: None,
            activation_timeout_secs: 30,
            shutdown_timeout_secs: 5,
            browser_paths: HashMap::new(),
        }
    }
}

fn default_config_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".tether")
}

impl TetherConfig {
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!("Loading config from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("Invalid config file {:?}: {}", path, e)))
    }

    /// Load `path`, or `<default root>/config.json` if it exists, or defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = default_config_root().join("config.json");
                if default_path.exists() {
                    Self::load(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.ca_cert_path
            .clone()
            .unwrap_or_else(|| self.config_root.join("ca.crt"))
    }

    pub fn nss_bundle_dir(&self) -> PathBuf {
        self.nss_bundle_dir
            .clone()
            .unwrap_or_else(|| self.config_root.join("nss"))
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.config_root.join("profiles")
    }

    pub fn activation_timeout(&self) -> Duration {
        Duration::from_secs(self.activation_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Shared, read-only inputs every target is constructed with
#[derive(Debug, Clone)]
pub struct TargetContext {
    pub config: Arc<TetherConfig>,
    pub ca: Arc<CaCertificate>,
}

impl TargetContext {
    pub fn new(config: TetherConfig, ca: CaCertificate) -> Self {
        Self {
            config: Arc::new(config),
            ca: Arc::new(ca),
        }
    }

    pub fn proxy_host(&self) -> &str {
        &self.config.proxy_host
    }

    pub fn proxy_url(&self, port: u16) -> String {
        format!("http://{}:{}", self.config.proxy_host, port)
    }
}
