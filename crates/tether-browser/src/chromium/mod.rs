//! Chromium-family targets. One type per launch strategy, parametrized by
//! [`ChromiumFlavor`] for the individual browsers.

pub mod existing;
pub mod fresh;
pub mod options;

pub use existing::ExistingChromium;
pub use fresh::FreshChromium;
pub use options::LaunchOptions;

use futures::future::join_all;
use std::path::Path;
use tether_core::{ActivationKey, ExitInfo, InstanceMap, ProcessHandle, spawn_tracked};

/// Which browser a target drives and under what id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromiumFlavor {
    pub id: String,
    /// Catalog name
    pub browser: String,
    pub version: String,
    /// Path segment that tells this channel's install apart, e.g. "beta"
    pub channel: Option<String>,
}

impl ChromiumFlavor {
    pub fn new(id: impl Into<String>, browser: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            browser: browser.into(),
            version: "1.0.0".to_string(),
            channel: None,
        }
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }
}

pub(crate) fn launch<F>(
    label: &str,
    binary: &Path,
    args: Vec<String>,
    on_exit: F,
) -> tether_core::Result<ProcessHandle>
where
    F: FnOnce(ExitInfo) + Send + 'static,
{
    tracing::debug!("Launching {:?} {}", binary, args.join(" "));
    let mut command = tokio::process::Command::new(binary);
    command.args(args);
    spawn_tracked(label, command, on_exit)
}

/// Request exit and wait for it. The exit hook removes the map entry.
pub(crate) async fn stop_instance(instances: &InstanceMap<ActivationKey, ProcessHandle>, key: &ActivationKey) {
    if let Some(handle) = instances.get(key) {
        tracing::info!("Closing {} for {}", handle.label(), key);
        handle.kill_and_wait().await;
    }
}

pub(crate) async fn stop_all(instances: &InstanceMap<ActivationKey, ProcessHandle>) {
    let keys = instances.keys();
    join_all(keys.iter().map(|key| stop_instance(instances, key))).await;
}
