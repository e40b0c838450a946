//! Firefox target. Firefox ignores the OS trust store and has no SPKI
//! allow-list flag, so the CA goes into the profile's own NSS database and
//! the proxy is configured through `user.js`.

pub mod nss;
pub mod prefs;

pub use nss::{NssLocator, NssTool};

use crate::catalog::BrowserCatalog;
use crate::chromium::{launch, stop_instance, stop_all};
use crate::profile::ManagedProfile;
use crate::Error as BrowserError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    ActivationKey, ActivationOutcome, ActivationRequest, CommandRunner, InstanceMap, MARKER_URL,
    Platform, ProcessHandle, ProcessInfo, ProcessTable, Result, Signal, Target, TargetContext,
};

/// Present once Firefox has created the profile's NSS database
const CERT_DB: &str = "cert9.db";
/// Written only after a successful import; holds the CA's SPKI fingerprint
const CA_MARKER: &str = ".tether-ca";
const USER_JS: &str = "user.js";

#[derive(Debug, Clone, Copy)]
pub struct FirstRunTiming {
    /// How long the unproxied first launch gets to build its profile
    pub settle: Duration,
    /// Wait for a graceful close before killing
    pub close: Duration,
}

impl Default for FirstRunTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(4),
            close: Duration::from_secs(10),
        }
    }
}

pub struct Firefox {
    id: String,
    browser: String,
    version: String,
    context: TargetContext,
    catalog: Arc<dyn BrowserCatalog>,
    runner: Arc<dyn CommandRunner>,
    processes: Arc<dyn ProcessTable>,
    nss: NssLocator,
    platform: Platform,
    instances: InstanceMap<ActivationKey, ProcessHandle>,
    timing: FirstRunTiming,
}

impl Firefox {
    pub fn new(
        id: impl Into<String>,
        browser: impl Into<String>,
        context: TargetContext,
        catalog: Arc<dyn BrowserCatalog>,
        runner: Arc<dyn CommandRunner>,
        processes: Arc<dyn ProcessTable>,
    ) -> Self {
        let nss = NssLocator::new(runner.clone(), context.config.nss_bundle_dir());
        Self {
            id: id.into(),
            browser: browser.into(),
            version: "1.0.0".to_string(),
            context,
            catalog,
            runner,
            processes,
            nss,
            platform: Platform::current(),
            instances: InstanceMap::new(),
            timing: FirstRunTiming::default(),
        }
    }

    pub fn with_nss(mut self, nss: NssLocator) -> Self {
        self.nss = nss;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_timing(mut self, timing: FirstRunTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.context
            .config
            .config_root
            .join(format!("firefox-profile-{}", self.id))
    }

    /// Launch Firefox once without a proxy so it builds the profile
    async fn first_run(&self, binary: &Path, profile: &ManagedProfile) -> Result<()> {
        tracing::info!("Initializing Firefox profile at {:?}", profile.path());

        let handle = launch(&self.id, binary, launch_args(profile.path()), |_| {})?;
        tokio::time::sleep(self.timing.settle).await;

        if let Some(pid) = handle.pid() {
            self.processes.terminate(pid, Signal::Graceful).await;
        }
        if handle.wait_exit_timeout(self.timing.close).await.is_none() {
            tracing::debug!("First-run Firefox did not close, killing it");
            handle.kill_and_wait().await;
        }
        Ok(())
    }

    fn ca_imported(&self, profile: &ManagedProfile) -> bool {
        std::fs::read_to_string(profile.file(CA_MARKER))
            .is_ok_and(|marker| marker.trim() == self.context.ca.spki_fingerprint())
    }

    async fn import_ca(&self, profile: &ManagedProfile) -> Result<()> {
        let tool = self.nss.locate().await.ok_or_else(|| {
            BrowserError::CertDatabase("no NSS certutil available".to_string())
        })?;
        let import = tool.import_spec(
            profile.path(),
            self.context.ca.display_name(),
            self.context.ca.path(),
        );
        self.runner
            .run_checked(&import)
            .await
            .map_err(|e| BrowserError::CertDatabase(e.to_string()))?;

        std::fs::write(profile.file(CA_MARKER), self.context.ca.spki_fingerprint())?;
        tracing::info!("Imported {} into Firefox profile", self.context.ca.display_name());
        Ok(())
    }

    fn write_prefs(&self, profile: &ManagedProfile, port: u16) -> Result<()> {
        let path = profile.file(USER_JS);
        let existing = match std::fs::read_to_string(&path) {
            Ok(contents) => prefs::parse_user_js(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => prefs::Prefs::new(),
            Err(e) => return Err(e.into()),
        };

        let merged = prefs::merged_prefs(existing, self.context.proxy_host(), port);
        std::fs::write(&path, prefs::serialize_user_js(&merged))?;
        Ok(())
    }

    /// Firefox on Windows hands off to a child and exits, so anything still
    /// showing our launch URL is killed by command line
    async fn kill_leftovers(&self, binary_name: &str) {
        for process in self.processes.list_user_processes().await {
            if is_launched_instance(binary_name, &process) {
                tracing::debug!("Killing leftover Firefox process {}", process.pid);
                self.processes.terminate(process.pid, Signal::Hard).await;
            }
        }
    }

    async fn binary_name(&self) -> String {
        match self.catalog.lookup(&self.browser).await {
            Some(info) => info
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            None => self.platform.executable(&self.browser),
        }
    }
}

fn launch_args(profile: &Path) -> Vec<String> {
    vec![
        "-profile".to_string(),
        profile.display().to_string(),
        "-no-remote".to_string(),
        "-new-instance".to_string(),
        MARKER_URL.to_string(),
    ]
}

pub fn is_launched_instance(binary_name: &str, process: &ProcessInfo) -> bool {
    process.name.eq_ignore_ascii_case(binary_name) && process.cmd.iter().any(|a| a == MARKER_URL)
}

#[async_trait]
impl Target for Firefox {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn is_activable(&self) -> bool {
        self.catalog.lookup(&self.browser).await.is_some()
    }

    fn is_active(&self, key: &ActivationKey) -> bool {
        self.instances.is_active(key)
    }

    async fn activate(
        &self,
        key: &ActivationKey,
        request: &ActivationRequest,
    ) -> Result<ActivationOutcome> {
        let Some(reservation) = self.instances.try_reserve(key.clone()) else {
            return Ok(ActivationOutcome::default());
        };

        let browser = self.catalog.require(&self.browser).await?;
        let profile = ManagedProfile::ensure(self.profile_dir())?;

        if !self.ca_imported(&profile) {
            if !profile.file(CERT_DB).exists() {
                self.first_run(&browser.path, &profile).await?;
            }
            self.import_ca(&profile).await?;
        }

        self.write_prefs(&profile, request.proxy_port)?;

        let instances = self.instances.clone();
        let exit_key = key.clone();
        let handle = launch(&self.id, &browser.path, launch_args(profile.path()), move |_| {
            instances.remove(&exit_key);
        })?;
        reservation.commit(handle);

        Ok(ActivationOutcome::default())
    }

    async fn deactivate(&self, key: &ActivationKey) -> Result<()> {
        let tracked = self.instances.is_occupied(key);
        stop_instance(&self.instances, key).await;

        if tracked && self.platform == Platform::Windows {
            self.kill_leftovers(&self.binary_name().await).await;
        }
        Ok(())
    }

    async fn deactivate_all(&self) -> Result<()> {
        let tracked = !self.instances.is_empty();
        stop_all(&self.instances).await;

        if tracked && self.platform == Platform::Windows {
            self.kill_leftovers(&self.binary_name().await).await;
        }
        Ok(())
    }
}
