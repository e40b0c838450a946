use super::{ChromiumFlavor, LaunchOptions, launch, stop_all, stop_instance};
use crate::catalog::BrowserCatalog;
use crate::profile::{ManagedProfile, remove_profile};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    ActivationKey, ActivationOutcome, ActivationRequest, InstanceMap, MARKER_URL, ProcessHandle,
    Result, Target, TargetContext,
};

#[derive(Debug, Clone, Copy)]
pub struct ProfileCleanup {
    /// Wait after the last instance closes before deleting its profile
    pub grace: Duration,
    pub retry: Duration,
}

impl Default for ProfileCleanup {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(500),
            retry: Duration::from_secs(1),
        }
    }
}

/// Launches the browser with a throwaway profile that pins the CA by SPKI
/// instead of relying on the OS trust store
pub struct FreshChromium {
    flavor: ChromiumFlavor,
    context: TargetContext,
    catalog: Arc<dyn BrowserCatalog>,
    instances: InstanceMap<ActivationKey, ProcessHandle>,
    cleanup: ProfileCleanup,
}

impl FreshChromium {
    pub fn new(
        flavor: ChromiumFlavor,
        context: TargetContext,
        catalog: Arc<dyn BrowserCatalog>,
    ) -> Self {
        Self {
            flavor,
            context,
            catalog,
            instances: InstanceMap::new(),
            cleanup: ProfileCleanup::default(),
        }
    }

    pub fn with_cleanup(mut self, cleanup: ProfileCleanup) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.context.config.profiles_dir().join(&self.flavor.browser)
    }
}

#[async_trait]
impl Target for FreshChromium {
    fn id(&self) -> &str {
        &self.flavor.id
    }

    fn version(&self) -> &str {
        &self.flavor.version
    }

    async fn is_activable(&self) -> bool {
        self.catalog.lookup(&self.flavor.browser).await.is_some()
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
            tracing::debug!("{} already active for {}", self.flavor.id, key);
            return Ok(ActivationOutcome::default());
        };

        let browser = self.catalog.require(&self.flavor.browser).await?;
        let profile = ManagedProfile::ensure(self.profile_dir())?;

        let options = LaunchOptions::intercepted(
            self.context.proxy_url(request.proxy_port),
            self.context.ca.spki_fingerprint(),
            MARKER_URL,
        )
        .profile(profile.path())
        .quiet();

        let instances = self.instances.clone();
        let exit_key = key.clone();
        let profile_dir = profile.path().to_path_buf();
        let cleanup = self.cleanup;
        let on_exit = move |_| {
            instances.remove(&exit_key);
            tokio::spawn(async move {
                tokio::time::sleep(cleanup.grace).await;
                if instances.is_idle() && !remove_profile(&profile_dir, cleanup.retry).await {
                    tracing::debug!("Giving up on profile cleanup for {:?}", profile_dir);
                }
            });
        };

        let handle = launch(&self.flavor.id, &browser.path, options.to_args(), on_exit)?;
        if !reservation.commit(handle.clone()) {
            tracing::warn!("{} exited during startup", self.flavor.id);
        }

        Ok(ActivationOutcome::default())
    }

    async fn deactivate(&self, key: &ActivationKey) -> Result<()> {
        stop_instance(&self.instances, key).await;
        Ok(())
    }

    async fn deactivate_all(&self) -> Result<()> {
        stop_all(&self.instances).await;
        Ok(())
    }
}
