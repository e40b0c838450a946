use crate::system_proxy::SystemProxyToggle;
use crate::trust::CertificateTrustManager;
use async_trait::async_trait;
use std::sync::Arc;
use tether_core::{
    ActivationKey, ActivationOutcome, ActivationRequest, Error, InstanceMap, Result, Target,
    TargetContext,
};

pub const SYSTEM_PROXY_ID: &str = "system-proxy";

/// Points the whole OS at the proxy. Only one port can own the OS setting,
/// so activating a new port replaces the previous one.
pub struct SystemWideProxy {
    context: TargetContext,
    toggle: Arc<SystemProxyToggle>,
    trust: Arc<CertificateTrustManager>,
    instances: InstanceMap<ActivationKey, ()>,
}

impl SystemWideProxy {
    pub fn new(
        context: TargetContext,
        toggle: Arc<SystemProxyToggle>,
        trust: Arc<CertificateTrustManager>,
    ) -> Self {
        Self {
            context,
            toggle,
            trust,
            instances: InstanceMap::new(),
        }
    }
}

#[async_trait]
impl Target for SystemWideProxy {
    fn id(&self) -> &str {
        SYSTEM_PROXY_ID
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn is_activable(&self) -> bool {
        self.toggle.is_supported()
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
            tracing::debug!("System proxy already active for {}", key);
            return Ok(ActivationOutcome::default());
        };

        let status = self.trust.status(&self.context.ca).await?;
        if !status.is_usable() {
            return Err(Error::CertificateNotInstalled);
        }

        self.toggle
            .enable(self.context.proxy_host(), request.proxy_port)
            .await?;

        for previous in self.instances.keys() {
            if &previous != key {
                self.instances.remove(&previous);
            }
        }
        reservation.commit(());
        Ok(ActivationOutcome::default())
    }

    async fn deactivate(&self, key: &ActivationKey) -> Result<()> {
        if !self.instances.is_active(key) {
            return Ok(());
        }

        self.toggle.disable().await?;
        self.instances.remove(key);
        Ok(())
    }

    async fn deactivate_all(&self) -> Result<()> {
        if self.instances.is_empty() {
            return Ok(());
        }

        self.toggle.disable().await?;
        for key in self.instances.keys() {
            self.instances.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tether_core::{
        CaCertificate, CommandOutput, ErrorKind, Platform, RecordingRunner, TetherConfig,
    };

    fn context() -> TargetContext {
        let mut params = rcgen::CertificateParams::default();
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, "Tether CA");
        params.distinguished_name = dn;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let key = rcgen::KeyPair::generate().unwrap();
        let pem = params.self_signed(&key).unwrap().pem();
        let ca = CaCertificate::from_pem(PathBuf::from("/tmp/ca.crt"), pem).unwrap();
        TargetContext::new(TetherConfig::default(), ca)
    }

    fn target(runner: Arc<RecordingRunner>) -> SystemWideProxy {
        SystemWideProxy::new(
            context(),
            Arc::new(SystemProxyToggle::for_platform(runner.clone(), Platform::Windows)),
            Arc::new(CertificateTrustManager::for_platform(runner, Platform::Windows)),
        )
    }

    #[tokio::test]
    async fn test_untrusted_ca_aborts_before_proxy_change() {
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("-store Root", CommandOutput::failed(1, "not found"));
        let target = target(runner.clone());

        let key = ActivationKey::Port(8281);
        let err = target
            .activate(&key, &ActivationRequest::new(8281))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CertificateNotInstalled);
        assert!(runner.calls_matching("reg add").is_empty());
        assert!(!target.is_active(&key));
    }

    #[tokio::test]
    async fn test_activate_is_idempotent_and_deactivate_clears() {
        let runner = Arc::new(RecordingRunner::new());
        let target = target(runner.clone());
        let key = ActivationKey::Port(8281);
        let request = ActivationRequest::new(8281);

        target.activate(&key, &request).await.unwrap();
        target.activate(&key, &request).await.unwrap();
        assert!(target.is_active(&key));
        assert_eq!(runner.calls_matching("ProxyServer").len(), 1);

        target.deactivate(&key).await.unwrap();
        assert!(!target.is_active(&key));
        target.deactivate(&key).await.unwrap();
        assert_eq!(runner.calls_matching("ProxyEnable /t REG_DWORD /d 0").len(), 1);
    }

    #[tokio::test]
    async fn test_new_port_replaces_previous() {
        let runner = Arc::new(RecordingRunner::new());
        let target = target(runner);

        target
            .activate(&ActivationKey::Port(8000), &ActivationRequest::new(8000))
            .await
            .unwrap();
        target
            .activate(&ActivationKey::Port(8001), &ActivationRequest::new(8001))
            .await
            .unwrap();

        assert!(!target.is_active(&ActivationKey::Port(8000)));
        assert!(target.is_active(&ActivationKey::Port(8001)));
    }
}
