//! Turning global flags into a loaded config, CA and the default target set.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tether_browser::{
    BrowserCatalog, ChromiumFlavor, DefaultBrowserCatalog, ExistingChromium, Firefox,
    FreshChromium,
};
use tether_core::{
    CommandRunner, Facade, ProcessTable, SystemProcessTable, SystemRunner, Target, TargetContext,
    TargetRegistry, TetherConfig,
};
use tether_debug::ElectronDebug;
use tether_mobile::{AndroidDevice, IosSimulator};
use tether_trust::{
    CertificateAuthority, CertificateTrustManager, SystemProxyToggle, SystemWideProxy,
};

/// `(target id, catalog name)` for browsers launched with a throwaway profile
const FRESH_CHROMIUM: &[(&str, &str)] = &[
    ("fresh-chrome", "chrome"),
    ("fresh-chrome-beta", "chrome-beta"),
    ("fresh-chrome-dev", "chrome-dev"),
    ("fresh-chrome-canary", "chrome-canary"),
    ("fresh-chromium", "chromium"),
    ("fresh-edge", "edge"),
    ("fresh-brave", "brave"),
    ("fresh-opera", "opera"),
    ("fresh-vivaldi", "vivaldi"),
];

/// `(target id, catalog name, channel path segment)` for relaunching the
/// user's own browser
const EXISTING_CHROMIUM: &[(&str, &str, Option<&str>)] = &[
    ("existing-chrome", "chrome", None),
    ("existing-chrome-beta", "chrome-beta", Some("beta")),
    ("existing-chromium", "chromium", None),
    ("existing-edge", "edge", None),
    ("existing-brave", "brave", None),
];

const FIREFOX: &[(&str, &str)] = &[
    ("fresh-firefox", "firefox"),
    ("fresh-firefox-dev", "firefox-developer"),
    ("fresh-firefox-nightly", "firefox-nightly"),
];

/// Global flags that shape configuration
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub config_root: Option<PathBuf>,
    pub proxy_host: Option<String>,
    pub ca_cert: Option<PathBuf>,
}

pub fn load_config(options: &GlobalOptions) -> Result<TetherConfig> {
    let config_file = options.config.clone().or_else(|| {
        options
            .config_root
            .as_ref()
            .map(|root| root.join("config.json"))
            .filter(|path| path.exists())
    });
    let mut config = TetherConfig::load_or_default(config_file.as_deref())?;

    if let Some(root) = &options.config_root {
        config.config_root = root.clone();
    }
    if let Some(host) = &options.proxy_host {
        config.proxy_host = host.clone();
    }
    if let Some(cert) = &options.ca_cert {
        config.ca_cert_path = Some(cert.clone());
    }

    tracing::debug!("Using config root {:?}", config.config_root);
    Ok(config)
}

/// Load the CA, generating one on first use
pub fn load_context(config: TetherConfig) -> Result<TargetContext> {
    let cert_path = config.ca_cert_path();
    let (authority, generated) = CertificateAuthority::load_or_generate(&cert_path)
        .with_context(|| format!("Failed to load CA certificate from {:?}", cert_path))?;
    if generated {
        tracing::info!("Generated a new CA certificate at {:?}", cert_path);
    }

    let ca = authority.certificate(&cert_path)?;
    Ok(TargetContext::new(config, ca))
}

pub fn build_targets(context: &TargetContext) -> Vec<Arc<dyn Target>> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let processes: Arc<dyn ProcessTable> = Arc::new(SystemProcessTable::new());
    let catalog: Arc<dyn BrowserCatalog> = Arc::new(DefaultBrowserCatalog::new(
        context.config.browser_paths.clone(),
        runner.clone(),
    ));

    let mut targets: Vec<Arc<dyn Target>> = Vec::new();

    for (id, browser) in FRESH_CHROMIUM {
        targets.push(Arc::new(FreshChromium::new(
            ChromiumFlavor::new(*id, *browser),
            context.clone(),
            catalog.clone(),
        )));
    }

    for (id, browser, channel) in EXISTING_CHROMIUM {
        let mut flavor = ChromiumFlavor::new(*id, *browser);
        if let Some(channel) = channel {
            flavor = flavor.channel(*channel);
        }
        targets.push(Arc::new(ExistingChromium::new(
            flavor,
            context.clone(),
            catalog.clone(),
            processes.clone(),
        )));
    }

    for (id, browser) in FIREFOX {
        targets.push(Arc::new(Firefox::new(
            *id,
            *browser,
            context.clone(),
            catalog.clone(),
            runner.clone(),
            processes.clone(),
        )));
    }

    targets.push(Arc::new(ElectronDebug::new(context.clone(), processes.clone())));

    targets.push(Arc::new(SystemWideProxy::new(
        context.clone(),
        Arc::new(SystemProxyToggle::new(runner.clone())),
        Arc::new(CertificateTrustManager::new(runner.clone())),
    )));

    targets.push(Arc::new(AndroidDevice::new(context.clone(), runner.clone())));
    targets.push(Arc::new(IosSimulator::new(context.clone(), runner)));

    targets
}

pub fn build_registry(context: &TargetContext) -> Result<Arc<TargetRegistry>> {
    Ok(Arc::new(TargetRegistry::new(build_targets(context))?))
}

/// Registry plus façade. Needs a running tokio runtime.
pub fn build_facade(options: &GlobalOptions) -> Result<(TargetContext, Facade)> {
    let context = load_context(load_config(options)?)?;
    let registry = build_registry(&context)?;
    let facade = Facade::new(registry, context.config.activation_timeout());
    Ok((context, facade))
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn context(dir: &std::path::Path) -> TargetContext {
        let options = GlobalOptions {
            config_root: Some(dir.to_path_buf()),
            ..Default::default()
        };
        load_context(load_config(&options).unwrap()).unwrap()
    }

    #[test]
    fn test_default_targets_have_unique_ids() {
        let dir = tempfile::tempdir().unwrap();
        let targets = build_targets(&context(dir.path()));

        let ids: HashSet<&str> = targets.iter().map(|t| t.id()).collect();
        assert_eq!(ids.len(), targets.len());
        for id in [
            "fresh-chrome",
            "existing-chrome",
            "fresh-firefox",
            "electron-debug",
            "system-proxy",
            "android",
            "ios-simulator",
        ] {
            assert!(ids.contains(id), "missing {}", id);
        }
    }

    #[test]
    fn test_overrides_apply_and_ca_is_generated_once() {
        let dir = tempfile::tempdir().unwrap();
        let options = GlobalOptions {
            config_root: Some(dir.path().to_path_buf()),
            proxy_host: Some("10.0.0.2".to_string()),
            ..Default::default()
        };

        let config = load_config(&options).unwrap();
        assert_eq!(config.proxy_host, "10.0.0.2");
        assert_eq!(config.config_root, dir.path());

        let first = load_context(config.clone()).unwrap();
        let second = load_context(config).unwrap();
        assert!(dir.path().join("ca.crt").exists());
        assert_eq!(first.ca.spki_fingerprint(), second.ca.spki_fingerprint());
        assert_eq!(first.proxy_url(8281), "http://10.0.0.2:8281");
    }
}
