//! OS-wide proxy switch.
//!
//! macOS: every enabled network service plus the `launchctl` environment.
//! Windows: the WinINet settings in the user's registry hive.

use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tether_core::{CommandRunner, CommandSpec, Error, Platform};

/// Hosts that stay direct whenever the system proxy is on
pub const BYPASS_ALLOW_LIST: &[&str] = &["*.pusher.com", "*.pusherapp.com", "*.firebaseio.com"];

const PROXY_ENV_VARS: &[&str] = &["http_proxy", "https_proxy", "HTTP_PROXY", "HTTPS_PROXY"];

const INTERNET_SETTINGS_KEY: &str =
    r"HKCU\Software\Microsoft\Windows\CurrentVersion\Internet Settings";

pub struct SystemProxyToggle {
    runner: Arc<dyn CommandRunner>,
    platform: Platform,
    /// Per-service bypass lists as they were before the first enable in this
    /// process. Never overwritten afterwards.
    original_bypass: Mutex<Option<HashMap<String, Vec<String>>>>,
}

impl SystemProxyToggle {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::for_platform(runner, Platform::current())
    }

    pub fn for_platform(runner: Arc<dyn CommandRunner>, platform: Platform) -> Self {
        Self {
            runner,
            platform,
            original_bypass: Mutex::new(None),
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self.platform, Platform::MacOs | Platform::Windows)
    }

    pub async fn enable(&self, host: &str, port: u16) -> Result<()> {
        tracing::info!("Enabling system proxy {}:{}", host, port);
        match self.platform {
            Platform::MacOs => self.enable_macos(host, port).await,
            Platform::Windows => self.enable_windows(host, port).await,
            _ => Err(unsupported()),
        }
    }

    pub async fn disable(&self) -> Result<()> {
        tracing::info!("Disabling system proxy");
        match self.platform {
            Platform::MacOs => self.disable_macos().await,
            Platform::Windows => self.disable_windows().await,
            _ => Err(unsupported()),
        }
    }

    async fn networksetup(&self, args: Vec<String>) -> Result<String> {
        let spec = CommandSpec::new("networksetup").args(args);
        Ok(self.runner.run_checked(&spec).await?.stdout)
    }

    async fn network_services(&self) -> Result<Vec<String>> {
        let output = self
            .networksetup(vec!["-listallnetworkservices".to_string()])
            .await?;
        Ok(parse_network_services(&output))
    }

    async fn capture_bypass(&self, services: &[String]) -> Result<()> {
        if self.original_bypass.lock().is_some() {
            return Ok(());
        }

        let mut captured = HashMap::new();
        for service in services {
            let output = self
                .networksetup(vec!["-getproxybypassdomains".to_string(), service.clone()])
                .await?;
            captured.insert(service.clone(), parse_bypass_domains(&output));
        }

        tracing::debug!("Captured original bypass domains: {:?}", captured);
        self.original_bypass.lock().get_or_insert(captured);
        Ok(())
    }

    fn original_for(&self, service: &str) -> Vec<String> {
        self.original_bypass
            .lock()
            .as_ref()
            .and_then(|map| map.get(service).cloned())
            .unwrap_or_default()
    }

    async fn enable_macos(&self, host: &str, port: u16) -> Result<()> {
        let result = self.apply_macos(host, port).await;
        if let Err(e) = &result {
            tracing::warn!("Enabling system proxy failed, rolling back: {}", e);
            if let Err(restore) = self.disable_macos().await {
                tracing::warn!("Rolling back system proxy failed: {}", restore);
            }
        }
        result
    }

    async fn apply_macos(&self, host: &str, port: u16) -> Result<()> {
        let services = self.network_services().await?;
        self.capture_bypass(&services).await?;
        let port = port.to_string();

        for service in &services {
            for (set, state) in [
                ("-setwebproxy", "-setwebproxystate"),
                ("-setsecurewebproxy", "-setsecurewebproxystate"),
            ] {
                self.networksetup(vec![
                    set.to_string(),
                    service.clone(),
                    host.to_string(),
                    port.clone(),
                ])
                .await?;
                self.networksetup(vec![state.to_string(), service.clone(), "on".to_string()])
                    .await?;
            }

            let merged = merge_bypass(&self.original_for(service), BYPASS_ALLOW_LIST);
            self.set_bypass(service, merged).await?;
        }

        let url = format!("http://{}:{}", host, port);
        for var in PROXY_ENV_VARS {
            let spec = CommandSpec::new("launchctl").args(["setenv", *var, url.as_str()]);
            self.runner.run_checked(&spec).await?;
        }
        Ok(())
    }

    async fn disable_macos(&self) -> Result<()> {
        let services = self.network_services().await?;

        for service in &services {
            for state in ["-setwebproxystate", "-setsecurewebproxystate"] {
                self.networksetup(vec![state.to_string(), service.clone(), "off".to_string()])
                    .await?;
            }

            if self.original_bypass.lock().is_some() {
                self.set_bypass(service, self.original_for(service)).await?;
            }
        }

        for var in PROXY_ENV_VARS {
            let spec = CommandSpec::new("launchctl").args(["unsetenv", *var]);
            if let Err(e) = self.runner.run_checked(&spec).await {
                tracing::warn!("Failed to unset {}: {}", var, e);
            }
        }
        Ok(())
    }

    async fn set_bypass(&self, service: &str, domains: Vec<String>) -> Result<()> {
        let mut args = vec!["-setproxybypassdomains".to_string(), service.to_string()];
        if domains.is_empty() {
            args.push("Empty".to_string());
        } else {
            args.extend(domains);
        }
        self.networksetup(args).await?;
        Ok(())
    }

    async fn reg_add(&self, name: &str, kind: &str, data: &str) -> Result<()> {
        let spec = CommandSpec::new("reg").args([
            "add",
            INTERNET_SETTINGS_KEY,
            "/v",
            name,
            "/t",
            kind,
            "/d",
            data,
            "/f",
        ]);
        self.runner.run_checked(&spec).await?;
        Ok(())
    }

    async fn enable_windows(&self, host: &str, port: u16) -> Result<()> {
        self.reg_add("ProxyServer", "REG_SZ", &format!("{}:{}", host, port))
            .await?;
        self.reg_add("ProxyEnable", "REG_DWORD", "1").await?;
        self.refresh_windows().await;
        Ok(())
    }

    async fn disable_windows(&self) -> Result<()> {
        self.reg_add("ProxyEnable", "REG_DWORD", "0").await?;
        self.refresh_windows().await;
        Ok(())
    }

    /// WinINet only rereads its settings when a client starts up, so open and
    /// close a throwaway browser window
    async fn refresh_windows(&self) {
        let script = "$p = Start-Process -FilePath 'msedge' -ArgumentList '--new-window','about:blank' -WindowStyle Minimized -PassThru; Start-Sleep -Seconds 1; Stop-Process -Id $p.Id -ErrorAction SilentlyContinue";
        let spec = CommandSpec::new("powershell").args(["-NoProfile", "-Command", script]);
        if let Err(e) = self.runner.run_checked(&spec).await {
            tracing::debug!("Proxy settings refresh failed: {}", e);
        }
    }
}

fn unsupported() -> crate::Error {
    Error::Unsupported("system-wide proxy on this platform".to_string()).into()
}

/// Enabled services from `networksetup -listallnetworkservices`, skipping the
/// header line and disabled (`*`-prefixed) entries
pub fn parse_network_services(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| !line.contains("asterisk"))
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('*'))
        .map(String::from)
        .collect()
}

/// `networksetup -getproxybypassdomains` prints one domain per line, or a
/// sentence when none are set
pub fn parse_bypass_domains(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("There aren't any"))
        .map(String::from)
        .collect()
}

/// Original domains followed by any allow-list entries not already present
pub fn merge_bypass(original: &[String], allow_list: &[&str]) -> Vec<String> {
    let mut merged = original.to_vec();
    for domain in allow_list {
        if !merged.iter().any(|d| d == domain) {
            merged.push(domain.to_string());
        }
    }
    merged
}
