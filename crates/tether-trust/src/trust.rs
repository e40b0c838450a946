//! Whether the OS trusts our CA, and installing it when it doesn't.

use crate::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tether_core::{CaCertificate, CommandRunner, CommandSpec, Platform};

/// File name the CA is installed under in Linux anchor directories
pub const LINUX_ANCHOR_NAME: &str = "tether-ca.crt";

const MACOS_SYSTEM_KEYCHAIN: &str = "/Library/Keychains/System.keychain";

lazy_static! {
    static ref TRUST_BLOCK_HEADER: Regex = Regex::new(r"(?m)^Cert \d+: (.+)$").unwrap();
}

/// Queried fresh on every call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CertificateStatus {
    pub installed: bool,
    pub trusted: bool,
}

impl CertificateStatus {
    pub fn is_usable(&self) -> bool {
        self.installed && self.trusted
    }
}

/// Anchor directory and the command that rebuilds the bundle from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinuxTrustStore {
    pub anchors: PathBuf,
    pub refresh: Vec<String>,
}

fn default_linux_stores() -> Vec<LinuxTrustStore> {
    vec![
        LinuxTrustStore {
            anchors: PathBuf::from("/usr/local/share/ca-certificates"),
            refresh: vec!["update-ca-certificates".to_string()],
        },
        LinuxTrustStore {
            anchors: PathBuf::from("/etc/pki/ca-trust/source/anchors"),
            refresh: vec!["update-ca-trust".to_string(), "extract".to_string()],
        },
        LinuxTrustStore {
            anchors: PathBuf::from("/etc/ca-certificates/trust-source/anchors"),
            refresh: vec!["trust".to_string(), "extract-compat".to_string()],
        },
    ]
}

pub struct CertificateTrustManager {
    runner: Arc<dyn CommandRunner>,
    platform: Platform,
    linux_stores: Vec<LinuxTrustStore>,
}

impl CertificateTrustManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::for_platform(runner, Platform::current())
    }

    pub fn for_platform(runner: Arc<dyn CommandRunner>, platform: Platform) -> Self {
        Self {
            runner,
            platform,
            linux_stores: default_linux_stores(),
        }
    }

    pub fn with_linux_stores(mut self, stores: Vec<LinuxTrustStore>) -> Self {
        self.linux_stores = stores;
        self
    }

    pub async fn status(&self, ca: &CaCertificate) -> Result<CertificateStatus> {
        let status = match self.platform {
            Platform::MacOs => self.macos_status(ca).await?,
            Platform::Windows => self.windows_status(ca).await?,
            Platform::Linux => self.linux_status(),
            Platform::Other => CertificateStatus::default(),
        };

        tracing::debug!(
            "CA {} installed: {}, trusted: {}",
            ca.display_name(),
            status.installed,
            status.trusted
        );
        Ok(status)
    }

    async fn macos_status(&self, ca: &CaCertificate) -> Result<CertificateStatus> {
        let name = ca.display_name();

        let found = self
            .runner
            .run(&CommandSpec::new("security").args(["find-certificate", "-c", name]))
            .await?;
        if !found.success() {
            return Ok(CertificateStatus::default());
        }

        // Admin domain first, then the user's own trust settings
        let mut trusted = false;
        for domain_args in [vec!["dump-trust-settings", "-d"], vec!["dump-trust-settings"]] {
            let dump = self
                .runner
                .run(&CommandSpec::new("security").args(domain_args))
                .await?;
            if dump.success() && is_trusted_in_dump(&dump.stdout, name) {
                trusted = true;
                break;
            }
        }

        Ok(CertificateStatus {
            installed: true,
            trusted,
        })
    }

    async fn windows_status(&self, ca: &CaCertificate) -> Result<CertificateStatus> {
        let output = self
            .runner
            .run(&CommandSpec::new("certutil").args(["-user", "-store", "Root", ca.display_name()]))
            .await?;

        let present = output.success();
        Ok(CertificateStatus {
            installed: present,
            trusted: present,
        })
    }

    fn linux_status(&self) -> CertificateStatus {
        let present = self
            .linux_stores
            .iter()
            .any(|store| store.anchors.join(LINUX_ANCHOR_NAME).exists());
        CertificateStatus {
            installed: present,
            trusted: present,
        }
    }

    /// Install and trust the CA. Always goes through an OS elevation prompt.
    pub async fn install(&self, ca: &CaCertificate) -> Result<()> {
        tracing::info!("Installing CA certificate {:?}", ca.path());

        match self.platform {
            Platform::MacOs => self.install_macos(ca.path()).await,
            Platform::Windows => self.install_windows(ca.path()).await,
            Platform::Linux => self.install_linux(ca.path()).await,
            Platform::Other => Err(tether_core::Error::Unsupported(
                "certificate installation on this platform".to_string(),
            )
            .into()),
        }
    }

    async fn install_macos(&self, cert_path: &Path) -> Result<()> {
        // The path is passed as argv and shell-quoted by AppleScript
        let command = format!(
            r#"do shell script "security add-trusted-cert -d -r trustRoot -k {} " & quoted form of (item 1 of argv) with administrator privileges"#,
            MACOS_SYSTEM_KEYCHAIN
        );
        let cert_path = cert_path.to_string_lossy();

        let output = self
            .runner
            .run(&CommandSpec::new("osascript").args([
                "-e",
                "on run argv",
                "-e",
                command.as_str(),
                "-e",
                "end run",
                &*cert_path,
            ]))
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(Error::ElevationDenied(output.stderr.trim().to_string()))
        }
    }

    async fn install_windows(&self, cert_path: &Path) -> Result<()> {
        let script = format!(
            "$p = Start-Process -FilePath 'certutil' -ArgumentList '-user','-addstore','Root','{}' -Verb RunAs -Wait -PassThru -WindowStyle Hidden; exit $p.ExitCode",
            cert_path.to_string_lossy().replace('\'', "''")
        );

        let output = self
            .runner
            .run(&CommandSpec::new("powershell").args([
                "-NoProfile",
                "-ExecutionPolicy",
                "Bypass",
                "-Command",
                script.as_str(),
            ]))
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(Error::ElevationDenied(output.stderr.trim().to_string()))
        }
    }

    async fn install_linux(&self, cert_path: &Path) -> Result<()> {
        let store = self
            .linux_stores
            .iter()
            .find(|store| store.anchors.is_dir())
            .ok_or(Error::NoTrustStore)?;

        let has_display =
            std::env::var_os("DISPLAY").is_some() || std::env::var_os("WAYLAND_DISPLAY").is_some();
        let elevate = linux_elevation_tool(has_display);
        let dest = store.anchors.join(LINUX_ANCHOR_NAME);

        let copy = CommandSpec::new(elevate)
            .arg("cp")
            .arg(cert_path.to_string_lossy())
            .arg(dest.to_string_lossy());
        let output = self.runner.run(&copy).await?;
        if !output.success() {
            return Err(Error::ElevationDenied(output.stderr.trim().to_string()));
        }

        let refresh = CommandSpec::new(elevate).args(store.refresh.iter().cloned());
        self.runner.run_checked(&refresh).await?;
        Ok(())
    }
}

/// pkexec shows a graphical prompt; sudo needs a terminal
pub fn linux_elevation_tool(has_display: bool) -> &'static str {
    if has_display { "pkexec" } else { "sudo" }
}

/// Scan `security dump-trust-settings` output for `name`'s block and check it
/// carries no deny result
pub fn is_trusted_in_dump(dump: &str, name: &str) -> bool {
    trust_blocks(dump)
        .into_iter()
        .any(|(cert, body)| cert == name && !body.contains("kSecTrustSettingsResultDeny"))
}

fn trust_blocks(dump: &str) -> Vec<(&str, &str)> {
    let headers: Vec<_> = TRUST_BLOCK_HEADER.captures_iter(dump).collect();

    headers
        .iter()
        .enumerate()
        .filter_map(|(i, caps)| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str().trim();
            let end = headers
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(dump.len(), |m| m.start());
            Some((name, &dump[whole.end()..end]))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{CommandOutput, RecordingRunner};

    const DUMP: &str = "\
Number of trusted certs = 2
Cert 0: Tether CA
   Number of trust settings : 1
   Trust Setting 0:
      Policy OID            : SSL
      Allowed Error         : CSSMERR_TP_CERT_EXPIRED
      Result Type           : kSecTrustSettingsResultTrustRoot
Cert 1: Blocked CA
   Number of trust settings : 1
   Trust Setting 0:
      Result Type           : kSecTrustSettingsResultDeny
";

    fn test_ca() -> CaCertificate {
        test_ca_at("/tmp/ca.crt")
    }

    fn test_ca_at(path: &str) -> CaCertificate {
        let mut params = rcgen::CertificateParams::default();
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, "Tether CA");
        params.distinguished_name = dn;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let key = rcgen::KeyPair::generate().unwrap();
        let pem = params.self_signed(&key).unwrap().pem();
        CaCertificate::from_pem(PathBuf::from(path), pem).unwrap()
    }

    #[test]
    fn test_trust_dump_blocks() {
        assert!(is_trusted_in_dump(DUMP, "Tether CA"));
        assert!(!is_trusted_in_dump(DUMP, "Blocked CA"));
        assert!(!is_trusted_in_dump(DUMP, "Missing CA"));
        assert!(!is_trusted_in_dump("", "Tether CA"));
    }

    #[tokio::test]
    async fn test_macos_installed_but_untrusted() {
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("dump-trust-settings", CommandOutput::ok("Cert 0: Someone Else\n"));
        let manager = CertificateTrustManager::for_platform(runner.clone(), Platform::MacOs);

        let status = manager.status(&test_ca()).await.unwrap();
        assert!(status.installed);
        assert!(!status.trusted);
        assert_eq!(runner.calls_matching("dump-trust-settings").len(), 2);
    }

    #[tokio::test]
    async fn test_macos_missing_skips_trust_dump() {
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("find-certificate", CommandOutput::failed(44, "not found"));
        let manager = CertificateTrustManager::for_platform(runner.clone(), Platform::MacOs);

        let status = manager.status(&test_ca()).await.unwrap();
        assert_eq!(status, CertificateStatus::default());
        assert!(runner.calls_matching("dump-trust-settings").is_empty());
    }

    #[tokio::test]
    async fn test_windows_store_presence_is_trust() {
        let runner = Arc::new(RecordingRunner::new());
        let manager = CertificateTrustManager::for_platform(runner.clone(), Platform::Windows);

        let status = manager.status(&test_ca()).await.unwrap();
        assert!(status.is_usable());
        assert_eq!(
            runner.command_lines(),
            vec!["certutil -user -store Root Tether CA"]
        );
    }

    #[tokio::test]
    async fn test_linux_anchor_presence() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let manager = CertificateTrustManager::for_platform(runner, Platform::Linux)
            .with_linux_stores(vec![LinuxTrustStore {
                anchors: dir.path().to_path_buf(),
                refresh: vec!["update-ca-certificates".to_string()],
            }]);

        assert!(!manager.status(&test_ca()).await.unwrap().installed);
        std::fs::write(dir.path().join(LINUX_ANCHOR_NAME), "pem").unwrap();
        assert!(manager.status(&test_ca()).await.unwrap().trusted);
    }

    #[tokio::test]
    async fn test_macos_install_prompts_for_admin() {
        let runner = Arc::new(RecordingRunner::new());
        let manager = CertificateTrustManager::for_platform(runner.clone(), Platform::MacOs);

        manager.install(&test_ca()).await.unwrap();
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "osascript");
        assert!(calls[0].args[3].contains("with administrator privileges"));
        assert_eq!(calls[0].args.last().unwrap(), "/tmp/ca.crt");
    }

    #[tokio::test]
    async fn test_macos_install_keeps_quotes_out_of_script() {
        let runner = Arc::new(RecordingRunner::new());
        let manager = CertificateTrustManager::for_platform(runner.clone(), Platform::MacOs);
        let path = r#"/Users/me/My "CA" dir/it's\ca.crt"#;

        manager.install(&test_ca_at(path)).await.unwrap();
        let calls = runner.calls();
        let args = &calls[0].args;
        assert_eq!(args.last().unwrap(), path);
        for script in args.iter().skip(1).step_by(2).take(3) {
            assert!(!script.contains("CA\" dir"), "path leaked into {}", script);
        }
        assert!(args[3].contains("quoted form of (item 1 of argv)"));
    }

    #[tokio::test]
    async fn test_cancelled_prompt_is_an_error() {
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("powershell", CommandOutput::failed(1223, "cancelled"));
        let manager = CertificateTrustManager::for_platform(runner, Platform::Windows);

        let result = manager.install(&test_ca()).await;
        assert!(matches!(result, Err(Error::ElevationDenied(_))));
    }

    #[test]
    fn test_elevation_tool_choice() {
        assert_eq!(linux_elevation_tool(true), "pkexec");
        assert_eq!(linux_elevation_tool(false), "sudo");
    }
}
