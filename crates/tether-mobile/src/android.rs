//! Android over `adb`: reverse-tunnel the proxy port onto the device, point
//! the global HTTP proxy at it, and install the CA as a system certificate.

use crate::Error as MobileError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tether_core::{
    ActivationKey, ActivationOutcome, ActivationRequest, CommandRunner, CommandSpec, InstanceMap,
    Result, Target, TargetContext,
};

pub const ANDROID_ID: &str = "android";

const SYSTEM_CERTS: &str = "/system/etc/security/cacerts";

pub struct AndroidDevice {
    context: TargetContext,
    runner: Arc<dyn CommandRunner>,
    adb: String,
    /// Device id to the proxy port it was pointed at
    instances: InstanceMap<ActivationKey, u16>,
}

impl AndroidDevice {
    pub fn new(context: TargetContext, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            context,
            runner,
            adb: "adb".to_string(),
            instances: InstanceMap::new(),
        }
    }

    pub fn with_adb(mut self, adb: impl Into<String>) -> Self {
        self.adb = adb.into();
        self
    }

    fn adb(&self, device: &str) -> CommandSpec {
        CommandSpec::new(&self.adb).args(["-s", device])
    }

    async fn shell(&self, device: &str, command: &[&str]) -> Result<()> {
        let spec = self.adb(device).arg("shell").args(command.iter().copied());
        self.runner.run_checked(&spec).await?;
        Ok(())
    }

    /// Serials of attached devices that are ready for commands
    pub async fn list_devices(&self) -> Result<Vec<String>> {
        let output = self
            .runner
            .run_checked(&CommandSpec::new(&self.adb).arg("devices"))
            .await?;
        Ok(parse_devices(&output.stdout))
    }

    fn remote_cert_path(&self) -> String {
        format!("{}/{}.0", SYSTEM_CERTS, self.context.ca.subject_hash())
    }

    /// Android names system CAs by subject hash and expects the PEM followed
    /// by the textual dump
    fn write_cert_file(&self) -> Result<PathBuf> {
        let dir = self.context.config.config_root.join("android");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.0", self.context.ca.subject_hash()));
        let mut contents = self.context.ca.pem().trim_end().to_string();
        contents.push('\n');
        contents.push_str(&self.context.ca.text_summary());
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    async fn has_certificate(&self, device: &str) -> bool {
        let spec = self
            .adb(device)
            .args(["shell", "ls", self.remote_cert_path().as_str()]);
        matches!(self.runner.run(&spec).await, Ok(output) if output.success())
    }

    async fn install_certificate(&self, device: &str) -> Result<()> {
        if self.has_certificate(device).await {
            tracing::debug!("CA already present on {}", device);
            return Ok(());
        }

        let local = self.write_cert_file()?;
        let remote = self.remote_cert_path();
        tracing::info!("Installing CA on {} as {}", device, remote);

        self.runner.run_checked(&self.adb(device).arg("root")).await?;
        self.runner
            .run_checked(&self.adb(device).arg("wait-for-device"))
            .await?;
        self.shell(device, &["mount", "-o", "rw,remount", "/system"]).await?;
        self.runner
            .run_checked(
                &self
                    .adb(device)
                    .arg("push")
                    .arg(local.to_string_lossy())
                    .arg(remote.as_str()),
            )
            .await?;
        self.shell(device, &["chmod", "644", remote.as_str()]).await?;
        self.shell(device, &["mount", "-o", "ro,remount", "/system"]).await?;
        self.runner.run_checked(&self.adb(device).arg("reboot")).await?;
        self.runner
            .run_checked(&self.adb(device).arg("wait-for-device"))
            .await?;
        Ok(())
    }

    async fn point_at_proxy(&self, device: &str, port: u16) -> Result<()> {
        let tunnel = format!("tcp:{}", port);
        self.runner
            .run_checked(&self.adb(device).args(["reverse", tunnel.as_str(), tunnel.as_str()]))
            .await?;
        let proxy = format!("127.0.0.1:{}", port);
        self.shell(device, &["settings", "put", "global", "http_proxy", proxy.as_str()])
            .await
    }

    async fn reset(&self, device: &str, port: u16) -> Result<()> {
        self.shell(device, &["settings", "put", "global", "http_proxy", ":0"])
            .await?;
        let tunnel = format!("tcp:{}", port);
        self.runner
            .run_checked(&self.adb(device).args(["reverse", "--remove", tunnel.as_str()]))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Target for AndroidDevice {
    fn id(&self) -> &str {
        ANDROID_ID
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn key_for(&self, request: &ActivationRequest) -> Result<ActivationKey> {
        request.device_key()
    }

    async fn is_activable(&self) -> bool {
        let spec = CommandSpec::new(&self.adb).arg("version");
        matches!(self.runner.run(&spec).await, Ok(output) if output.success())
    }

    fn is_active(&self, key: &ActivationKey) -> bool {
        self.instances.is_active(key)
    }

    async fn activate(
        &self,
        key: &ActivationKey,
        request: &ActivationRequest,
    ) -> Result<ActivationOutcome> {
        let device = key.expect_device()?.to_string();
        let Some(reservation) = self.instances.try_reserve(key.clone()) else {
            return Ok(ActivationOutcome::default());
        };

        // root and reboot restart adbd, which drops reverse mappings
        self.install_certificate(&device).await?;
        self.point_at_proxy(&device, request.proxy_port).await?;

        reservation.commit(request.proxy_port);
        tracing::info!("Android device {} intercepted on port {}", device, request.proxy_port);
        Ok(ActivationOutcome::default())
    }

    async fn deactivate(&self, key: &ActivationKey) -> Result<()> {
        let Some(port) = self.instances.get(key) else {
            return Ok(());
        };
        let device = key.expect_device()?;

        let result = self.reset(device, port).await;
        self.instances.remove(key);
        result
    }

    async fn deactivate_all(&self) -> Result<()> {
        let mut failures = Vec::new();
        for key in self.instances.keys() {
            if let Err(e) = self.deactivate(&key).await {
                failures.push(format!("{}: {}", key, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(MobileError::Device(failures.join("; ")).into())
        }
    }
}

/// `adb devices` output to serials in the `device` state
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;
    use tether_core::{CommandOutput, RecordingRunner, TargetOptions};

    fn request(port: u16, device: &str) -> ActivationRequest {
        ActivationRequest::new(port).with_options(TargetOptions {
            device_id: Some(device.to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn test_parse_devices() {
        let output = "* daemon started successfully\nList of devices attached\nemulator-5554\tdevice\n0123ABC\tunauthorized\nR58M\tdevice product:x model:y\n\n";
        assert_eq!(parse_devices(output), vec!["emulator-5554", "R58M"]);
        assert!(parse_devices("List of devices attached\n\n").is_empty());
    }

    #[tokio::test]
    async fn test_activate_pushes_certificate_and_sets_proxy() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("shell ls", CommandOutput::failed(1, "No such file"));
        let target = AndroidDevice::new(test_context(dir.path()), runner.clone());
        let request = request(8281, "emulator-5554");
        let key = target.key_for(&request).unwrap();

        target.activate(&key, &request).await.unwrap();

        let lines = runner.command_lines();
        let hash = target.context.ca.subject_hash().to_string();
        assert!(lines.iter().any(|l| l.contains("push") && l.ends_with(&format!("/system/etc/security/cacerts/{}.0", hash))));
        assert!(lines.iter().any(|l| l.contains("mount -o ro,remount /system")));
        let n = lines.len();
        assert_eq!(lines[n - 3], "adb -s emulator-5554 wait-for-device");
        assert_eq!(lines[n - 2], "adb -s emulator-5554 reverse tcp:8281 tcp:8281");
        assert_eq!(
            lines[n - 1],
            "adb -s emulator-5554 shell settings put global http_proxy 127.0.0.1:8281"
        );
        assert!(target.is_active(&key));

        let local = std::fs::read_to_string(dir.path().join("android").join(format!("{}.0", hash))).unwrap();
        assert!(local.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(local.contains("Certificate:"));
    }

    #[tokio::test]
    async fn test_reverse_tunnel_is_set_up_after_reboot() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("shell ls", CommandOutput::failed(1, "No such file"));
        let target = AndroidDevice::new(test_context(dir.path()), runner.clone());
        let request = request(8281, "emulator-5554");
        let key = target.key_for(&request).unwrap();

        target.activate(&key, &request).await.unwrap();

        let lines = runner.command_lines();
        let position = |needle: &str| lines.iter().rposition(|l| l.ends_with(needle)).unwrap();
        let reboot = position(" reboot");
        let root = position(" root");
        assert!(position("reverse tcp:8281 tcp:8281") > reboot);
        assert!(position("http_proxy 127.0.0.1:8281") > reboot);
        assert!(lines.iter().position(|l| l.contains(" reverse ")).unwrap() > root);
    }

    #[tokio::test]
    async fn test_reactivate_does_not_repush() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("shell ls", CommandOutput::failed(1, "No such file"));
        let target = AndroidDevice::new(test_context(dir.path()), runner.clone());
        let request = request(8281, "emulator-5554");
        let key = target.key_for(&request).unwrap();

        target.activate(&key, &request).await.unwrap();
        let calls = runner.calls().len();
        target.activate(&key, &request).await.unwrap();

        assert_eq!(runner.calls().len(), calls);
        assert_eq!(runner.calls_matching(" push ").len(), 1);
    }

    #[tokio::test]
    async fn test_certificate_already_on_device_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let target = AndroidDevice::new(test_context(dir.path()), runner.clone());
        let request = request(8281, "emulator-5554");
        let key = target.key_for(&request).unwrap();

        target.activate(&key, &request).await.unwrap();

        assert!(runner.calls_matching(" push ").is_empty());
        assert!(runner.calls_matching(" reboot").is_empty());
    }

    #[tokio::test]
    async fn test_deactivate_never_activated_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let target = AndroidDevice::new(test_context(dir.path()), runner.clone());

        target
            .deactivate(&ActivationKey::Device("emulator-5554".to_string()))
            .await
            .unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_deactivate_resets_proxy() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let target = AndroidDevice::new(test_context(dir.path()), runner.clone());
        let request = request(8282, "emulator-5556");
        let key = target.key_for(&request).unwrap();

        target.activate(&key, &request).await.unwrap();
        target.deactivate(&key).await.unwrap();

        let lines = runner.command_lines();
        assert!(lines.contains(&"adb -s emulator-5556 shell settings put global http_proxy :0".to_string()));
        assert_eq!(lines.last().unwrap(), "adb -s emulator-5556 reverse --remove tcp:8282");
        assert!(!target.is_active(&key));
    }

    #[tokio::test]
    async fn test_missing_device_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let target = AndroidDevice::new(test_context(dir.path()), Arc::new(RecordingRunner::new()));
        assert!(target.key_for(&ActivationRequest::new(8281)).is_err());
    }
}
