//! Intercepting the browser the user already has open, with their real
//! profile. The running root process has to go first, which needs consent.

use super::{ChromiumFlavor, LaunchOptions, launch, stop_all, stop_instance};
use crate::catalog::BrowserCatalog;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    ActivationKey, ActivationOutcome, ActivationRequest, Error, InstanceMap, MARKER_URL, Platform,
    ProcessHandle, ProcessInfo, ProcessTable, Result, Signal, Target, TargetContext,
};

#[derive(Debug, Clone, Copy)]
pub struct CloseTiming {
    pub poll: Duration,
    pub graceful: Duration,
    pub hard: Duration,
}

impl Default for CloseTiming {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(250),
            graceful: Duration::from_secs(5),
            hard: Duration::from_secs(5),
        }
    }
}

pub struct ExistingChromium {
    flavor: ChromiumFlavor,
    context: TargetContext,
    catalog: Arc<dyn BrowserCatalog>,
    processes: Arc<dyn ProcessTable>,
    platform: Platform,
    /// Holds at most one entry: there is only one real profile
    instances: InstanceMap<ActivationKey, ProcessHandle>,
    timing: CloseTiming,
}

impl ExistingChromium {
    pub fn new(
        flavor: ChromiumFlavor,
        context: TargetContext,
        catalog: Arc<dyn BrowserCatalog>,
        processes: Arc<dyn ProcessTable>,
    ) -> Self {
        Self {
            flavor,
            context,
            catalog,
            processes,
            platform: Platform::current(),
            instances: InstanceMap::new(),
            timing: CloseTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: CloseTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    fn display_name(&self, binary: &Path) -> String {
        binary
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.flavor.browser.clone())
    }

    /// Graceful close, escalating to a hard kill. Errors if the process
    /// survives both.
    async fn close_running(&self, pid: u32) -> Result<()> {
        tracing::info!("Closing running {} (pid {})", self.flavor.browser, pid);

        self.processes.terminate(pid, Signal::Graceful).await;
        if self.wait_gone(pid, self.timing.graceful).await {
            return Ok(());
        }

        tracing::warn!("{} ignored graceful close, killing pid {}", self.flavor.browser, pid);
        self.processes.terminate(pid, Signal::Hard).await;
        if self.wait_gone(pid, self.timing.hard).await {
            return Ok(());
        }

        Err(Error::Process(format!(
            "{} (pid {}) did not exit",
            self.flavor.browser, pid
        )))
    }

    async fn wait_gone(&self, pid: u32, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.processes.is_alive(pid).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.timing.poll).await;
        }
    }
}

#[async_trait]
impl Target for ExistingChromium {
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
        if self.instances.is_occupied(key) {
            return Ok(ActivationOutcome::default());
        }
        if let Some(other) = self.instances.keys().first() {
            return Err(Error::Unknown(format!(
                "{} is already intercepted on {}",
                self.flavor.browser, other
            )));
        }
        let Some(reservation) = self.instances.try_reserve(key.clone()) else {
            return Ok(ActivationOutcome::default());
        };

        let browser = self.catalog.require(&self.flavor.browser).await?;

        let processes = self.processes.list_user_processes().await;
        let running = find_default_root(
            self.platform,
            &browser.path,
            self.flavor.channel.as_deref(),
            &processes,
        );

        let killed = match running {
            Some(_) if !request.options.close_confirmed => {
                return Err(Error::ConfirmationRequired(self.display_name(&browser.path)));
            }
            Some(root) => {
                self.close_running(root.pid).await?;
                true
            }
            None => false,
        };

        let mut options = LaunchOptions::intercepted(
            self.context.proxy_url(request.proxy_port),
            self.context.ca.spki_fingerprint(),
            MARKER_URL,
        )
        .flag("--test-type")
        .flag("--no-first-run")
        .flag("--no-default-browser-check");
        if killed {
            options = options.flag("--restore-last-session");
        }

        let instances = self.instances.clone();
        let exit_key = key.clone();
        let handle = launch(&self.flavor.id, &browser.path, options.to_args(), move |_| {
            instances.remove(&exit_key);
        })?;
        reservation.commit(handle);

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

/// `/Applications/Google Chrome.app/Contents/MacOS/Google Chrome` ->
/// `/Applications/Google Chrome.app`
fn app_bundle(binary: &Path) -> Option<PathBuf> {
    let mut bundle = PathBuf::new();
    for component in binary.components() {
        bundle.push(component);
        if let Component::Normal(name) = component {
            if name.to_string_lossy().ends_with(".app") {
                return Some(bundle);
            }
        }
    }
    None
}

/// Whether `process` is the browser binary itself rather than a helper or an
/// unrelated program
pub fn is_browser_process(
    platform: Platform,
    binary: &Path,
    channel: Option<&str>,
    process: &ProcessInfo,
) -> bool {
    let Some(exe) = &process.exe else {
        return false;
    };

    if platform == Platform::MacOs {
        return match app_bundle(binary) {
            Some(bundle) => exe
                .strip_prefix(&bundle)
                .is_ok_and(|rest| rest.starts_with("Contents/MacOS")),
            None => exe == binary,
        };
    }

    let same_name = match (exe.file_name(), binary.file_name()) {
        (Some(a), Some(b)) => a.to_string_lossy().eq_ignore_ascii_case(&b.to_string_lossy()),
        _ => false,
    };
    if !same_name {
        return false;
    }

    match channel {
        Some(channel) => exe.components().any(|c| {
            c.as_os_str()
                .to_string_lossy()
                .to_lowercase()
                .contains(&channel.to_lowercase())
        }),
        None => true,
    }
}

/// The root process of the user's default profile, if the browser is running
pub fn find_default_root(
    platform: Platform,
    binary: &Path,
    channel: Option<&str>,
    processes: &[ProcessInfo],
) -> Option<ProcessInfo> {
    processes
        .iter()
        .filter(|p| is_browser_process(platform, binary, channel, p))
        .find(|p| !p.has_arg_prefix("--type=") && !p.has_arg_prefix("--user-data-dir="))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(pid: u32, exe: &str, args: &[&str]) -> ProcessInfo {
        ProcessInfo {
            pid,
            name: Path::new(exe)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned(),
            exe: Some(PathBuf::from(exe)),
            cmd: std::iter::once(exe)
                .chain(args.iter().copied())
                .map(String::from)
                .collect(),
        }
    }

    const MAC_CHROME: &str = "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome";

    #[test]
    fn test_macos_excludes_helpers() {
        let binary = Path::new(MAC_CHROME);
        let main = proc(1, MAC_CHROME, &[]);
        let helper = proc(
            2,
            "/Applications/Google Chrome.app/Contents/Frameworks/Google Chrome Framework.framework/Versions/126/Helpers/Google Chrome Helper.app/Contents/MacOS/Google Chrome Helper",
            &["--type=renderer"],
        );
        let other = proc(3, "/Applications/Slack.app/Contents/MacOS/Slack", &[]);

        assert!(is_browser_process(Platform::MacOs, binary, None, &main));
        assert!(!is_browser_process(Platform::MacOs, binary, None, &helper));
        assert!(!is_browser_process(Platform::MacOs, binary, None, &other));
    }

    #[test]
    fn test_channel_disambiguates_by_path_segment() {
        let binary = Path::new("/opt/google/chrome-beta/chrome");
        let stable = proc(1, "/opt/google/chrome/chrome", &[]);
        let beta = proc(2, "/opt/google/chrome-beta/chrome", &[]);

        assert!(!is_browser_process(Platform::Linux, binary, Some("beta"), &stable));
        assert!(is_browser_process(Platform::Linux, binary, Some("beta"), &beta));
        assert!(is_browser_process(Platform::Linux, binary, None, &stable));
    }

    #[test]
    fn test_root_skips_children_and_custom_profiles() {
        let binary = Path::new("/opt/google/chrome/chrome");
        let processes = vec![
            proc(10, "/opt/google/chrome/chrome", &["--type=gpu-process"]),
            proc(11, "/opt/google/chrome/chrome", &["--user-data-dir=/tmp/other"]),
            proc(12, "/opt/google/chrome/chrome", &["--restore-last-session"]),
        ];

        let root = find_default_root(Platform::Linux, binary, None, &processes).unwrap();
        assert_eq!(root.pid, 12);
        assert!(find_default_root(Platform::Linux, binary, None, &processes[..2]).is_none());
    }

    #[cfg(unix)]
    mod lifecycle {
        use super::*;
        use crate::catalog::StaticCatalog;
        use crate::test_support::{fake_browser, test_context};
        use tether_core::{ErrorKind, FakeProcessTable, TargetOptions};

        fn target(
            dir: &Path,
            table: Arc<FakeProcessTable>,
        ) -> ExistingChromium {
            let binary = fake_browser(dir);
            ExistingChromium::new(
                ChromiumFlavor::new("existing-chrome", "chrome"),
                test_context(dir),
                Arc::new(StaticCatalog::new().with("chrome", binary)),
                table,
            )
            .with_platform(Platform::Linux)
            .with_timing(CloseTiming {
                poll: Duration::from_millis(5),
                graceful: Duration::from_millis(30),
                hard: Duration::from_millis(30),
            })
        }

        fn running_root(dir: &Path) -> ProcessInfo {
            let binary = fake_browser(dir);
            ProcessInfo {
                pid: 4242,
                name: "chrome".to_string(),
                exe: Some(binary.clone()),
                cmd: vec![binary.to_string_lossy().into_owned()],
            }
        }

        #[tokio::test]
        async fn test_unconfirmed_close_is_refused_without_kill() {
            let dir = tempfile::tempdir().unwrap();
            let table = Arc::new(FakeProcessTable::new(vec![running_root(dir.path())]));
            let target = target(dir.path(), table.clone());
            let key = ActivationKey::Port(8281);

            let err = target
                .activate(&key, &ActivationRequest::new(8281))
                .await
                .unwrap_err();

            assert_eq!(err.kind(), ErrorKind::ConfirmationRequired);
            assert!(!err.reportable());
            assert!(table.signals().is_empty());
            assert!(table.contains(4242));
            assert!(!target.is_active(&key));
            assert!(!target.instances.is_occupied(&key));
        }

        #[tokio::test]
        async fn test_confirmed_close_escalates_and_relaunches() {
            let dir = tempfile::tempdir().unwrap();
            let table = Arc::new(
                FakeProcessTable::new(vec![running_root(dir.path())])
                    .exiting_on(vec![Signal::Hard]),
            );
            let target = target(dir.path(), table.clone());
            let key = ActivationKey::Port(8281);
            let request = ActivationRequest::new(8281).with_options(TargetOptions {
                close_confirmed: true,
                ..Default::default()
            });

            target.activate(&key, &request).await.unwrap();

            assert_eq!(
                table.signals(),
                vec![(4242, Signal::Graceful), (4242, Signal::Hard)]
            );
            assert!(target.is_active(&key));

            let other = target
                .activate(&ActivationKey::Port(9000), &ActivationRequest::new(9000))
                .await;
            assert!(other.is_err());

            target.deactivate(&key).await.unwrap();
            assert!(!target.is_active(&key));
        }

        #[tokio::test]
        async fn test_not_running_launches_directly() {
            let dir = tempfile::tempdir().unwrap();
            let table = Arc::new(FakeProcessTable::new(Vec::new()));
            let target = target(dir.path(), table.clone());
            let key = ActivationKey::Port(8281);

            target
                .activate(&key, &ActivationRequest::new(8281))
                .await
                .unwrap();
            assert!(target.is_active(&key));
            assert!(table.signals().is_empty());

            target.deactivate_all().await.unwrap();
        }
    }
}
