use std::path::{Path, PathBuf};

/// Chromium only proxies loopback traffic when told to stop bypassing it
const BYPASS_LOOPBACK_EXCLUSION: &str = "<-loopback>";

/// Quiet a managed profile: nothing phones home, nothing competes with the
/// proxy for connections, no first-run UI
const QUIET_FLAGS: &[&str] = &[
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-networking",
    "--disable-component-update",
    "--disable-sync",
    "--disable-domain-reliability",
    "--disable-breakpad",
    "--metrics-recording-only",
    "--disk-cache-size=1",
    "--disable-features=ChromeWhatsNewUI,OptimizationHints,MediaRouter",
];

/// Everything that varies between launches, rendered to an argv
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub proxy_url: String,
    pub bypass: Vec<String>,
    pub spki_fingerprint: String,
    pub profile_dir: Option<PathBuf>,
    pub extra_flags: Vec<String>,
    pub url: String,
}

impl LaunchOptions {
    pub fn intercepted(
        proxy_url: impl Into<String>,
        spki_fingerprint: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            proxy_url: proxy_url.into(),
            bypass: vec![BYPASS_LOOPBACK_EXCLUSION.to_string()],
            spki_fingerprint: spki_fingerprint.into(),
            profile_dir: None,
            extra_flags: Vec::new(),
            url: url.into(),
        }
    }

    pub fn profile(mut self, dir: &Path) -> Self {
        self.profile_dir = Some(dir.to_path_buf());
        self
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.extra_flags.push(flag.into());
        self
    }

    /// The managed-profile flag set used by fresh launches
    pub fn quiet(mut self) -> Self {
        self.extra_flags
            .extend(QUIET_FLAGS.iter().map(|f| f.to_string()));
        self
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--proxy-server={}", self.proxy_url),
            format!("--proxy-bypass-list={}", self.bypass.join(";")),
            format!("--ignore-certificate-errors-spki-list={}", self.spki_fingerprint),
        ];

        if let Some(dir) = &self.profile_dir {
            args.push(format!("--user-data-dir={}", dir.display()));
        }

        args.extend(self.extra_flags.iter().cloned());

        // URL must come last
        args.push(self.url.clone());
        args
    }
}
