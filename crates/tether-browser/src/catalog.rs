//! Resolving logical browser names ("chrome", "firefox-nightly") to installed
//! binaries.

use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tether_core::{CommandRunner, CommandSpec, Platform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chromium,
    Firefox,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowserInfo {
    pub name: String,
    pub path: PathBuf,
    pub version: Option<String>,
    pub kind: BrowserKind,
}

#[async_trait]
pub trait BrowserCatalog: Send + Sync {
    async fn lookup(&self, name: &str) -> Option<BrowserInfo>;

    async fn require(&self, name: &str) -> Result<BrowserInfo> {
        self.lookup(name)
            .await
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }
}

struct KnownBrowser {
    name: &'static str,
    kind: BrowserKind,
    macos: &'static [&'static str],
    windows: &'static [&'static str],
    linux: &'static [&'static str],
    /// Names tried on PATH after the fixed locations
    path_names: &'static [&'static str],
}

const KNOWN_BROWSERS: &[KnownBrowser] = &[
    KnownBrowser {
        name: "chrome",
        kind: BrowserKind::Chromium,
        macos: &["/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"],
        windows: &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"%LOCALAPPDATA%\Google\Chrome\Application\chrome.exe",
        ],
        linux: &["/opt/google/chrome/chrome", "/usr/bin/google-chrome"],
        path_names: &["google-chrome", "google-chrome-stable"],
    },
    KnownBrowser {
        name: "chrome-beta",
        kind: BrowserKind::Chromium,
        macos: &["/Applications/Google Chrome Beta.app/Contents/MacOS/Google Chrome Beta"],
        windows: &[r"C:\Program Files\Google\Chrome Beta\Application\chrome.exe"],
        linux: &["/opt/google/chrome-beta/chrome"],
        path_names: &["google-chrome-beta"],
    },
    KnownBrowser {
        name: "chrome-dev",
        kind: BrowserKind::Chromium,
        macos: &["/Applications/Google Chrome Dev.app/Contents/MacOS/Google Chrome Dev"],
        windows: &[r"C:\Program Files\Google\Chrome Dev\Application\chrome.exe"],
        linux: &["/opt/google/chrome-unstable/chrome"],
        path_names: &["google-chrome-unstable"],
    },
    KnownBrowser {
        name: "chrome-canary",
        kind: BrowserKind::Chromium,
        macos: &["/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary"],
        windows: &[r"%LOCALAPPDATA%\Google\Chrome SxS\Application\chrome.exe"],
        linux: &[],
        path_names: &[],
    },
    KnownBrowser {
        name: "chromium",
        kind: BrowserKind::Chromium,
        macos: &["/Applications/Chromium.app/Contents/MacOS/Chromium"],
        windows: &[r"%LOCALAPPDATA%\Chromium\Application\chrome.exe"],
        linux: &["/usr/lib/chromium/chromium", "/usr/bin/chromium"],
        path_names: &["chromium", "chromium-browser"],
    },
    KnownBrowser {
        name: "edge",
        kind: BrowserKind::Chromium,
        macos: &["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"],
        windows: &[
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
            r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
        ],
        linux: &["/opt/microsoft/msedge/msedge"],
        path_names: &["microsoft-edge", "microsoft-edge-stable"],
    },
    KnownBrowser {
        name: "brave",
        kind: BrowserKind::Chromium,
        macos: &["/Applications/Brave Browser.app/Contents/MacOS/Brave Browser"],
        windows: &[
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
            r"%LOCALAPPDATA%\BraveSoftware\Brave-Browser\Application\brave.exe",
        ],
        linux: &["/opt/brave.com/brave/brave"],
        path_names: &["brave-browser", "brave"],
    },
    KnownBrowser {
        name: "opera",
        kind: BrowserKind::Chromium,
        macos: &["/Applications/Opera.app/Contents/MacOS/Opera"],
        windows: &[r"%LOCALAPPDATA%\Programs\Opera\opera.exe"],
        linux: &["/usr/lib/x86_64-linux-gnu/opera/opera"],
        path_names: &["opera"],
    },
    KnownBrowser {
        name: "vivaldi",
        kind: BrowserKind::Chromium,
        macos: &["/Applications/Vivaldi.app/Contents/MacOS/Vivaldi"],
        windows: &[r"%LOCALAPPDATA%\Vivaldi\Application\vivaldi.exe"],
        linux: &["/opt/vivaldi/vivaldi"],
        path_names: &["vivaldi", "vivaldi-stable"],
    },
    KnownBrowser {
        name: "firefox",
        kind: BrowserKind::Firefox,
        macos: &["/Applications/Firefox.app/Contents/MacOS/firefox"],
        windows: &[
            r"C:\Program Files\Mozilla Firefox\firefox.exe",
            r"C:\Program Files (x86)\Mozilla Firefox\firefox.exe",
        ],
        linux: &["/usr/lib/firefox/firefox"],
        path_names: &["firefox"],
    },
    KnownBrowser {
        name: "firefox-developer",
        kind: BrowserKind::Firefox,
        macos: &["/Applications/Firefox Developer Edition.app/Contents/MacOS/firefox"],
        windows: &[r"C:\Program Files\Firefox Developer Edition\firefox.exe"],
        linux: &[],
        path_names: &["firefox-developer-edition"],
    },
    KnownBrowser {
        name: "firefox-nightly",
        kind: BrowserKind::Firefox,
        macos: &["/Applications/Firefox Nightly.app/Contents/MacOS/firefox"],
        windows: &[r"C:\Program Files\Firefox Nightly\firefox.exe"],
        linux: &[],
        path_names: &["firefox-nightly"],
    },
];

fn known(name: &str) -> Option<&'static KnownBrowser> {
    KNOWN_BROWSERS.iter().find(|b| b.name == name)
}

fn kind_for(name: &str) -> BrowserKind {
    match known(name) {
        Some(browser) => browser.kind,
        None if name.contains("firefox") => BrowserKind::Firefox,
        None => BrowserKind::Chromium,
    }
}

fn expand_local_app_data(path: &str) -> Option<PathBuf> {
    match path.strip_prefix(r"%LOCALAPPDATA%\") {
        Some(rest) => dirs::data_local_dir().map(|dir| dir.join(rest)),
        None => Some(PathBuf::from(path)),
    }
}

/// The download-free lookup: configured overrides, then the usual install
/// locations, then PATH
pub struct DefaultBrowserCatalog {
    overrides: HashMap<String, PathBuf>,
    platform: Platform,
    runner: Arc<dyn CommandRunner>,
    cache: Mutex<HashMap<String, BrowserInfo>>,
}

impl DefaultBrowserCatalog {
    pub fn new(overrides: HashMap<String, PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            overrides,
            platform: Platform::current(),
            runner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Candidate binaries for `name`, in lookup order
    fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(path) = self.overrides.get(name) {
            candidates.push(path.clone());
        }

        if let Some(browser) = known(name) {
            let fixed = match self.platform {
                Platform::MacOs => browser.macos,
                Platform::Windows => browser.windows,
                Platform::Linux => browser.linux,
                Platform::Other => &[],
            };
            candidates.extend(fixed.iter().filter_map(|p| expand_local_app_data(p)));
            candidates.extend(
                browser
                    .path_names
                    .iter()
                    .filter_map(|bin| which::which(bin).ok()),
            );
        }

        candidates
    }

    async fn version(&self, path: &Path) -> Option<String> {
        // Windows Chromium builds open a window instead of printing a version
        if self.platform == Platform::Windows {
            return None;
        }

        let spec = CommandSpec::new(path.to_string_lossy()).arg("--version");
        match self.runner.run(&spec).await {
            Ok(output) if output.success() => parse_version(&output.stdout),
            _ => None,
        }
    }
}

#[async_trait]
impl BrowserCatalog for DefaultBrowserCatalog {
    async fn lookup(&self, name: &str) -> Option<BrowserInfo> {
        if let Some(info) = self.cache.lock().get(name) {
            return Some(info.clone());
        }

        let path = self
            .candidates(name)
            .into_iter()
            .find(|candidate| validate_executable(candidate).is_ok())?;

        tracing::debug!("Resolved browser {} to {:?}", name, path);
        let info = BrowserInfo {
            name: name.to_string(),
            version: self.version(&path).await,
            kind: kind_for(name),
            path,
        };

        self.cache.lock().insert(name.to_string(), info.clone());
        Some(info)
    }
}

/// Pull the first dotted version number out of `--version` output
pub fn parse_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|word| word.chars().next().is_some_and(|c| c.is_ascii_digit()) && word.contains('.'))
        .map(|word| word.trim_end_matches(',').to_string())
}

/// Validate that a path exists and is executable
pub fn validate_executable(path: &Path) -> Result<PathBuf> {
    if !path.is_file() {
        return Err(Error::NotFound(path.display().to_string()));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::metadata(path)?.permissions();
        if permissions.mode() & 0o111 == 0 {
            return Err(Error::Browser(format!(
                "Binary not executable: {}",
                path.display()
            )));
        }
    }

    Ok(path.to_path_buf())
}

/// Fixed answers. For tests and embedding.
#[derive(Default)]
pub struct StaticCatalog {
    browsers: HashMap<String, BrowserInfo>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.browsers.insert(
            name.to_string(),
            BrowserInfo {
                name: name.to_string(),
                path: path.into(),
                version: None,
                kind: kind_for(name),
            },
        );
        self
    }
}

#[async_trait]
impl BrowserCatalog for StaticCatalog {
    async fn lookup(&self, name: &str) -> Option<BrowserInfo> {
        self.browsers.get(name).cloned()
    }
}
