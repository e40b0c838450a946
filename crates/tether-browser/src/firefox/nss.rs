//! Finding an NSS `certutil` to seed Firefox's certificate database.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tether_core::{CommandRunner, CommandSpec, Platform};

/// Where a usable `certutil` lives and how to invoke it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NssTool {
    pub path: PathBuf,
    /// Library path the bundled copy needs, as `(var, value)`
    pub env: Option<(String, String)>,
}

impl NssTool {
    /// `certutil -A -d sql:<dir> -t "C,," -n <name> -i <ca>`
    pub fn import_spec(&self, profile: &Path, name: &str, ca_path: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new(self.path.to_string_lossy()).args([
            "-A".to_string(),
            "-d".to_string(),
            format!("sql:{}", profile.display()),
            "-t".to_string(),
            "C,,".to_string(),
            "-n".to_string(),
            name.to_string(),
            "-i".to_string(),
            ca_path.to_string_lossy().into_owned(),
        ]);
        if let Some((var, value)) = &self.env {
            spec = spec.env(var, value);
        }
        spec
    }
}

pub struct NssLocator {
    runner: Arc<dyn CommandRunner>,
    platform: Platform,
    bundle_dir: PathBuf,
    path_lookup: bool,
}

impl NssLocator {
    pub fn new(runner: Arc<dyn CommandRunner>, bundle_dir: PathBuf) -> Self {
        Self {
            runner,
            platform: Platform::current(),
            bundle_dir,
            path_lookup: true,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Only consider the bundled copy
    pub fn without_path_lookup(mut self) -> Self {
        self.path_lookup = false;
        self
    }

    pub async fn locate(&self) -> Option<NssTool> {
        if let Some(path) = self.path_copy().await {
            tracing::debug!("Using NSS certutil from PATH: {:?}", path);
            return Some(NssTool { path, env: None });
        }

        let dir = self.bundle_dir.join(self.platform.as_str());
        let path = dir.join(self.platform.executable("certutil"));
        if !path.is_file() {
            tracing::debug!("No bundled certutil at {:?}", path);
            return None;
        }

        let env = library_path_var(self.platform).map(|var| {
            let value = match std::env::var(var) {
                Ok(existing) if !existing.is_empty() => {
                    format!("{}:{}", dir.display(), existing)
                }
                _ => dir.display().to_string(),
            };
            (var.to_string(), value)
        });

        Some(NssTool { path, env })
    }

    /// Windows ships an unrelated `certutil`, so PATH is never trusted there
    async fn path_copy(&self) -> Option<PathBuf> {
        if !self.path_lookup || self.platform == Platform::Windows {
            return None;
        }
        let path = which::which("certutil").ok()?;

        let help = CommandSpec::new(path.to_string_lossy()).arg("-H");
        let output = self.runner.run(&help).await.ok()?;
        let text = format!("{}{}", output.stdout, output.stderr);
        text.contains("certdir").then_some(path)
    }
}

fn library_path_var(platform: Platform) -> Option<&'static str> {
    match platform {
        Platform::MacOs => Some("DYLD_LIBRARY_PATH"),
        Platform::Linux => Some("LD_LIBRARY_PATH"),
        _ => None,
    }
}
