//! Long-lived child processes (browsers, Electron apps) whose exit drives
//! instance map bookkeeping.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{oneshot, watch};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, `None` when killed by a signal or when waiting failed
    pub code: Option<i32>,
}

/// Handle to a spawned process. Cheap to clone.
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<Inner>,
}

struct Inner {
    label: String,
    pid: Option<u32>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    exited: watch::Receiver<Option<ExitInfo>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_running(&self) -> bool {
        self.inner.exited.borrow().is_none()
    }

    /// Ask the watcher to hard-kill the child. Later calls are ignored.
    pub fn request_kill(&self) {
        if let Some(tx) = self.inner.kill_tx.lock().take() {
            let _ = tx.send(());
        }
    }

    /// Resolves once the OS reports the process gone
    pub async fn wait_exit(&self) -> ExitInfo {
        let mut rx = self.inner.exited.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(info) => info.clone().unwrap_or(ExitInfo { code: None }),
            Err(_) => ExitInfo { code: None },
        }
    }

    pub async fn wait_exit_timeout(&self, timeout: Duration) -> Option<ExitInfo> {
        tokio::time::timeout(timeout, self.wait_exit()).await.ok()
    }

    /// Request a kill and wait for the real exit
    pub async fn kill_and_wait(&self) -> ExitInfo {
        self.request_kill();
        self.wait_exit().await
    }
}

/// Spawn `command` and watch it.
///
/// `on_exit` runs exactly once, on the watcher task, before waiters of
/// [`ProcessHandle::wait_exit`] are released.
pub fn spawn_tracked<F>(label: impl Into<String>, mut command: Command, on_exit: F) -> Result<ProcessHandle>
where
    F: FnOnce(ExitInfo) + Send + 'static,
{
    let label = label.into();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let mut child = command
        .spawn()
        .map_err(|e| Error::Process(format!("Failed to launch {}: {}", label, e)))?;
    let pid = child.id();

    tracing::info!("Launched {} (pid {:?})", label, pid);

    let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
    let (exit_tx, exit_rx) = watch::channel(None);

    let watcher_label = label.clone();
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            Ok(()) = &mut kill_rx => {
                tracing::debug!("Killing {}", watcher_label);
                if let Err(e) = child.start_kill() {
                    tracing::debug!("Kill of {} failed (already exiting?): {}", watcher_label, e);
                }
                child.wait().await
            }
        };

        let info = match status {
            Ok(status) => ExitInfo {
                code: status.code(),
            },
            Err(e) => {
                tracing::warn!("Lost track of {}: {}", watcher_label, e);
                ExitInfo { code: None }
            }
        };

        tracing::info!("{} exited (code {:?})", watcher_label, info.code);
        on_exit(info.clone());
        let _ = exit_tx.send(Some(info));
    });

    Ok(ProcessHandle {
        inner: Arc::new(Inner {
            label,
            pid,
            kill_tx: Mutex::new(Some(kill_tx)),
            exited: exit_rx,
        }),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sleep_command(secs: &str) -> Command {
        let mut cmd = Command::new("sleep");
        cmd.arg(secs);
        cmd
    }

    #[tokio::test]
    async fn test_exit_hook_runs_once_on_natural_exit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let handle = spawn_tracked("sleep", sleep_command("0"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let info = handle.wait_exit().await;
        assert_eq!(info.code, Some(0));
        assert!(!handle.is_running());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_kill_and_wait_stops_process() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let handle = spawn_tracked("sleep", sleep_command("30"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(handle.is_running());
        assert!(handle.pid().is_some());

        handle.kill_and_wait().await;
        handle.request_kill();

        assert!(!handle.is_running());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let result = spawn_tracked(
            "missing",
            Command::new("/nonexistent/tether-browser"),
            |_| {},
        );
        assert!(matches!(result, Err(Error::Process(_))));
    }
}
