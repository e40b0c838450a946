//! OS process table access: enumerate, check and signal processes we did not
//! spawn ourselves.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
    pub cmd: Vec<String>,
}

impl ProcessInfo {
    pub fn has_arg_prefix(&self, prefix: &str) -> bool {
        self.cmd.iter().any(|arg| arg.starts_with(prefix))
    }

    pub fn command_line(&self) -> String {
        self.cmd.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Let the process shut down cleanly (SIGTERM, `taskkill` without /F)
    Graceful,
    /// SIGKILL, `taskkill /F`
    Hard,
}

#[async_trait]
pub trait ProcessTable: Send + Sync {
    /// Processes owned by the current user
    async fn list_user_processes(&self) -> Vec<ProcessInfo>;

    async fn is_alive(&self, pid: u32) -> bool;

    /// Returns false if the signal could not be delivered
    async fn terminate(&self, pid: u32, signal: Signal) -> bool;
}

fn lossy(value: impl AsRef<OsStr>) -> String {
    value.as_ref().to_string_lossy().into_owned()
}

/// sysinfo refreshes walk `/proc` (or the platform equivalent) synchronously,
/// so every query runs on the blocking pool
pub struct SystemProcessTable {
    system: Arc<Mutex<System>>,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    async fn with_system<T, F>(&self, fallback: T, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&mut System) -> T + Send + 'static,
    {
        let system = Arc::clone(&self.system);
        match tokio::task::spawn_blocking(move || f(&mut system.lock())).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Process table query failed: {}", e);
                fallback
            }
        }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

fn user_processes(system: &mut System) -> Vec<ProcessInfo> {
    system.refresh_processes(ProcessesToUpdate::All, true);

    let current_user = sysinfo::get_current_pid()
        .ok()
        .and_then(|pid| system.process(pid))
        .and_then(|process| process.user_id().cloned());

    system
        .processes()
        .values()
        .filter(|process| match &current_user {
            Some(uid) => process.user_id() == Some(uid),
            None => true,
        })
        .map(|process| ProcessInfo {
            pid: process.pid().as_u32(),
            name: lossy(process.name()),
            exe: process.exe().map(|p| p.to_path_buf()),
            cmd: process.cmd().iter().map(lossy).collect(),
        })
        .collect()
}

fn refreshed_alive(system: &mut System, pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    system
        .process(pid)
        .is_some_and(|process| process.status() != ProcessStatus::Zombie)
}

#[cfg(not(windows))]
fn send_signal(system: &mut System, pid: u32, signal: Signal) -> bool {
    let pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    match system.process(pid) {
        Some(process) => match signal {
            Signal::Graceful => process
                .kill_with(sysinfo::Signal::Term)
                .unwrap_or_else(|| process.kill()),
            Signal::Hard => process.kill(),
        },
        None => false,
    }
}

#[async_trait]
impl ProcessTable for SystemProcessTable {
    async fn list_user_processes(&self) -> Vec<ProcessInfo> {
        self.with_system(Vec::new(), user_processes).await
    }

    async fn is_alive(&self, pid: u32) -> bool {
        self.with_system(false, move |system| refreshed_alive(system, pid))
            .await
    }

    async fn terminate(&self, pid: u32, signal: Signal) -> bool {
        #[cfg(windows)]
        {
            let mut cmd = tokio::process::Command::new("taskkill");
            if signal == Signal::Hard {
                cmd.arg("/F");
            }
            cmd.args(["/PID", &pid.to_string()])
                .output()
                .await
                .map(|out| out.status.success())
                .unwrap_or(false)
        }

        #[cfg(not(windows))]
        {
            self.with_system(false, move |system| send_signal(system, pid, signal))
                .await
        }
    }
}

/// In-memory process table. For tests.
///
/// Signals are recorded; a process disappears when it receives a signal listed
/// in `exits_on`.
pub struct FakeProcessTable {
    processes: Mutex<Vec<ProcessInfo>>,
    signals: Mutex<Vec<(u32, Signal)>>,
    exits_on: Vec<Signal>,
}

impl FakeProcessTable {
    pub fn new(processes: Vec<ProcessInfo>) -> Self {
        Self {
            processes: Mutex::new(processes),
            signals: Mutex::new(Vec::new()),
            exits_on: vec![Signal::Graceful, Signal::Hard],
        }
    }

    /// Only exit on the given signals, e.g. `[Signal::Hard]` to simulate a
    /// process that ignores graceful shutdown
    pub fn exiting_on(mut self, signals: Vec<Signal>) -> Self {
        self.exits_on = signals;
        self
    }

    pub fn signals(&self) -> Vec<(u32, Signal)> {
        self.signals.lock().clone()
    }

    /// Synchronous liveness check for assertions
    pub fn contains(&self, pid: u32) -> bool {
        self.processes.lock().iter().any(|p| p.pid == pid)
    }
}

#[async_trait]
impl ProcessTable for FakeProcessTable {
    async fn list_user_processes(&self) -> Vec<ProcessInfo> {
        self.processes.lock().clone()
    }

    async fn is_alive(&self, pid: u32) -> bool {
        self.contains(pid)
    }

    async fn terminate(&self, pid: u32, signal: Signal) -> bool {
        self.signals.lock().push((pid, signal));
        if self.exits_on.contains(&signal) {
            self.processes.lock().retain(|p| p.pid != pid);
        }
        true
    }
}
