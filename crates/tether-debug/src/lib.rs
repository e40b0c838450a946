//! Intercepting Electron apps through the Node inspector.

pub mod cdp;
mod error;
pub mod injector;
pub mod retry;

pub use cdp::{CdpClient, CdpEvent, fetch_debugger_url};
pub use error::{Error, Result};
pub use injector::{ELECTRON_ID, ElectronDebug, inject, injection_expression, resolve_executable};
pub use retry::{RetryPolicy, connect_with_retry, is_connection_refused};
