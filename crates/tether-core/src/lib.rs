pub mod cert;
pub mod config;
pub mod error;
pub mod exec;
pub mod facade;
pub mod instances;
pub mod platform;
pub mod process;
pub mod procs;
pub mod registry;
pub mod target;

pub use cert::CaCertificate;
pub use config::{MARKER_URL, TargetContext, TetherConfig};
pub use error::{Error, ErrorKind, ErrorMetadata, Result};
pub use exec::{CommandOutput, CommandRunner, CommandSpec, RecordingRunner, SystemRunner};
pub use facade::{
    ActivationResult, DeactivationResult, Facade, FacadeRequest, FacadeResponse, TargetEvent,
    TargetSummary,
};
pub use instances::{InstanceMap, Reservation};
pub use platform::Platform;
pub use process::{ExitInfo, ProcessHandle, spawn_tracked};
pub use procs::{FakeProcessTable, ProcessInfo, ProcessTable, Signal, SystemProcessTable};
pub use registry::{TargetRegistry, TeardownBroker, TeardownReply};
pub use target::{ActivationKey, ActivationOutcome, ActivationRequest, Target, TargetOptions};
