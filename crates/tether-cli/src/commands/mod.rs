pub mod cert;
pub mod completion;
pub mod devices;
pub mod intercept;
pub mod serve;
pub mod targets;
