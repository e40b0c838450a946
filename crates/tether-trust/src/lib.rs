// OS certificate trust and system-wide proxy configuration

pub mod authority;
pub mod error;
pub mod system_proxy;
pub mod system_target;
pub mod trust;

pub use authority::CertificateAuthority;
pub use error::{Error, Result};
pub use system_proxy::SystemProxyToggle;
pub use system_target::{SYSTEM_PROXY_ID, SystemWideProxy};
pub use trust::{CertificateStatus, CertificateTrustManager};
