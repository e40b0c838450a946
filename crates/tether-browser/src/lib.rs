//! Browser interception targets: Chromium-family browsers launched fresh or
//! relaunched over the user's session, and Firefox with its own NSS store.

pub mod catalog;
pub mod chromium;
mod error;
pub mod firefox;
pub mod profile;

#[cfg(test)]
pub(crate) mod test_support;

pub use catalog::{
    BrowserCatalog, BrowserInfo, BrowserKind, DefaultBrowserCatalog, StaticCatalog,
};
pub use chromium::{ChromiumFlavor, ExistingChromium, FreshChromium, LaunchOptions};
pub use error::{Error, Result};
pub use firefox::{Firefox, NssLocator};
pub use profile::{ManagedProfile, remove_profile};
