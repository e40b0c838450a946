//! Mobile targets driven through their platform tooling: `adb` for Android
//! devices and emulators, `xcrun simctl` for iOS simulators.

pub mod android;
mod error;
pub mod ios;

pub use android::{ANDROID_ID, AndroidDevice, parse_devices};
pub use error::{Error, Result};
pub use ios::{IOS_ID, IosSimulator, Simulator, parse_simulators};
