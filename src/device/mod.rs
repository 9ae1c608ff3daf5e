//! Emulator/simulator/physical-device lifecycle control.
//!
//! The orchestrator depends only on the [`Device`] trait; the concrete
//! wrappers shell out to `emulator`/`adb` (Android) and `xcrun simctl`
//! (iOS simulators).

pub mod android_device;
pub mod android_emulator;
pub mod exec;
pub mod ios_simulator;

use async_trait::async_trait;
use std::path::Path;

use crate::config::Platform;

pub use android_device::AndroidPhysicalDevice;
pub use android_emulator::AndroidEmulator;
pub use ios_simulator::IosSimulator;

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Error types for device operations. All of these are fatal for a CI run.
#[derive(Debug)]
pub enum DeviceError {
    /// Named device/AVD/simulator does not exist or is not attached
    NotFound(String),

    /// Device did not finish booting within the poll budget
    BootTimeout(String),

    /// App install failed after the bounded retries
    Install(String),

    /// App could not be launched
    AppStart(String),

    /// Requested device kind or parameter is not supported
    Unsupported(String),
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::NotFound(msg) => write!(f, "Device not found: {}", msg),
            DeviceError::BootTimeout(msg) => write!(f, "Boot timeout: {}", msg),
            DeviceError::Install(msg) => write!(f, "Install failed: {}", msg),
            DeviceError::AppStart(msg) => write!(f, "App start failed: {}", msg),
            DeviceError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Lifecycle of the device the app under test runs on
#[async_trait]
pub trait Device: Send + Sync {
    /// Boot the device (or verify it is available) with optional
    /// device-specific start parameters
    async fn start(&mut self, params: &[String]) -> DeviceResult<()>;

    /// Shut the device down; honors the `canStopDevice` config
    async fn stop(&mut self) -> DeviceResult<()>;

    async fn is_app_installed(&self, package: &str) -> DeviceResult<bool>;

    /// Uninstall-then-install with bounded retries on a transiently
    /// offline device link
    async fn install_app(&self, package: &str, app_file: &Path) -> DeviceResult<()>;

    async fn uninstall_app(&self, package: &str) -> DeviceResult<()>;

    /// Launch the app; locale support is platform dependent
    async fn start_app(
        &self,
        package: &str,
        activity: &str,
        locale: Option<&str>,
    ) -> DeviceResult<()>;
}

/// Command-line tools a device implementation shells out to
pub fn required_tools(platform: Platform, is_physical: bool) -> &'static [&'static str] {
    match platform {
        Platform::Android if is_physical => &["adb"],
        Platform::Android => &["emulator", "adb"],
        Platform::Ios => &["xcrun"],
    }
}

/// Verify the required tools are on the PATH before anything is booted,
/// so a missing SDK fails the run up front instead of mid-lifecycle.
pub async fn check_tools(platform: Platform, is_physical: bool) -> DeviceResult<()> {
    for tool in required_tools(platform, is_physical) {
        if !exec::is_command(tool).await {
            return Err(DeviceError::NotFound(format!(
                "required command [{}] is not available",
                tool,
            )));
        }
    }
    Ok(())
}

/// Pick the device implementation for the platform/config combination
pub fn device_for(
    platform: Platform,
    name: &str,
    is_physical: bool,
    can_stop_device: bool,
) -> DeviceResult<Box<dyn Device>> {
    match platform {
        Platform::Android => {
            if is_physical {
                Ok(Box::new(AndroidPhysicalDevice::new(name)))
            } else {
                Ok(Box::new(AndroidEmulator::new(name, can_stop_device)))
            }
        }
        Platform::Ios => {
            if is_physical {
                Err(DeviceError::Unsupported(
                    "iOS physical devices are not supported yet".to_string(),
                ))
            } else {
                Ok(Box::new(IosSimulator::new(name, can_stop_device)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ios_physical_devices_are_unsupported() {
        let result = device_for(Platform::Ios, "iPhone 15", true, true);
        assert!(matches!(result, Err(DeviceError::Unsupported(_))));
    }

    #[test]
    fn provider_picks_an_implementation_per_platform() {
        assert!(device_for(Platform::Android, "Pixel_7_API_34", false, true).is_ok());
        assert!(device_for(Platform::Android, "emulator-5554", true, true).is_ok());
        assert!(device_for(Platform::Ios, "iPhone 15", false, true).is_ok());
    }

    #[test]
    fn required_tools_match_what_each_wrapper_shells_out_to() {
        assert_eq!(required_tools(Platform::Android, false), ["emulator", "adb"]);
        // Physical devices are never booted, so the emulator binary is not needed.
        assert_eq!(required_tools(Platform::Android, true), ["adb"]);
        assert_eq!(required_tools(Platform::Ios, false), ["xcrun"]);
    }
}
