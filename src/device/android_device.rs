//! Physical Android device control via `adb -s <serial>`.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::exec::exec;
use super::{Device, DeviceError, DeviceResult};

const INSTALL_ATTEMPTS: u32 = 3;
const INSTALL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// A physical device attached over adb. Never powered off by the harness.
pub struct AndroidPhysicalDevice {
    serial: String,
}

impl AndroidPhysicalDevice {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }

    async fn attached_devices(&self) -> Vec<String> {
        parse_attached_devices(&exec("adb", &["devices"]).await)
    }
}

#[async_trait]
impl Device for AndroidPhysicalDevice {
    async fn start(&mut self, params: &[String]) -> DeviceResult<()> {
        if !params.is_empty() {
            return Err(DeviceError::Unsupported(
                "physical devices accept no start parameters".to_string(),
            ));
        }
        let devices = self.attached_devices().await;
        if !devices.iter().any(|d| d.contains(&self.serial)) {
            return Err(DeviceError::NotFound(format!(
                "device [{}] is not attached, available: {}",
                self.serial,
                devices.join(", "),
            )));
        }
        Ok(())
    }

    async fn stop(&mut self) -> DeviceResult<()> {
        debug!("not stopping anything, physical devices are the user's responsibility");
        Ok(())
    }

    async fn is_app_installed(&self, package: &str) -> DeviceResult<bool> {
        let packages = exec(
            "adb",
            &["-s", &self.serial, "shell", "pm", "list", "packages"],
        )
        .await;
        Ok(packages.contains(package))
    }

    async fn install_app(&self, package: &str, app_file: &Path) -> DeviceResult<()> {
        self.uninstall_app(package).await?;

        let apk = app_file.to_string_lossy();
        info!(apk = %apk, serial = self.serial, "installing apk");

        for attempt in 0..INSTALL_ATTEMPTS {
            let result = exec("adb", &["-s", &self.serial, "install", "-r", &apk]).await;
            if result.contains("device offline") {
                debug!(attempt, "device offline, retrying install");
                tokio::time::sleep(INSTALL_RETRY_DELAY).await;
                continue;
            }
            if result.contains("Success") {
                return Ok(());
            }
            return Err(DeviceError::Install(format!(
                "failed to install apk [{}]: {}",
                apk,
                result.trim(),
            )));
        }
        Err(DeviceError::Install(format!(
            "device stayed offline through {} install attempts",
            INSTALL_ATTEMPTS,
        )))
    }

    async fn uninstall_app(&self, package: &str) -> DeviceResult<()> {
        if self.is_app_installed(package).await? {
            debug!(package, "uninstalling");
            exec("adb", &["-s", &self.serial, "uninstall", package]).await;
        }
        Ok(())
    }

    async fn start_app(
        &self,
        package: &str,
        activity: &str,
        locale: Option<&str>,
    ) -> DeviceResult<()> {
        if let Some(locale) = locale {
            tracing::warn!(locale, "locale is ignored for android");
        }

        let component = format!("{}/{}", package, activity);
        let result = exec(
            "adb",
            &["-s", &self.serial, "shell", "am", "start", "-n", &component],
        )
        .await;
        if result.contains("does not exist") || result.contains("Error") {
            return Err(DeviceError::AppStart(format!(
                "cannot start [{}] with activity [{}]: {}",
                package,
                activity,
                result.trim(),
            )));
        }
        Ok(())
    }
}

/// Parse `adb devices` output into attached serials, skipping the header
fn parse_attached_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| line.split('\t').next())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_attached_serials() {
        let output = "List of devices attached\nRF8M33XXXXX\tdevice\nemulator-5554\tdevice\n";
        assert_eq!(
            parse_attached_devices(output),
            vec!["RF8M33XXXXX", "emulator-5554"]
        );
    }

    #[tokio::test]
    async fn start_rejects_parameters() {
        let mut device = AndroidPhysicalDevice::new("RF8M33XXXXX");
        let result = device.start(&["-no-snapshot".to_string()]).await;
        assert!(matches!(result, Err(DeviceError::Unsupported(_))));
    }
}
