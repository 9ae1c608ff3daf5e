//! Android emulator (AVD) lifecycle via `emulator` and `adb`.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::exec::exec;
use super::{Device, DeviceError, DeviceResult};

/// Interval between `sys.boot_completed` polls
const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll budget: 2 minutes at 5 s per poll
const BOOT_POLL_ATTEMPTS: u32 = 24;

/// Install retry budget for a transiently offline device link
const INSTALL_ATTEMPTS: u32 = 3;

const INSTALL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// An Android Virtual Device booted through the `emulator` binary
pub struct AndroidEmulator {
    name: String,
    can_stop_device: bool,
    child: Option<Child>,
}

impl AndroidEmulator {
    pub fn new(name: impl Into<String>, can_stop_device: bool) -> Self {
        Self {
            name: name.into(),
            can_stop_device,
            child: None,
        }
    }

    async fn available_avds(&self) -> Vec<String> {
        parse_avd_list(&exec("emulator", &["-list-avds"]).await)
    }

    /// Serial of the currently running emulator, if any
    async fn active_device(&self) -> Option<String> {
        parse_active_emulator(&exec("adb", &["devices"]).await)
    }

    async fn wait_for_boot(&self) -> DeviceResult<()> {
        for attempt in 0..BOOT_POLL_ATTEMPTS {
            let prop = exec("adb", &["shell", "getprop", "sys.boot_completed"]).await;
            if prop.trim() == "1" {
                return Ok(());
            }
            debug!(attempt, "awaiting device boot");
            tokio::time::sleep(BOOT_POLL_INTERVAL).await;
        }
        Err(DeviceError::BootTimeout(format!(
            "emulator [{}] did not boot within {} seconds; try running it with -no-snapshot",
            self.name,
            BOOT_POLL_ATTEMPTS * BOOT_POLL_INTERVAL.as_secs() as u32,
        )))
    }
}

#[async_trait]
impl Device for AndroidEmulator {
    async fn start(&mut self, params: &[String]) -> DeviceResult<()> {
        let avds = self.available_avds().await;
        if !avds.iter().any(|avd| avd.contains(&self.name)) {
            return Err(DeviceError::NotFound(format!(
                "invalid AVD name [{}], available: {}",
                self.name,
                avds.join(", "),
            )));
        }

        if let Some(active) = self.active_device().await {
            if self.can_stop_device {
                warn!(active, "another emulator is running, stopping it");
                self.stop_active().await;
            } else {
                info!(active, "using already running emulator");
                return Ok(());
            }
        }

        info!(name = self.name, "starting emulator");
        let mut cmd = Command::new("emulator");
        cmd.arg("-avd")
            .arg(&self.name)
            .args(params.iter().filter(|p| !p.is_empty()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = cmd
            .spawn()
            .map_err(|err| DeviceError::NotFound(format!("cannot run emulator: {}", err)))?;
        self.child = Some(child);

        self.wait_for_boot().await?;
        info!(name = self.name, "emulator booted");
        Ok(())
    }

    async fn stop(&mut self) -> DeviceResult<()> {
        if !self.can_stop_device {
            debug!("stopping device is restricted in config");
            return Ok(());
        }
        self.stop_active().await;
        Ok(())
    }

    async fn is_app_installed(&self, package: &str) -> DeviceResult<bool> {
        let packages = exec("adb", &["shell", "pm", "list", "packages"]).await;
        Ok(packages.contains(package))
    }

    async fn install_app(&self, package: &str, app_file: &Path) -> DeviceResult<()> {
        self.uninstall_app(package).await?;

        let apk = app_file.to_string_lossy();
        info!(apk = %apk, "installing apk");

        for attempt in 0..INSTALL_ATTEMPTS {
            let result = exec("adb", &["install", "-r", &apk]).await;
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
            exec("adb", &["uninstall", package]).await;
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
            warn!(locale, "locale is ignored for android");
        }

        let component = format!("{}/{}", package, activity);
        let result = exec("adb", &["shell", "am", "start", "-n", &component]).await;
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

impl AndroidEmulator {
    /// Kill the active emulator and reap our child process if we spawned it
    async fn stop_active(&mut self) {
        if let Some(active) = self.active_device().await {
            exec("adb", &["-s", &active, "emu", "kill"]).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        if let Some(mut child) = self.child.take() {
            let _ = tokio::time::timeout(Duration::from_secs(10), child.wait()).await;
        }
        debug!("active device stopped");
    }
}

/// Parse `emulator -list-avds` output into AVD names
fn parse_avd_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Find the first emulator serial in `adb devices` output
fn parse_active_emulator(output: &str) -> Option<String> {
    output
        .lines()
        .find(|line| line.starts_with("emulator"))
        .and_then(|line| line.split('\t').next())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_avd_list() {
        let avds = parse_avd_list("Pixel_7_API_34\nNexus_5_API_30\n");
        assert_eq!(avds, vec!["Pixel_7_API_34", "Nexus_5_API_30"]);
        assert!(parse_avd_list("").is_empty());
    }

    #[test]
    fn finds_active_emulator_serial() {
        let output = "List of devices attached\nemulator-5554\tdevice\n";
        assert_eq!(parse_active_emulator(output), Some("emulator-5554".to_string()));
    }

    #[test]
    fn no_active_emulator_among_physical_devices() {
        let output = "List of devices attached\nRF8M33XXXXX\tdevice\n";
        assert_eq!(parse_active_emulator(output), None);
    }
}
