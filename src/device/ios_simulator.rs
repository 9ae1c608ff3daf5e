//! iOS simulator control via `xcrun simctl`.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::exec::exec;
use super::{Device, DeviceError, DeviceResult};

/// Interval between shutdown-state polls
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bounded wait for simulators to leave the "Shutting Down" state
const SHUTDOWN_POLL_ATTEMPTS: u32 = 60;

/// One entry of `xcrun simctl list --json` devices output
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SimDevice {
    pub name: String,
    pub udid: String,
    pub state: String,
    #[serde(default)]
    pub is_available: bool,
}

#[derive(Debug, Deserialize)]
struct SimctlList {
    devices: HashMap<String, Vec<SimDevice>>,
}

/// An iOS simulator driven through `simctl` and Simulator.app
pub struct IosSimulator {
    name: String,
    can_stop_device: bool,
}

impl IosSimulator {
    pub fn new(name: impl Into<String>, can_stop_device: bool) -> Self {
        Self {
            name: name.into(),
            can_stop_device,
        }
    }

    async fn available_devices(&self) -> DeviceResult<Vec<SimDevice>> {
        let json = exec("xcrun", &["simctl", "list", "--json"]).await;
        parse_simctl_list(&json)
    }

    async fn device_by_name(&self) -> DeviceResult<Option<SimDevice>> {
        Ok(self
            .available_devices()
            .await?
            .into_iter()
            .find(|d| d.name == self.name))
    }

    async fn boot(&self, device: &SimDevice) -> DeviceResult<()> {
        if device.state == "Booted" {
            info!(name = device.name, "device already booted");
            return Ok(());
        }
        let response = exec("xcrun", &["simctl", "boot", &device.udid]).await;
        if !response.trim().is_empty() {
            debug!(response = response.trim(), "boot response");
        }
        Ok(())
    }

    /// Open Simulator.app of the active Xcode for the given device
    async fn open_simulator_app(&self, udid: &str) -> DeviceResult<()> {
        let active_xcode = exec("xcode-select", &["-p"]).await.trim().to_string();
        if active_xcode.is_empty() {
            return Err(DeviceError::NotFound(
                "cannot resolve active Xcode via xcode-select -p".to_string(),
            ));
        }
        let simulator_app = format!("{}/Applications/Simulator.app", active_xcode);
        debug!(app = simulator_app, "opening simulator");
        exec(
            "open",
            &["-a", &simulator_app, "--args", "-CurrentDeviceUDID", udid],
        )
        .await;
        Ok(())
    }

    async fn any_device_shutting_down(&self) -> bool {
        match self.available_devices().await {
            Ok(devices) => devices.iter().any(|d| d.state == "Shutting Down"),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Device for IosSimulator {
    async fn start(&mut self, params: &[String]) -> DeviceResult<()> {
        debug!(?params, "starting simulator");
        self.stop().await?;

        let device = self.device_by_name().await?.ok_or_else(|| {
            DeviceError::NotFound(format!(
                "invalid simulator [{}], cannot find its udid",
                self.name,
            ))
        })?;
        info!(udid = device.udid, "simulator resolved");

        self.boot(&device).await?;
        self.open_simulator_app(&device.udid).await?;
        Ok(())
    }

    async fn stop(&mut self) -> DeviceResult<()> {
        if !self.can_stop_device {
            debug!("stopping device is restricted in config");
            return Ok(());
        }

        exec(
            "osascript",
            &["-e", "tell application \"iOS Simulator\" to quit"],
        )
        .await;
        exec("osascript", &["-e", "tell application \"Simulator\" to quit"]).await;

        for _ in 0..SHUTDOWN_POLL_ATTEMPTS {
            if !self.any_device_shutting_down().await {
                return Ok(());
            }
            debug!("awaiting simulator shutdown");
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
        warn!("a simulator is still shutting down after the poll budget");
        Ok(())
    }

    async fn is_app_installed(&self, package: &str) -> DeviceResult<bool> {
        // simctl has no cheap query for this; install always runs an
        // uninstall first, so report not-installed.
        debug!(package, "is_app_installed is not supported on simulators");
        Ok(false)
    }

    async fn install_app(&self, package: &str, app_file: &Path) -> DeviceResult<()> {
        self.uninstall_app(package).await?;
        info!(package, file = %app_file.display(), "installing app");
        exec(
            "xcrun",
            &["simctl", "install", "booted", &app_file.to_string_lossy()],
        )
        .await;
        Ok(())
    }

    async fn uninstall_app(&self, package: &str) -> DeviceResult<()> {
        debug!(package, "uninstalling app");
        exec("xcrun", &["simctl", "uninstall", "booted", package]).await;
        Ok(())
    }

    async fn start_app(
        &self,
        package: &str,
        _activity: &str,
        locale: Option<&str>,
    ) -> DeviceResult<()> {
        info!(package, locale = locale.unwrap_or("-"), "launching app");
        let args = launch_args(package, locale);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        exec("xcrun", &args).await;
        Ok(())
    }
}

/// Build the `simctl launch` argv. The locale travels as two tokens,
/// `-AppleLanguages` and `({locale})`, so the launched app's user-defaults
/// parsing sees the flag/value pair.
fn launch_args(package: &str, locale: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "simctl".to_string(),
        "launch".to_string(),
        "booted".to_string(),
        package.to_string(),
    ];
    if let Some(locale) = locale {
        args.push("-AppleLanguages".to_string());
        args.push(format!("({})", locale));
    }
    args
}

/// Parse `simctl list --json`, keeping available devices only
fn parse_simctl_list(json: &str) -> DeviceResult<Vec<SimDevice>> {
    let list: SimctlList = serde_json::from_str(json).map_err(|err| {
        DeviceError::NotFound(format!("cannot parse simctl device list: {}", err))
    })?;
    Ok(list
        .devices
        .into_values()
        .flatten()
        .filter(|d| d.is_available)
        .collect())
}
