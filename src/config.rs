//! Run configuration loaded from `snapcheck.json`.
//!
//! The file carries one section per platform; each section holds base
//! parameters plus named configuration overrides (e.g. `debug`, `release`).
//! A parameter is resolved from the selected configuration first, then from
//! the section base, then from the built-in default. Missing required
//! values are fatal before anything is started.
//!
//! ```json
//! {
//!   "logLevel": "i",
//!   "timeout": 25000,
//!   "android": {
//!     "deviceName": "Pixel_7_API_34",
//!     "packageName": "com.example.app",
//!     "snapshotsPath": "./snapshots",
//!     "configurations": {
//!       "debug": { "appFile": "./app/build/outputs/apk/debug/app-debug.apk" }
//!     }
//!   }
//! }
//! ```

use clap::ValueEnum;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::server::DEFAULT_PORT;

/// Default config file looked up in the working directory
pub const CONFIG_FILE: &str = "snapcheck.json";

/// Default launch activity on Android
pub const DEFAULT_ACTIVITY: &str = "MainActivity";

/// Default snapshot directory
pub const DEFAULT_SNAPSHOTS_PATH: &str = "./snapshots";

/// Default idle timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 25_000;

/// Target platform of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    /// Address the app under test uses to reach the host. Emulators see
    /// the host under a platform-specific alias; physical devices on a
    /// LAN need this overridden via `clientHost`.
    pub fn default_client_host(self) -> &'static str {
        match self {
            Platform::Android => "10.0.2.2",
            Platform::Ios => "127.0.0.1",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Android => write!(f, "android"),
            Platform::Ios => write!(f, "ios"),
        }
    }
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Error types for configuration loading; all are fatal at startup
#[derive(Debug)]
pub enum ConfigError {
    /// Config file missing or unreadable
    Io(PathBuf, std::io::Error),

    /// Config file is not valid JSON for the expected schema
    Parse(String),

    /// No section for the requested platform
    MissingPlatform(Platform),

    /// A required parameter has no value
    MissingValue(&'static str),

    /// The configured app file does not exist
    AppFileNotFound(PathBuf),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, err) => {
                write!(f, "cannot read config [{}]: {}", path.display(), err)
            }
            ConfigError::Parse(msg) => write!(f, "invalid config: {}", msg),
            ConfigError::MissingPlatform(platform) => {
                write!(f, "no [{}] section in config", platform)
            }
            ConfigError::MissingValue(name) => {
                write!(f, "required config value [{}] is missing", name)
            }
            ConfigError::AppFileNotFound(path) => {
                write!(
                    f,
                    "valid app file is required, cannot find [{}]",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Overridable per-platform parameters
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformParams {
    pub device_name: Option<String>,
    pub app_file: Option<String>,
    pub package_name: Option<String>,
    pub activity_name: Option<String>,
    pub snapshots_path: Option<String>,
    pub device_params: Option<Vec<String>>,
    pub physical_device: Option<bool>,
    pub can_stop_device: Option<bool>,
    pub port: Option<u16>,
    pub locale: Option<String>,
    pub client_host: Option<String>,
}

impl PlatformParams {
    /// Overlay `other` on top of self, field by field
    fn merged_with(&self, other: &PlatformParams) -> PlatformParams {
        PlatformParams {
            device_name: other.device_name.clone().or_else(|| self.device_name.clone()),
            app_file: other.app_file.clone().or_else(|| self.app_file.clone()),
            package_name: other.package_name.clone().or_else(|| self.package_name.clone()),
            activity_name: other
                .activity_name
                .clone()
                .or_else(|| self.activity_name.clone()),
            snapshots_path: other
                .snapshots_path
                .clone()
                .or_else(|| self.snapshots_path.clone()),
            device_params: other
                .device_params
                .clone()
                .or_else(|| self.device_params.clone()),
            physical_device: other.physical_device.or(self.physical_device),
            can_stop_device: other.can_stop_device.or(self.can_stop_device),
            port: other.port.or(self.port),
            locale: other.locale.clone().or_else(|| self.locale.clone()),
            client_host: other.client_host.clone().or_else(|| self.client_host.clone()),
        }
    }
}

/// One platform section: base parameters plus named configurations
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformSection {
    #[serde(flatten)]
    pub base: PlatformParams,
    pub configurations: HashMap<String, PlatformParams>,
}

/// Top-level shape of `snapcheck.json`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigFile {
    pub log_level: Option<String>,
    pub timeout: Option<u64>,
    pub android: Option<PlatformSection>,
    pub ios: Option<PlatformSection>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    fn section(&self, platform: Platform) -> Option<&PlatformSection> {
        match platform {
            Platform::Android => self.android.as_ref(),
            Platform::Ios => self.ios.as_ref(),
        }
    }

    /// Resolve the effective run configuration for a platform and a named
    /// configuration (e.g. `debug`). An unknown configuration name simply
    /// falls back to the section base values.
    pub fn resolve(&self, platform: Platform, configuration: &str) -> ConfigResult<RunConfig> {
        let section = self
            .section(platform)
            .ok_or(ConfigError::MissingPlatform(platform))?;

        let params = match section.configurations.get(configuration) {
            Some(overrides) => section.base.merged_with(overrides),
            None => section.base.clone(),
        };

        let device_name = params
            .device_name
            .ok_or(ConfigError::MissingValue("deviceName"))?;
        let package_name = params
            .package_name
            .ok_or(ConfigError::MissingValue("packageName"))?;

        let app_file = match params.app_file {
            Some(file) => {
                let path = absolutize(Path::new(&file));
                if !path.exists() {
                    return Err(ConfigError::AppFileNotFound(path));
                }
                Some(path)
            }
            None => None,
        };

        let snapshots_path = absolutize(Path::new(
            params
                .snapshots_path
                .as_deref()
                .unwrap_or(DEFAULT_SNAPSHOTS_PATH),
        ));

        Ok(RunConfig {
            platform,
            test_run_name: format!("UI tests for {}/{}", platform, device_name),
            device_name,
            app_file,
            package_name,
            activity_name: params
                .activity_name
                .unwrap_or_else(|| DEFAULT_ACTIVITY.to_string()),
            snapshots_path,
            device_params: params.device_params.unwrap_or_default(),
            physical_device: params.physical_device.unwrap_or(false),
            can_stop_device: params.can_stop_device.unwrap_or(true),
            port: params.port.unwrap_or(DEFAULT_PORT),
            locale: params.locale,
            client_host: params
                .client_host
                .unwrap_or_else(|| platform.default_client_host().to_string()),
            timeout: Duration::from_millis(self.timeout.unwrap_or(DEFAULT_TIMEOUT_MS)),
        })
    }
}

/// Fully resolved configuration for one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub platform: Platform,
    pub device_name: String,

    /// Absent means dev mode: server only, no device lifecycle, no timeout
    pub app_file: Option<PathBuf>,

    pub package_name: String,
    pub activity_name: String,
    pub snapshots_path: PathBuf,
    pub device_params: Vec<String>,
    pub physical_device: bool,
    pub can_stop_device: bool,
    pub port: u16,
    pub locale: Option<String>,

    /// Address the app under test reaches the host on
    pub client_host: String,

    /// Idle timeout, reset on any client call; firing fails the run
    pub timeout: Duration,

    pub test_run_name: String,
}

impl RunConfig {
    pub fn is_dev_mode(&self) -> bool {
        self.app_file.is_none()
    }
}

/// Map the short log levels (plus full names) to tracing filters
pub fn log_level_filter(level: Option<&str>) -> &'static str {
    match level {
        Some("v") | Some("trace") => "trace",
        Some("d") | Some("debug") => "debug",
        Some("w") | Some("warn") => "warn",
        Some("e") | Some("error") => "error",
        _ => "info",
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
