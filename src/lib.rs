//! Snapcheck - snapshot testing server for mobile UI components.
//!
//! This crate provides:
//! - An HTTP server speaking the snapshot test protocol with the app
//!   under test (`/initTests`, `/registerTest`, `/base64`, `/reportTest`,
//!   `/log`, `/endOfTests`)
//! - A pixel comparator with per-channel color tolerance and a 3x3
//!   neighborhood rule for antialiasing artifacts
//! - A result store rendering a log table and a JUnit XML report
//! - Device control for Android emulators, physical Android devices and
//!   iOS simulators
//! - A runner orchestrating server, device and app around one test run

pub mod compare;
pub mod config;
pub mod device;
pub mod report;
pub mod runner;
pub mod server;

// Re-export comparison types
pub use compare::{COLOR_TOLERANCE, CompareError, CompareResult, ComparisonResult, compare};

// Re-export configuration types
pub use config::{ConfigError, ConfigFile, ConfigResult, Platform, RunConfig};

// Re-export device control
pub use device::{Device, DeviceError, DeviceResult, check_tools, device_for};

// Re-export reporting types
pub use report::{Reporter, RunSummary, TestCase};

// Re-export the orchestrator
pub use runner::{RunOutcome, RunState, RunnerError, RunnerResult, TestsRunner};

// Re-export the protocol server
pub use server::{
    RunSignals, ServerConfig, ServerContext, ServerError, ServerResult, SnapshotServer, router,
};
