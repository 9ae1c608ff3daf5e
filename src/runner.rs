//! Run orchestration: server, device and app lifecycle around one test run.
//!
//! The runner wires the protocol server to a [`Device`], waits for either
//! the completion signal or an idle timeout, then tears everything down and
//! renders the reports. With no app file configured it runs in dev mode:
//! server only, no device lifecycle and no timeout, for a client started
//! by hand.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::device::{Device, DeviceError, check_tools, device_for};
use crate::report::Reporter;
use crate::server::{RunSignals, ServerConfig, ServerError, SnapshotServer};

/// JUnit report written into the working directory after every run
pub const JUNIT_FILE: &str = "junit.xml";

/// Result type for runner operations
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Error types for run orchestration
#[derive(Debug)]
pub enum RunnerError {
    Server(ServerError),
    Device(DeviceError),

    /// Report files could not be written
    Report(std::io::Error),
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerError::Server(err) => write!(f, "server error: {}", err),
            RunnerError::Device(err) => write!(f, "device error: {}", err),
            RunnerError::Report(err) => write!(f, "cannot write report: {}", err),
        }
    }
}

impl std::error::Error for RunnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunnerError::Server(err) => Some(err),
            RunnerError::Device(err) => Some(err),
            RunnerError::Report(err) => Some(err),
        }
    }
}

impl From<ServerError> for RunnerError {
    fn from(err: ServerError) -> Self {
        RunnerError::Server(err)
    }
}

impl From<DeviceError> for RunnerError {
    fn from(err: DeviceError) -> Self {
        RunnerError::Device(err)
    }
}

/// Phases of one run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    ServerStarting,
    DeviceStarting,
    AppLaunching,
    Running,
    StoppingByTimeout,
    StoppingByCompletion,
    Stopped,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::ServerStarting => "starting server",
            RunState::DeviceStarting => "starting device",
            RunState::AppLaunching => "launching app",
            RunState::Running => "running",
            RunState::StoppingByTimeout => "stopping by timeout",
            RunState::StoppingByCompletion => "stopping by completion",
            RunState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Final verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// All executed tests passed
    pub passed: bool,

    /// The run ended on the idle timeout instead of `/endOfTests`
    pub timed_out: bool,
}

impl RunOutcome {
    /// Process exit code: zero only for a completed, fully green run
    pub fn exit_code(&self) -> i32 {
        if self.passed && !self.timed_out { 0 } else { 1 }
    }
}

/// Orchestrates one snapshot test run end to end
pub struct TestsRunner {
    config: RunConfig,
    state: RunState,
}

impl TestsRunner {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Execute the whole run. The reports are rendered and `junit.xml` is
    /// written even when the run itself fails part way.
    pub async fn run(&mut self) -> RunnerResult<RunOutcome> {
        let reporter = Arc::new(Mutex::new(Reporter::new(
            &self.config.test_run_name,
            &self.config.package_name,
        )));
        let (signals, mut completion_rx) = RunSignals::new();
        let activity = signals.activity.clone();

        self.state = RunState::ServerStarting;
        let server_config = ServerConfig::new(self.config.port, &self.config.snapshots_path);
        let mut server = SnapshotServer::start(server_config, reporter.clone(), signals).await?;
        info!(
            addr = %server.local_addr(),
            client_host = self.config.client_host,
            "server is up"
        );

        let driven = self.drive(&mut completion_rx, &activity).await;
        server.stop().await;

        {
            let reporter = reporter.lock();
            reporter.to_log();
            reporter
                .to_junit(Path::new(JUNIT_FILE))
                .map_err(RunnerError::Report)?;
        }

        let timed_out = driven?;
        let outcome = RunOutcome {
            passed: reporter.lock().is_passed(),
            timed_out,
        };
        self.state = RunState::Stopped;
        Ok(outcome)
    }

    /// Device/app lifecycle plus the wait for completion or timeout.
    /// Returns whether the run timed out.
    async fn drive(
        &mut self,
        completion: &mut mpsc::Receiver<()>,
        activity: &Notify,
    ) -> RunnerResult<bool> {
        let mut device: Option<Box<dyn Device>> = None;

        if let Some(app_file) = self.config.app_file.clone() {
            self.state = RunState::DeviceStarting;
            check_tools(self.config.platform, self.config.physical_device).await?;
            let mut dev = device_for(
                self.config.platform,
                &self.config.device_name,
                self.config.physical_device,
                self.config.can_stop_device,
            )?;
            dev.start(&self.config.device_params).await?;

            self.state = RunState::AppLaunching;
            dev.install_app(&self.config.package_name, &app_file).await?;
            dev.start_app(
                &self.config.package_name,
                &self.config.activity_name,
                self.config.locale.as_deref(),
            )
            .await?;
            device = Some(dev);
        } else {
            info!("no app file configured, dev mode: start the client manually");
        }

        self.state = RunState::Running;
        let idle_timeout = if self.config.is_dev_mode() {
            None
        } else {
            Some(self.config.timeout)
        };
        let timed_out = wait_for_finish(completion, activity, idle_timeout).await;

        if timed_out {
            self.state = RunState::StoppingByTimeout;
            error!(
                timeout_ms = self.config.timeout.as_millis() as u64,
                "no activity from the app within the timeout, stopping the run"
            );
        } else {
            self.state = RunState::StoppingByCompletion;
            info!("run completed");
        }

        if let Some(dev) = device.as_mut() {
            if let Err(err) = dev.stop().await {
                warn!(error = %err, "failed to stop the device");
            }
        }
        Ok(timed_out)
    }
}

/// Wait for the completion signal, resetting the idle timer on every
/// activity notification. `None` disables the timeout entirely (dev mode).
/// Returns true when the timeout fired first.
async fn wait_for_finish(
    completion: &mut mpsc::Receiver<()>,
    activity: &Notify,
    idle_timeout: Option<Duration>,
) -> bool {
    let Some(timeout) = idle_timeout else {
        completion.recv().await;
        return false;
    };

    loop {
        tokio::select! {
            _ = completion.recv() => return false,
            _ = activity.notified() => {}
            _ = tokio::time::sleep(timeout) => return true,
        }
    }
}
