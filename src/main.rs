use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use snapcheck::config::{self, ConfigFile, Platform, log_level_filter};
use snapcheck::runner::TestsRunner;

/// Snapcheck - snapshot testing server for mobile UI components
#[derive(Parser, Debug)]
#[command(
    name = "snapcheck",
    about = "Runs UI snapshot tests against an emulator, simulator or device",
    after_help = "ENVIRONMENT VARIABLES:\n\
        SNAPCHECK_CONFIG    Path to the config file (default: ./snapcheck.json)\n\
        SNAPCHECK_PORT      Server port, overrides the config value\n\
        SNAPCHECK_TIMEOUT   Idle timeout in ms, overrides the config value\n\
        RUST_LOG            Tracing filter, overrides the logLevel config value"
)]
struct Args {
    /// Target platform
    #[arg(value_enum)]
    platform: Platform,

    /// Named configuration within the platform section (e.g. debug)
    #[arg(default_value = "default")]
    configuration: String,

    /// Path to the config file
    #[arg(long, short = 'c', env = "SNAPCHECK_CONFIG", default_value = config::CONFIG_FILE)]
    config: PathBuf,

    /// Server port, overrides the config value
    #[arg(long, env = "SNAPCHECK_PORT")]
    port: Option<u16>,

    /// Idle timeout in milliseconds, overrides the config value
    #[arg(long, env = "SNAPCHECK_TIMEOUT")]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config_file = match ConfigFile::load(&args.config) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    init_tracing(config_file.log_level.as_deref());

    let mut run_config = match config_file.resolve(args.platform, &args.configuration) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("{}", err);
            std::process::exit(1);
        }
    };
    if let Some(port) = args.port {
        run_config.port = port;
    }
    if let Some(timeout) = args.timeout {
        run_config.timeout = std::time::Duration::from_millis(timeout);
    }

    let mut runner = TestsRunner::new(run_config);
    match runner.run().await {
        Ok(outcome) => std::process::exit(outcome.exit_code()),
        Err(err) => {
            tracing::error!("{}", err);
            std::process::exit(1);
        }
    }
}

/// RUST_LOG wins over the config file's logLevel
fn init_tracing(config_level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level_filter(config_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
