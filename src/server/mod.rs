//! HTTP server implementing the snapshot test protocol.
//!
//! The app under test drives a run through a small POST protocol:
//! `/initTests` → `/registerTest`* → (`/base64` + `/reportTest`)* →
//! `/endOfTests`, with `/log` calls interleaved at will. The server owns no
//! run policy: it records outcomes into the shared [`Reporter`] and raises
//! [`RunSignals`] toward the orchestrator.

pub mod handlers;
pub mod types;

use axum::Router;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::post;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tower::ServiceExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::report::Reporter;

/// Default protocol port, overridable via config
pub const DEFAULT_PORT: u16 = 3000;

/// Delay between acknowledging `/endOfTests` and firing the completion
/// signal, leaving room for trailing `/log` calls.
pub const DEFAULT_END_OF_TESTS_DELAY: Duration = Duration::from_millis(300);

/// One server per process: a run owns the port and the snapshot directories.
static SERVER_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Error types for server operations
#[derive(Debug)]
pub enum ServerError {
    /// A server instance is already running in this process
    AlreadyRunning,

    /// Socket-level failure (bind, local_addr)
    Io(std::io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::AlreadyRunning => write!(f, "Server already started"),
            ServerError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::AlreadyRunning => None,
            ServerError::Io(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Io(err)
    }
}

/// Signals the server raises toward the orchestrator
#[derive(Debug, Clone)]
pub struct RunSignals {
    /// Fired once, shortly after `/endOfTests` is acknowledged
    pub completion: mpsc::Sender<()>,

    /// Notified on every incoming request; resets the idle timer
    pub activity: Arc<Notify>,
}

impl RunSignals {
    /// Create the signal pair plus the completion receiver the orchestrator
    /// listens on. The activity side is shared through the `Arc`.
    pub fn new() -> (Self, mpsc::Receiver<()>) {
        let (completion, completion_rx) = mpsc::channel(1);
        let signals = Self {
            completion,
            activity: Arc::new(Notify::new()),
        };
        (signals, completion_rx)
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on; 0 picks a free port
    pub port: u16,

    /// Base directory holding `uploads`, `refImages` and `diffs`
    pub snapshots_path: PathBuf,

    /// Delay before the completion signal fires after `/endOfTests`
    pub end_of_tests_delay: Duration,
}

impl ServerConfig {
    pub fn new(port: u16, snapshots_path: impl Into<PathBuf>) -> Self {
        Self {
            port,
            snapshots_path: snapshots_path.into(),
            end_of_tests_delay: DEFAULT_END_OF_TESTS_DELAY,
        }
    }

    /// Shorten or stretch the post-`/endOfTests` delay (used by tests)
    pub fn end_of_tests_delay(mut self, delay: Duration) -> Self {
        self.end_of_tests_delay = delay;
        self
    }
}

/// Shared state injected into every handler
#[derive(Debug)]
pub struct ServerContext {
    pub reporter: Arc<Mutex<Reporter>>,
    pub snapshots_path: PathBuf,
    pub end_of_tests_delay: Duration,
    pub signals: RunSignals,
}

impl ServerContext {
    pub fn new(config: &ServerConfig, reporter: Arc<Mutex<Reporter>>, signals: RunSignals) -> Self {
        Self {
            reporter,
            snapshots_path: config.snapshots_path.clone(),
            end_of_tests_delay: config.end_of_tests_delay,
            signals,
        }
    }

    /// Captured images of the current run, cleared on `/initTests`
    pub fn uploads_dir(&self) -> PathBuf {
        self.snapshots_path.join("uploads")
    }

    /// Checked-in baselines, never cleared automatically
    pub fn ref_images_dir(&self) -> PathBuf {
        self.snapshots_path.join("refImages")
    }

    /// Generated diff visualizations, cleared on `/initTests`
    pub fn diffs_dir(&self) -> PathBuf {
        self.snapshots_path.join("diffs")
    }
}

/// Build the protocol router around a shared context.
///
/// Exposed separately from [`SnapshotServer`] so tests can drive the
/// protocol without a socket.
pub fn router(ctx: Arc<ServerContext>) -> Router {
    Router::new()
        .route("/initTests", post(handlers::init_tests))
        .route("/registerTest", post(handlers::register_test))
        .route("/base64", post(handlers::upload_base64))
        .route("/reportTest", post(handlers::report_test))
        .route("/log", post(handlers::client_log))
        .route("/endOfTests", post(handlers::end_of_tests))
        .fallback(handlers::fallback)
        .layer(middleware::from_fn_with_state(ctx.clone(), track_activity))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Every request counts as app activity, including unknown paths
async fn track_activity(
    State(ctx): State<Arc<ServerContext>>,
    request: Request,
    next: Next,
) -> Response {
    ctx.signals.activity.notify_one();
    next.run(request).await
}

/// A running protocol server bound to a local port
pub struct SnapshotServer {
    addr: SocketAddr,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl SnapshotServer {
    /// Bind the port and start serving. Fails with
    /// [`ServerError::AlreadyRunning`] while another instance is live.
    pub async fn start(
        config: ServerConfig,
        reporter: Arc<Mutex<Reporter>>,
        signals: RunSignals,
    ) -> ServerResult<Self> {
        if SERVER_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
            Ok(listener) => listener,
            Err(err) => {
                SERVER_ACTIVE.store(false, Ordering::SeqCst);
                return Err(err.into());
            }
        };
        let addr = listener.local_addr()?;

        let ctx = Arc::new(ServerContext::new(&config, reporter, signals));
        let app = router(ctx);
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(accept_loop(listener, app, shutdown.clone()));

        info!(%addr, "server is listening");
        Ok(Self {
            addr,
            shutdown,
            task: Some(task),
        })
    }

    /// Address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and destroy all open connections. No graceful drain:
    /// the client is a controlled harness, not a production consumer.
    /// Idempotent; calling it on a stopped server logs and no-ops.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            debug!("server is not started");
            return;
        };
        self.shutdown.notify_one();
        if let Err(err) = task.await {
            warn!(error = %err, "accept loop did not shut down cleanly");
        }
        SERVER_ACTIVE.store(false, Ordering::SeqCst);
        info!("server stopped");
    }
}

impl Drop for SnapshotServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            SERVER_ACTIVE.store(false, Ordering::SeqCst);
        }
    }
}

/// Accept connections until shutdown, tracking each one so stop can
/// force-destroy whatever is still open.
async fn accept_loop(listener: TcpListener, app: Router, shutdown: Arc<Notify>) {
    let mut connections: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, remote)) => {
                        debug!(%remote, "connection opened");
                        connections.spawn(serve_connection(stream, app.clone()));
                    }
                    Err(err) => warn!(error = %err, "failed to accept connection"),
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    if !connections.is_empty() {
        debug!(open = connections.len(), "destroying open connections");
    }
    connections.shutdown().await;
}

/// Serve a single connection with hyper, routing through the axum app
async fn serve_connection(stream: TcpStream, app: Router) {
    let socket = TokioIo::new(stream);
    let service = hyper::service::service_fn(move |request: Request<Incoming>| {
        app.clone().oneshot(request)
    });

    if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
        .serve_connection(socket, service)
        .await
    {
        debug!(error = %err, "connection closed with error");
    }
}
