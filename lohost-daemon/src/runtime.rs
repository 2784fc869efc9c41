use std::convert::Infallible;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::{Request, Response};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;

use lohost_core::{DaemonConfig, ServiceRegistry, TunnelSet};

use crate::body::ProxyBody;
use crate::control;
use crate::error::{io_err, DaemonError};
use crate::router;

/// Everything a request handler can see. One per daemon instance.
pub(crate) struct DaemonState {
    pub config: DaemonConfig,
    pub registry: RwLock<ServiceRegistry>,
    pub started_at: Instant,
    /// Spliced upgrade connections, closed in bulk on shutdown.
    pub tunnels: TunnelSet,
    pub shutdown: broadcast::Sender<()>,
}

impl DaemonState {
    pub(crate) fn new(config: DaemonConfig) -> Arc<Self> {
        let (shutdown, _) = broadcast::channel(4);
        Arc::new(Self {
            config,
            registry: RwLock::new(ServiceRegistry::new()),
            started_at: Instant::now(),
            tunnels: TunnelSet::new(),
            shutdown,
        })
    }
}

/// Requests a graceful stop of a running [`Daemon`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// A bound daemon instance. Independent instances can run side by side on
/// different ports; each owns its registry.
pub struct Daemon {
    listener: TcpListener,
    state: Arc<DaemonState>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Daemon {
    /// Bind the loopback listener. Port `0` picks a free port; the stored
    /// config then reports the real one.
    pub async fn bind(mut config: DaemonConfig) -> Result<Self, DaemonError> {
        let addr = config.control_addr();
        let listener = TcpListener::bind(addr).await.map_err(|err| {
            if err.kind() == ErrorKind::AddrInUse {
                DaemonError::PortInUse { port: config.port }
            } else {
                io_err(format!("bind {addr}"), err)
            }
        })?;
        let local = listener
            .local_addr()
            .map_err(|e| io_err(format!("bind {addr}"), e))?;
        config.port = local.port();

        let state = DaemonState::new(config);
        let shutdown_rx = state.shutdown.subscribe();
        Ok(Self {
            listener,
            state,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DaemonError> {
        self.listener
            .local_addr()
            .map_err(|e| io_err("daemon listener", e))
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.state.config
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.state.shutdown.clone(),
        }
    }

    /// Accept connections until a shutdown is requested (control API `stop`
    /// or a [`ShutdownHandle`]), then close every upgraded tunnel.
    pub async fn serve(mut self) -> Result<(), DaemonError> {
        tracing::info!(
            port = self.state.config.port,
            domain = %self.state.config.route_domain,
            "lohost daemon listening",
        );

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::warn!(error = %err, "accept failed");
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            continue;
                        }
                    };
                    tokio::spawn(serve_connection(stream, peer, self.state.clone()));
                }
            }
        }

        let closed = self.state.tunnels.close_all();
        tracing::info!(closed_tunnels = closed, "lohost daemon stopped");
        Ok(())
    }
}

/// Bind and serve until stopped by the control API, Ctrl-C, or SIGTERM.
pub async fn run(config: DaemonConfig) -> Result<(), DaemonError> {
    let daemon = Daemon::bind(config).await?;
    let handle = daemon.shutdown_handle();
    let mut shutdown_rx = handle.tx.subscribe();

    let signal_task = tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_rx.recv() => {}
            _ = wait_for_termination() => {
                tracing::info!("received termination signal, shutting down daemon");
                handle.shutdown();
            }
        }
    });

    let result = daemon.serve().await;
    signal_task.abort();
    result
}

/// Start the daemon on a single-threaded runtime and block until it exits.
pub fn start_blocking(config: DaemonConfig) -> Result<(), DaemonError> {
    init_tracing("info");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, state: Arc<DaemonState>) {
    let service = service_fn(move |req| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(handle_request(req, &state).await) }
    });

    if let Err(err) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
    {
        tracing::debug!(peer = %peer, error = %err, "client connection closed with error");
    }
}

async fn handle_request(req: Request<Incoming>, state: &DaemonState) -> Response<ProxyBody> {
    if control::is_control_path(req.uri().path()) {
        control::handle(req, state).await
    } else {
        router::forward(req, state).await
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Install the process-wide `fmt` subscriber. `RUST_LOG` wins over `default`.
pub fn init_tracing(default: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
