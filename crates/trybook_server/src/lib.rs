use anyhow::Context as _;
use axum::Router;
use std::future::{Future, IntoFuture as _};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use trybook_backend::ServiceOptions;

mod auth;
mod run;
pub mod server;
mod session;

pub const SERVER_ADDR_ENV: &str = "TRYBOOK_SERVER_ADDR";
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8080";

/// How long in-flight requests get to finish once shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthMode {
    Disabled,
    SingleUser,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub bootstrap_token: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Disabled,
            bootstrap_token: None,
        }
    }
}

impl AuthConfig {
    fn from_env() -> Self {
        let mode = std::env::var("TRYBOOK_AUTH_MODE").unwrap_or_default();
        let mode = match mode.trim().to_ascii_lowercase().as_str() {
            "single_user" | "single-user" | "singleuser" => AuthMode::SingleUser,
            _ => AuthMode::Disabled,
        };

        let bootstrap_token = std::env::var("TRYBOOK_AUTH_BOOTSTRAP_TOKEN")
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty());

        Self {
            mode,
            bootstrap_token,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub auth: AuthConfig,
    pub service: ServiceOptions,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            auth: AuthConfig::from_env(),
            service: ServiceOptions::from_env()?,
        })
    }
}

/// Listen address from `TRYBOOK_SERVER_ADDR`; a non-empty `PORT` replaces
/// the port.
pub fn listen_addr(addr: Option<&str>, port: Option<&str>) -> anyhow::Result<SocketAddr> {
    let raw = addr
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SERVER_ADDR);
    let mut addr: SocketAddr = raw
        .parse()
        .with_context(|| format!("invalid {SERVER_ADDR_ENV}: {raw:?}"))?;

    if let Some(port) = port.map(str::trim).filter(|s| !s.is_empty()) {
        let port = port
            .parse::<u16>()
            .with_context(|| format!("invalid PORT: {port:?}"))?;
        addr.set_port(port);
    }
    Ok(addr)
}

pub struct StartedServer {
    pub addr: SocketAddr,
    handle: Option<tokio::task::JoinHandle<anyhow::Result<()>>>,
}

impl StartedServer {
    pub async fn wait(self) -> anyhow::Result<()> {
        let mut this = self;
        let handle = this.handle.take().context("server task already consumed")?;

        handle
            .await
            .context("server task panicked")?
            .context("server failed")?;
        Ok(())
    }
}

impl Drop for StartedServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Serves until `shutdown` resolves. Running agents are then cancelled and
/// open connections get [`SHUTDOWN_GRACE`] to drain before the server is
/// dropped.
pub async fn start_server_with_shutdown<F>(
    addr: SocketAddr,
    config: ServerConfig,
    shutdown: F,
) -> anyhow::Result<StartedServer>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    let app: Router = server::router(config, stop_rx.clone()).await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let actual = listener.local_addr().context("failed to read local addr")?;

    let handle = tokio::spawn(async move {
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(server::stopped(stop_rx))
            .into_future();
        tokio::pin!(serve);

        tokio::select! {
            result = &mut serve => {
                result.context("server failed")?;
                return Ok(());
            }
            _ = shutdown => {}
        }

        tracing::info!("shutting down, cancelling running agents");
        let _ = stop_tx.send(true);
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut serve).await {
            Ok(result) => result.context("server failed")?,
            Err(_) => tracing::warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "connections still open after grace period, dropping them"
            ),
        }
        Ok(())
    });

    Ok(StartedServer {
        addr: actual,
        handle: Some(handle),
    })
}
