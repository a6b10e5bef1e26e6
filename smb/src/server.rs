//! The TCP accept loop (spec.md §4.8 "one layer up" from `connection.rs`):
//! binds, accepts, spawns one `Connection::serve` per socket, and on
//! shutdown stops accepting, signals every live connection, and waits
//! up to a grace period before giving up on stragglers. Grounded on
//! `smb/src/server/mod.rs`'s `Server::run` accept loop, generalized past
//! its `Server<Addrs, Listener, Auth, Share, Handle>` generic stack into
//! the engine's own concrete services (spec.md §9 REDESIGN FLAGS).

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use smb_core::error::SMBError;
use smb_core::{error, info, warn, SMBResult};

use crate::auth::{Authenticator, InMemoryUserStore};
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::credit::CreditManager;
use crate::dispatch::Dispatcher;
use crate::handlers::HandlerRegistry;
use crate::session::SessionManager;

/// Bundles the engine's process-wide shared services (spec.md §3):
/// one `SessionManager`, one `CreditManager`, one `Authenticator`, one
/// `HandlerRegistry`, all handed to every connection's dispatcher.
pub struct Server {
    config: Arc<ServerConfig>,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    /// Builds a server with an in-memory user store and the built-in
    /// command handlers only. Callers needing a real user store or
    /// file-system handlers should use `with_authenticator` and
    /// `registry().register(...)` before calling `run`.
    pub fn new(config: ServerConfig) -> Self {
        let authenticator = Arc::new(Authenticator::with_raw_ntlm_policy(
            Arc::new(InMemoryUserStore::default()),
            "SMBENGINE",
            config.allow_raw_ntlm,
        ));
        Self::with_authenticator(config, authenticator)
    }

    pub fn with_authenticator(config: ServerConfig, authenticator: Arc<Authenticator>) -> Self {
        let config = Arc::new(config);
        let sessions = Arc::new(SessionManager::new());
        let credits = Arc::new(CreditManager::new());
        let server_guid = uuid::Uuid::new_v4();
        let registry = Arc::new(HandlerRegistry::new(authenticator.clone(), sessions.clone(), config.clone(), server_guid));
        let dispatcher = Arc::new(Dispatcher::new(registry, sessions, credits, authenticator));
        Self { config, dispatcher }
    }

    /// The shared dispatcher, exposed so a caller can reach its
    /// `HandlerRegistry` (via a fresh lookup) to register handlers for
    /// commands this engine doesn't implement before calling `run`.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Binds and serves until `shutdown` fires, then waits up to
    /// `shutdown_grace` for in-flight connections to finish on their own
    /// before aborting whatever is left (spec.md §4.8's "forced-close
    /// timeout").
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> SMBResult<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await.map_err(SMBError::io_error)?;
        info!("listening on {}", self.config.bind_addr);

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!("accept failed: {}", err);
                            continue;
                        }
                    };
                    let (connection, read_half) = Connection::new(
                        stream,
                        peer_addr,
                        self.dispatcher.clone(),
                        self.config.max_requests_per_connection,
                        self.config.write_timeout,
                        self.config.idle_timeout,
                        self.config.max_message_size,
                    );
                    info!("accepted connection {} from {}", connection.state.conn_id, peer_addr);
                    let conn_shutdown = shutdown.clone();
                    connections.spawn(connection.serve(read_half, conn_shutdown));
                }
            }
        }

        info!("shutting down, waiting up to {:?} for {} connection(s)", self.config.shutdown_grace, connections.len());
        let grace = tokio::time::sleep(self.config.shutdown_grace);
        tokio::pin!(grace);
        loop {
            if connections.is_empty() {
                break;
            }
            tokio::select! {
                _ = &mut grace => {
                    warn!("{} connection(s) did not finish within the shutdown grace period", connections.len());
                    connections.shutdown().await;
                    break;
                }
                result = connections.join_next() => {
                    if let Some(Err(join_err)) = result {
                        error!("connection task ended abnormally: {}", join_err);
                    }
                }
            }
        }
        Ok(())
    }
}
