//! The `smbd` binary (SPEC_FULL.md §1.1): wires up `ServerConfig::from_env`,
//! a tracing subscriber if the `tracing` feature is on, and a ctrl-c
//! triggered shutdown, then runs the server until it returns. Mirrors the
//! teacher's own `main.rs` env-driven bring-up.

use tokio::sync::watch;

use smb_engine::config::ServerConfig;
use smb_engine::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    #[cfg(feature = "tracing")]
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = ServerConfig::from_env();
    let server = Server::new(config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    server.run(shutdown_rx).await.map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}
