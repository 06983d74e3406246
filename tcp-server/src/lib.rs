//! TCP file-transfer test server: CLI, config, fixture seeding, and the
//! connection pump built on top of the `tcp-core` protocol engine.

pub mod config;
pub mod connection;
pub mod seed;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tcp_core::ServerState;

/// Runs the server until `shutdown` resolves (typically `ctrl_c()`).
/// Returns once the listener and any background reaper have stopped.
pub async fn run(
    addr: SocketAddr,
    root: std::path::PathBuf,
    idle_reap_secs: u64,
    shutdown: impl std::future::Future<Output = ()>,
) -> std::io::Result<()> {
    seed::seed_root(&root)?;

    let state = Arc::new(ServerState::new(root));

    if idle_reap_secs > 0 {
        let reaper_state = Arc::clone(&state);
        let max_idle = Duration::from_secs(idle_reap_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(max_idle);
            loop {
                interval.tick().await;
                let uploads = reaper_state.upload_sessions.reap_idle(max_idle).await;
                let downloads = reaper_state.download_sessions.reap_idle(max_idle).await;
                if uploads > 0 || downloads > 0 {
                    tracing::info!(uploads, downloads, "idle-session reaper swept sessions");
                }
            }
        });
    }

    tokio::select! {
        result = connection::accept_loop(addr, state) => result,
        _ = shutdown => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    }
}
