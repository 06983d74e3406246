//! TCP file-transfer test server — entry point.
//!
//! ```text
//! tcp-server [--host 0.0.0.0] [--port 8765] [--path tcp_test_root]
//!            [--debug] [--config <path>] [--idle-reap-secs 0]
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tcp_server::config::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "tcp-server", about = "Reference TCP file-transfer test server")]
struct Cli {
    /// Address to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Root directory served by the file operations.
    #[arg(long)]
    path: Option<PathBuf>,

    /// Enable debug-level logging.
    #[arg(long)]
    debug: bool,

    /// Optional TOML config file merged under the flags above.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds of inactivity after which a session is reaped; 0 disables
    /// the reaper (default).
    #[arg(long)]
    idle_reap_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = cli
        .config
        .as_deref()
        .map(ServerConfig::load)
        .unwrap_or_default();

    if let Some(host) = cli.host {
        config.network.host = host;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(path) = cli.path {
        config.storage.root = path;
    }
    if let Some(secs) = cli.idle_reap_secs {
        config.storage.idle_reap_secs = secs;
    }
    if cli.debug {
        config.logging.level = "debug".to_string();
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tcp-server v{}", env!("CARGO_PKG_VERSION"));
    info!(root = %config.storage.root.display(), "root directory");

    let addr = match config.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, host = %config.network.host, "invalid host address");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
    };

    match tcp_server::run(
        addr,
        config.storage.root,
        config.storage.idle_reap_secs,
        shutdown,
    )
    .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}
