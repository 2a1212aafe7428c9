//! `SchiNET` Daemon
//!
//! Archives chat traffic delivered by a gateway and relays live, filtered
//! views of it to viewer windows on demand. Started with `--viewer` the same
//! binary is the viewer.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use schinet_core::config::load_config;
use schinet_core::tracing_init::{default_filter, init_tracing};
use schinet_daemon::console::spawn_console;
use schinet_daemon::ingest;
use schinet_daemon::storage::Database;
use schinet_daemon::viewer::{ViewerExit, run_viewer};
use schinet_daemon::watch::{SystemSpawner, WatchService};

#[derive(Parser, Debug)]
#[command(name = "schinet")]
#[command(version, about = "SchiNET - chat archive and watch-log relay")]
struct Args {
    /// Run as a watch viewer connecting back to the daemon
    #[arg(long, requires = "port")]
    viewer: bool,

    /// Host the viewer dials
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port the viewer dials
    #[arg(long)]
    port: Option<u16>,

    /// Run without the interactive console (ingest only, until a signal)
    #[arg(long, env = "SCHINET_CONSOLE_DISABLE")]
    console_disable: bool,

    /// Database file path
    #[arg(long, env = "SCHINET_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Address the gateway ingest endpoint listens on
    #[arg(long, env = "SCHINET_INGEST_ADDR")]
    ingest_addr: Option<SocketAddr>,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "SCHINET_LOG_JSON")]
    log_json: bool,

    /// Directory holding a project-level `.schinet/settings.json`
    #[arg(long, env = "SCHINET_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.viewer {
        return viewer_main(&args).await;
    }

    let project_dir = match &args.config_dir {
        Some(dir) => Some(dir.clone()),
        None => std::env::current_dir().ok(),
    };
    let mut config = load_config(project_dir.as_deref())?;
    if let Some(level) = args.log_level.clone() {
        config.daemon.log_level = level;
    }
    if let Some(addr) = args.ingest_addr {
        config.daemon.ingest_addr = addr;
    }
    if let Some(path) = args.db_path.clone() {
        config.daemon.database_path = Some(path);
    }

    init_tracing(
        &default_filter("schinet_daemon", &config.daemon.log_level),
        args.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        ingest_addr = %config.daemon.ingest_addr,
        port_base = config.watch.port_base,
        console = !args.console_disable,
        "Starting schinet"
    );

    let db_path = match config.daemon.database_path.clone() {
        Some(path) => path,
        None => default_db_path()?,
    };
    info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).await?;

    let spawner = SystemSpawner::current_exe(config.watch.viewer_terminal.clone())?;
    let service = Arc::new(WatchService::new(db, Arc::new(spawner), config.watch.clone()));

    let cancel = CancellationToken::new();
    let listener = ingest::bind(config.daemon.ingest_addr).await?;
    let ingest_handle = tokio::spawn(ingest::serve(
        listener,
        Arc::clone(&service),
        cancel.clone(),
    ));

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // Unset $NOTIFY_SOCKET so viewer processes don't notify systemd.
    #[cfg(unix)]
    if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %e, "Failed to notify systemd");
    }

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    let console_done = if args.console_disable {
        None
    } else {
        Some(spawn_console(
            Arc::clone(&service),
            tokio::runtime::Handle::current(),
        )?)
    };
    let console_future = async move {
        match console_done {
            Some(rx) => {
                let _ = rx.await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        () = console_future => {
            info!("Console exited");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    service.shutdown().await;
    cancel.cancel();
    let _ = ingest_handle.await;

    info!("Daemon stopped");
    Ok(())
}

/// Viewer mode: print relayed lines until told to exit.
async fn viewer_main(args: &Args) -> anyhow::Result<()> {
    init_tracing(&default_filter("schinet_daemon", "warn"), args.log_json);

    let port = args
        .port
        .ok_or_else(|| anyhow::anyhow!("--viewer requires --port"))?;
    let exit = run_viewer(&args.host, port, std::process::id(), tokio::io::stdout()).await?;
    if exit == ViewerExit::Disconnected {
        warn!("Relay went away without a shutdown line");
    }
    Ok(())
}

/// Default database path: ~/.schinet/schinet.db
fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".schinet").join("schinet.db"))
}
