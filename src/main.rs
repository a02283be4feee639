use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use tokio::net::TcpListener;

use sandcastle::api::{create_router, AppState};
use sandcastle::config::Settings;
use sandcastle::sandbox::{DockerRuntime, Pool, Runtime};
use sandcastle::session::{
    MemoryCache, MemoryStore, SessionManager, SessionStore, SqliteStore,
};
use sandcastle::workspace::{LocalObjectStore, WorkspaceArchive};

const APP_NAME: &str = "sandcastle";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common);

    match cli.command {
        Command::Serve(cmd) => serve_main(cli.common, cmd),
    }
}

#[tokio::main]
async fn serve_main(common: CommonOpts, cmd: ServeCommand) -> Result<()> {
    handle_serve(common, cmd).await
}

#[derive(Debug, Parser)]
#[command(
    name = APP_NAME,
    version,
    about = "Ephemeral sandbox pool and session lifecycle service.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Output logs as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP API server
    Serve(ServeCommand),
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

fn init_logging(common: &CommonOpts) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if common.quiet {
        "error"
    } else {
        match common.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{APP_NAME}={level},tower_http={level}")));

    if common.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(io::stderr().is_terminal())
                    .with_target(false),
            )
            .try_init()
            .ok();
    }

    // Bridge for modules logging through the log crate.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .try_init()
        .ok();
}

async fn handle_serve(common: CommonOpts, cmd: ServeCommand) -> Result<()> {
    let mut settings =
        Settings::load(common.config.as_deref()).context("loading configuration")?;
    if let Some(host) = cmd.host {
        settings.server.host = host;
    }
    if let Some(port) = cmd.port {
        settings.server.port = port;
    }

    // Runtime with restart recovery from labeled containers.
    let runtime: Arc<dyn Runtime> = Arc::new(DockerRuntime::new(settings.sandbox_config()));
    if let Err(err) = runtime.reconcile().await {
        warn!("could not reconcile sandboxes from backend: {err}");
    }

    let store: Arc<dyn SessionStore> = if settings.database.path == ":memory:" {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            SqliteStore::open(std::path::Path::new(&settings.database.path))
                .await
                .context("opening session database")?,
        )
    };

    let object_store = LocalObjectStore::new(settings.archive.root.clone())
        .context("creating archive store")?;
    let archive = Arc::new(WorkspaceArchive::new(
        Arc::clone(&runtime),
        Arc::new(object_store),
        settings.archive_config(),
    ));

    let pool = Pool::new(settings.pool_config(), Arc::clone(&runtime));
    // Adopt the previous generation's containers instead of leaking them.
    if let Err(err) = pool.recover().await {
        warn!("could not recover sandboxes into the pool: {err}");
    }

    let sessions = SessionManager::new(
        store,
        Some(Arc::new(MemoryCache::new())),
        Some(archive),
        settings.manager_config(),
    );

    let state = AppState::new(Arc::clone(&pool), Arc::clone(&sessions), runtime);
    let router = create_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("parsing listen address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    info!("shutting down");
    sessions.close().await;
    pool.close().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
