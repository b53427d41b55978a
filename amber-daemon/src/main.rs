//! Daemon entry point; the control surface lives in the library crate.

use amber_daemon::routes;

use std::path::PathBuf;
use std::sync::Arc;

use amber_config::{ConfigLoader, EnvConfig};
use amber_core::Daemon;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments for the Amber update daemon
#[derive(Parser, Debug)]
#[command(name = "amberd")]
#[command(about = "Package update daemon for signed remote repositories")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, env = "AMBER_CONFIG")]
    config: Option<PathBuf>,

    /// Store path (overrides config)
    #[arg(long, env = "AMBER_STORE_PATH")]
    store: Option<PathBuf>,

    /// Listen port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,
}

/// Host reboot via the platform's init system.
#[derive(Debug)]
struct SystemReboot;

#[async_trait::async_trait]
impl amber_core::RebootHook for SystemReboot {
    async fn reboot(&self) -> amber_model::Result<()> {
        info!("system image active; rebooting");
        let status = tokio::process::Command::new("reboot")
            .status()
            .await
            .map_err(|e| {
                amber_model::AmberError::io(format!("reboot failed: {e}"))
            })?;
        if !status.success() {
            return Err(amber_model::AmberError::io(format!(
                "reboot exited with {status}"
            )));
        }
        Ok(())
    }
}

fn main() {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("cannot start runtime: {e}");
            std::process::exit(1);
        }
    };
    let code = runtime.block_on(run());
    std::process::exit(code);
}

async fn run() -> i32 {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "amberd=info,amber_core=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut loader = ConfigLoader::new().with_env(EnvConfig::from_env());
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    let (mut config, warnings) = match loader.load() {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(error = %e, "configuration failed to load");
            return 1;
        }
    };
    for warning in &warnings {
        warn!(%warning, "config warning");
    }
    if let Some(store) = args.store {
        config.store.path = store;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    if !config.daemon.startup_delay.is_zero() {
        info!(
            secs = config.daemon.startup_delay.as_secs(),
            "startup delay"
        );
        tokio::time::sleep(config.daemon.startup_delay).await;
    }

    if let Err(e) = config.ensure_directories() {
        error!(error = %e, store = %config.store.path.display(), "cannot open store");
        return 1;
    }

    let mut builder = Daemon::builder(&config.store.path)
        .poll_interval(config.daemon.blob_poll_interval)
        .blob_concurrency(config.daemon.blob_fetch_concurrency)
        .activation_dir(config.store.path.join("pkgfs").join("active"));
    if let Some(dir) = &config.store.source_config_dir {
        builder = builder.default_config_dir(dir);
    }
    if config.daemon.auto_update {
        builder = builder.auto_update(true, Arc::new(SystemReboot));
    }

    let daemon = match builder.start().await {
        Ok(daemon) => Arc::new(daemon),
        Err(e) => {
            error!(error = %e, "daemon initialization failed");
            return 1;
        }
    };

    let app = routes::create_api_router()
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(Arc::clone(&daemon));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "cannot bind control socket");
            return 1;
        }
    };
    info!(%addr, "serving control API");

    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal());
    if let Err(e) = serve.await {
        error!(error = %e, "server error");
    }

    let daemon = match Arc::try_unwrap(daemon) {
        Ok(daemon) => daemon,
        Err(_) => {
            // A handler still holds the daemon; nothing left to flush
            // cleanly.
            warn!("daemon still referenced at shutdown");
            return 0;
        }
    };
    if daemon.shutdown().await {
        0
    } else {
        // A core worker panicked somewhere along the way.
        2
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown requested");
}
