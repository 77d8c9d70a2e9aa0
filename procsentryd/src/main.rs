use anyhow::Context;
use clap::Parser;
use log::{error, info};
use procsentry::{Config, Monitor, api};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(version, about = "Host process monitor and resource-limit enforcer")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, short, env = "PROCSENTRY_CONFIG")]
    config: Option<PathBuf>,
    /// Override the data directory from the config
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Do not start the HTTP API
    #[arg(long)]
    no_api: bool,
    /// Write the effective config to this path and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref());
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if args.no_api {
        config.api.enabled = false;
    }

    if let Some(path) = args.dump_config {
        config
            .save(&path)
            .with_context(|| format!("writing config to {}", path.display()))?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        "[procsentryd] starting v{}, data in {}",
        env!("CARGO_PKG_VERSION"),
        config.data_dir.display()
    );

    let api = config.api.clone();
    let monitor = Arc::new(Monitor::new(config));

    if api.enabled {
        let listener = tokio::net::TcpListener::bind(&api.listen)
            .await
            .with_context(|| format!("binding API listener on {}", api.listen))?;
        info!("[api] listening on {}", api.listen);
        let app = api::router(monitor.clone());
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app.into_make_service()).await {
                error!("[api] server error: {err}");
            }
        });
    }

    tokio::select! {
        _ = monitor.clone().run() => {}
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for ctrl-c")?;
            info!("[procsentryd] shutting down");
        }
    }

    Ok(())
}
