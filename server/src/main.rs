use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tracing::{Level, info};
use tracing_subscriber::{
    filter::FilterFn,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

mod checks;
mod db;
#[cfg(test)]
mod harness;
mod http;
mod photo;
mod service;
mod task;

use common::{
    config::{DRConfig, read_config},
    db::{DbBackend, MariaDBBackend, MemoryBackend},
    server::DbDriver,
};
use service::{DRMRegistry, DarkroomService};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "/etc/darkroom/config.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = args.log_level;

    // h2 and hyper are very chatty at debug
    let crate_filter = FilterFn::new(move |metadata| {
        let target = metadata.target();

        !(target.starts_with("h2") || target.starts_with("hyper")) && *metadata.level() <= level
    })
    .with_max_level_hint(level);

    let fmt_layer = tracing_subscriber::fmt::layer();

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(crate_filter))
        .init();

    info!("darkroom server starting up, processing config file");

    let config = read_config(PathBuf::from(args.config)).await?;

    info!("performing filesystem sanity checks");

    let upload_dir = checks::upload_dir_is_writable(&config.fs.upload_dir)?;

    info!({ upload_dir = ?upload_dir }, "upload directory is writable");

    match config.db.driver {
        DbDriver::MariaDB => run::<MariaDBBackend>(config).await,
        DbDriver::Memory => run::<MemoryBackend>(config).await,
    }
}

async fn run<B: DbBackend>(config: Arc<DRConfig>) -> anyhow::Result<()> {
    info!("starting core services");

    let registry = DRMRegistry::new();

    // every service registers itself before any of them start
    let db_svc = db::svc::DbService::<B>::create(config.clone(), &registry)?;
    let task_svc = task::svc::TaskService::create(config.clone(), &registry)?;
    let photo_svc = photo::svc::PhotoService::create(config.clone(), &registry)?;
    let http_svc = http::svc::HttpService::create(config.clone(), &registry)?;

    db_svc.start(&registry).await?;
    task_svc.start(&registry).await?;
    photo_svc.start(&registry).await?;
    http_svc.start(&registry).await?;

    info!("startup complete!");

    tokio::signal::ctrl_c().await?;

    info!("received ctrl-c, shutting down");

    Ok(())
}
