//! Сервер Routex.
//!
//! Загружает настройки, открывает хранилище, запускает маршрутизатор и
//! работает до Ctrl-C.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use routex::{
    config::{Settings, StorageKind},
    logging::init_logging,
    storage::open_storage,
    Router,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "routex")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Routex - publish/subscribe and RPC message router", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Запустить маршрутизатор
    Run {
        /// Путь к TOML-файлу настроек
        #[arg(short, long, env = "ROUTEX_CONFIG")]
        config: Option<PathBuf>,
        /// ID маршрутизатора (по умолчанию генерируется)
        #[arg(long)]
        router_id: Option<String>,
        /// Тип хранилища
        #[arg(long, value_enum)]
        storage: Option<StorageArg>,
        /// Путь к файлу хранилища
        #[arg(long)]
        storage_path: Option<PathBuf>,
    },
    /// Вывести итоговые настройки в JSON
    CheckConfig {
        #[arg(short, long, env = "ROUTEX_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StorageArg {
    Memory,
    File,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            router_id,
            storage,
            storage_path,
        } => {
            let mut settings = Settings::load(config.as_deref()).context("failed to load settings")?;
            if let Some(router_id) = router_id {
                settings.router_id = Some(router_id);
            }
            if let Some(storage) = storage {
                settings.storage.kind = match storage {
                    StorageArg::Memory => StorageKind::Memory,
                    StorageArg::File => StorageKind::File,
                };
            }
            if let Some(path) = storage_path {
                settings.storage.path = path;
            }
            settings.validate().context("invalid settings")?;
            run(settings).await
        }
        Commands::CheckConfig { config } => {
            let settings = Settings::load(config.as_deref()).context("failed to load settings")?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

async fn run(settings: Settings) -> Result<()> {
    let logging =
        init_logging(settings.logging.clone()).context("failed to initialize logging")?;

    info!(
        target: "routex",
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_COMMIT"),
        build_time = env!("BUILD_TIME"),
        "starting"
    );

    let storage = open_storage(&settings.storage).with_context(|| {
        format!(
            "failed to open {:?} storage at {}",
            settings.storage.kind,
            settings.storage.path.display()
        )
    })?;

    let router = Router::new(settings.router_config(), storage);
    router.serve().await.context("failed to start router")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!(target: "routex", "shutdown requested");

    router.shutdown().await;
    logging.shutdown(Duration::from_secs(5)).await;
    Ok(())
}
