use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use v::{init_global_config_manager, init_tracing, ConfigManager, ConfigSource};

use v_connect_chat::{app, config};

/// 命令行参数 / Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "v-connect-chat real-time message distribution", long_about = None)]
struct Args {
    /// 额外的配置文件（优先级高于默认配置）
    /// Extra config file, layered above the default sources
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
    /// WebSocket 分发服务 / WebSocket distribution service
    #[default]
    Serve,
    /// 持久化 worker / Persistence worker
    Persist,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if let Some(path) = &args.config {
        init_global_config_manager(ConfigManager::with_sources(vec![ConfigSource::required_file(path)])?)?;
    }
    init_tracing()?;
    let cfg = config::load()?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    match args.command.unwrap_or_default() {
        Command::Serve => app::serve(&cfg, cancel).await,
        Command::Persist => app::persist(&cfg, cancel).await,
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("🛑 shutdown signal received");
    cancel.cancel();
}
