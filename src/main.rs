use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use ua_index::core::{DatasetType, EngineConfig};
use ua_index::engine::{Browscap, LookupOutcome};
use ua_index::update::{LocalFileUpdater, NoUpdater, Updater};

#[derive(Parser, Debug)]
#[command(name = "ua-index")]
#[command(about = "User-agent classification against a sharded, versioned signature index")]
struct Cli {
    /// TOML 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 缓存根目录（覆盖配置）
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// default | small | large
    #[arg(long)]
    dataset_type: Option<DatasetType>,

    /// 以本地 INI 文件作为数据源
    #[arg(long)]
    local_file: Option<PathBuf>,

    /// 关闭自动更新（包括结构性失败后的强制重建）
    #[arg(long)]
    no_auto_update: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 查询一个或多个 user agent
    Lookup {
        #[arg(required = true)]
        user_agents: Vec<String>,
    },
    /// 检查并在有新版本时重建
    Update {
        #[arg(long)]
        force: bool,
    },
    /// 从指定文件强制构建并切换
    Build {
        #[arg(long)]
        file: PathBuf,
    },
    /// 当前版本与 manifest 信息
    Info,
    /// 删除当前版本以外的命名空间
    Prune,
    /// 清空该数据集类型的全部缓存
    Clear,
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(t) = cli.dataset_type {
        config.dataset_type = t;
    }
    if cli.no_auto_update {
        config.auto_update = false;
    }
    Ok(config)
}

fn run(engine: Arc<Browscap>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Lookup { user_agents } => {
            for ua in user_agents {
                match engine.lookup(&ua) {
                    LookupOutcome::Matched(m) => {
                        let out = serde_json::json!({
                            "user_agent": ua,
                            "pattern": m.pattern,
                            "fallback": m.fallback,
                            "properties": m.properties,
                        });
                        println!("{}", serde_json::to_string_pretty(&out)?);
                    }
                    LookupOutcome::Empty => {
                        warn!("No dataset available for lookup");
                        println!("{}", serde_json::json!({ "user_agent": ua, "properties": null }));
                    }
                }
            }
            info!("\n{}", engine.stats());
        }
        Command::Update { force } => match engine.update(force)? {
            Some(v) => println!("switched to version {}", v),
            None => println!("no update performed"),
        },
        Command::Build { .. } => match engine.update(true)? {
            Some(v) => println!("built version {}", v),
            None => println!("version changed concurrently, nothing built"),
        },
        Command::Info => match engine.current_handle() {
            Some(handle) => {
                let m = handle.manifest();
                println!("namespace:      {}", handle.namespace());
                println!(
                    "source version: {}",
                    m.source_version.as_deref().unwrap_or("-")
                );
                println!("patterns:       {}", m.pattern_count);
                println!("records:        {}", m.record_count);
                println!("shard files:    {}", m.shard_file_count());
            }
            None => println!("no published {} dataset", engine.config().dataset_type),
        },
        Command::Prune => println!("removed {} namespaces", engine.prune_superseded()?),
        Command::Clear => println!("removed {} namespaces", engine.clear()?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let source = match &cli.command {
        Command::Build { file } => Some(file.clone()),
        _ => cli.local_file.clone(),
    };
    let updater: Arc<dyn Updater> = match source {
        Some(path) => {
            info!("Using local dataset file {}", path.display());
            Arc::new(LocalFileUpdater::new(path))
        }
        None => Arc::new(NoUpdater),
    };

    let engine = Browscap::open(config, updater)?;

    // ctrl-c：放弃正在进行的重建（不会发布半成品命名空间）
    let cancel = engine.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling rebuild...");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let command = cli.command;
    tokio::task::spawn_blocking(move || run(engine, command)).await?
}
