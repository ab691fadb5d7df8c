//! Chips Lifecycle 命令行入口
//!
//! 检查模块描述、查看启动顺序和依赖关系，以及以空行为运行一组模块。
//!
//! # 命令概览
//!
//! - `list` - 列出模块目录中发现的模块
//! - `order` - 显示启动顺序
//! - `dependents` - 显示直接或间接依赖某个模块的模块
//! - `run` - 启动所有模块，Ctrl+C 后关闭
//! - `check-config` - 验证配置文件
//! - `version` - 显示版本信息
//!
//! # 使用示例
//!
//! ```bash
//! # 使用配置文件中的模块目录显示启动顺序
//! chips-lifecycle -c config.yaml order
//!
//! # 额外指定模块目录
//! chips-lifecycle -m ./modules dependents logic
//!
//! # 检查配置文件
//! chips-lifecycle check-config -c config.yaml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;

use chips_lifecycle::{
    LifecycleConfig, LifecycleReport, Logger, LoggerConfig, ModuleActivator, ModuleManager,
    NoopActivator,
};

/// Chips Lifecycle - 模块生命周期管理器
#[derive(Parser)]
#[command(name = "chips-lifecycle")]
#[command(version, about = "按依赖顺序管理模块的启动与停止", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 额外的模块目录（可重复）
    #[arg(short, long = "module-dir", global = true)]
    module_dirs: Vec<PathBuf>,

    /// 开发模式（输出更详细的日志）
    #[arg(long, global = true)]
    dev: bool,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 列出模块目录中发现的模块
    List,

    /// 显示所有模块的启动顺序
    Order,

    /// 显示直接或间接依赖指定模块的模块
    Dependents {
        /// 模块 ID
        module_id: String,
    },

    /// 启动所有模块，收到 Ctrl+C 后按反序关闭
    Run,

    /// 验证配置文件
    CheckConfig {
        /// 配置文件路径（不指定则使用全局 -c 选项）
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// 查看版本信息
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            print_version();
            return Ok(());
        }
        Commands::CheckConfig { ref config } => {
            let path = config.clone().unwrap_or_else(|| cli.config.clone());
            return check_config(&path).await;
        }
        _ => {}
    }

    let config = load_config(&cli).await?;
    let _guard = init_logging(&config);

    let manager = ModuleManager::from_config(&config);
    manager
        .load_from_dirs(|_| Arc::new(NoopActivator) as Arc<dyn ModuleActivator>)
        .await?;

    match cli.command {
        Commands::List => {
            for info in manager.list_modules().await {
                let requires: Vec<_> = info.descriptor.required_module_ids.iter().collect();
                println!(
                    "{:<24} {:<10} requires: {:?}",
                    info.id(),
                    info.version(),
                    requires
                );
            }
        }
        Commands::Order => {
            for (index, module_id) in manager.start_order().await?.iter().enumerate() {
                println!("{:>3}. {}", index + 1, module_id);
            }
        }
        Commands::Dependents { module_id } => {
            let dependents = manager.transitive_dependents(&module_id).await?;
            if dependents.is_empty() {
                println!("没有模块依赖 '{}'", module_id);
            }
            for id in dependents {
                println!("{}", id);
            }
        }
        Commands::Run => run(&manager).await?,
        Commands::Version | Commands::CheckConfig { .. } => {}
    }

    Ok(())
}

/// 加载配置，并应用命令行覆盖
async fn load_config(cli: &Cli) -> Result<LifecycleConfig, Box<dyn std::error::Error>> {
    let mut config = if cli.config.exists() {
        LifecycleConfig::from_file(&cli.config).await?
    } else {
        LifecycleConfig::default()
    };

    let mut overrides = LifecycleConfig::builder();
    if let Some(ref level) = cli.log_level {
        overrides = overrides.log_level(level.clone());
    }
    for dir in &cli.module_dirs {
        overrides = overrides.module_dir(dir.clone());
    }
    if cli.dev {
        overrides = overrides.dev_mode();
    }
    config.merge(overrides.build());
    config.validate()?;

    Ok(config)
}

/// 初始化日志系统
fn init_logging(config: &LifecycleConfig) -> chips_lifecycle::LogGuard {
    let mut logger_config = LoggerConfig::from_log_config(&config.logging);
    // 开发模式：显示文件位置和操作耗时
    logger_config.verbose = config.dev_mode;
    Logger::try_init(logger_config)
}

/// 启动所有模块并等待关闭信号
async fn run(manager: &ModuleManager) -> Result<(), Box<dyn std::error::Error>> {
    let report = manager.start_all().await?;
    print_report("启动", &report);

    signal::ctrl_c().await?;
    info!("收到关闭信号，正在关闭模块...");

    let report = manager.shutdown().await?;
    print_report("关闭", &report);
    Ok(())
}

fn print_report(operation: &str, report: &LifecycleReport) {
    println!(
        "{}完成: 启动 {} 个，停止 {} 个，跳过 {} 个，失败记录 {} 条",
        operation,
        report.started.len(),
        report.stopped.len(),
        report.skipped.len(),
        report.failures.len()
    );
    for failure in &report.failures {
        println!("  - {}", failure);
    }
}

/// 检查配置文件
async fn check_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("检查配置文件: {}", path.display());

    if !path.exists() {
        println!("配置文件不存在，将使用默认配置:");
        println!("{}", serde_yaml::to_string(&LifecycleConfig::default())?);
        return Ok(());
    }

    match LifecycleConfig::from_file(path).await {
        Ok(config) => {
            println!("配置文件有效");
            println!("  日志级别:     {}", config.logging.level);
            println!("  模块目录:     {:?}", config.modules.module_dirs);
            println!("  描述文件名:   {}", config.modules.manifest_file);
            match config.modules.hook_timeout_ms {
                Some(ms) => println!("  回调超时:     {} ms", ms),
                None => println!("  回调超时:     不限制"),
            }
            println!("  开发模式:     {}", if config.dev_mode { "是" } else { "否" });
            Ok(())
        }
        Err(e) => {
            println!("配置文件无效 [{}]: {}", e.error_code(), e);
            Err(Box::new(e))
        }
    }
}

/// 打印版本信息
fn print_version() {
    println!("Chips Lifecycle - 模块生命周期管理器");
    println!("  版本:     {}", chips_lifecycle::VERSION);
    println!("  目标平台: {}", std::env::consts::ARCH);
    println!("  操作系统: {}", std::env::consts::OS);
}
