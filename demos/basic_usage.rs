//! 基本使用示例
//!
//! 本示例展示了模块生命周期管理器的基本使用方法，包括：
//!
//! - 注册带依赖关系的模块
//! - 按依赖顺序启动
//! - 刷新上下文
//! - 级联停止与关闭
//!
//! # 运行示例
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chips_lifecycle::{
    CollectingFailureSink, Logger, LoggerConfig, Module, ModuleActivator, ModuleDescriptor,
    ModuleManager,
};

/// 打印每个回调的模块
struct PrintingActivator {
    id: &'static str,
}

#[async_trait]
impl ModuleActivator for PrintingActivator {
    async fn will_start(&self) -> anyhow::Result<()> {
        println!("   [{}] willStart", self.id);
        Ok(())
    }

    async fn started(&self) -> anyhow::Result<()> {
        println!("   [{}] started", self.id);
        Ok(())
    }

    async fn will_stop(&self) -> anyhow::Result<()> {
        println!("   [{}] willStop", self.id);
        Ok(())
    }

    async fn stopped(&self) -> anyhow::Result<()> {
        println!("   [{}] stopped", self.id);
        Ok(())
    }
}

/// 启动时总是失败的模块
struct BrokenActivator;

#[async_trait]
impl ModuleActivator for BrokenActivator {
    async fn will_start(&self) -> anyhow::Result<()> {
        anyhow::bail!("数据库连接不可用")
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = Logger::try_init(LoggerConfig::builder().level("warn").build());

    println!("=== 模块生命周期管理器基本使用示例 ===\n");

    // -------------------------------------------------------------------------
    // 1. 注册模块
    // -------------------------------------------------------------------------
    println!("1. 注册模块...");

    let failures = Arc::new(CollectingFailureSink::new());
    let manager = ModuleManager::with_defaults().with_failure_sink(failures.clone());

    manager
        .load_module(Module::new(
            ModuleDescriptor::new("logic", "1.0.0"),
            PrintingActivator { id: "logic" },
        ))
        .await?;
    manager
        .load_module(Module::new(
            ModuleDescriptor::new("webservices", "1.0.0").requires("logic"),
            PrintingActivator { id: "webservices" },
        ))
        .await?;
    manager
        .load_module(Module::new(
            ModuleDescriptor::new("reporting", "1.0.0")
                .requires("logic")
                .requires("webservices"),
            PrintingActivator { id: "reporting" },
        ))
        .await?;
    manager
        .load_module(Module::new(
            ModuleDescriptor::new("archive", "1.0.0").requires("logic"),
            BrokenActivator,
        ))
        .await?;

    println!("   启动顺序: {:?}\n", manager.start_order().await?);

    // -------------------------------------------------------------------------
    // 2. 启动所有模块
    // -------------------------------------------------------------------------
    println!("2. 启动所有模块...");
    let report = manager.start_all().await?;
    println!("   已启动: {:?}", report.started);
    for failure in &report.failures {
        println!("   失败: {}", failure);
    }
    println!();

    // -------------------------------------------------------------------------
    // 3. 刷新上下文（首次刷新会触发 started）
    // -------------------------------------------------------------------------
    println!("3. 刷新上下文...");
    manager.refresh_context().await?;
    println!();

    // -------------------------------------------------------------------------
    // 4. 停止 webservices（reporting 依赖它，会先被停止）
    // -------------------------------------------------------------------------
    println!("4. 停止 webservices...");
    let report = manager.stop_module("webservices").await?;
    println!("   已停止: {:?}", report.stopped);
    println!("   仍在运行: {:?}\n", manager.started_modules().await?);

    // -------------------------------------------------------------------------
    // 5. 关闭
    // -------------------------------------------------------------------------
    println!("5. 关闭...");
    let report = manager.shutdown().await?;
    println!("   已停止: {:?}", report.stopped);
    println!("   累计失败记录: {} 条", failures.len());

    println!("\n=== 示例完成 ===");
    Ok(())
}
