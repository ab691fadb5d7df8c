//! # Chips Lifecycle - 模块生命周期管理器
//!
//! 加载一组独立开发的模块，按照模块声明的依赖关系驱动它们完成
//! 启动/停止状态机：
//!
//! - **依赖解析**: 拓扑排序得到确定的启动顺序，检测循环依赖和缺失依赖
//! - **生命周期协议**: `willStart` / `started` / `willStop` / `stopped`，
//!   以及上下文刷新的 `willRefreshContext` / `contextRefreshed`
//! - **失败隔离**: 单个模块回调失败（错误、panic、超时）只产生失败记录，不影响其他模块
//! - **级联停止**: 停止一个模块时先停止所有依赖它的模块
//! - **并发一致性**: 修改状态的操作由同一把读写锁串行化
//!
//! ## 快速开始
//!
//! ```rust
//! use chips_lifecycle::{Module, ModuleDescriptor, ModuleManager, NoopActivator};
//!
//! #[tokio::main]
//! async fn main() -> chips_lifecycle::Result<()> {
//!     let manager = ModuleManager::with_defaults();
//!
//!     manager
//!         .load_module(Module::new(ModuleDescriptor::new("logic", "1.0.0"), NoopActivator))
//!         .await?;
//!     manager
//!         .load_module(Module::new(
//!             ModuleDescriptor::new("reporting", "1.0.0").requires("logic"),
//!             NoopActivator,
//!         ))
//!         .await?;
//!
//!     let report = manager.start_all().await?;
//!     assert_eq!(report.started, vec!["logic", "reporting"]);
//!
//!     // 停止 logic 会先停止 reporting
//!     manager.stop_module("logic").await?;
//!     assert!(!manager.is_started("reporting").await);
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 模块描述、依赖图、生命周期回调、注册表和管理器
//! - `core` - 配置
//! - `utils` - 错误类型和日志系统

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod core;
pub mod module;
pub mod utils;

// 重导出常用类型，方便使用
pub use module::{
    resolve_start_order, CollectingFailureSink, DependencyGraph, FailureCause, FailureSink,
    FanoutFailureSink, LifecycleFailure, LifecyclePhase, LifecycleReport, Module,
    ModuleActivator, ModuleDescriptor, ModuleInfo, ModuleManager, ModuleManagerConfig,
    ModuleParser, ModuleRuntime, ModuleState, NoopActivator, NoopRuntime, TracingFailureSink,
};

pub use utils::{error_code, CoreError, Result};
pub use utils::logger::{
    FileOutput, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy,
};

pub use core::config::{LifecycleConfig, LifecycleConfigBuilder, LogConfig, ModuleConfig};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
