//! 模块管理模块
//!
//! 包含模块生命周期管理的核心组件：
//! - 模块描述与状态定义
//! - 依赖图与启动顺序解析
//! - 生命周期回调与失败隔离
//! - 模块注册表
//! - 模块管理器

pub mod dependency;
pub mod lifecycle;
pub mod manager;
pub mod metadata;
pub mod parser;
pub mod registry;
pub mod runtime;

// 重导出常用类型
pub use dependency::{resolve_start_order, DependencyGraph};
pub use lifecycle::{
    CollectingFailureSink, FailureCause, FailureSink, FanoutFailureSink, LifecycleFailure,
    LifecycleInvoker, LifecyclePhase, LifecycleReport, ModuleActivator, NoopActivator,
    TracingFailureSink,
};
pub use manager::{Module, ModuleManager, ModuleManagerConfig};
pub use metadata::{ModuleDescriptor, ModuleInfo, ModuleState};
pub use parser::{ModuleParser, DEFAULT_MANIFEST_FILE};
pub use registry::{ModuleEntry, ModuleRegistry};
pub use runtime::{ModuleRuntime, NoopRuntime};
