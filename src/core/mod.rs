//! 核心模块
//!
//! 包含生命周期管理器的配置。

pub mod config;

pub use config::{LifecycleConfig, LifecycleConfigBuilder, LogConfig, ModuleConfig};
