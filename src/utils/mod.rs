//! 工具模块
//!
//! 包含错误类型和日志系统等通用工具。

pub mod error;
pub mod logger;

// 重导出常用类型
pub use error::{error_code, CoreError, Result};
pub use logger::{
    FileOutput, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy,
};
