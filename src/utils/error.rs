//! 生命周期管理器错误类型定义
//!
//! 本模块定义了生命周期管理器中使用的所有错误类型。
//!
//! 注意：单个模块回调的失败不会以 `CoreError` 的形式返回给调用方，
//! 而是记录为 [`LifecycleFailure`](crate::module::lifecycle::LifecycleFailure)。
//! 只有结构性错误（依赖图错误、未知模块等）才会通过 `Result` 同步返回。

use thiserror::Error;

use crate::module::metadata::ModuleState;

/// 生命周期管理器核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 模块管理错误 ====================

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    /// 模块已加载
    #[error("模块已加载: '{0}'")]
    ModuleAlreadyLoaded(String),

    /// 模块正在运行，无法执行该操作
    #[error("模块 '{0}' 正在运行中，请先停止模块")]
    ModuleRunning(String),

    /// 模块有依赖者，无法卸载
    #[error("模块 '{module}' 被以下模块依赖，无法卸载: {dependents:?}")]
    ModuleHasDependents {
        module: String,
        dependents: Vec<String>,
    },

    /// 非法的状态转换
    #[error("模块 '{module_id}' 不允许从 {from:?} 转换到 {to:?}")]
    IllegalStateTransition {
        module_id: String,
        from: ModuleState,
        to: ModuleState,
    },

    /// 无效的模块元数据
    #[error("无效的模块元数据: {0}")]
    InvalidMetadata(String),

    // ==================== 依赖图错误 ====================

    /// 循环依赖，携带参与循环的模块 ID（首尾相同，闭合循环）
    #[error("检测到循环依赖: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    /// 依赖未找到
    #[error("模块 '{module}' 的依赖 '{dependency}' 未加载")]
    MissingDependency {
        module: String,
        dependency: String,
    },

    // ==================== 上下文刷新错误 ====================

    /// 上下文刷新失败
    #[error("上下文刷新失败: {0}")]
    RefreshFailed(String),

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        key: String,
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 版本解析错误
    #[error("版本解析错误: {0}")]
    VersionParse(#[from] semver::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 生命周期操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误码常量
pub mod error_code {
    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_ALREADY_LOADED: &str = "MODULE-002";
    pub const MODULE_RUNNING: &str = "MODULE-003";
    pub const MODULE_HAS_DEPENDENTS: &str = "MODULE-004";
    pub const MODULE_CIRCULAR_DEPENDENCY: &str = "MODULE-005";
    pub const MODULE_MISSING_DEPENDENCY: &str = "MODULE-006";
    pub const MODULE_ILLEGAL_TRANSITION: &str = "MODULE-007";
    pub const MODULE_INVALID_METADATA: &str = "MODULE-008";

    // 生命周期错误 (LIFECYCLE-xxx)
    pub const LIFECYCLE_REFRESH_FAILED: &str = "LIFECYCLE-001";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";

    // 核心错误 (CORE-xxx)
    pub const CORE_IO: &str = "CORE-001";
    pub const CORE_SERIALIZATION: &str = "CORE-002";
    pub const CORE_INIT_FAILED: &str = "CORE-003";
    pub const CORE_INTERNAL: &str = "CORE-004";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::ModuleAlreadyLoaded(_) => error_code::MODULE_ALREADY_LOADED,
            CoreError::ModuleRunning(_) => error_code::MODULE_RUNNING,
            CoreError::ModuleHasDependents { .. } => error_code::MODULE_HAS_DEPENDENTS,
            CoreError::CircularDependency(_) => error_code::MODULE_CIRCULAR_DEPENDENCY,
            CoreError::MissingDependency { .. } => error_code::MODULE_MISSING_DEPENDENCY,
            CoreError::IllegalStateTransition { .. } => error_code::MODULE_ILLEGAL_TRANSITION,
            CoreError::InvalidMetadata(_) | CoreError::VersionParse(_) => {
                error_code::MODULE_INVALID_METADATA
            }
            CoreError::RefreshFailed(_) => error_code::LIFECYCLE_REFRESH_FAILED,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            CoreError::Io(_) => error_code::CORE_IO,
            CoreError::Json(_) | CoreError::Yaml(_) => error_code::CORE_SERIALIZATION,
            CoreError::InitFailed(_) => error_code::CORE_INIT_FAILED,
            CoreError::Internal(_) | CoreError::Other(_) => error_code::CORE_INTERNAL,
        }
    }

    /// 是否为依赖图配置错误（循环依赖或缺失依赖）
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            CoreError::CircularDependency(_) | CoreError::MissingDependency { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::ModuleNotFound("reporting".to_string());
        assert!(err.to_string().contains("reporting"));
    }

    #[test]
    fn test_cycle_display_joins_path() {
        let err = CoreError::CircularDependency(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn test_error_code() {
        let err = CoreError::MissingDependency {
            module: "a".to_string(),
            dependency: "b".to_string(),
        };
        assert_eq!(err.error_code(), error_code::MODULE_MISSING_DEPENDENCY);
        assert!(err.is_graph_error());

        let err = CoreError::ModuleRunning("a".to_string());
        assert_eq!(err.error_code(), error_code::MODULE_RUNNING);
        assert!(!err.is_graph_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let core_err: CoreError = io_err.into();
        assert!(matches!(core_err, CoreError::Io(_)));
        assert_eq!(core_err.error_code(), error_code::CORE_IO);
    }
}
