//! 生命周期管理器配置
//!
//! 定义配置结构和加载逻辑。配置文件可以是 YAML 或 JSON（按扩展名判断）：
//!
//! ```yaml
//! dev_mode: false
//! logging:
//!   level: info
//!   json_format: false
//! modules:
//!   module_dirs:
//!     - ./modules
//!   manifest_file: module.yaml
//!   hook_timeout_ms: 30000
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::module::parser::DEFAULT_MANIFEST_FILE;
use crate::utils::{CoreError, Result};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const ROTATIONS: [&str; 4] = ["minutely", "hourly", "daily", "never"];

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// 保留日志文件数
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

fn default_max_files() -> usize {
    7
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
            max_files: default_max_files(),
        }
    }
}

/// 模块管理配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// 模块目录列表
    #[serde(default)]
    pub module_dirs: Vec<PathBuf>,

    /// 模块描述文件名
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,

    /// 单个生命周期回调的超时时间（毫秒），不设置表示不限制
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_timeout_ms: Option<u64>,
}

fn default_manifest_file() -> String {
    DEFAULT_MANIFEST_FILE.to_string()
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            module_dirs: vec![],
            manifest_file: default_manifest_file(),
            hook_timeout_ms: None,
        }
    }
}

/// 生命周期管理器配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 模块管理配置
    #[serde(default)]
    pub modules: ModuleConfig,

    /// 是否为开发模式
    #[serde(default)]
    pub dev_mode: bool,
}

impl LifecycleConfig {
    /// 创建配置构建器
    pub fn builder() -> LifecycleConfigBuilder {
        LifecycleConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// 扩展名为 `json` 时按 JSON 解析，否则按 YAML 解析。加载后会执行验证。
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CoreError::ConfigLoadFailed(format!("无法读取配置文件 {:?}: {}", path, e))
        })?;

        let mut config: LifecycleConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.validate()?;
        config.config_path = Some(path);
        Ok(config)
    }

    /// 验证配置值
    pub fn validate(&self) -> Result<()> {
        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(CoreError::InvalidConfigValue {
                key: "logging.level".to_string(),
                reason: format!("未知的日志级别 '{}'", self.logging.level),
            });
        }

        let rotation = self.logging.rotation.to_lowercase();
        if !ROTATIONS.contains(&rotation.as_str()) {
            return Err(CoreError::InvalidConfigValue {
                key: "logging.rotation".to_string(),
                reason: format!("未知的轮转策略 '{}'", self.logging.rotation),
            });
        }

        if self.logging.file_output && self.logging.log_dir.is_none() {
            return Err(CoreError::InvalidConfigValue {
                key: "logging.log_dir".to_string(),
                reason: "启用文件日志时必须指定日志目录".to_string(),
            });
        }

        if self.modules.manifest_file.trim().is_empty() {
            return Err(CoreError::InvalidConfigValue {
                key: "modules.manifest_file".to_string(),
                reason: "描述文件名不能为空".to_string(),
            });
        }

        if self.modules.hook_timeout_ms == Some(0) {
            return Err(CoreError::InvalidConfigValue {
                key: "modules.hook_timeout_ms".to_string(),
                reason: "超时时间必须大于 0".to_string(),
            });
        }

        Ok(())
    }

    /// 合并另一个配置（用于覆盖）
    pub fn merge(&mut self, other: LifecycleConfig) {
        // 只覆盖非默认值的配置
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
        if other.logging.rotation != default_rotation() {
            self.logging.rotation = other.logging.rotation;
        }
        if !other.modules.module_dirs.is_empty() {
            self.modules.module_dirs.extend(other.modules.module_dirs);
        }
        if other.modules.manifest_file != default_manifest_file() {
            self.modules.manifest_file = other.modules.manifest_file;
        }
        if other.modules.hook_timeout_ms.is_some() {
            self.modules.hook_timeout_ms = other.modules.hook_timeout_ms;
        }
        if other.dev_mode {
            self.dev_mode = true;
        }
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct LifecycleConfigBuilder {
    config: LifecycleConfig,
}

impl LifecycleConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: LifecycleConfig::default(),
        }
    }

    /// 设置配置文件路径
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config_path = Some(path.into());
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 添加模块目录
    pub fn module_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.modules.module_dirs.push(dir.into());
        self
    }

    /// 设置模块描述文件名
    pub fn manifest_file(mut self, name: impl Into<String>) -> Self {
        self.config.modules.manifest_file = name.into();
        self
    }

    /// 设置回调超时时间（毫秒）
    pub fn hook_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.modules.hook_timeout_ms = Some(timeout_ms);
        self
    }

    /// 启用开发模式
    pub fn dev_mode(mut self) -> Self {
        self.config.dev_mode = true;
        self
    }

    /// 构建配置
    pub fn build(self) -> LifecycleConfig {
        self.config
    }
}
