//! 日志系统模块
//!
//! 基于 tracing 生态初始化全局日志：控制台输出、可选的滚动文件输出、
//! 可选的 JSON 格式。生命周期操作的日志都带有 `module_id`、`phase`、`state`
//! 等结构化字段，JSON 输出时可直接检索。
//!
//! # 示例
//!
//! ```rust,no_run
//! use chips_lifecycle::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoggerConfig::builder()
//!         .level("debug")
//!         .json(true)
//!         .file("./logs", RotationStrategy::Daily)
//!         .build();
//!
//!     let _guard = Logger::init(config)?;
//!
//!     tracing::info!(module_id = "reporting", phase = "willStart", "调用生命周期回调");
//!     Ok(())
//! }
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::core::config::LogConfig;
use crate::utils::{CoreError, Result};

/// 日志文件名前缀
const FILE_PREFIX: &str = "chips-lifecycle";

/// 日志轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 单个日志文件
    Never,
    /// 每分钟
    Minutely,
    /// 每小时
    Hourly,
    /// 每天
    #[default]
    Daily,
}

impl RotationStrategy {
    /// 从配置字符串解析，无法识别时返回 `Daily`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "never" | "none" => Self::Never,
            "minutely" | "minute" => Self::Minutely,
            "hourly" | "hour" => Self::Hourly,
            _ => Self::Daily,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Minutely => "minutely",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
        }
    }
}

impl From<RotationStrategy> for Rotation {
    fn from(strategy: RotationStrategy) -> Self {
        match strategy {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Minutely => Rotation::MINUTELY,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 文件输出设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutput {
    /// 日志目录
    pub dir: PathBuf,
    /// 轮转策略
    pub rotation: RotationStrategy,
    /// 保留的文件数，至少为 1
    pub max_files: usize,
}

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 默认级别，`RUST_LOG` 存在时以环境变量为准
    pub level: String,
    /// JSON 格式输出
    pub json: bool,
    /// 控制台输出
    pub console: bool,
    /// 文件输出，`None` 表示不写文件
    pub file: Option<FileOutput>,
    /// 额外的 EnvFilter 指令，例如 `chips_lifecycle::module::manager=trace`
    pub directives: Vec<String>,
    /// 显示文件名/行号并输出 span 关闭事件（每个生命周期操作的耗时）
    pub verbose: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            console: true,
            file: None,
            directives: Vec::new(),
            verbose: false,
        }
    }
}

impl LoggerConfig {
    /// 创建配置构建器
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::default()
    }

    /// 从配置文件的 `logging` 段创建
    ///
    /// `file_output` 为 false 时即使指定了目录也不写文件。
    pub fn from_log_config(log_config: &LogConfig) -> Self {
        let file = match (&log_config.log_dir, log_config.file_output) {
            (Some(dir), true) => Some(FileOutput {
                dir: dir.clone(),
                rotation: RotationStrategy::parse(&log_config.rotation),
                max_files: log_config.max_files,
            }),
            _ => None,
        };

        Self {
            level: log_config.level.clone(),
            json: log_config.json_format,
            file,
            ..Self::default()
        }
    }
}

/// 日志配置构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// 设置日志级别
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// JSON 格式输出
    pub fn json(mut self, enable: bool) -> Self {
        self.config.json = enable;
        self
    }

    /// 关闭控制台输出
    pub fn without_console(mut self) -> Self {
        self.config.console = false;
        self
    }

    /// 写入滚动日志文件，默认保留 7 个
    pub fn file(mut self, dir: impl Into<PathBuf>, rotation: RotationStrategy) -> Self {
        self.config.file = Some(FileOutput {
            dir: dir.into(),
            rotation,
            max_files: 7,
        });
        self
    }

    /// 设置保留的日志文件数（需先调用 [`file`](Self::file)）
    pub fn max_files(mut self, count: usize) -> Self {
        if let Some(file) = self.config.file.as_mut() {
            file.max_files = count;
        }
        self
    }

    /// 添加过滤指令
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.config.directives.push(directive.into());
        self
    }

    /// 详细输出
    pub fn verbose(mut self, enable: bool) -> Self {
        self.config.verbose = enable;
        self
    }

    /// 构建配置
    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

/// 日志系统守卫
///
/// 持有非阻塞写入器的 WorkerGuard，被丢弃时刷新挂起的日志。
/// 必须保持存活直到程序退出。
#[derive(Default)]
pub struct LogGuard {
    guards: Vec<WorkerGuard>,
}

impl LogGuard {
    /// 持有的写入器数量
    pub fn writer_count(&self) -> usize {
        self.guards.len()
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// 日志系统
pub struct Logger;

impl Logger {
    /// 初始化全局日志
    ///
    /// # Errors
    ///
    /// 已初始化、过滤指令无效或无法创建日志目录时返回 `CoreError::InitFailed`
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if INITIALIZED.load(Ordering::SeqCst) {
            return Err(CoreError::InitFailed("日志系统已初始化".to_string()));
        }

        let filter = Self::env_filter(&config)?;
        let mut guard = LogGuard::default();
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if config.console {
            let (writer, worker) = tracing_appender::non_blocking(io::stdout());
            guard.guards.push(worker);
            layers.push(Self::fmt_layer(&config, writer, true));
        }

        if let Some(ref file) = config.file {
            let appender = RollingFileAppender::builder()
                .rotation(file.rotation.into())
                .filename_prefix(FILE_PREFIX)
                .filename_suffix("log")
                .max_log_files(file.max_files.max(1))
                .build(&file.dir)
                .map_err(|e| CoreError::InitFailed(format!("无法创建日志文件: {}", e)))?;
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard.guards.push(worker);
            layers.push(Self::fmt_layer(&config, writer, false));
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(filter)
            .try_init()
            .map_err(|e| CoreError::InitFailed(format!("日志系统初始化失败: {}", e)))?;

        INITIALIZED.store(true, Ordering::SeqCst);
        Ok(guard)
    }

    /// 初始化全局日志，失败时返回空守卫
    ///
    /// 适用于测试和示例，重复调用不会出错。
    pub fn try_init(config: LoggerConfig) -> LogGuard {
        Self::init(config).unwrap_or_default()
    }

    /// 使用默认配置初始化
    pub fn init_default() -> Result<LogGuard> {
        Self::init(LoggerConfig::default())
    }

    fn env_filter(config: &LoggerConfig) -> Result<EnvFilter> {
        let base =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

        config.directives.iter().try_fold(base, |filter, raw| {
            let directive: Directive = raw.trim().parse().map_err(|e| {
                CoreError::InitFailed(format!("无效的日志过滤指令 '{}': {}", raw, e))
            })?;
            Ok(filter.add_directive(directive))
        })
    }

    fn fmt_layer<W>(config: &LoggerConfig, writer: W, ansi: bool) -> BoxedLayer
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_file(config.verbose)
            .with_line_number(config.verbose)
            .with_span_events(if config.verbose {
                FmtSpan::CLOSE
            } else {
                FmtSpan::NONE
            });

        if config.json {
            layer.json().with_ansi(false).boxed()
        } else {
            layer.with_ansi(ansi).boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_strategy_parse() {
        assert_eq!(RotationStrategy::default(), RotationStrategy::Daily);
        assert_eq!(RotationStrategy::parse("HOURLY"), RotationStrategy::Hourly);
        assert_eq!(RotationStrategy::parse("none"), RotationStrategy::Never);
        assert_eq!(RotationStrategy::parse("weekly"), RotationStrategy::Daily);
        assert_eq!(RotationStrategy::Minutely.to_string(), "minutely");
    }

    #[test]
    fn test_builder() {
        let config = LoggerConfig::builder()
            .level("debug")
            .json(true)
            .without_console()
            .file("/var/log/chips", RotationStrategy::Hourly)
            .max_files(14)
            .directive("chips_lifecycle::module=trace")
            .verbose(true)
            .build();

        assert_eq!(config.level, "debug");
        assert!(config.json);
        assert!(!config.console);
        assert_eq!(
            config.file,
            Some(FileOutput {
                dir: PathBuf::from("/var/log/chips"),
                rotation: RotationStrategy::Hourly,
                max_files: 14,
            })
        );
        assert_eq!(config.directives.len(), 1);
        assert!(config.verbose);
    }

    #[test]
    fn test_max_files_without_file_is_ignored() {
        let config = LoggerConfig::builder().max_files(3).build();
        assert!(config.file.is_none());
    }

    #[test]
    fn test_from_log_config() {
        let log_config = LogConfig {
            level: "warn".to_string(),
            file_output: true,
            log_dir: Some(PathBuf::from("/var/log")),
            json_format: true,
            rotation: "never".to_string(),
            max_files: 3,
        };

        let config = LoggerConfig::from_log_config(&log_config);

        assert_eq!(config.level, "warn");
        assert!(config.json);
        assert!(config.console);
        let file = config.file.unwrap();
        assert_eq!(file.rotation, RotationStrategy::Never);
        assert_eq!(file.max_files, 3);
    }

    #[test]
    fn test_from_log_config_file_disabled() {
        let log_config = LogConfig {
            file_output: false,
            log_dir: Some(PathBuf::from("/var/log")),
            ..LogConfig::default()
        };
        assert!(LoggerConfig::from_log_config(&log_config).file.is_none());
    }

    #[test]
    fn test_invalid_directive() {
        let config = LoggerConfig::builder()
            .directive("chips_lifecycle=loud")
            .build();
        assert!(matches!(
            Logger::env_filter(&config),
            Err(CoreError::InitFailed(_))
        ));
    }

    #[test]
    fn test_try_init_twice() {
        let _guard = Logger::try_init(LoggerConfig::default());
        let second = Logger::try_init(LoggerConfig::default());
        assert_eq!(second.writer_count(), 0);
    }
}
