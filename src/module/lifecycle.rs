//! 生命周期回调
//!
//! 本模块定义模块行为契约 [`ModuleActivator`]，以及调用回调时使用的
//! 失败隔离机制：
//!
//! - [`LifecycleInvoker`] - 调用单个回调，捕获错误、panic 和超时
//! - [`LifecycleFailure`] - 失败记录，标记模块 ID 与回调阶段
//! - [`FailureSink`] - 失败记录的接收方
//! - [`LifecycleReport`] - 一次生命周期操作的结果汇总
//!
//! 单个回调失败不会中断调用方的控制流，也不会以 `Err` 的形式传播给
//! 生命周期操作的调用者。

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

/// 模块行为契约
///
/// 每个模块提供一个实现此 trait 的行为对象。所有回调都有默认的空实现，
/// 模块只需覆盖关心的阶段。回调返回错误或 panic 都视为该回调失败。
///
/// # 调用时机
///
/// | 回调 | 时机 |
/// |------|------|
/// | `will_start` | 启动前，依赖均已启动 |
/// | `started` | 模块启动后的第一次上下文刷新完成时 |
/// | `will_stop` | 停止前 |
/// | `stopped` | 停用完成后 |
/// | `will_refresh_context` | 上下文刷新前（仅已启动模块） |
/// | `context_refreshed` | 上下文刷新后（仅已启动模块） |
///
/// # 示例
///
/// ```rust
/// use async_trait::async_trait;
/// use chips_lifecycle::module::ModuleActivator;
///
/// struct ReportingActivator;
///
/// #[async_trait]
/// impl ModuleActivator for ReportingActivator {
///     async fn will_start(&self) -> anyhow::Result<()> {
///         tracing::info!("reporting 模块即将启动");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ModuleActivator: Send + Sync {
    /// 即将启动
    async fn will_start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 启动完成并收到第一次上下文刷新
    async fn started(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 即将停止
    async fn will_stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 已停止
    async fn stopped(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 即将刷新上下文
    async fn will_refresh_context(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 上下文已刷新
    async fn context_refreshed(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 没有任何行为的模块
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopActivator;

impl ModuleActivator for NoopActivator {}

/// 生命周期阶段
///
/// 包括六个模块回调以及运行时的激活/停用步骤。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecyclePhase {
    /// `will_start` 回调
    WillStart,
    /// `started` 回调
    Started,
    /// `will_stop` 回调
    WillStop,
    /// `stopped` 回调
    Stopped,
    /// `will_refresh_context` 回调
    WillRefreshContext,
    /// `context_refreshed` 回调
    ContextRefreshed,
    /// 运行时激活
    Activate,
    /// 运行时停用
    Deactivate,
}

impl LifecyclePhase {
    /// 回调名称
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::WillStart => "willStart",
            LifecyclePhase::Started => "started",
            LifecyclePhase::WillStop => "willStop",
            LifecyclePhase::Stopped => "stopped",
            LifecyclePhase::WillRefreshContext => "willRefreshContext",
            LifecyclePhase::ContextRefreshed => "contextRefreshed",
            LifecyclePhase::Activate => "activate",
            LifecyclePhase::Deactivate => "deactivate",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 失败原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// 回调返回错误
    Error {
        /// 错误信息（包含错误链）
        message: String,
    },
    /// 回调 panic
    Panic {
        /// panic 载荷
        message: String,
    },
    /// 回调超时
    Timeout {
        /// 超时上限（毫秒）
        after_ms: u64,
    },
    /// 依赖未启动，模块被跳过
    DependencyNotStarted {
        /// 未启动的依赖模块 ID
        dependency: String,
    },
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Error { message } => write!(f, "{}", message),
            FailureCause::Panic { message } => write!(f, "panic: {}", message),
            FailureCause::Timeout { after_ms } => write!(f, "回调超时 ({} ms)", after_ms),
            FailureCause::DependencyNotStarted { dependency } => {
                write!(f, "依赖 '{}' 未启动", dependency)
            }
        }
    }
}

/// 生命周期失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleFailure {
    /// 模块 ID
    pub module_id: String,
    /// 失败的阶段
    pub phase: LifecyclePhase,
    /// 失败原因
    pub cause: FailureCause,
    /// 发生时间
    pub at: DateTime<Utc>,
}

impl LifecycleFailure {
    /// 创建失败记录
    pub fn new(module_id: impl Into<String>, phase: LifecyclePhase, cause: FailureCause) -> Self {
        Self {
            module_id: module_id.into(),
            phase,
            cause,
            at: Utc::now(),
        }
    }

    /// 创建"依赖未启动"的跳过记录
    ///
    /// 跳过发生在 `willStart` 之前，因此阶段记为 `willStart`。
    pub fn dependency_not_started(
        module_id: impl Into<String>,
        dependency: impl Into<String>,
    ) -> Self {
        Self::new(
            module_id,
            LifecyclePhase::WillStart,
            FailureCause::DependencyNotStarted {
                dependency: dependency.into(),
            },
        )
    }

    /// 是否为依赖跳过记录
    pub fn is_skip(&self) -> bool {
        matches!(self.cause, FailureCause::DependencyNotStarted { .. })
    }
}

impl fmt::Display for LifecycleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "模块 '{}' 的 {} 失败: {}",
            self.module_id, self.phase, self.cause
        )
    }
}

// ==================== 失败接收方 ====================

/// 失败记录接收方
pub trait FailureSink: Send + Sync {
    /// 接收一条失败记录
    fn report(&self, failure: &LifecycleFailure);
}

/// 将失败记录写入 tracing 日志（默认）
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFailureSink;

impl FailureSink for TracingFailureSink {
    fn report(&self, failure: &LifecycleFailure) {
        if failure.is_skip() {
            warn!(
                module_id = %failure.module_id,
                phase = %failure.phase,
                cause = %failure.cause,
                "模块被跳过"
            );
        } else {
            error!(
                module_id = %failure.module_id,
                phase = %failure.phase,
                cause = %failure.cause,
                "生命周期回调失败"
            );
        }
    }
}

/// 在内存中收集失败记录
///
/// 主要用于测试和嵌入方自行检查失败。
#[derive(Debug, Default)]
pub struct CollectingFailureSink {
    failures: Mutex<Vec<LifecycleFailure>>,
}

impl CollectingFailureSink {
    /// 创建空的接收方
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取已收集的失败记录副本
    pub fn failures(&self) -> Vec<LifecycleFailure> {
        self.lock().clone()
    }

    /// 获取指定模块的失败记录
    pub fn failures_for(&self, module_id: &str) -> Vec<LifecycleFailure> {
        self.lock()
            .iter()
            .filter(|f| f.module_id == module_id)
            .cloned()
            .collect()
    }

    /// 已收集的记录数
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// 是否没有记录
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 清空
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LifecycleFailure>> {
        // 记录只追加，中毒后数据仍然可用
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FailureSink for CollectingFailureSink {
    fn report(&self, failure: &LifecycleFailure) {
        self.lock().push(failure.clone());
    }
}

/// 将失败记录分发给多个接收方
#[derive(Default)]
pub struct FanoutFailureSink {
    sinks: Vec<Arc<dyn FailureSink>>,
}

impl FanoutFailureSink {
    /// 创建不含接收方的分发器
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加接收方
    pub fn with_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// 接收方数量
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// 是否没有接收方
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl FailureSink for FanoutFailureSink {
    fn report(&self, failure: &LifecycleFailure) {
        for sink in &self.sinks {
            sink.report(failure);
        }
    }
}

// ==================== 回调调用器 ====================

/// 生命周期回调调用器
///
/// 每次调用执行回调一次，并把错误、panic、超时统一转换为
/// [`LifecycleFailure`]：先交给失败接收方，再返回给调用方。
#[derive(Clone)]
pub struct LifecycleInvoker {
    sink: Arc<dyn FailureSink>,
    timeout: Option<Duration>,
}

impl LifecycleInvoker {
    /// 创建调用器
    ///
    /// # Arguments
    ///
    /// * `sink` - 失败记录接收方
    /// * `timeout` - 单个回调的超时时间，`None` 表示不限制
    pub fn new(sink: Arc<dyn FailureSink>, timeout: Option<Duration>) -> Self {
        Self { sink, timeout }
    }

    /// 单个回调的超时时间
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// 调用一个回调
    ///
    /// # Arguments
    ///
    /// * `module_id` - 模块 ID
    /// * `phase` - 回调所属阶段
    /// * `make` - 创建回调 future 的闭包，在隔离范围内调用
    ///
    /// # Returns
    ///
    /// 回调成功返回 `Ok(())`；失败时返回已上报的失败记录。
    pub async fn invoke<M, F>(
        &self,
        module_id: &str,
        phase: LifecyclePhase,
        make: M,
    ) -> std::result::Result<(), LifecycleFailure>
    where
        M: FnOnce() -> F + Send,
        F: Future<Output = anyhow::Result<()>> + Send,
    {
        debug!(module_id = %module_id, phase = %phase, "调用生命周期回调");

        // 创建 future 时的 panic 也要捕获
        let guarded = AssertUnwindSafe(async move { make().await }).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let after_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                    return Err(self.record(LifecycleFailure::new(
                        module_id,
                        phase,
                        FailureCause::Timeout { after_ms },
                    )));
                }
            },
            None => guarded.await,
        };

        let cause = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => FailureCause::Error {
                message: format!("{:#}", e),
            },
            Err(payload) => FailureCause::Panic {
                message: panic_message(payload.as_ref()),
            },
        };
        Err(self.record(LifecycleFailure::new(module_id, phase, cause)))
    }

    /// 上报一条失败记录并原样返回
    pub fn record(&self, failure: LifecycleFailure) -> LifecycleFailure {
        self.sink.report(&failure);
        failure
    }
}

impl Default for LifecycleInvoker {
    fn default() -> Self {
        Self::new(Arc::new(TracingFailureSink), None)
    }
}

impl fmt::Debug for LifecycleInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleInvoker")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知 panic".to_string()
    }
}

// ==================== 操作结果 ====================

/// 生命周期操作结果
///
/// `started`/`stopped` 按实际执行顺序排列。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleReport {
    /// 本次启动的模块
    pub started: Vec<String>,
    /// 本次停止的模块
    pub stopped: Vec<String>,
    /// 因依赖未启动而跳过的模块
    pub skipped: Vec<String>,
    /// 失败记录（包含跳过记录）
    pub failures: Vec<LifecycleFailure>,
}

impl LifecycleReport {
    /// 创建空结果
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否没有任何失败
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// 获取指定模块的失败记录
    pub fn failures_for(&self, module_id: &str) -> Vec<&LifecycleFailure> {
        self.failures
            .iter()
            .filter(|f| f.module_id == module_id)
            .collect()
    }

    /// 合并另一个结果
    pub fn merge(&mut self, other: LifecycleReport) {
        self.started.extend(other.started);
        self.stopped.extend(other.stopped);
        self.skipped.extend(other.skipped);
        self.failures.extend(other.failures);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn explode() -> anyhow::Result<()> {
        panic!("boom")
    }

    fn invoker_with(sink: Arc<CollectingFailureSink>, timeout: Option<Duration>) -> LifecycleInvoker {
        LifecycleInvoker::new(sink, timeout)
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(LifecyclePhase::WillStart.to_string(), "willStart");
        assert_eq!(LifecyclePhase::WillRefreshContext.to_string(), "willRefreshContext");
        assert_eq!(LifecyclePhase::ContextRefreshed.to_string(), "contextRefreshed");
        assert_eq!(LifecyclePhase::Deactivate.to_string(), "deactivate");
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let sink = Arc::new(CollectingFailureSink::new());
        let invoker = invoker_with(sink.clone(), None);
        let calls = AtomicUsize::new(0);

        let result = invoker
            .invoke("m1", LifecyclePhase::WillStart, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_invoke_error() {
        let sink = Arc::new(CollectingFailureSink::new());
        let invoker = invoker_with(sink.clone(), None);

        let failure = invoker
            .invoke("m1", LifecyclePhase::WillStop, || async {
                Err(anyhow::anyhow!("连接池关闭失败"))
            })
            .await
            .unwrap_err();

        assert_eq!(failure.module_id, "m1");
        assert_eq!(failure.phase, LifecyclePhase::WillStop);
        assert!(matches!(failure.cause, FailureCause::Error { ref message } if message.contains("连接池")));
        assert_eq!(sink.failures(), vec![failure]);
    }

    #[tokio::test]
    async fn test_invoke_panic_is_contained() {
        let sink = Arc::new(CollectingFailureSink::new());
        let invoker = invoker_with(sink.clone(), None);

        let failure = invoker
            .invoke("m2", LifecyclePhase::Started, explode)
            .await
            .unwrap_err();

        assert_eq!(
            failure.cause,
            FailureCause::Panic {
                message: "boom".to_string()
            }
        );
        assert_eq!(sink.failures_for("m2").len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_contains_panic_while_creating_future() {
        let sink = Arc::new(CollectingFailureSink::new());
        let invoker = invoker_with(sink.clone(), None);

        let failure = invoker
            .invoke("m3", LifecyclePhase::Stopped, || -> std::future::Ready<anyhow::Result<()>> {
                panic!("构造回调失败")
            })
            .await
            .unwrap_err();

        assert_eq!(failure.phase, LifecyclePhase::Stopped);
        assert_eq!(
            failure.cause,
            FailureCause::Panic {
                message: "构造回调失败".to_string()
            }
        );
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_timeout() {
        let sink = Arc::new(CollectingFailureSink::new());
        let invoker = invoker_with(sink.clone(), Some(Duration::from_millis(20)));

        let failure = invoker
            .invoke("slow", LifecyclePhase::Activate, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(failure.cause, FailureCause::Timeout { after_ms: 20 });
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_noop_activator() {
        let activator = NoopActivator;
        assert!(activator.will_start().await.is_ok());
        assert!(activator.started().await.is_ok());
        assert!(activator.will_stop().await.is_ok());
        assert!(activator.stopped().await.is_ok());
        assert!(activator.will_refresh_context().await.is_ok());
        assert!(activator.context_refreshed().await.is_ok());
    }

    #[test]
    fn test_fanout_sink() {
        let a = Arc::new(CollectingFailureSink::new());
        let b = Arc::new(CollectingFailureSink::new());
        let fanout = FanoutFailureSink::new()
            .with_sink(a.clone())
            .with_sink(b.clone());
        assert_eq!(fanout.len(), 2);

        fanout.report(&LifecycleFailure::dependency_not_started("m3", "m2"));

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert!(a.failures()[0].is_skip());
    }

    #[test]
    fn test_report_merge() {
        let mut report = LifecycleReport::new();
        assert!(report.is_success());

        let mut other = LifecycleReport::new();
        other.started.push("m1".to_string());
        other.skipped.push("m3".to_string());
        other
            .failures
            .push(LifecycleFailure::dependency_not_started("m3", "m2"));

        report.merge(other);
        assert_eq!(report.started, vec!["m1"]);
        assert!(!report.is_success());
        assert_eq!(report.failures_for("m3").len(), 1);
        assert!(report.failures_for("m1").is_empty());
    }

    #[test]
    fn test_failure_display() {
        let failure = LifecycleFailure::new(
            "m1",
            LifecyclePhase::WillStart,
            FailureCause::Timeout { after_ms: 100 },
        );
        let text = failure.to_string();
        assert!(text.contains("m1"));
        assert!(text.contains("willStart"));
        assert!(text.contains("100"));
    }
}
