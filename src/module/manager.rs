//! 模块管理器
//!
//! 整合依赖图、注册表和回调调用器，提供统一的生命周期管理接口。
//!
//! # 状态机
//!
//! ```text
//! Loaded/Stopped --start--> [willStart] --> Starting --activate--> Started
//! Started --stop/shutdown/级联--> [willStop] --> Stopping --deactivate--> [stopped] --> Stopped
//! ```
//!
//! 上下文刷新只作用于已启动的模块，且只在显式调用
//! [`ModuleManager::refresh_context`] 时触发。
//!
//! # 并发
//!
//! 所有修改状态的操作在整个执行期间持有注册表的写锁（跨越回调的 await），
//! 查询操作共享读锁。因此并发的启动/停止/关闭请求会被串行化，
//! 每个模块的停止回调最多触发一次。

use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::dependency::DependencyGraph;
use super::lifecycle::{
    FailureSink, LifecycleFailure, LifecycleInvoker, LifecyclePhase, LifecycleReport,
    ModuleActivator, TracingFailureSink,
};
use super::metadata::{ModuleDescriptor, ModuleInfo, ModuleState};
use super::parser::{ModuleParser, DEFAULT_MANIFEST_FILE};
use super::registry::ModuleRegistry;
use super::runtime::{ModuleRuntime, NoopRuntime};
use crate::core::config::LifecycleConfig;
use crate::utils::{CoreError, Result};

/// 模块管理器配置
#[derive(Debug, Clone)]
pub struct ModuleManagerConfig {
    /// 模块目录列表
    pub module_dirs: Vec<PathBuf>,
    /// 模块描述文件名
    pub manifest_file: String,
    /// 单个回调的超时时间
    pub hook_timeout: Option<Duration>,
}

impl Default for ModuleManagerConfig {
    fn default() -> Self {
        Self {
            module_dirs: vec![],
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
            hook_timeout: None,
        }
    }
}

impl ModuleManagerConfig {
    /// 从全局配置提取
    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self {
            module_dirs: config.modules.module_dirs.clone(),
            manifest_file: config.modules.manifest_file.clone(),
            hook_timeout: config.modules.hook_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// 待加载的模块：描述 + 行为对象
#[derive(Clone)]
pub struct Module {
    descriptor: ModuleDescriptor,
    activator: Arc<dyn ModuleActivator>,
}

impl Module {
    /// 创建模块
    pub fn new(descriptor: ModuleDescriptor, activator: impl ModuleActivator + 'static) -> Self {
        Self::from_arc(descriptor, Arc::new(activator))
    }

    /// 使用共享的行为对象创建模块
    pub fn from_arc(descriptor: ModuleDescriptor, activator: Arc<dyn ModuleActivator>) -> Self {
        Self {
            descriptor,
            activator,
        }
    }

    /// 模块 ID
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// 模块描述
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// 模块管理器
///
/// 负责模块的整个生命周期管理，包括：
/// - 模块加载和卸载
/// - 依赖解析与启动顺序
/// - 启动、停止（含级联停止）和关闭
/// - 上下文刷新
///
/// 克隆开销很小，克隆出的实例共享同一个注册表。
#[derive(Clone)]
pub struct ModuleManager {
    /// 配置
    config: Arc<ModuleManagerConfig>,
    /// 模块注册表
    registry: Arc<RwLock<ModuleRegistry>>,
    /// 激活运行时
    runtime: Arc<dyn ModuleRuntime>,
    /// 回调调用器
    invoker: LifecycleInvoker,
}

impl ModuleManager {
    /// 创建新的模块管理器
    ///
    /// 默认使用空运行时，失败记录写入 tracing 日志。
    pub fn new(config: ModuleManagerConfig) -> Self {
        let invoker = LifecycleInvoker::new(Arc::new(TracingFailureSink), config.hook_timeout);
        info!("创建模块管理器");
        Self {
            config: Arc::new(config),
            registry: Arc::new(RwLock::new(ModuleRegistry::new())),
            runtime: Arc::new(NoopRuntime::new()),
            invoker,
        }
    }

    /// 使用默认配置创建
    pub fn with_defaults() -> Self {
        Self::new(ModuleManagerConfig::default())
    }

    /// 从全局配置创建
    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self::new(ModuleManagerConfig::from_config(config))
    }

    /// 设置激活运行时
    pub fn with_runtime(mut self, runtime: Arc<dyn ModuleRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    /// 设置失败记录接收方
    pub fn with_failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.invoker = LifecycleInvoker::new(sink, self.config.hook_timeout);
        self
    }

    /// 获取配置
    pub fn config(&self) -> &ModuleManagerConfig {
        &self.config
    }

    // ==================== 加载与卸载 ====================

    /// 加载模块
    ///
    /// 验证模块描述并以 Loaded 状态注册。
    ///
    /// # Errors
    ///
    /// - `CoreError::InvalidMetadata` - 描述无效
    /// - `CoreError::ModuleAlreadyLoaded` - 模块 ID 已存在
    #[instrument(skip(self, module), fields(module_id = %module.id()))]
    pub async fn load_module(&self, module: Module) -> Result<()> {
        module.descriptor.validate()?;

        let mut registry = self.registry.write().await;
        registry.insert(module.descriptor, module.activator)?;
        info!("模块已加载");
        Ok(())
    }

    /// 从描述文件加载模块
    ///
    /// # Returns
    ///
    /// 加载的模块 ID
    pub async fn load_manifest(
        &self,
        path: &Path,
        activator: Arc<dyn ModuleActivator>,
    ) -> Result<String> {
        let descriptor = ModuleParser::parse_file(path).await?;
        let module_id = descriptor.id.clone();
        self.load_module(Module::from_arc(descriptor, activator))
            .await?;
        Ok(module_id)
    }

    /// 扫描配置的模块目录并加载发现的模块
    ///
    /// `factory` 为每个模块描述创建行为对象。已加载的模块 ID 会被跳过。
    ///
    /// # Returns
    ///
    /// 本次加载的模块 ID 列表
    #[instrument(skip(self, factory))]
    pub async fn load_from_dirs<F>(&self, factory: F) -> Result<Vec<String>>
    where
        F: Fn(&ModuleDescriptor) -> Arc<dyn ModuleActivator>,
    {
        let found =
            ModuleParser::scan_dirs(&self.config.module_dirs, &self.config.manifest_file).await?;

        let mut loaded = Vec::new();
        for (path, descriptor) in found {
            let activator = factory(&descriptor);
            let module_id = descriptor.id.clone();
            match self.load_module(Module::from_arc(descriptor, activator)).await {
                Ok(()) => loaded.push(module_id),
                Err(CoreError::ModuleAlreadyLoaded(_)) => {
                    warn!(module_id = %module_id, "模块已加载，跳过 {:?}", path);
                }
                Err(e) => return Err(e),
            }
        }

        info!(count = loaded.len(), "从模块目录加载完成");
        Ok(loaded)
    }

    /// 卸载模块
    ///
    /// # Errors
    ///
    /// - `CoreError::ModuleNotFound` - 模块不存在
    /// - `CoreError::ModuleRunning` - 模块未停止
    /// - `CoreError::ModuleHasDependents` - 仍有已加载的模块依赖它
    #[instrument(skip(self))]
    pub async fn unload_module(&self, module_id: &str) -> Result<()> {
        let mut registry = self.registry.write().await;

        let state = registry
            .state(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;
        if !state.can_unload() {
            return Err(CoreError::ModuleRunning(module_id.to_string()));
        }

        let dependents = registry.direct_dependents(module_id);
        if !dependents.is_empty() {
            return Err(CoreError::ModuleHasDependents {
                module: module_id.to_string(),
                dependents,
            });
        }

        registry.remove(module_id)?;
        info!(module_id = %module_id, "模块已卸载");
        Ok(())
    }

    // ==================== 启动 ====================

    /// 按依赖顺序启动所有未启动的模块
    ///
    /// 依赖图错误（循环依赖、缺失依赖）会直接返回，此时不启动任何模块。
    /// 单个模块的回调失败记录在返回的 [`LifecycleReport`] 中；
    /// 依赖未能启动的模块会被跳过，互不相关的模块照常启动。
    #[instrument(skip(self))]
    pub async fn start_all(&self) -> Result<LifecycleReport> {
        let mut registry = self.registry.write().await;
        info!(count = registry.len(), "启动所有模块");

        let graph = DependencyGraph::build(registry.descriptors())?;
        let order = graph.start_order()?;
        let report = self.start_in_order(&mut registry, &graph, &order).await?;

        info!(
            started = report.started.len(),
            skipped = report.skipped.len(),
            failures = report.failures.len(),
            "模块启动完成"
        );
        Ok(report)
    }

    /// 启动单个模块及其尚未启动的传递依赖
    ///
    /// 只解析该模块的依赖闭包，其他模块的配置错误不影响本次启动。
    #[instrument(skip(self))]
    pub async fn start_module(&self, module_id: &str) -> Result<LifecycleReport> {
        let mut registry = self.registry.write().await;
        if !registry.contains(module_id) {
            return Err(CoreError::ModuleNotFound(module_id.to_string()));
        }

        let closure = dependency_closure(&registry, module_id)?;
        let graph = DependencyGraph::build(closure)?;
        let order = graph.start_order()?;
        self.start_in_order(&mut registry, &graph, &order).await
    }

    async fn start_in_order(
        &self,
        registry: &mut ModuleRegistry,
        graph: &DependencyGraph,
        order: &[String],
    ) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::new();

        for module_id in order {
            let Some(entry) = registry.get(module_id) else {
                continue;
            };
            if !entry.state().can_start() {
                debug!(module_id = %module_id, state = %entry.state(), "模块无需启动");
                continue;
            }
            let activator = entry.activator();
            let descriptor = entry.descriptor().clone();

            // 依赖必须全部处于 Started
            let blocked_by = graph
                .dependencies(module_id)
                .into_iter()
                .find(|dep| registry.state(dep) != Some(ModuleState::Started));
            if let Some(dependency) = blocked_by {
                let failure = self
                    .invoker
                    .record(LifecycleFailure::dependency_not_started(module_id, dependency));
                registry.record_error(module_id, failure.to_string());
                report.skipped.push(module_id.clone());
                report.failures.push(failure);
                continue;
            }

            if let Err(failure) = self
                .invoker
                .invoke(module_id, LifecyclePhase::WillStart, || activator.will_start())
                .await
            {
                registry.record_error(module_id, failure.to_string());
                report.failures.push(failure);
                continue;
            }

            let previous = registry.set_state(module_id, ModuleState::Starting)?;
            match self
                .invoker
                .invoke(
                    module_id,
                    LifecyclePhase::Activate,
                    || self.runtime.activate(&descriptor),
                )
                .await
            {
                Ok(()) => {
                    registry.set_state(module_id, ModuleState::Started)?;
                    info!(module_id = %module_id, "模块已启动");
                    report.started.push(module_id.clone());
                }
                Err(failure) => {
                    registry.set_state(module_id, previous)?;
                    registry.record_error(module_id, failure.to_string());
                    report.failures.push(failure);
                }
            }
        }

        Ok(report)
    }

    // ==================== 停止 ====================

    /// 停止模块及所有（传递）依赖它的已启动模块
    ///
    /// 依赖方先于被依赖方停止。模块未启动时为空操作。
    ///
    /// # Errors
    ///
    /// 模块不存在时返回 `CoreError::ModuleNotFound`
    #[instrument(skip(self))]
    pub async fn stop_module(&self, module_id: &str) -> Result<LifecycleReport> {
        let mut registry = self.registry.write().await;

        let state = registry
            .state(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;
        if !state.can_stop() {
            debug!(module_id = %module_id, state = %state, "模块未启动，忽略停止请求");
            return Ok(LifecycleReport::new());
        }

        let graph = DependencyGraph::build(registry.descriptors_with_state(ModuleState::Started))?;
        let mut stop_set = graph.transitive_dependents(module_id);
        stop_set.insert(module_id.to_string());
        let mut order = graph.start_order_for(&stop_set)?;
        order.reverse();

        info!(module_id = %module_id, cascade = order.len() - 1, "停止模块");
        self.stop_in_order(&mut registry, &order).await
    }

    /// 按启动顺序的反序停止所有已启动的模块
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<LifecycleReport> {
        let mut registry = self.registry.write().await;

        let graph = DependencyGraph::build(registry.descriptors_with_state(ModuleState::Started))?;
        let order = graph.stop_order()?;
        info!(count = order.len(), "关闭所有模块");

        let report = self.stop_in_order(&mut registry, &order).await?;
        info!(stopped = report.stopped.len(), "模块关闭完成");
        Ok(report)
    }

    /// 依次停止模块
    ///
    /// 回调失败只记录，模块最终总会进入 Stopped。
    async fn stop_in_order(
        &self,
        registry: &mut ModuleRegistry,
        order: &[String],
    ) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::new();

        for module_id in order {
            let Some(entry) = registry.get(module_id) else {
                continue;
            };
            if !entry.state().can_stop() {
                continue;
            }
            let activator = entry.activator();
            let descriptor = entry.descriptor().clone();

            if let Err(failure) = self
                .invoker
                .invoke(module_id, LifecyclePhase::WillStop, || activator.will_stop())
                .await
            {
                registry.record_error(module_id, failure.to_string());
                report.failures.push(failure);
            }

            registry.set_state(module_id, ModuleState::Stopping)?;

            if let Err(failure) = self
                .invoker
                .invoke(
                    module_id,
                    LifecyclePhase::Deactivate,
                    || self.runtime.deactivate(&descriptor),
                )
                .await
            {
                registry.record_error(module_id, failure.to_string());
                report.failures.push(failure);
            }

            if let Err(failure) = self
                .invoker
                .invoke(module_id, LifecyclePhase::Stopped, || activator.stopped())
                .await
            {
                registry.record_error(module_id, failure.to_string());
                report.failures.push(failure);
            }

            registry.set_state(module_id, ModuleState::Stopped)?;
            info!(module_id = %module_id, "模块已停止");
            report.stopped.push(module_id.clone());
        }

        Ok(report)
    }

    // ==================== 上下文刷新 ====================

    /// 刷新上下文
    ///
    /// 等价于使用空刷新步骤调用 [`refresh_context_with`](Self::refresh_context_with)。
    pub async fn refresh_context(&self) -> Result<LifecycleReport> {
        self.refresh_context_with(|| async { Ok::<(), anyhow::Error>(()) })
            .await
    }

    /// 使用指定的刷新步骤刷新上下文
    ///
    /// 1. 按启动顺序对已启动模块调用 `willRefreshContext`
    /// 2. 执行 `refresh`
    /// 3. 对同一批模块调用 `contextRefreshed`
    /// 4. 对自最近一次启动以来尚未收到 `started` 的模块调用 `started`
    ///
    /// # Errors
    ///
    /// 刷新步骤失败（返回错误或 panic）时返回 `CoreError::RefreshFailed`，
    /// 此时不会调用 `contextRefreshed` 和 `started`。
    #[instrument(skip(self, refresh))]
    pub async fn refresh_context_with<F, Fut>(&self, refresh: F) -> Result<LifecycleReport>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        let mut registry = self.registry.write().await;

        let graph = DependencyGraph::build(registry.descriptors_with_state(ModuleState::Started))?;
        let order = graph.start_order()?;
        info!(count = order.len(), "刷新上下文");

        let mut report = LifecycleReport::new();
        self.notify_all(
            &mut registry,
            &order,
            Notification::WillRefreshContext,
            &mut report,
        )
        .await;

        let refresh_error = match AssertUnwindSafe(async move { refresh().await })
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(_) => Some("刷新步骤 panic".to_string()),
        };
        if let Some(message) = refresh_error {
            // 失败记录已交给接收方，这里只带上条数
            let message = match report.failures.len() {
                0 => message,
                n => format!("{}（willRefreshContext 失败 {} 条）", message, n),
            };
            return Err(CoreError::RefreshFailed(message));
        }

        self.notify_all(
            &mut registry,
            &order,
            Notification::ContextRefreshed,
            &mut report,
        )
        .await;

        let pending: BTreeSet<String> = registry.pending_started().into_iter().collect();
        let pending_order: Vec<String> = order
            .iter()
            .filter(|id| pending.contains(*id))
            .cloned()
            .collect();
        self.notify_all(&mut registry, &pending_order, Notification::Started, &mut report)
            .await;
        for module_id in &pending_order {
            registry.mark_started_notified(module_id);
        }

        Ok(report)
    }

    /// 对一组模块调用同一个回调
    async fn notify_all(
        &self,
        registry: &mut ModuleRegistry,
        order: &[String],
        notification: Notification,
        report: &mut LifecycleReport,
    ) {
        for module_id in order {
            let Some(activator) = registry.get(module_id).map(|e| e.activator()) else {
                continue;
            };
            if let Err(failure) = self
                .invoker
                .invoke(module_id, notification.phase(), || {
                    notification.call(activator.as_ref())
                })
                .await
            {
                registry.record_error(module_id, failure.to_string());
                report.failures.push(failure);
            }
        }
    }

    // ==================== 查询 ====================

    /// 检查模块是否已启动
    pub async fn is_started(&self, module_id: &str) -> bool {
        self.registry.read().await.state(module_id) == Some(ModuleState::Started)
    }

    /// 获取模块状态
    pub async fn state(&self, module_id: &str) -> Option<ModuleState> {
        self.registry.read().await.state(module_id)
    }

    /// 获取模块信息
    pub async fn module_info(&self, module_id: &str) -> Result<ModuleInfo> {
        self.registry
            .read()
            .await
            .get(module_id)
            .map(|entry| entry.info())
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))
    }

    /// 列出所有模块（按 ID 升序）
    pub async fn list_modules(&self) -> Vec<ModuleInfo> {
        self.registry.read().await.infos()
    }

    /// 已启动的模块（按启动顺序）
    pub async fn started_modules(&self) -> Result<Vec<String>> {
        let registry = self.registry.read().await;
        DependencyGraph::build(registry.descriptors_with_state(ModuleState::Started))?
            .start_order()
    }

    /// 所有已加载模块的启动顺序
    pub async fn start_order(&self) -> Result<Vec<String>> {
        let registry = self.registry.read().await;
        DependencyGraph::build(registry.descriptors())?.start_order()
    }

    /// 直接或间接依赖指定模块的已加载模块
    pub async fn transitive_dependents(&self, module_id: &str) -> Result<BTreeSet<String>> {
        let registry = self.registry.read().await;
        if !registry.contains(module_id) {
            return Err(CoreError::ModuleNotFound(module_id.to_string()));
        }
        Ok(DependencyGraph::build(registry.descriptors())?.transitive_dependents(module_id))
    }

    /// 已加载模块数量
    pub async fn module_count(&self) -> usize {
        self.registry.read().await.len()
    }
}

impl std::fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleManager")
            .field("config", &self.config)
            .field("runtime", &self.runtime.name())
            .field("invoker", &self.invoker)
            .finish_non_exhaustive()
    }
}

/// 上下文刷新期间广播给模块的回调
#[derive(Debug, Clone, Copy)]
enum Notification {
    WillRefreshContext,
    ContextRefreshed,
    Started,
}

impl Notification {
    fn phase(self) -> LifecyclePhase {
        match self {
            Notification::WillRefreshContext => LifecyclePhase::WillRefreshContext,
            Notification::ContextRefreshed => LifecyclePhase::ContextRefreshed,
            Notification::Started => LifecyclePhase::Started,
        }
    }

    fn call(self, activator: &dyn ModuleActivator) -> BoxFuture<'_, anyhow::Result<()>> {
        match self {
            Notification::WillRefreshContext => activator.will_refresh_context(),
            Notification::ContextRefreshed => activator.context_refreshed(),
            Notification::Started => activator.started(),
        }
    }
}

/// 收集模块及其传递依赖的描述
///
/// # Errors
///
/// 依赖未加载时返回 `CoreError::MissingDependency`
fn dependency_closure<'r>(
    registry: &'r ModuleRegistry,
    module_id: &str,
) -> Result<Vec<&'r ModuleDescriptor>> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![module_id.to_string()];
    let mut closure = Vec::new();

    while let Some(id) = stack.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        let descriptor = registry
            .get(&id)
            .ok_or_else(|| CoreError::ModuleNotFound(id.clone()))?
            .descriptor();
        for dep in &descriptor.required_module_ids {
            if !registry.contains(dep) {
                return Err(CoreError::MissingDependency {
                    module: id.clone(),
                    dependency: dep.clone(),
                });
            }
            stack.push(dep.clone());
        }
        closure.push(descriptor);
    }

    Ok(closure)
}
