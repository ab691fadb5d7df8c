//! 模块注册表
//!
//! 管理所有已加载的模块及其运行时状态，是"某个模块是否已启动"的唯一数据来源。
//!
//! 注册表本身不加锁；并发访问由 [`ModuleManager`](crate::module::ModuleManager)
//! 持有的读写锁串行化。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::module::lifecycle::ModuleActivator;
use crate::module::metadata::{ModuleDescriptor, ModuleInfo, ModuleState};
use crate::utils::{CoreError, Result};

/// 注册表中的模块条目
pub struct ModuleEntry {
    descriptor: ModuleDescriptor,
    activator: Arc<dyn ModuleActivator>,
    state: ModuleState,
    loaded_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    /// 自最近一次进入 Started 以来是否已调用过 `started()`
    started_notified: bool,
}

impl ModuleEntry {
    /// 创建处于 Loaded 状态的条目
    pub fn new(descriptor: ModuleDescriptor, activator: Arc<dyn ModuleActivator>) -> Self {
        Self {
            descriptor,
            activator,
            state: ModuleState::Loaded,
            loaded_at: Utc::now(),
            started_at: None,
            stopped_at: None,
            last_error: None,
            started_notified: false,
        }
    }

    /// 模块描述
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// 获取模块行为对象
    pub fn activator(&self) -> Arc<dyn ModuleActivator> {
        Arc::clone(&self.activator)
    }

    /// 当前状态
    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// 最近一次失败
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// 自最近一次启动以来是否已调用 `started`
    pub fn started_notified(&self) -> bool {
        self.started_notified
    }

    /// 生成对外的信息快照
    pub fn info(&self) -> ModuleInfo {
        ModuleInfo {
            descriptor: self.descriptor.clone(),
            state: self.state,
            loaded_at: self.loaded_at,
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            last_error: self.last_error.clone(),
        }
    }
}

impl fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("descriptor", &self.descriptor)
            .field("state", &self.state)
            .field("loaded_at", &self.loaded_at)
            .field("started_notified", &self.started_notified)
            .finish_non_exhaustive()
    }
}

/// 模块注册表
///
/// 存储 module_id -> [`ModuleEntry`]。列表类查询一律按模块 ID 升序返回。
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, ModuleEntry>,
}

impl ModuleRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== 注册 ====================

    /// 注册模块，初始状态为 Loaded
    ///
    /// # Errors
    ///
    /// 模块 ID 已存在时返回 `CoreError::ModuleAlreadyLoaded`
    pub fn insert(
        &mut self,
        descriptor: ModuleDescriptor,
        activator: Arc<dyn ModuleActivator>,
    ) -> Result<()> {
        if self.modules.contains_key(&descriptor.id) {
            return Err(CoreError::ModuleAlreadyLoaded(descriptor.id));
        }
        let id = descriptor.id.clone();
        self.modules.insert(id, ModuleEntry::new(descriptor, activator));
        Ok(())
    }

    /// 移除模块
    ///
    /// 只做存在性检查；状态和依赖检查由管理器负责。
    pub fn remove(&mut self, module_id: &str) -> Result<ModuleEntry> {
        self.modules
            .remove(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))
    }

    // ==================== 查询 ====================

    /// 获取模块条目
    pub fn get(&self, module_id: &str) -> Option<&ModuleEntry> {
        self.modules.get(module_id)
    }

    /// 模块是否已注册
    pub fn contains(&self, module_id: &str) -> bool {
        self.modules.contains_key(module_id)
    }

    /// 获取模块状态
    pub fn state(&self, module_id: &str) -> Option<ModuleState> {
        self.modules.get(module_id).map(|entry| entry.state)
    }

    /// 获取处于指定状态的所有模块 ID
    pub fn all_with_state(&self, state: ModuleState) -> Vec<String> {
        let mut ids: Vec<String> = self
            .modules
            .values()
            .filter(|entry| entry.state == state)
            .map(|entry| entry.descriptor.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// 所有模块描述（按 ID 升序）
    pub fn descriptors(&self) -> Vec<&ModuleDescriptor> {
        let mut descriptors: Vec<_> = self.modules.values().map(|e| &e.descriptor).collect();
        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        descriptors
    }

    /// 处于指定状态的模块描述（按 ID 升序）
    pub fn descriptors_with_state(&self, state: ModuleState) -> Vec<&ModuleDescriptor> {
        self.descriptors()
            .into_iter()
            .filter(|d| self.state(&d.id) == Some(state))
            .collect()
    }

    /// 所有模块 ID（升序）
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.modules.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 所有模块的信息快照（按 ID 升序）
    pub fn infos(&self) -> Vec<ModuleInfo> {
        let mut infos: Vec<ModuleInfo> = self.modules.values().map(ModuleEntry::info).collect();
        infos.sort_by(|a, b| a.descriptor.id.cmp(&b.descriptor.id));
        infos
    }

    /// 直接依赖指定模块的已加载模块（升序）
    pub fn direct_dependents(&self, module_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .modules
            .values()
            .filter(|entry| entry.descriptor.depends_on(module_id))
            .map(|entry| entry.descriptor.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// 已注册的模块数
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// 是否没有模块
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    // ==================== 状态管理 ====================

    /// 设置模块状态
    ///
    /// 进入 Started 时记录启动时间并重置 `started()` 通知标记；
    /// 进入 Stopped 时记录停止时间。
    ///
    /// # Returns
    ///
    /// 转换前的状态
    ///
    /// # Errors
    ///
    /// - `CoreError::ModuleNotFound` - 模块不存在
    /// - `CoreError::IllegalStateTransition` - 转换不合法
    pub fn set_state(&mut self, module_id: &str, new_state: ModuleState) -> Result<ModuleState> {
        let entry = self
            .modules
            .get_mut(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

        let old_state = entry.state;
        if !old_state.can_transition_to(new_state) {
            return Err(CoreError::IllegalStateTransition {
                module_id: module_id.to_string(),
                from: old_state,
                to: new_state,
            });
        }

        entry.state = new_state;
        match new_state {
            ModuleState::Started => {
                entry.started_at = Some(Utc::now());
                entry.started_notified = false;
                entry.last_error = None;
            }
            ModuleState::Stopped if old_state == ModuleState::Stopping => {
                entry.stopped_at = Some(Utc::now());
            }
            _ => {}
        }

        debug!(
            module_id = %module_id,
            from = %old_state,
            to = %new_state,
            "模块状态变更"
        );
        Ok(old_state)
    }

    /// 记录模块最后一次错误
    pub fn record_error(&mut self, module_id: &str, message: impl Into<String>) {
        if let Some(entry) = self.modules.get_mut(module_id) {
            entry.last_error = Some(message.into());
        }
    }

    /// 标记模块已收到 `started()` 通知
    pub fn mark_started_notified(&mut self, module_id: &str) {
        if let Some(entry) = self.modules.get_mut(module_id) {
            entry.started_notified = true;
        }
    }

    /// 已启动但尚未收到 `started()` 通知的模块（升序）
    pub fn pending_started(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .modules
            .values()
            .filter(|entry| entry.state == ModuleState::Started && !entry.started_notified)
            .map(|entry| entry.descriptor.id.clone())
            .collect();
        ids.sort();
        ids
    }
}
