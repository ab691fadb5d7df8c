//! 模块元数据定义
//!
//! 定义模块描述（module.yaml）、模块状态以及对外暴露的模块信息快照。

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::utils::{CoreError, Result};

/// 模块描述
///
/// 模块的身份信息与声明的依赖，加载后不可变。
///
/// 依赖 ID 使用 `BTreeSet` 存储，天然去重且有序，
/// 保证依赖图的构建结果在多次运行间一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// 模块唯一标识
    pub id: String,

    /// 模块显示名称
    #[serde(default)]
    pub name: String,

    /// 模块版本（semver 格式）
    pub version: String,

    /// 模块描述
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// 依赖的模块 ID 集合
    #[serde(default, rename = "requires", alias = "dependencies")]
    pub required_module_ids: BTreeSet<String>,
}

impl ModuleDescriptor {
    /// 创建新的模块描述
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: version.into(),
            description: String::new(),
            required_module_ids: BTreeSet::new(),
        }
    }

    /// 添加一个依赖
    pub fn requires(mut self, module_id: impl Into<String>) -> Self {
        self.required_module_ids.insert(module_id.into());
        self
    }

    /// 设置显示名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 设置描述
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 解析版本号
    pub fn parsed_version(&self) -> Option<Version> {
        Version::parse(&self.version).ok()
    }

    /// 是否依赖指定模块（仅直接依赖）
    pub fn depends_on(&self, module_id: &str) -> bool {
        self.required_module_ids.contains(module_id)
    }

    /// 验证描述有效性
    ///
    /// 执行以下验证：
    /// - ID 非空且格式合法（字母开头，只包含字母、数字、下划线和连字符）
    /// - 版本号为 semver 格式
    /// - 依赖 ID 格式合法，且不依赖自身
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.id.is_empty() {
            errors.push("模块 ID 不能为空".to_string());
        } else if !is_valid_module_id(&self.id) {
            errors.push(format!(
                "模块 ID '{}' 格式无效，只允许字母、数字、下划线和连字符",
                self.id
            ));
        }

        if self.version.is_empty() {
            errors.push("模块版本号不能为空".to_string());
        } else if Version::parse(&self.version).is_err() {
            errors.push(format!(
                "无效的版本号格式 '{}', 请使用 semver 格式 (如 1.0.0)",
                self.version
            ));
        }

        for dep in &self.required_module_ids {
            if dep == &self.id {
                errors.push(format!("模块 '{}' 不能依赖自身", self.id));
            } else if !is_valid_module_id(dep) {
                errors.push(format!("依赖 ID '{}' 格式无效", dep));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::InvalidMetadata(errors.join("; ")))
        }
    }
}

/// 检查模块 ID 格式是否有效
///
/// 有效格式：字母开头，只包含字母、数字、下划线和连字符
pub(crate) fn is_valid_module_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        _ => false,
    }
}

/// 模块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// 已加载，尚未启动
    Loaded,
    /// 正在启动
    Starting,
    /// 已启动
    Started,
    /// 正在停止
    Stopping,
    /// 已停止
    Stopped,
}

impl Default for ModuleState {
    fn default() -> Self {
        ModuleState::Loaded
    }
}

impl ModuleState {
    /// 是否可以启动
    pub fn can_start(&self) -> bool {
        matches!(self, ModuleState::Loaded | ModuleState::Stopped)
    }

    /// 是否可以停止
    pub fn can_stop(&self) -> bool {
        matches!(self, ModuleState::Started)
    }

    /// 是否可以卸载
    pub fn can_unload(&self) -> bool {
        matches!(self, ModuleState::Loaded | ModuleState::Stopped)
    }

    /// 检查状态转换是否合法
    ///
    /// `Starting` 可以回退到 `Loaded`/`Stopped`，对应激活失败的情况。
    pub fn can_transition_to(&self, next: ModuleState) -> bool {
        use ModuleState::*;
        matches!(
            (self, next),
            (Loaded, Starting)
                | (Stopped, Starting)
                | (Starting, Started)
                | (Starting, Loaded)
                | (Starting, Stopped)
                | (Started, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModuleState::Loaded => "loaded",
            ModuleState::Starting => "starting",
            ModuleState::Started => "started",
            ModuleState::Stopping => "stopping",
            ModuleState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// 模块运行时信息快照
///
/// 由注册表生成，供查询接口返回；修改快照不会影响注册表。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// 模块描述
    pub descriptor: ModuleDescriptor,

    /// 当前状态
    pub state: ModuleState,

    /// 加载时间
    pub loaded_at: DateTime<Utc>,

    /// 最近一次启动时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// 最近一次停止时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,

    /// 最后错误信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ModuleInfo {
    /// 获取模块 ID
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// 获取模块版本
    pub fn version(&self) -> &str {
        &self.descriptor.version
    }

    /// 检查模块是否已启动
    pub fn is_started(&self) -> bool {
        self.state == ModuleState::Started
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_creation() {
        let descriptor = ModuleDescriptor::new("reporting", "1.0.0")
            .requires("webservices")
            .requires("logic")
            .requires("logic");

        assert_eq!(descriptor.id, "reporting");
        assert_eq!(descriptor.name, "reporting");
        assert_eq!(descriptor.required_module_ids.len(), 2);
        // BTreeSet 保证依赖有序
        let deps: Vec<_> = descriptor.required_module_ids.iter().cloned().collect();
        assert_eq!(deps, vec!["logic", "webservices"]);
        assert!(descriptor.depends_on("logic"));
        assert!(!descriptor.depends_on("reporting"));
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(ModuleDescriptor::new("a", "1.0.0").validate().is_ok());
        assert!(ModuleDescriptor::new("", "1.0.0").validate().is_err());
        assert!(ModuleDescriptor::new("1abc", "1.0.0").validate().is_err());
        assert!(ModuleDescriptor::new("a", "not-a-version").validate().is_err());
        assert!(ModuleDescriptor::new("a", "1.0.0").requires("a").validate().is_err());
        assert!(ModuleDescriptor::new("a", "1.0.0").requires("b c").validate().is_err());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let err = ModuleDescriptor::new("", "x").validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("ID"));
        assert!(message.contains("版本号"));
    }

    #[test]
    fn test_module_state_transitions() {
        assert!(ModuleState::Loaded.can_start());
        assert!(ModuleState::Stopped.can_start());
        assert!(!ModuleState::Started.can_start());

        assert!(ModuleState::Started.can_stop());
        assert!(!ModuleState::Stopped.can_stop());
        assert!(!ModuleState::Loaded.can_stop());

        assert!(ModuleState::Loaded.can_transition_to(ModuleState::Starting));
        assert!(ModuleState::Starting.can_transition_to(ModuleState::Loaded));
        assert!(ModuleState::Stopping.can_transition_to(ModuleState::Stopped));
        assert!(!ModuleState::Loaded.can_transition_to(ModuleState::Started));
        assert!(!ModuleState::Stopped.can_transition_to(ModuleState::Stopping));
        assert!(!ModuleState::Started.can_transition_to(ModuleState::Starting));
    }

    #[test]
    fn test_descriptor_yaml_uses_requires_key() {
        let descriptor = ModuleDescriptor::new("a", "1.0.0").requires("b");
        let yaml = serde_yaml::to_string(&descriptor).unwrap();
        assert!(yaml.contains("requires"));

        let parsed: ModuleDescriptor = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, descriptor);
    }
}
