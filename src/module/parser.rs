//! 模块描述解析器
//!
//! 负责从 module.yaml 文件解析模块描述，以及扫描模块目录。
//!
//! # 文件格式
//!
//! ```yaml
//! id: reporting
//! name: 报表模块
//! version: 1.2.0
//! description: 生成统计报表
//! requires:
//!   - logic
//!   - webservices
//! ```
//!
//! `requires` 也可以写作 `dependencies`。

use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};

use crate::module::metadata::ModuleDescriptor;
use crate::utils::Result;

/// 默认的模块描述文件名
pub const DEFAULT_MANIFEST_FILE: &str = "module.yaml";

/// 模块描述解析器
#[derive(Debug, Clone, Default)]
pub struct ModuleParser;

impl ModuleParser {
    /// 创建新的解析器实例
    pub fn new() -> Self {
        Self
    }

    /// 从文件解析模块描述
    ///
    /// # Arguments
    ///
    /// * `path` - module.yaml 文件路径
    ///
    /// # Errors
    ///
    /// - 文件不存在或无法读取时返回 IO 错误
    /// - 文件内容不符合 YAML 格式时返回 YAML 错误
    /// - 描述验证失败时返回 `InvalidMetadata` 错误
    pub async fn parse_file(path: &Path) -> Result<ModuleDescriptor> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse_string(&content)
    }

    /// 从文件同步解析模块描述
    pub fn parse_file_sync(path: &Path) -> Result<ModuleDescriptor> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_string(&content)
    }

    /// 从字符串解析模块描述
    ///
    /// 未填写 `name` 时使用 `id` 作为名称。
    ///
    /// # Errors
    ///
    /// - YAML 解析失败时返回 `Yaml` 错误
    /// - 验证失败时返回 `InvalidMetadata` 错误
    pub fn parse_string(content: &str) -> Result<ModuleDescriptor> {
        let mut descriptor: ModuleDescriptor = serde_yaml::from_str(content)?;
        if descriptor.name.is_empty() {
            descriptor.name = descriptor.id.clone();
        }
        Self::validate(&descriptor)?;
        Ok(descriptor)
    }

    /// 验证模块描述
    ///
    /// 见 [`ModuleDescriptor::validate`]。
    pub fn validate(descriptor: &ModuleDescriptor) -> Result<()> {
        descriptor.validate()
    }

    /// 扫描模块目录
    ///
    /// 在每个目录的直接子目录中查找名为 `manifest_file` 的描述文件并解析。
    ///
    /// # Returns
    ///
    /// 解析成功的 (描述文件路径, 模块描述) 列表，按路径排序
    ///
    /// # Notes
    ///
    /// - 不存在的目录会被跳过
    /// - 解析失败的描述文件记录警告日志后跳过
    pub async fn scan_dirs(
        dirs: &[PathBuf],
        manifest_file: &str,
    ) -> Result<Vec<(PathBuf, ModuleDescriptor)>> {
        let mut found = Vec::new();

        for dir in dirs {
            if !dir.exists() {
                debug!("模块目录不存在，跳过: {:?}", dir);
                continue;
            }

            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("无法读取模块目录 {:?}: {}", dir, e);
                    continue;
                }
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }

                let manifest_path = path.join(manifest_file);
                if !manifest_path.exists() {
                    trace!("目录 {:?} 中未找到 {}，跳过", path, manifest_file);
                    continue;
                }

                match Self::parse_file(&manifest_path).await {
                    Ok(descriptor) => {
                        info!(module_id = %descriptor.id, "发现模块: {:?}", manifest_path);
                        found.push((manifest_path, descriptor));
                    }
                    Err(e) => {
                        warn!("解析模块描述失败 {:?}: {}", manifest_path, e);
                    }
                }
            }
        }

        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }
}
