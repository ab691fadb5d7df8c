//! 模块激活运行时
//!
//! 定义模块激活/停用的接口。生命周期管理器在 `willStart` 之后调用
//! [`ModuleRuntime::activate`]，在 `willStop` 之后调用 [`ModuleRuntime::deactivate`]。
//! 具体如何激活一个模块（加载代码、建立连接等）由运行时决定。

use async_trait::async_trait;

use super::metadata::ModuleDescriptor;

/// 模块激活运行时接口
///
/// 返回的错误会被生命周期调用器捕获并记录为 `activate` / `deactivate` 阶段的失败。
#[async_trait]
pub trait ModuleRuntime: Send + Sync {
    /// 激活模块
    async fn activate(&self, descriptor: &ModuleDescriptor) -> anyhow::Result<()>;

    /// 停用模块
    async fn deactivate(&self, descriptor: &ModuleDescriptor) -> anyhow::Result<()>;

    /// 运行时名称，用于日志
    fn name(&self) -> &str;
}

/// 空运行时
///
/// 激活与停用都直接成功，模块的行为完全由其回调决定。
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRuntime;

impl NoopRuntime {
    /// 创建运行时
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModuleRuntime for NoopRuntime {
    async fn activate(&self, _descriptor: &ModuleDescriptor) -> anyhow::Result<()> {
        Ok(())
    }

    async fn deactivate(&self, _descriptor: &ModuleDescriptor) -> anyhow::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_runtime() {
        let runtime = NoopRuntime::new();
        assert_eq!(runtime.name(), "noop");

        let descriptor = ModuleDescriptor::new("test", "1.0.0");
        assert!(runtime.activate(&descriptor).await.is_ok());
        assert!(runtime.deactivate(&descriptor).await.is_ok());
    }
}
