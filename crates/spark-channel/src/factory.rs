use std::sync::Arc;

use crate::{error::PipelineError, handler::ChannelHandler, pipeline::Pipeline};

/// 为新建管线装配 Handler 的工厂。
///
/// # 教案式说明
/// - **意图（Why）**：每条连接都需要一条结构相同的管线，引导程序只持有工厂，
///   在连接建立时调用 [`PipelineFactory::populate`]。
/// - **契约（What）**：返回错误时调用方应放弃该管线；已添加的 Handler 不会被回滚。
pub trait PipelineFactory: Send + Sync + 'static {
    fn populate(&self, pipeline: &Pipeline) -> Result<(), PipelineError>;
}

/// 按顺序追加到尾部的 Handler 列表，最常用的工厂实现。
///
/// Handler 以 `Arc` 共享，同一个链可以装配任意多条管线，因此链中的 Handler
/// 不应持有与单条连接绑定的状态。
#[derive(Clone, Default)]
pub struct HandlerChain {
    entries: Vec<(String, Arc<dyn ChannelHandler>)>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, handler: Arc<dyn ChannelHandler>) -> Self {
        self.push(name, handler);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, handler: Arc<dyn ChannelHandler>) {
        self.entries.push((name.into(), handler));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }
}

impl PipelineFactory for HandlerChain {
    fn populate(&self, pipeline: &Pipeline) -> Result<(), PipelineError> {
        for (name, handler) in &self.entries {
            pipeline.add_last(name.clone(), Arc::clone(handler))?;
        }
        Ok(())
    }
}

impl core::fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
