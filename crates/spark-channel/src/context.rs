use std::{net::SocketAddr, sync::Arc};

use crate::{
    error::ChannelError,
    future::CompletionFuture,
    message::{PipelineMessage, UserEvent},
    pipeline::{ContextId, Event, Pipeline},
};

/// Handler 在管线中的位置，以及从该位置继续传播事件的入口。
///
/// # 教案式说明
/// - **意图（Why）**：Handler 处理完事件后需要“交给下一个”，而下一个是谁取决于当前拓扑；
///   上下文把这一查找封装起来。
/// - **逻辑（How）**：入站 `fire_*` 从当前位置向尾部寻找下一个声明了该事件的节点，
///   出站方法向头部寻找；查找结果按拓扑代数缓存。
/// - **契约（What）**：上下文只在回调期间借用；Handler 被移除后，正在执行的回调仍可继续转发，
///   事件会沿移除时记录的邻居到达仍在管线中的节点。
#[derive(Clone)]
pub struct HandlerContext<'a> {
    pipeline: &'a Pipeline,
    id: ContextId,
    name: Arc<str>,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(pipeline: &'a Pipeline, id: ContextId, name: Arc<str>) -> Self {
        Self { pipeline, id, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn pipeline(&self) -> &'a Pipeline {
        self.pipeline
    }

    /// 该 Handler 是否仍在管线中。
    pub fn is_removed(&self) -> bool {
        self.pipeline.is_retired(self.id)
    }

    pub fn new_future(&self) -> CompletionFuture {
        self.pipeline.new_future()
    }

    pub fn void_future(&self) -> CompletionFuture {
        self.pipeline.void_future()
    }

    pub fn fire_channel_open(&self) {
        self.pipeline.propagate(self.id, Event::ChannelOpen);
    }

    pub fn fire_channel_active(&self) {
        self.pipeline.propagate(self.id, Event::ChannelActive);
    }

    pub fn fire_channel_inactive(&self) {
        self.pipeline.propagate(self.id, Event::ChannelInactive);
    }

    pub fn fire_message_updated(&self, message: PipelineMessage) {
        self.pipeline
            .propagate(self.id, Event::MessageUpdated(message));
    }

    pub fn fire_exception_caught(&self, error: ChannelError) {
        self.pipeline
            .propagate(self.id, Event::ExceptionCaught(error));
    }

    pub fn fire_user_event(&self, event: UserEvent) {
        self.pipeline.propagate(self.id, Event::UserEvent(event));
    }

    pub fn fire_read_suspended(&self, suspended: bool) {
        self.pipeline
            .propagate(self.id, Event::ReadSuspended(suspended));
    }

    pub fn bind(&self, local: SocketAddr) -> CompletionFuture {
        let future = self.new_future();
        self.bind_with(local, future.clone());
        future
    }

    pub fn bind_with(&self, local: SocketAddr, future: CompletionFuture) {
        self.pipeline.propagate(self.id, Event::Bind(local, future));
    }

    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> CompletionFuture {
        let future = self.new_future();
        self.connect_with(remote, local, future.clone());
        future
    }

    pub fn connect_with(
        &self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        future: CompletionFuture,
    ) {
        self.pipeline
            .propagate(self.id, Event::Connect(remote, local, future));
    }

    pub fn disconnect(&self) -> CompletionFuture {
        let future = self.new_future();
        self.disconnect_with(future.clone());
        future
    }

    pub fn disconnect_with(&self, future: CompletionFuture) {
        self.pipeline.propagate(self.id, Event::Disconnect(future));
    }

    pub fn close(&self) -> CompletionFuture {
        let future = self.new_future();
        self.close_with(future.clone());
        future
    }

    pub fn close_with(&self, future: CompletionFuture) {
        self.pipeline.propagate(self.id, Event::Close(future));
    }

    pub fn write(&self, message: PipelineMessage) -> CompletionFuture {
        let future = self.new_future();
        self.write_with(message, future.clone());
        future
    }

    pub fn write_with(&self, message: PipelineMessage, future: CompletionFuture) {
        self.pipeline
            .propagate(self.id, Event::Write(message, future));
    }

    /// 写入后立即刷新。
    pub fn write_and_flush(&self, message: PipelineMessage) -> CompletionFuture {
        let future = self.write(message);
        self.flush();
        future
    }

    pub fn flush(&self) {
        self.pipeline.propagate(self.id, Event::Flush);
    }

    pub fn read(&self) {
        self.pipeline.propagate(self.id, Event::Read);
    }
}

impl core::fmt::Debug for HandlerContext<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}
