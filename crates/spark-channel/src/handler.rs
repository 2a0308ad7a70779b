use std::net::SocketAddr;

use crate::{
    context::HandlerContext,
    error::ChannelError,
    event::EventSet,
    future::CompletionFuture,
    message::{PipelineMessage, UserEvent},
};

/// Handler 回调的返回值。
pub type HandlerResult = Result<(), ChannelError>;

/// 管线中的事件处理单元。
///
/// # 教案式说明
/// - **意图（Why）**：编解码、流控、业务逻辑都以 Handler 的形式串接在管线上，
///   每个 Handler 只关心自己声明的事件。
/// - **逻辑（How）**：
///   - [`ChannelHandler::interests`] 返回实现的事件集合，管线只把这些事件派发给它；
///   - 每个事件回调都有“原样转发给下一个节点”的默认实现，覆盖时需自行决定是否继续转发；
///   - 生命周期回调在管线锁之外执行，可以安全地调用上下文的转发方法。
/// - **契约（What）**：
///   - 入站回调返回 `Err` 时，错误以 `exception_caught` 从下一个节点继续传播；
///   - 出站回调返回 `Err` 时，对应的完成通知被置为失败；没有通知的 `flush`/`read`
///     则转为 `exception_caught`；
///   - `before_add` 返回 `Err` 会拒绝本次添加，其余生命周期错误只记录日志。
/// - **风险（Trade-offs）**：方法以 `&self` 调用，可变状态需要内部可变性，
///   同一实例可被添加到多个管线。
pub trait ChannelHandler: Send + Sync + 'static {
    /// 实现的事件集合。
    fn interests(&self) -> EventSet;

    fn before_add(&self, _ctx: &HandlerContext<'_>) -> HandlerResult {
        Ok(())
    }

    fn after_add(&self, _ctx: &HandlerContext<'_>) -> HandlerResult {
        Ok(())
    }

    fn before_remove(&self, _ctx: &HandlerContext<'_>) -> HandlerResult {
        Ok(())
    }

    fn after_remove(&self, _ctx: &HandlerContext<'_>) -> HandlerResult {
        Ok(())
    }

    fn channel_open(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        ctx.fire_channel_open();
        Ok(())
    }

    fn channel_active(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        ctx.fire_channel_active();
        Ok(())
    }

    fn channel_inactive(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        ctx.fire_channel_inactive();
        Ok(())
    }

    fn message_updated(&self, ctx: &HandlerContext<'_>, message: PipelineMessage) -> HandlerResult {
        ctx.fire_message_updated(message);
        Ok(())
    }

    fn exception_caught(&self, ctx: &HandlerContext<'_>, error: ChannelError) -> HandlerResult {
        ctx.fire_exception_caught(error);
        Ok(())
    }

    fn user_event(&self, ctx: &HandlerContext<'_>, event: UserEvent) -> HandlerResult {
        ctx.fire_user_event(event);
        Ok(())
    }

    fn read_suspended(&self, ctx: &HandlerContext<'_>, suspended: bool) -> HandlerResult {
        ctx.fire_read_suspended(suspended);
        Ok(())
    }

    fn bind(
        &self,
        ctx: &HandlerContext<'_>,
        local: SocketAddr,
        future: CompletionFuture,
    ) -> HandlerResult {
        ctx.bind_with(local, future);
        Ok(())
    }

    fn connect(
        &self,
        ctx: &HandlerContext<'_>,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        future: CompletionFuture,
    ) -> HandlerResult {
        ctx.connect_with(remote, local, future);
        Ok(())
    }

    fn disconnect(&self, ctx: &HandlerContext<'_>, future: CompletionFuture) -> HandlerResult {
        ctx.disconnect_with(future);
        Ok(())
    }

    fn close(&self, ctx: &HandlerContext<'_>, future: CompletionFuture) -> HandlerResult {
        ctx.close_with(future);
        Ok(())
    }

    fn write(
        &self,
        ctx: &HandlerContext<'_>,
        message: PipelineMessage,
        future: CompletionFuture,
    ) -> HandlerResult {
        ctx.write_with(message, future);
        Ok(())
    }

    fn flush(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        ctx.flush();
        Ok(())
    }

    fn read(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        ctx.read();
        Ok(())
    }
}
