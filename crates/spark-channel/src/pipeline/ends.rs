use std::net::SocketAddr;

use tracing::{debug, warn};

use crate::{
    context::HandlerContext,
    error::ChannelError,
    event::{EventKind, EventSet},
    future::CompletionFuture,
    handler::{ChannelHandler, HandlerResult},
    message::{PipelineMessage, UserEvent},
};

/// 管线头部：出站事件的终点，交给传输层执行。
pub(crate) struct HeadHandler;

impl ChannelHandler for HeadHandler {
    fn interests(&self) -> EventSet {
        EventSet::OUTBOUND
    }

    fn bind(
        &self,
        ctx: &HandlerContext<'_>,
        local: SocketAddr,
        future: CompletionFuture,
    ) -> HandlerResult {
        ctx.pipeline().transport().bind(local, future);
        Ok(())
    }

    fn connect(
        &self,
        ctx: &HandlerContext<'_>,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        future: CompletionFuture,
    ) -> HandlerResult {
        ctx.pipeline().transport().connect(remote, local, future);
        Ok(())
    }

    fn disconnect(&self, ctx: &HandlerContext<'_>, future: CompletionFuture) -> HandlerResult {
        ctx.pipeline().transport().disconnect(future);
        Ok(())
    }

    fn close(&self, ctx: &HandlerContext<'_>, future: CompletionFuture) -> HandlerResult {
        ctx.pipeline().transport().close(future);
        Ok(())
    }

    fn write(
        &self,
        ctx: &HandlerContext<'_>,
        message: PipelineMessage,
        future: CompletionFuture,
    ) -> HandlerResult {
        match message.into_bytes() {
            Ok(payload) => ctx.pipeline().transport().write(payload, future),
            Err(message) => {
                debug!(
                    pipeline.event = EventKind::Write.label(),
                    message.type_name = message.type_name(),
                    "unencoded message reached the head of the pipeline"
                );
                future.set_failure(ChannelError::UnsupportedMessage {
                    type_name: message.type_name(),
                });
            }
        }
        Ok(())
    }

    fn flush(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        ctx.pipeline().transport().flush();
        Ok(())
    }

    fn read(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        ctx.pipeline().transport().read();
        Ok(())
    }
}

/// 管线尾部：入站事件的终点。
///
/// 未被消费的消息与事件在此丢弃；未处理的异常记录告警，并按配置关闭通道。
pub(crate) struct TailHandler;

impl TailHandler {
    fn dropped(ctx: &HandlerContext<'_>, kind: EventKind) {
        if ctx.pipeline().settings().log_dropped_inbound {
            debug!(
                pipeline.event = kind.label(),
                pipeline.generation = ctx.pipeline().generation(),
                "inbound event reached the tail of the pipeline and was discarded"
            );
        }
    }
}

impl ChannelHandler for TailHandler {
    fn interests(&self) -> EventSet {
        EventSet::INBOUND
    }

    fn channel_open(&self, _ctx: &HandlerContext<'_>) -> HandlerResult {
        Ok(())
    }

    fn channel_active(&self, _ctx: &HandlerContext<'_>) -> HandlerResult {
        Ok(())
    }

    fn channel_inactive(&self, _ctx: &HandlerContext<'_>) -> HandlerResult {
        Ok(())
    }

    fn message_updated(&self, ctx: &HandlerContext<'_>, message: PipelineMessage) -> HandlerResult {
        if ctx.pipeline().settings().log_dropped_inbound {
            debug!(
                pipeline.event = EventKind::MessageUpdated.label(),
                message.type_name = message.type_name(),
                "discarded inbound message that reached the tail of the pipeline"
            );
        }
        Ok(())
    }

    fn exception_caught(&self, ctx: &HandlerContext<'_>, error: ChannelError) -> HandlerResult {
        let close = ctx.pipeline().settings().close_on_unhandled_exception;
        warn!(
            pipeline.event = EventKind::ExceptionCaught.label(),
            error.code = error.code(),
            error = %error,
            close,
            "unhandled exception reached the tail of the pipeline"
        );
        if close {
            ctx.close();
        }
        Ok(())
    }

    fn user_event(&self, ctx: &HandlerContext<'_>, _event: UserEvent) -> HandlerResult {
        Self::dropped(ctx, EventKind::UserEvent);
        Ok(())
    }

    fn read_suspended(&self, ctx: &HandlerContext<'_>, _suspended: bool) -> HandlerResult {
        Self::dropped(ctx, EventKind::ReadSuspended);
        Ok(())
    }
}
