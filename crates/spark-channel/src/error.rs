use std::{borrow::Cow, io, sync::Arc};

use spark_bytes::BufferError;
use thiserror::Error;

/// 管线、通道与完成通知的稳定错误码。
pub mod codes {
    pub const DUPLICATE_NAME: &str = "pipeline.duplicate_name";
    pub const NO_SUCH_NAME: &str = "pipeline.no_such_name";
    pub const HANDLER_REJECTED: &str = "pipeline.handler_rejected";

    pub const IO: &str = "channel.io";
    pub const UNSUPPORTED_MESSAGE: &str = "channel.unsupported_message";
    pub const CLOSED: &str = "channel.closed";
    pub const CANCELLED: &str = "channel.cancelled";
    pub const HANDLER: &str = "channel.handler";

    pub const INTERRUPTED: &str = "future.interrupted";
    pub const BLOCKING_IN_EVENT_LOOP: &str = "future.blocking_in_event_loop";
    pub const VOID_FUTURE: &str = "future.void";
}

/// 管线拓扑操作的同步错误。
///
/// # 教案式说明
/// - **意图（Why）**：增删改 Handler 是同步调用，名称冲突或锚点缺失必须当场告知调用方。
/// - **契约（What）**：返回任何错误时管线拓扑保持调用前的状态。
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("[{code}] handler name `{0}` is already registered", code = codes::DUPLICATE_NAME)]
    DuplicateName(String),
    #[error("[{code}] no handler named `{0}`", code = codes::NO_SUCH_NAME)]
    NoSuchName(String),
    #[error("[{code}] handler `{name}` rejected {stage}: {source}", code = codes::HANDLER_REJECTED)]
    HandlerRejected {
        name: String,
        stage: &'static str,
        #[source]
        source: ChannelError,
    },
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateName(_) => codes::DUPLICATE_NAME,
            Self::NoSuchName(_) => codes::NO_SUCH_NAME,
            Self::HandlerRejected { .. } => codes::HANDLER_REJECTED,
        }
    }
}

/// 通道操作失败的原因，也是 `exception_caught` 事件携带的错误。
///
/// # 教案式说明
/// - **意图（Why）**：异步操作的失败只能经由完成通知观察到，原因需要能被多个监听器共享，
///   因此该类型实现 `Clone`，I/O 错误以 `Arc` 包裹。
/// - **契约（What）**：`code()` 返回稳定错误码；`Buffer` 变体透传字节流错误码。
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("[{code}] {operation} failed: {source}", code = codes::IO)]
    Io {
        operation: &'static str,
        #[source]
        source: Arc<io::Error>,
    },
    #[error(
        "[{code}] message of type `{type_name}` reached the transport without being encoded into a byte stream",
        code = codes::UNSUPPORTED_MESSAGE
    )]
    UnsupportedMessage { type_name: &'static str },
    #[error("[{code}] channel is closed", code = codes::CLOSED)]
    Closed,
    #[error("[{code}] operation was cancelled", code = codes::CANCELLED)]
    Cancelled,
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("[{code}] {message}", code = codes::HANDLER)]
    Handler { message: Cow<'static, str> },
}

impl ChannelError {
    pub fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io {
            operation,
            source: Arc::new(source),
        }
    }

    /// Handler 自定义失败。
    pub fn handler(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => codes::IO,
            Self::UnsupportedMessage { .. } => codes::UNSUPPORTED_MESSAGE,
            Self::Closed => codes::CLOSED,
            Self::Cancelled => codes::CANCELLED,
            Self::Buffer(error) => error.code(),
            Self::Handler { .. } => codes::HANDLER,
        }
    }
}

/// 阻塞等待与监听器注册的错误。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FutureError {
    #[error("[{code}] wait was interrupted", code = codes::INTERRUPTED)]
    Interrupted,
    #[error(
        "[{code}] blocking wait on event loop `{event_loop}` would deadlock its own completion",
        code = codes::BLOCKING_IN_EVENT_LOOP
    )]
    BlockingInEventLoop { event_loop: String },
    #[error("[{code}] {operation} is not supported on the void future", code = codes::VOID_FUTURE)]
    VoidFuture { operation: &'static str },
}

impl FutureError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Interrupted => codes::INTERRUPTED,
            Self::BlockingInEventLoop { .. } => codes::BLOCKING_IN_EVENT_LOOP,
            Self::VoidFuture { .. } => codes::VOID_FUTURE,
        }
    }
}
