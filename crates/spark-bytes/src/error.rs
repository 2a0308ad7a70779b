use std::borrow::Cow;

use thiserror::Error;

/// 字节流错误码常量。
///
/// # 教案式说明
/// - **意图（Why）**：与 spark 其余模块一致，错误除了人类可读的消息外还携带稳定的点分错误码，
///   便于日志聚合与测试断言不依赖消息文本。
/// - **契约（What）**：常量值一经发布不得修改；新增错误类别时追加新常量。
pub mod codes {
    /// 索引或长度超出可访问区间。
    pub const OUT_OF_RANGE: &str = "buffer.out_of_range";
    /// 参数非法，例如组合缓冲的分量字节序不一致。
    pub const INVALID_ARGUMENT: &str = "buffer.invalid_argument";
    /// 当前实现不支持该操作，例如对固定窗口切片调整容量。
    pub const UNSUPPORTED: &str = "buffer.unsupported";
}

/// 字节流操作的统一错误类型。
///
/// # 教案式说明
/// - **意图（Why）**：所有越界、非法参数与不支持的操作都以同步错误返回，调用方可以据此决定
///   是等待更多字节还是直接关闭连接。
/// - **逻辑（How）**：每个变体都记录触发错误的操作名，越界错误额外带上 `index`、`length` 与当前上界，
///   方便排查是哪一次读写越过了边界。
/// - **契约（What）**：返回错误时，流的游标与内容均保持调用前的状态，不存在部分写入。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("[{code}] {operation}: index {index} with length {length} exceeds bound {bound}", code = codes::OUT_OF_RANGE)]
    OutOfRange {
        operation: &'static str,
        index: usize,
        length: usize,
        bound: usize,
    },
    #[error("[{code}] {operation}: {reason}", code = codes::INVALID_ARGUMENT)]
    InvalidArgument {
        operation: &'static str,
        reason: Cow<'static, str>,
    },
    #[error("[{code}] {operation}: {reason}", code = codes::UNSUPPORTED)]
    Unsupported {
        operation: &'static str,
        reason: &'static str,
    },
}

impl BufferError {
    pub fn out_of_range(operation: &'static str, index: usize, length: usize, bound: usize) -> Self {
        Self::OutOfRange {
            operation,
            index,
            length,
            bound,
        }
    }

    pub fn invalid_argument(operation: &'static str, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidArgument {
            operation,
            reason: reason.into(),
        }
    }

    pub fn unsupported(operation: &'static str, reason: &'static str) -> Self {
        Self::Unsupported { operation, reason }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutOfRange { .. } => codes::OUT_OF_RANGE,
            Self::InvalidArgument { .. } => codes::INVALID_ARGUMENT,
            Self::Unsupported { .. } => codes::UNSUPPORTED,
        }
    }

    /// 触发错误的操作名。
    pub fn operation(&self) -> &'static str {
        match self {
            Self::OutOfRange { operation, .. }
            | Self::InvalidArgument { operation, .. }
            | Self::Unsupported { operation, .. } => operation,
        }
    }
}

/// 字节流模块统一使用的结果类型。
pub type Result<T, E = BufferError> = core::result::Result<T, E>;

/// 校验 `[index, index + length)` 落在 `[0, bound)` 内，溢出同样视为越界。
pub(crate) fn check_range(
    operation: &'static str,
    index: usize,
    length: usize,
    bound: usize,
) -> Result<()> {
    match index.checked_add(length) {
        Some(end) if end <= bound => Ok(()),
        _ => Err(BufferError::out_of_range(operation, index, length, bound)),
    }
}
