use core::{any::Any, fmt};
use std::sync::Arc;

use spark_bytes::ByteStream;

/// 在管线中流动的消息。
///
/// # 教案式说明
/// - **意图（Why）**：解码前后的消息形态不同，靠近传输层的一端只认字节流，
///   靠近应用的一端则是任意业务对象。
/// - **逻辑（How）**：字节流以 `Box<dyn ByteStream>` 持有；业务对象类型擦除为 `Box<dyn Any + Send>`，
///   并保留类型名用于诊断。
/// - **契约（What）**：消息的所有权随事件转移，Handler 不再转发时由 `Drop` 释放。
pub enum PipelineMessage {
    Bytes(Box<dyn ByteStream>),
    User(UserMessage),
}

/// 类型擦除后的业务消息。
pub struct UserMessage {
    type_name: &'static str,
    value: Box<dyn Any + Send>,
}

impl UserMessage {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PipelineMessage {
    pub fn from_bytes<S: ByteStream + 'static>(stream: S) -> Self {
        Self::Bytes(Box::new(stream))
    }

    /// 封装业务对象。
    pub fn from_user<T: Any + Send>(value: T) -> Self {
        Self::User(UserMessage {
            type_name: core::any::type_name::<T>(),
            value: Box::new(value),
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "ByteStream",
            Self::User(message) => message.type_name,
        }
    }

    pub fn as_bytes(&self) -> Option<&dyn ByteStream> {
        match self {
            Self::Bytes(stream) => Some(stream.as_ref()),
            Self::User(_) => None,
        }
    }

    pub fn as_bytes_mut(&mut self) -> Option<&mut (dyn ByteStream + 'static)> {
        match self {
            Self::Bytes(stream) => Some(stream.as_mut()),
            Self::User(_) => None,
        }
    }

    /// 取出字节流；若为业务对象则原样退回。
    pub fn into_bytes(self) -> Result<Box<dyn ByteStream>, Self> {
        match self {
            Self::Bytes(stream) => Ok(stream),
            other => Err(other),
        }
    }

    pub fn downcast_user_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::User(message) => message.value.downcast_ref::<T>(),
            Self::Bytes(_) => None,
        }
    }

    /// 按类型取出业务对象；类型不符时原样退回。
    pub fn try_into_user<T: Any>(self) -> Result<T, Self> {
        match self {
            Self::User(UserMessage { type_name, value }) => match value.downcast::<T>() {
                Ok(value) => Ok(*value),
                Err(value) => Err(Self::User(UserMessage { type_name, value })),
            },
            other => Err(other),
        }
    }
}

impl From<Box<dyn ByteStream>> for PipelineMessage {
    fn from(stream: Box<dyn ByteStream>) -> Self {
        Self::Bytes(stream)
    }
}

impl fmt::Debug for PipelineMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(stream) => f
                .debug_struct("Bytes")
                .field("readable", &stream.readable_bytes())
                .finish(),
            Self::User(message) => f
                .debug_struct("User")
                .field("type_name", &message.type_name)
                .finish(),
        }
    }
}

/// 应用自定义的入站事件，例如空闲检测或握手完成通知。
///
/// 载荷以 `Arc` 共享，事件可在多个 Handler 之间廉价克隆。
#[derive(Clone)]
pub struct UserEvent {
    kind: &'static str,
    payload: Arc<dyn Any + Send + Sync>,
}

impl UserEvent {
    pub fn new<E: Any + Send + Sync>(event: E) -> Self {
        Self {
            kind: core::any::type_name::<E>(),
            payload: Arc::new(event),
        }
    }

    /// 载荷的类型名。
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn is<E: Any>(&self) -> bool {
        self.payload.is::<E>()
    }

    pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }
}

impl fmt::Debug for UserEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserEvent").field("kind", &self.kind).finish()
    }
}
