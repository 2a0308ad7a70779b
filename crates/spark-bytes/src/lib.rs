#![deny(unsafe_code)]

//! `spark-bytes` 提供 spark 数据面的字节缓冲：带读写游标的 [`ByteStream`] 契约、
//! 连续存储的 [`HeapByteStream`] 与零拷贝拼接的 [`CompositeByteStream`]。
//!
//! # 教案式说明
//! - **意图（Why）**：入站解码与出站编码都围绕“读游标消费、写游标追加”展开；
//!   分帧、拼包又要求在不复制的前提下切分与拼接字节。
//! - **逻辑（How）**：
//!   - [`ByteStream`] 以少量原语（容量、绝对访问、派生视图）为必需方法，其余读写、搬运、
//!     查找与丢弃均为默认方法；
//!   - 视图之间通过 `Arc` 共享存储，写入对所有视图可见，`copy` 则产生独立存储；
//!   - 组合流按前缀和定位分量，并缓存最近命中的分量以加速顺序访问。
//! - **契约（What）**：越界、非法参数与不支持的操作均以 [`BufferError`] 同步返回，
//!   且失败调用不会部分生效。
//! - **风险（Trade-offs）**：[`ByteStream`] 被封闭在本 crate 内，外部只能组合现有实现。

mod composite;
mod empty;
mod error;
pub mod finder;
mod heap;
mod order;
mod sealed;
mod settings;
mod stream;

pub use composite::{CompositeByteStream, DEFAULT_MAX_COMPONENTS};
pub use empty::empty;
pub use error::{BufferError, Result, codes};
pub use heap::HeapByteStream;
pub use order::ByteOrder;
pub use settings::CompositeSettings;
pub use stream::{ByteStream, Cursors, is_empty_singleton};
