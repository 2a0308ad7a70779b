use std::sync::{Arc, LazyLock};

use spin::RwLock;

use crate::{ByteOrder, ByteStream, HeapByteStream, heap::SharedStorage};

/// 所有零长度视图共用的存储，首次使用时初始化，之后只读。
pub(crate) static EMPTY_STORAGE: LazyLock<SharedStorage> =
    LazyLock::new(|| Arc::new(RwLock::new(Vec::new())));

/// 返回指向共享空存储的零容量流。
///
/// 零长度的切片、副本与分解结果都落到这里，避免为空区间分配存储；
/// 返回的流容量与最大容量均为 0，任何写入都会以越界错误返回。
pub fn empty(order: ByteOrder) -> Box<dyn ByteStream> {
    Box::new(HeapByteStream::shared_empty(Arc::clone(&EMPTY_STORAGE), order))
}
