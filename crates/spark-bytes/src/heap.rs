use std::{fmt, ops::Range, sync::Arc};

use bytes::Bytes;
use spin::RwLock;

use crate::{
    BufferError, ByteOrder, ByteStream, Cursors, Result, empty, empty::EMPTY_STORAGE,
    error::check_range, sealed::Sealed,
};

/// 多个视图共享的底层存储。
pub(crate) type SharedStorage = Arc<RwLock<Vec<u8>>>;

/// 视图在共享存储上覆盖的区间。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    /// 覆盖整个存储，容量随存储长度变化。
    Whole,
    /// 固定偏移与长度，切片使用。
    Fixed { offset: usize, length: usize },
}

/// 堆上连续存储的字节流。
///
/// # 教案式说明
/// - **意图（Why）**：作为最常用的 [`ByteStream`] 实现，为解码器提供可扩容的累积缓冲，
///   同时为组合流提供分量。
/// - **逻辑（How）**：
///   - 内容保存在 `Arc<spin::RwLock<Vec<u8>>>` 中，派生视图（切片、副本视图、换序视图）只克隆 `Arc`；
///   - 根视图及其 `duplicate` 使用 `Whole` 窗口，可以在 `max_capacity` 内扩缩容；
///   - 切片使用 `Fixed` 窗口，容量固定为切片长度。
/// - **契约（What）**：
///   - 同一存储上的所有视图互相可见对方的写入；`copy` 产生的流拥有独立存储；
///   - 最后一个视图被释放时存储随 `Arc` 一起释放。
/// - **风险（Trade-offs）**：根视图缩容后，落在旧区间之外的切片访问会返回越界错误。
///
/// `Clone` 等价于 [`ByteStream::duplicate`]：共享内容，复制游标。
#[derive(Clone)]
pub struct HeapByteStream {
    storage: SharedStorage,
    window: Window,
    order: ByteOrder,
    max_capacity: usize,
    cursors: Cursors,
}

impl HeapByteStream {
    /// 未显式指定时的最大容量。
    pub const DEFAULT_MAX_CAPACITY: usize = isize::MAX as usize;

    /// 分配 `capacity` 字节的零填充流，游标均为 0。
    pub fn allocate(capacity: usize, order: ByteOrder) -> Self {
        Self::root(vec![0; capacity], order, Self::DEFAULT_MAX_CAPACITY, Cursors::new(0, 0))
    }

    /// 带容量上限的分配。
    pub fn with_max_capacity(
        capacity: usize,
        max_capacity: usize,
        order: ByteOrder,
    ) -> Result<Self> {
        if capacity > max_capacity {
            return Err(BufferError::invalid_argument(
                "with_max_capacity",
                format!("initial capacity {capacity} exceeds max capacity {max_capacity}"),
            ));
        }
        Ok(Self::root(vec![0; capacity], order, max_capacity, Cursors::new(0, 0)))
    }

    /// 接管已有存储，不复制；全部内容可读。
    pub fn wrap(content: Vec<u8>, order: ByteOrder) -> Self {
        let length = content.len();
        Self::root(content, order, Self::DEFAULT_MAX_CAPACITY, Cursors::fully_readable(length))
    }

    /// 复制 `content` 构造新流；全部内容可读。
    pub fn copied_from(content: &[u8], order: ByteOrder) -> Self {
        Self::wrap(content.to_vec(), order)
    }

    /// 固定窗口的空视图，指向进程级共享的空存储。
    pub(crate) fn shared_empty(storage: SharedStorage, order: ByteOrder) -> Self {
        Self {
            storage,
            window: Window::Fixed {
                offset: 0,
                length: 0,
            },
            order,
            max_capacity: 0,
            cursors: Cursors::new(0, 0),
        }
    }

    fn root(content: Vec<u8>, order: ByteOrder, max_capacity: usize, cursors: Cursors) -> Self {
        Self {
            storage: Arc::new(RwLock::new(content)),
            window: Window::Whole,
            order,
            max_capacity,
            cursors,
        }
    }

    /// 两个视图是否共享同一块存储。
    pub fn shares_storage_with(&self, other: &HeapByteStream) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// 是否为固定窗口的切片视图。
    pub fn is_slice(&self) -> bool {
        matches!(self.window, Window::Fixed { .. })
    }

    fn base(&self) -> usize {
        match self.window {
            Window::Whole => 0,
            Window::Fixed { offset, .. } => offset,
        }
    }

    /// 视图在当前存储长度下实际可访问的字节数。
    fn accessible(&self, content: &[u8]) -> usize {
        match self.window {
            Window::Whole => content.len(),
            Window::Fixed { offset, length } => length.min(content.len().saturating_sub(offset)),
        }
    }

    /// 把视图内的 `[index, index + length)` 换算为存储下标。
    ///
    /// 根视图缩容后切片的起点可能已落在存储之外，零长度访问也要以越界错误返回。
    fn span(
        &self,
        operation: &'static str,
        content: &[u8],
        index: usize,
        length: usize,
    ) -> Result<Range<usize>> {
        let accessible = self.accessible(content);
        check_range(operation, index, length, accessible)?;
        let start = self.base() + index;
        let end = start + length;
        if end > content.len() {
            return Err(BufferError::out_of_range(operation, index, length, accessible));
        }
        Ok(start..end)
    }
}

impl fmt::Debug for HeapByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapByteStream")
            .field("window", &self.window)
            .field("order", &self.order)
            .field("capacity", &self.capacity())
            .field("reader_index", &self.cursors.reader())
            .field("writer_index", &self.cursors.writer())
            .finish()
    }
}

/// `Bytes` 为唯一持有者时直接接管其存储，否则复制一次。
impl From<Bytes> for HeapByteStream {
    fn from(bytes: Bytes) -> Self {
        Self::wrap(Vec::from(bytes), ByteOrder::NETWORK)
    }
}

impl From<Vec<u8>> for HeapByteStream {
    fn from(content: Vec<u8>) -> Self {
        Self::wrap(content, ByteOrder::NETWORK)
    }
}

impl Sealed for HeapByteStream {
    fn cursors(&self) -> &Cursors {
        &self.cursors
    }

    fn cursors_mut(&mut self) -> &mut Cursors {
        &mut self.cursors
    }

    fn shares_empty_storage(&self) -> bool {
        Arc::ptr_eq(&self.storage, &*EMPTY_STORAGE)
    }

    fn flatten_into(
        &self,
        index: usize,
        length: usize,
        out: &mut Vec<Box<dyn ByteStream>>,
    ) -> Result<()> {
        if length > 0 {
            out.push(self.slice(index, length)?);
        }
        Ok(())
    }
}

impl ByteStream for HeapByteStream {
    fn order(&self) -> ByteOrder {
        self.order
    }

    fn capacity(&self) -> usize {
        match self.window {
            Window::Whole => self.storage.read().len(),
            Window::Fixed { length, .. } => length,
        }
    }

    fn max_capacity(&self) -> usize {
        match self.window {
            Window::Whole => self.max_capacity,
            Window::Fixed { length, .. } => length,
        }
    }

    fn set_capacity(&mut self, new_capacity: usize) -> Result<()> {
        if self.is_slice() {
            return Err(BufferError::unsupported(
                "set_capacity",
                "slices have a fixed window",
            ));
        }
        if new_capacity > self.max_capacity {
            return Err(BufferError::out_of_range(
                "set_capacity",
                0,
                new_capacity,
                self.max_capacity,
            ));
        }
        self.storage.write().resize(new_capacity, 0);
        self.cursors.clamp(new_capacity);
        Ok(())
    }

    fn get_u8(&self, index: usize) -> Result<u8> {
        let content = self.storage.read();
        let range = self.span("get_u8", &content, index, 1)?;
        Ok(content[range.start])
    }

    fn set_u8(&mut self, index: usize, value: u8) -> Result<()> {
        let mut content = self.storage.write();
        let range = self.span("set_u8", &content, index, 1)?;
        content[range.start] = value;
        Ok(())
    }

    fn get_bytes(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        let content = self.storage.read();
        let range = self.span("get_bytes", &content, index, dst.len())?;
        dst.copy_from_slice(&content[range]);
        Ok(())
    }

    fn set_bytes(&mut self, index: usize, src: &[u8]) -> Result<()> {
        let mut content = self.storage.write();
        let range = self.span("set_bytes", &content, index, src.len())?;
        content[range].copy_from_slice(src);
        Ok(())
    }

    fn slice(&self, index: usize, length: usize) -> Result<Box<dyn ByteStream>> {
        check_range("slice", index, length, self.capacity())?;
        if length == 0 {
            return Ok(empty(self.order));
        }
        Ok(Box::new(Self {
            storage: Arc::clone(&self.storage),
            window: Window::Fixed {
                offset: self.base() + index,
                length,
            },
            order: self.order,
            max_capacity: length,
            cursors: Cursors::fully_readable(length),
        }))
    }

    fn duplicate(&self) -> Box<dyn ByteStream> {
        Box::new(self.clone())
    }

    fn with_order(&self, order: ByteOrder) -> Box<dyn ByteStream> {
        let mut view = self.clone();
        view.order = order;
        Box::new(view)
    }

    fn with_array(&self, visit: &mut dyn FnMut(&[u8])) -> Result<()> {
        let content = self.storage.read();
        let range = self.span("with_array", &content, 0, self.accessible(&content))?;
        visit(&content[range]);
        Ok(())
    }

    /// 在一次写锁内原地搬移可读区。
    fn discard_read_bytes(&mut self) -> Result<()> {
        let reader = self.cursors.reader();
        if reader == 0 {
            return Ok(());
        }
        let writer = self.cursors.writer();
        let base = self.base();
        {
            let mut content = self.storage.write();
            self.span("discard_read_bytes", &content, 0, writer)?;
            content.copy_within(base + reader..base + writer, base);
        }
        self.cursors.discard(reader);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_tracks_root_resize() {
        let mut root = HeapByteStream::allocate(4, ByteOrder::BigEndian);
        let duplicate = root.duplicate();
        root.set_capacity(16).expect("根视图可以扩容");
        assert_eq!(duplicate.capacity(), 16);
    }

    #[test]
    fn slice_outliving_shrink_reports_out_of_range() {
        let mut root = HeapByteStream::wrap(vec![1, 2, 3, 4, 5, 6, 7, 8], ByteOrder::BigEndian);
        let slice = root.slice(4, 4).expect("切片");
        root.set_capacity(2).expect("缩容");
        let err = slice.get_u8(0).expect_err("切片区间已不存在");
        assert_eq!(err.code(), crate::codes::OUT_OF_RANGE);
        assert_eq!(root.writer_index(), 2, "缩容后写游标被截断");
    }

    #[test]
    fn empty_access_past_shrunk_storage_is_out_of_range() {
        let mut root = HeapByteStream::wrap(vec![1, 2, 3, 4, 5, 6, 7, 8], ByteOrder::BigEndian);
        let mut slice = root.slice(4, 4).expect("切片");
        root.set_capacity(2).expect("缩容");

        let err = slice.get_bytes(0, &mut []).expect_err("起点已在存储之外");
        assert_eq!(err.code(), crate::codes::OUT_OF_RANGE);
        let err = slice.set_bytes(0, &[]).expect_err("起点已在存储之外");
        assert_eq!(err.code(), crate::codes::OUT_OF_RANGE);
        let mut visited = false;
        let err = slice
            .with_array(&mut |_| visited = true)
            .expect_err("起点已在存储之外");
        assert_eq!(err.code(), crate::codes::OUT_OF_RANGE);
        assert!(!visited);
    }

    #[test]
    fn empty_access_at_storage_end_succeeds() {
        let mut root = HeapByteStream::wrap(vec![1, 2, 3, 4], ByteOrder::BigEndian);
        let slice = root.slice(2, 2).expect("切片");
        root.set_capacity(2).expect("缩容");
        slice.get_bytes(0, &mut []).expect("零长度访问恰在存储末尾");
        let mut seen = None;
        slice
            .with_array(&mut |content| seen = Some(content.len()))
            .expect("访问");
        assert_eq!(seen, Some(0));
    }

    #[test]
    fn from_bytes_keeps_content() {
        let stream = HeapByteStream::from(Bytes::from_static(b"spark"));
        assert_eq!(stream.readable_to_vec().expect("读取"), b"spark");
        assert_eq!(stream.order(), ByteOrder::NETWORK);
    }

    #[test]
    fn discard_moves_pending_bytes_in_place() {
        let mut stream = HeapByteStream::copied_from(b"abcdef", ByteOrder::BigEndian);
        stream.skip_bytes(4).expect("跳过");
        stream.discard_read_bytes().expect("丢弃");
        assert_eq!(stream.reader_index(), 0);
        assert_eq!(stream.writer_index(), 2);
        assert_eq!(stream.to_vec(0, 2).expect("读取"), b"ef");
        assert_eq!(stream.capacity(), 6);
    }
}
