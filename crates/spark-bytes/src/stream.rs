use core::fmt;

use bytes::Bytes;

use crate::{
    BufferError, ByteOrder, HeapByteStream, Result, empty, error::check_range, sealed::Sealed,
};

/// 自动扩容时的最小容量。
const MIN_GROWTH_CAPACITY: usize = 64;

/// 读写游标与两个标记位。
///
/// # 教案式说明
/// - **契约（What）**：始终满足 `0 <= reader <= writer <= capacity`；标记位只在 `reset_*` 时参与校验。
/// - **风险（Trade-offs）**：共享存储的多个视图各自持有游标；其中一个视图缩容后，
///   另一个视图的游标可能暂时超过新容量，此时访问会以越界错误返回而不是 panic。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursors {
    reader: usize,
    writer: usize,
    marked_reader: usize,
    marked_writer: usize,
}

impl Cursors {
    pub(crate) const fn new(reader: usize, writer: usize) -> Self {
        Self {
            reader,
            writer,
            marked_reader: 0,
            marked_writer: 0,
        }
    }

    /// `[0, length)` 全部可读的游标。
    pub(crate) const fn fully_readable(length: usize) -> Self {
        Self::new(0, length)
    }

    pub fn reader(&self) -> usize {
        self.reader
    }

    pub fn writer(&self) -> usize {
        self.writer
    }

    pub fn marked_reader(&self) -> usize {
        self.marked_reader
    }

    pub fn marked_writer(&self) -> usize {
        self.marked_writer
    }

    pub(crate) fn set(&mut self, reader: usize, writer: usize) {
        self.reader = reader;
        self.writer = writer;
    }

    pub(crate) fn advance_reader(&mut self, amount: usize) {
        self.reader += amount;
    }

    pub(crate) fn advance_writer(&mut self, amount: usize) {
        self.writer += amount;
    }

    pub(crate) fn mark_reader(&mut self) {
        self.marked_reader = self.reader;
    }

    pub(crate) fn mark_writer(&mut self) {
        self.marked_writer = self.writer;
    }

    /// 缩容后把游标与标记收敛到新容量以内。
    pub(crate) fn clamp(&mut self, capacity: usize) {
        self.writer = self.writer.min(capacity);
        self.reader = self.reader.min(self.writer);
        self.marked_reader = self.marked_reader.min(capacity);
        self.marked_writer = self.marked_writer.min(capacity);
    }

    /// 丢弃前 `amount` 个已读字节后重新计算游标，标记位在 0 处截断。
    pub(crate) fn discard(&mut self, amount: usize) {
        self.reader -= amount;
        self.writer -= amount;
        self.marked_reader = self.marked_reader.saturating_sub(amount);
        self.marked_writer = self.marked_writer.saturating_sub(amount);
    }
}

/// `ByteStream` 是带读写游标、支持随机访问与派生视图的字节缓冲契约。
///
/// # 教案式说明
/// - **意图（Why）**：入站解码器逐步消费字节、出站编码器逐步追加字节，双方都需要独立的
///   读游标与写游标；零拷贝的切片与组合又要求多个视图共享同一段内容。
/// - **逻辑（How）**：
///   - 实现者只提供容量管理、单字节与批量的绝对访问、以及派生视图；
///   - 游标读写、多字节数值、流间搬运、查找与丢弃均由默认方法基于上述原语完成；
///   - 多字节数值通过 [`ByteOrder`] 显式装配，组合流会覆盖宽整数访问以拆分跨分量的读写。
/// - **契约（What）**：
///   - 区间 `[reader, writer)` 可读，`[writer, capacity)` 可写，`[0, reader)` 可丢弃；
///   - 任何越界都返回 [`BufferError::OutOfRange`]，失败调用不修改内容与游标；
///   - 绝对访问（`get_*`/`set_*`）从不移动游标，游标访问（`read_*`/`write_*`）成功后移动对应游标。
/// - **风险（Trade-offs）**：trait 通过私有 `Sealed` 封闭，仅 [`HeapByteStream`] 与
///   [`CompositeByteStream`](crate::CompositeByteStream) 实现，以保证游标不变式只经由本 crate 维护。
pub trait ByteStream: Sealed + Send + Sync + fmt::Debug {
    /// 多字节数值的字节序。
    fn order(&self) -> ByteOrder;

    /// 当前容量。
    fn capacity(&self) -> usize;

    /// 自动扩容允许达到的最大容量。
    fn max_capacity(&self) -> usize;

    /// 调整容量；缩容时游标被截断到新容量以内。
    fn set_capacity(&mut self, new_capacity: usize) -> Result<()>;

    fn get_u8(&self, index: usize) -> Result<u8>;

    fn set_u8(&mut self, index: usize, value: u8) -> Result<()>;

    /// 将 `[index, index + dst.len())` 复制到 `dst`，不移动游标。
    fn get_bytes(&self, index: usize, dst: &mut [u8]) -> Result<()>;

    /// 将 `src` 写入 `[index, index + src.len())`，不移动游标。
    fn set_bytes(&mut self, index: usize, src: &[u8]) -> Result<()>;

    /// 共享内容的子视图，游标为 `[0, length]`，与原视图的游标互不影响。
    fn slice(&self, index: usize, length: usize) -> Result<Box<dyn ByteStream>>;

    /// 覆盖 `[0, capacity)` 的共享视图，游标与标记从当前视图复制。
    fn duplicate(&self) -> Box<dyn ByteStream>;

    /// 以另一种字节序解释同一段内容的共享视图。
    fn with_order(&self, order: ByteOrder) -> Box<dyn ByteStream>;

    /// 以单一连续切片的形式访问全部内容；没有单一底层数组的实现返回 `Unsupported`。
    fn with_array(&self, visit: &mut dyn FnMut(&[u8])) -> Result<()>;

    fn reader_index(&self) -> usize {
        self.cursors().reader()
    }

    fn writer_index(&self) -> usize {
        self.cursors().writer()
    }

    fn set_reader_index(&mut self, reader_index: usize) -> Result<()> {
        let writer = self.writer_index();
        if reader_index > writer {
            return Err(BufferError::out_of_range(
                "set_reader_index",
                reader_index,
                0,
                writer,
            ));
        }
        self.cursors_mut().set(reader_index, writer);
        Ok(())
    }

    fn set_writer_index(&mut self, writer_index: usize) -> Result<()> {
        let reader = self.reader_index();
        if writer_index < reader || writer_index > self.capacity() {
            return Err(BufferError::out_of_range(
                "set_writer_index",
                writer_index,
                0,
                self.capacity(),
            ));
        }
        self.cursors_mut().set(reader, writer_index);
        Ok(())
    }

    /// 同时设置两个游标，避免逐个设置时的中间态校验失败。
    fn set_index(&mut self, reader_index: usize, writer_index: usize) -> Result<()> {
        if reader_index > writer_index || writer_index > self.capacity() {
            return Err(BufferError::out_of_range(
                "set_index",
                reader_index,
                writer_index.saturating_sub(reader_index),
                self.capacity(),
            ));
        }
        self.cursors_mut().set(reader_index, writer_index);
        Ok(())
    }

    fn readable_bytes(&self) -> usize {
        self.writer_index() - self.reader_index()
    }

    fn writable_bytes(&self) -> usize {
        self.capacity().saturating_sub(self.writer_index())
    }

    fn is_readable(&self) -> bool {
        self.readable_bytes() > 0
    }

    fn is_writable(&self) -> bool {
        self.writable_bytes() > 0
    }

    /// 两个游标归零，内容不变。
    fn clear(&mut self) {
        self.cursors_mut().set(0, 0);
    }

    fn mark_reader_index(&mut self) {
        self.cursors_mut().mark_reader();
    }

    fn reset_reader_index(&mut self) -> Result<()> {
        let marked = self.cursors().marked_reader();
        self.set_reader_index(marked)
    }

    fn mark_writer_index(&mut self) {
        self.cursors_mut().mark_writer();
    }

    fn reset_writer_index(&mut self) -> Result<()> {
        let marked = self.cursors().marked_writer();
        self.set_writer_index(marked)
    }

    fn skip_bytes(&mut self, length: usize) -> Result<()> {
        ensure_readable(self, "skip_bytes", length)?;
        self.cursors_mut().advance_reader(length);
        Ok(())
    }

    /// 保证至少 `min_writable` 字节可写，必要时在 `max_capacity` 之内扩容。
    ///
    /// 容量从当前值（至少 64）起倍增直至满足需求，再截断到 `max_capacity`。
    fn ensure_writable(&mut self, min_writable: usize) -> Result<()> {
        if min_writable <= self.writable_bytes() {
            return Ok(());
        }
        let writer = self.writer_index();
        let max_capacity = self.max_capacity();
        let required = writer
            .checked_add(min_writable)
            .filter(|required| *required <= max_capacity)
            .ok_or(BufferError::out_of_range(
                "ensure_writable",
                writer,
                min_writable,
                max_capacity,
            ))?;
        let mut grown = self.capacity().max(MIN_GROWTH_CAPACITY);
        while grown < required {
            grown = grown.saturating_mul(2);
        }
        self.set_capacity(grown.min(max_capacity))
    }

    fn get_i8(&self, index: usize) -> Result<i8> {
        self.get_u8(index).map(|value| value as i8)
    }

    fn get_u16(&self, index: usize) -> Result<u16> {
        get_uint(self, "get_u16", index, 2).map(|value| value as u16)
    }

    fn get_i16(&self, index: usize) -> Result<i16> {
        self.get_u16(index).map(|value| value as i16)
    }

    fn get_u32(&self, index: usize) -> Result<u32> {
        get_uint(self, "get_u32", index, 4).map(|value| value as u32)
    }

    fn get_i32(&self, index: usize) -> Result<i32> {
        self.get_u32(index).map(|value| value as i32)
    }

    fn get_u64(&self, index: usize) -> Result<u64> {
        get_uint(self, "get_u64", index, 8)
    }

    fn get_i64(&self, index: usize) -> Result<i64> {
        self.get_u64(index).map(|value| value as i64)
    }

    fn get_f32(&self, index: usize) -> Result<f32> {
        self.get_u32(index).map(f32::from_bits)
    }

    fn get_f64(&self, index: usize) -> Result<f64> {
        self.get_u64(index).map(f64::from_bits)
    }

    fn set_i8(&mut self, index: usize, value: i8) -> Result<()> {
        self.set_u8(index, value as u8)
    }

    fn set_u16(&mut self, index: usize, value: u16) -> Result<()> {
        set_uint(self, index, u64::from(value), 2)
    }

    fn set_i16(&mut self, index: usize, value: i16) -> Result<()> {
        self.set_u16(index, value as u16)
    }

    fn set_u32(&mut self, index: usize, value: u32) -> Result<()> {
        set_uint(self, index, u64::from(value), 4)
    }

    fn set_i32(&mut self, index: usize, value: i32) -> Result<()> {
        self.set_u32(index, value as u32)
    }

    fn set_u64(&mut self, index: usize, value: u64) -> Result<()> {
        set_uint(self, index, value, 8)
    }

    fn set_i64(&mut self, index: usize, value: i64) -> Result<()> {
        self.set_u64(index, value as u64)
    }

    fn set_f32(&mut self, index: usize, value: f32) -> Result<()> {
        self.set_u32(index, value.to_bits())
    }

    fn set_f64(&mut self, index: usize, value: f64) -> Result<()> {
        self.set_u64(index, value.to_bits())
    }

    fn read_u8(&mut self) -> Result<u8> {
        let index = ensure_readable(self, "read_u8", 1)?;
        let value = self.get_u8(index)?;
        self.cursors_mut().advance_reader(1);
        Ok(value)
    }

    fn read_i8(&mut self) -> Result<i8> {
        self.read_u8().map(|value| value as i8)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let index = ensure_readable(self, "read_u16", 2)?;
        let value = self.get_u16(index)?;
        self.cursors_mut().advance_reader(2);
        Ok(value)
    }

    fn read_i16(&mut self) -> Result<i16> {
        self.read_u16().map(|value| value as i16)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let index = ensure_readable(self, "read_u32", 4)?;
        let value = self.get_u32(index)?;
        self.cursors_mut().advance_reader(4);
        Ok(value)
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.read_u32().map(|value| value as i32)
    }

    fn read_u64(&mut self) -> Result<u64> {
        let index = ensure_readable(self, "read_u64", 8)?;
        let value = self.get_u64(index)?;
        self.cursors_mut().advance_reader(8);
        Ok(value)
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.read_u64().map(|value| value as i64)
    }

    fn read_f32(&mut self) -> Result<f32> {
        self.read_u32().map(f32::from_bits)
    }

    fn read_f64(&mut self) -> Result<f64> {
        self.read_u64().map(f64::from_bits)
    }

    fn write_u8(&mut self, value: u8) -> Result<()> {
        let index = prepare_write(self, 1)?;
        self.set_u8(index, value)?;
        self.cursors_mut().advance_writer(1);
        Ok(())
    }

    fn write_i8(&mut self, value: i8) -> Result<()> {
        self.write_u8(value as u8)
    }

    fn write_u16(&mut self, value: u16) -> Result<()> {
        let index = prepare_write(self, 2)?;
        self.set_u16(index, value)?;
        self.cursors_mut().advance_writer(2);
        Ok(())
    }

    fn write_i16(&mut self, value: i16) -> Result<()> {
        self.write_u16(value as u16)
    }

    fn write_u32(&mut self, value: u32) -> Result<()> {
        let index = prepare_write(self, 4)?;
        self.set_u32(index, value)?;
        self.cursors_mut().advance_writer(4);
        Ok(())
    }

    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_u32(value as u32)
    }

    fn write_u64(&mut self, value: u64) -> Result<()> {
        let index = prepare_write(self, 8)?;
        self.set_u64(index, value)?;
        self.cursors_mut().advance_writer(8);
        Ok(())
    }

    fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_u64(value as u64)
    }

    fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_u32(value.to_bits())
    }

    fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_u64(value.to_bits())
    }

    /// 读满 `dst` 并推进读游标。
    fn read_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
        let index = ensure_readable(self, "read_bytes", dst.len())?;
        self.get_bytes(index, dst)?;
        self.cursors_mut().advance_reader(dst.len());
        Ok(())
    }

    /// 追加 `src` 并推进写游标。
    fn write_bytes(&mut self, src: &[u8]) -> Result<()> {
        let index = prepare_write(self, src.len())?;
        self.set_bytes(index, src)?;
        self.cursors_mut().advance_writer(src.len());
        Ok(())
    }

    /// 复制接下来的 `length` 个可读字节为独立的新流，并推进读游标。
    fn read_stream(&mut self, length: usize) -> Result<Box<dyn ByteStream>> {
        let index = ensure_readable(self, "read_stream", length)?;
        let copied = self.copy(index, length)?;
        self.cursors_mut().advance_reader(length);
        Ok(copied)
    }

    /// 以零拷贝切片取出接下来的 `length` 个可读字节，并推进读游标。
    fn read_slice(&mut self, length: usize) -> Result<Box<dyn ByteStream>> {
        let index = ensure_readable(self, "read_slice", length)?;
        let slice = self.slice(index, length)?;
        self.cursors_mut().advance_reader(length);
        Ok(slice)
    }

    /// 把 `length` 个可读字节追加到 `dst`：推进本流读游标与 `dst` 写游标。
    fn read_into(&mut self, dst: &mut dyn ByteStream, length: usize) -> Result<()> {
        let index = ensure_readable(self, "read_into", length)?;
        let chunk = self.to_vec(index, length)?;
        dst.write_bytes(&chunk)?;
        self.cursors_mut().advance_reader(length);
        Ok(())
    }

    /// 从 `src` 的可读区搬运 `length` 字节追加到本流：推进 `src` 读游标与本流写游标。
    fn write_from(&mut self, src: &mut dyn ByteStream, length: usize) -> Result<()> {
        let index = ensure_readable(src, "write_from", length)?;
        let chunk = src.to_vec(index, length)?;
        self.write_bytes(&chunk)?;
        src.skip_bytes(length)
    }

    /// 按绝对位置从 `src` 复制并追加到本流；`src` 的游标不动。
    fn write_from_index(
        &mut self,
        src: &dyn ByteStream,
        src_index: usize,
        length: usize,
    ) -> Result<()> {
        let chunk = src.to_vec(src_index, length)?;
        self.write_bytes(&chunk)
    }

    /// 绝对位置之间的复制，两侧游标都不动。
    fn get_into(
        &self,
        index: usize,
        dst: &mut dyn ByteStream,
        dst_index: usize,
        length: usize,
    ) -> Result<()> {
        let chunk = self.to_vec(index, length)?;
        dst.set_bytes(dst_index, &chunk)
    }

    /// 绝对位置之间的复制，两侧游标都不动。
    fn set_from(
        &mut self,
        index: usize,
        src: &dyn ByteStream,
        src_index: usize,
        length: usize,
    ) -> Result<()> {
        let chunk = src.to_vec(src_index, length)?;
        self.set_bytes(index, &chunk)
    }

    /// 独立拥有内容的副本，游标为 `[0, length]`。
    fn copy(&self, index: usize, length: usize) -> Result<Box<dyn ByteStream>> {
        check_range("copy", index, length, self.capacity())?;
        if length == 0 {
            return Ok(empty(self.order()));
        }
        let content = self.to_vec(index, length)?;
        Ok(Box::new(HeapByteStream::wrap(content, self.order())))
    }

    /// 可读区的切片。
    fn readable_slice(&self) -> Result<Box<dyn ByteStream>> {
        self.slice(self.reader_index(), self.readable_bytes())
    }

    /// 将可读区移动到起点，写游标随之前移，容量不变。
    fn discard_read_bytes(&mut self) -> Result<()> {
        let reader = self.reader_index();
        if reader == 0 {
            return Ok(());
        }
        let writer = self.writer_index();
        if reader != writer {
            let pending = self.to_vec(reader, writer - reader)?;
            self.set_bytes(0, &pending)?;
        }
        self.cursors_mut().discard(reader);
        Ok(())
    }

    /// 在 `[from, to)`（正向）或 `[to, from)`（`from > to` 时自高向低）中查找首个满足谓词的位置。
    fn index_of(
        &self,
        from: usize,
        to: usize,
        predicate: &mut dyn FnMut(u8) -> bool,
    ) -> Result<Option<usize>> {
        let (low, high) = search_window(self, "index_of", from, to)?;
        let window = self.to_vec(low, high - low)?;
        let found = if from <= to {
            window.iter().position(|&byte| predicate(byte))
        } else {
            window.iter().rposition(|&byte| predicate(byte))
        };
        Ok(found.map(|offset| low + offset))
    }

    /// 多字节模式的查找，方向规则同 [`index_of`](Self::index_of)；匹配必须完整落在扫描区间内。
    fn index_of_slice(&self, from: usize, to: usize, needle: &[u8]) -> Result<Option<usize>> {
        if needle.is_empty() {
            return Err(BufferError::invalid_argument(
                "index_of_slice",
                "needle must not be empty",
            ));
        }
        let (low, high) = search_window(self, "index_of_slice", from, to)?;
        let window = self.to_vec(low, high - low)?;
        let mut candidates = window.windows(needle.len());
        let found = if from <= to {
            candidates.position(|candidate| candidate == needle)
        } else {
            candidates.rposition(|candidate| candidate == needle)
        };
        Ok(found.map(|offset| low + offset))
    }

    /// 可读区内首个满足谓词的字节距读游标的偏移。
    fn bytes_before(&self, predicate: &mut dyn FnMut(u8) -> bool) -> Option<usize> {
        let reader = self.reader_index();
        self.index_of(reader, self.writer_index(), predicate)
            .ok()
            .flatten()
            .map(|index| index - reader)
    }

    fn to_vec(&self, index: usize, length: usize) -> Result<Vec<u8>> {
        check_range("to_vec", index, length, self.capacity())?;
        let mut out = vec![0_u8; length];
        self.get_bytes(index, &mut out)?;
        Ok(out)
    }

    /// 可读区的快照，游标不动。
    fn readable_to_vec(&self) -> Result<Vec<u8>> {
        self.to_vec(self.reader_index(), self.readable_bytes())
    }

    /// 可读区的 [`Bytes`] 快照，用于交给传输层。
    fn readable_to_bytes(&self) -> Result<Bytes> {
        self.readable_to_vec().map(Bytes::from)
    }
}

/// 判断 `stream` 是否为进程级共享的空流。
pub fn is_empty_singleton(stream: &dyn ByteStream) -> bool {
    stream.shares_empty_storage()
}

fn ensure_readable<S: ByteStream + ?Sized>(
    stream: &S,
    operation: &'static str,
    length: usize,
) -> Result<usize> {
    let reader = stream.reader_index();
    if length > stream.readable_bytes() {
        return Err(BufferError::out_of_range(
            operation,
            reader,
            length,
            stream.writer_index(),
        ));
    }
    Ok(reader)
}

fn prepare_write<S: ByteStream + ?Sized>(stream: &mut S, length: usize) -> Result<usize> {
    stream.ensure_writable(length)?;
    Ok(stream.writer_index())
}

fn get_uint<S: ByteStream + ?Sized>(
    stream: &S,
    operation: &'static str,
    index: usize,
    width: usize,
) -> Result<u64> {
    check_range(operation, index, width, stream.capacity())?;
    let mut scratch = [0_u8; 8];
    let bytes = &mut scratch[..width];
    stream.get_bytes(index, bytes)?;
    Ok(stream.order().assemble(bytes))
}

fn set_uint<S: ByteStream + ?Sized>(
    stream: &mut S,
    index: usize,
    value: u64,
    width: usize,
) -> Result<()> {
    let mut scratch = [0_u8; 8];
    let bytes = &mut scratch[..width];
    stream.order().disassemble(value, bytes);
    stream.set_bytes(index, bytes)
}

fn search_window<S: ByteStream + ?Sized>(
    stream: &S,
    operation: &'static str,
    from: usize,
    to: usize,
) -> Result<(usize, usize)> {
    let capacity = stream.capacity();
    let (low, high) = if from <= to { (from, to) } else { (to, from) };
    check_range(operation, low, high - low, capacity)?;
    Ok((low, high))
}
