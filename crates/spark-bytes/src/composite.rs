use core::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use tracing::debug;

use crate::{
    BufferError, ByteOrder, ByteStream, CompositeSettings, Cursors, HeapByteStream, Result, empty,
    error::check_range, sealed::Sealed,
};

/// `discard_read_bytes` 之后默认允许保留的最多分量数。
pub const DEFAULT_MAX_COMPONENTS: usize = 16;

/// 由若干分量首尾相接构成的逻辑字节流，构造时不复制数据。
///
/// # 教案式说明
/// - **意图（Why）**：协议层经常需要把头部与负载、或多次到达的片段拼成一条逻辑消息，
///   组合流让这些片段无需复制即可按统一的下标访问。
/// - **逻辑（How）**：
///   - `offsets` 为分量容量的前缀和，`offsets[0] == 0`，长度比分量数多 1；
///   - 下标定位从最近一次命中的分量出发向两侧线性扫描，顺序访问近似 O(1)；
///   - 宽整数若整体落在一个分量内则直接委托，否则拆成两次半宽访问再按字节序合并；
///   - `discard_read_bytes` 通过分解保留区间并追加零填充占位分量重建分量表，容量保持不变。
/// - **契约（What）**：
///   - 每个分量在加入时必须“完全可读”（读游标 0、写游标等于容量），且字节序与组合流一致；
///   - 组合流本身不可扩缩容，也没有单一底层数组；
///   - 分量由组合流独占持有，内容通过底层存储与其他视图共享。
/// - **风险（Trade-offs）**：反复 `discard_read_bytes` 会让分量数增长，超过 `max_components`
///   时合并为一个堆分量，付出一次有界的复制。
pub struct CompositeByteStream {
    order: ByteOrder,
    components: Vec<Box<dyn ByteStream>>,
    offsets: Vec<usize>,
    last_accessed: AtomicUsize,
    max_components: usize,
    cursors: Cursors,
}

impl CompositeByteStream {
    /// 以给定字节序与分量构造组合流，游标为 `[0, capacity]`。
    pub fn new(order: ByteOrder, components: Vec<Box<dyn ByteStream>>) -> Result<Self> {
        let mut stream = Self {
            order,
            components: Vec::new(),
            offsets: vec![0],
            last_accessed: AtomicUsize::new(0),
            max_components: DEFAULT_MAX_COMPONENTS,
            cursors: Cursors::new(0, 0),
        };
        stream.set_components(components)?;
        Ok(stream)
    }

    /// 字节序取自第一个分量；分量为空时使用网络字节序。
    pub fn from_components(components: Vec<Box<dyn ByteStream>>) -> Result<Self> {
        let order = components
            .first()
            .map(|component| component.order())
            .unwrap_or(ByteOrder::NETWORK);
        Self::new(order, components)
    }

    /// 取每个输入流的可读区组成组合流。
    ///
    /// 输入流不必完全可读，游标不受影响；空的可读区被跳过，组合流输入会被展开为其分量。
    pub fn compose(order: ByteOrder, streams: &[&dyn ByteStream]) -> Result<Self> {
        let mut parts = Vec::with_capacity(streams.len());
        for stream in streams {
            stream.flatten_into(stream.reader_index(), stream.readable_bytes(), &mut parts)?;
        }
        Self::new(order, parts)
    }

    /// 应用配置项。
    pub fn with_settings(mut self, settings: &CompositeSettings) -> Self {
        self.max_components = settings.max_components.max(1);
        self
    }

    pub fn max_components(&self) -> usize {
        self.max_components
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[Box<dyn ByteStream>] {
        &self.components
    }

    pub fn component_at(&self, position: usize) -> Option<&dyn ByteStream> {
        self.components.get(position).map(|component| &**component)
    }

    /// 每个分量起始位置的前缀和，末尾元素为容量。
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// 整体替换分量表。
    ///
    /// 校验失败时组合流保持原状；成功后游标重置为 `[0, capacity]`，标记归零。
    pub fn set_components(&mut self, components: Vec<Box<dyn ByteStream>>) -> Result<()> {
        let mut offsets = Vec::with_capacity(components.len() + 1);
        offsets.push(0_usize);
        let mut total = 0_usize;
        for (position, component) in components.iter().enumerate() {
            self.validate_component(position, component.as_ref())?;
            total = total.checked_add(component.capacity()).ok_or_else(|| {
                BufferError::invalid_argument("set_components", "total capacity overflows usize")
            })?;
            offsets.push(total);
        }
        self.components = components;
        self.offsets = offsets;
        self.last_accessed.store(0, Ordering::Relaxed);
        self.cursors = Cursors::fully_readable(total);
        Ok(())
    }

    /// 在末尾追加一个分量；`advance_writer` 为真时写游标随之后移。
    pub fn add_component(
        &mut self,
        component: Box<dyn ByteStream>,
        advance_writer: bool,
    ) -> Result<()> {
        self.validate_component(self.components.len(), component.as_ref())?;
        let length = component.capacity();
        let total = self.capacity().checked_add(length).ok_or_else(|| {
            BufferError::invalid_argument("add_component", "total capacity overflows usize")
        })?;
        self.components.push(component);
        self.offsets.push(total);
        if advance_writer {
            self.cursors.advance_writer(length);
        }
        Ok(())
    }

    /// 返回逻辑下标 `index` 所在分量的序号。
    ///
    /// 从上次命中的分量出发：目标在其右侧时向右扫描，否则向左扫描；命中后更新缓存。
    pub fn component_index(&self, index: usize) -> Result<usize> {
        let capacity = self.capacity();
        if index >= capacity {
            return Err(BufferError::out_of_range(
                "component_index",
                index,
                1,
                capacity,
            ));
        }
        let last = self
            .last_accessed
            .load(Ordering::Relaxed)
            .min(self.components.len() - 1);
        let found = if index >= self.offsets[last] {
            (last..self.components.len()).find(|&position| index < self.offsets[position + 1])
        } else {
            (0..last).rev().find(|&position| index >= self.offsets[position])
        };
        let position = found.ok_or(BufferError::out_of_range(
            "component_index",
            index,
            1,
            capacity,
        ))?;
        self.last_accessed.store(position, Ordering::Relaxed);
        Ok(position)
    }

    /// 把 `[index, index + length)` 分解为按顺序排列的分量切片，长度为 0 时返回空表。
    pub fn decompose(&self, index: usize, length: usize) -> Result<Vec<Box<dyn ByteStream>>> {
        let mut parts = Vec::new();
        self.decompose_into(index, length, &mut parts)?;
        Ok(parts)
    }

    /// 将全部分量复制合并为一个堆分量，游标与标记保持不变。
    pub fn consolidate(&mut self) -> Result<()> {
        if self.components.len() <= 1 {
            return Ok(());
        }
        let capacity = self.capacity();
        let content = self.to_vec(0, capacity)?;
        let merged: Box<dyn ByteStream> = Box::new(HeapByteStream::wrap(content, self.order));
        debug!(
            buffer.components = self.components.len(),
            buffer.capacity = capacity,
            "consolidating composite stream"
        );
        self.components = vec![merged];
        self.offsets = vec![0, capacity];
        self.last_accessed.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn validate_component(&self, position: usize, component: &dyn ByteStream) -> Result<()> {
        if component.order() != self.order {
            return Err(BufferError::invalid_argument(
                "set_components",
                format!(
                    "component {position} uses {:?} but the composite uses {:?}",
                    component.order(),
                    self.order
                ),
            ));
        }
        if component.reader_index() != 0 || component.writer_index() != component.capacity() {
            return Err(BufferError::invalid_argument(
                "set_components",
                format!(
                    "component {position} is not fully readable (reader {}, writer {}, capacity {})",
                    component.reader_index(),
                    component.writer_index(),
                    component.capacity()
                ),
            ));
        }
        Ok(())
    }

    fn decompose_into(
        &self,
        index: usize,
        length: usize,
        out: &mut Vec<Box<dyn ByteStream>>,
    ) -> Result<()> {
        check_range("decompose", index, length, self.capacity())?;
        if length == 0 {
            return Ok(());
        }
        let mut position = self.component_index(index)?;
        let mut cursor = index;
        let mut remaining = length;
        while remaining > 0 {
            let start = self.offsets[position];
            let take = (self.offsets[position + 1] - cursor).min(remaining);
            if take > 0 {
                out.push(self.components[position].slice(cursor - start, take)?);
            }
            cursor += take;
            remaining -= take;
            position += 1;
        }
        Ok(())
    }

    /// `[index, index + width)` 完整落在单个分量内时返回 `(分量序号, 分量内下标)`。
    fn locate(&self, index: usize, width: usize) -> Result<Option<(usize, usize)>> {
        let position = self.component_index(index)?;
        let start = self.offsets[position];
        if index + width <= self.offsets[position + 1] {
            Ok(Some((position, index - start)))
        } else {
            Ok(None)
        }
    }

    fn get_halves(&self, index: usize, width: usize) -> Result<u64> {
        let half = width / 2;
        let (first, second) = match half {
            1 => (
                u64::from(self.get_u8(index)?),
                u64::from(self.get_u8(index + 1)?),
            ),
            2 => (
                u64::from(self.get_u16(index)?),
                u64::from(self.get_u16(index + 2)?),
            ),
            _ => (
                u64::from(self.get_u32(index)?),
                u64::from(self.get_u32(index + 4)?),
            ),
        };
        Ok(self.order.join(first, second, (half * 8) as u32))
    }

    fn set_halves(&mut self, index: usize, value: u64, width: usize) -> Result<()> {
        let half = width / 2;
        let (first, second) = self.order.split(value, (half * 8) as u32);
        match half {
            1 => {
                self.set_u8(index, first as u8)?;
                self.set_u8(index + 1, second as u8)
            }
            2 => {
                self.set_u16(index, first as u16)?;
                self.set_u16(index + 2, second as u16)
            }
            _ => {
                self.set_u32(index, first as u32)?;
                self.set_u32(index + 4, second as u32)
            }
        }
    }

    fn walk(
        &self,
        index: usize,
        length: usize,
        mut visit: impl FnMut(usize, usize, usize, usize) -> Result<()>,
    ) -> Result<()> {
        let mut position = self.component_index(index)?;
        let mut cursor = index;
        let mut done = 0;
        while done < length {
            let start = self.offsets[position];
            let take = (self.offsets[position + 1] - cursor).min(length - done);
            if take > 0 {
                visit(position, cursor - start, done, take)?;
            }
            cursor += take;
            done += take;
            position += 1;
        }
        Ok(())
    }
}

impl fmt::Debug for CompositeByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeByteStream")
            .field("order", &self.order)
            .field("components", &self.components.len())
            .field("offsets", &self.offsets)
            .field("reader_index", &self.cursors.reader())
            .field("writer_index", &self.cursors.writer())
            .finish()
    }
}

impl Sealed for CompositeByteStream {
    fn cursors(&self) -> &Cursors {
        &self.cursors
    }

    fn cursors_mut(&mut self) -> &mut Cursors {
        &mut self.cursors
    }

    fn flatten_into(
        &self,
        index: usize,
        length: usize,
        out: &mut Vec<Box<dyn ByteStream>>,
    ) -> Result<()> {
        self.decompose_into(index, length, out)
    }
}

impl ByteStream for CompositeByteStream {
    fn order(&self) -> ByteOrder {
        self.order
    }

    fn capacity(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    fn max_capacity(&self) -> usize {
        self.capacity()
    }

    fn set_capacity(&mut self, _new_capacity: usize) -> Result<()> {
        Err(BufferError::invalid_argument(
            "set_capacity",
            "composite streams cannot be resized",
        ))
    }

    fn get_u8(&self, index: usize) -> Result<u8> {
        let position = self.component_index(index)?;
        self.components[position].get_u8(index - self.offsets[position])
    }

    fn set_u8(&mut self, index: usize, value: u8) -> Result<()> {
        let position = self.component_index(index)?;
        let local = index - self.offsets[position];
        self.components[position].set_u8(local, value)
    }

    fn get_u16(&self, index: usize) -> Result<u16> {
        check_range("get_u16", index, 2, self.capacity())?;
        match self.locate(index, 2)? {
            Some((position, local)) => self.components[position].get_u16(local),
            None => self.get_halves(index, 2).map(|value| value as u16),
        }
    }

    fn get_u32(&self, index: usize) -> Result<u32> {
        check_range("get_u32", index, 4, self.capacity())?;
        match self.locate(index, 4)? {
            Some((position, local)) => self.components[position].get_u32(local),
            None => self.get_halves(index, 4).map(|value| value as u32),
        }
    }

    fn get_u64(&self, index: usize) -> Result<u64> {
        check_range("get_u64", index, 8, self.capacity())?;
        match self.locate(index, 8)? {
            Some((position, local)) => self.components[position].get_u64(local),
            None => self.get_halves(index, 8),
        }
    }

    fn set_u16(&mut self, index: usize, value: u16) -> Result<()> {
        check_range("set_u16", index, 2, self.capacity())?;
        match self.locate(index, 2)? {
            Some((position, local)) => self.components[position].set_u16(local, value),
            None => self.set_halves(index, u64::from(value), 2),
        }
    }

    fn set_u32(&mut self, index: usize, value: u32) -> Result<()> {
        check_range("set_u32", index, 4, self.capacity())?;
        match self.locate(index, 4)? {
            Some((position, local)) => self.components[position].set_u32(local, value),
            None => self.set_halves(index, u64::from(value), 4),
        }
    }

    fn set_u64(&mut self, index: usize, value: u64) -> Result<()> {
        check_range("set_u64", index, 8, self.capacity())?;
        match self.locate(index, 8)? {
            Some((position, local)) => self.components[position].set_u64(local, value),
            None => self.set_halves(index, value, 8),
        }
    }

    fn get_bytes(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        check_range("get_bytes", index, dst.len(), self.capacity())?;
        if dst.is_empty() {
            return Ok(());
        }
        self.walk(index, dst.len(), |position, local, done, take| {
            self.components[position].get_bytes(local, &mut dst[done..done + take])
        })
    }

    fn set_bytes(&mut self, index: usize, src: &[u8]) -> Result<()> {
        check_range("set_bytes", index, src.len(), self.capacity())?;
        if src.is_empty() {
            return Ok(());
        }
        let mut pieces = Vec::new();
        self.walk(index, src.len(), |position, local, done, take| {
            pieces.push((position, local, done, take));
            Ok(())
        })?;
        for (position, local, done, take) in pieces {
            self.components[position].set_bytes(local, &src[done..done + take])?;
        }
        Ok(())
    }

    /// 零长度返回共享空流；落在单个分量内时直接返回该分量的切片。
    fn slice(&self, index: usize, length: usize) -> Result<Box<dyn ByteStream>> {
        check_range("slice", index, length, self.capacity())?;
        if length == 0 {
            return Ok(empty(self.order));
        }
        let mut parts = self.decompose(index, length)?;
        if parts.len() == 1
            && let Some(single) = parts.pop()
        {
            return Ok(single);
        }
        let slice = Self::new(self.order, parts)?;
        Ok(Box::new(Self {
            max_components: self.max_components,
            ..slice
        }))
    }

    fn duplicate(&self) -> Box<dyn ByteStream> {
        Box::new(Self {
            order: self.order,
            components: self
                .components
                .iter()
                .map(|component| component.duplicate())
                .collect(),
            offsets: self.offsets.clone(),
            last_accessed: AtomicUsize::new(self.last_accessed.load(Ordering::Relaxed)),
            max_components: self.max_components,
            cursors: self.cursors,
        })
    }

    fn with_order(&self, order: ByteOrder) -> Box<dyn ByteStream> {
        Box::new(Self {
            order,
            components: self
                .components
                .iter()
                .map(|component| component.with_order(order))
                .collect(),
            offsets: self.offsets.clone(),
            last_accessed: AtomicUsize::new(0),
            max_components: self.max_components,
            cursors: self.cursors,
        })
    }

    fn with_array(&self, _visit: &mut dyn FnMut(&[u8])) -> Result<()> {
        Err(BufferError::unsupported(
            "with_array",
            "composite streams have no single backing array",
        ))
    }

    /// 丢弃 `[0, reader)`：保留区间分解后前移，末尾补一个长度为原读游标的零填充分量。
    fn discard_read_bytes(&mut self) -> Result<()> {
        let reader = self.cursors.reader();
        if reader == 0 {
            return Ok(());
        }
        let capacity = self.capacity();
        let mut cursors = self.cursors;
        let mut parts = self.decompose(reader, capacity - reader)?;
        parts.push(Box::new(HeapByteStream::wrap(vec![0; reader], self.order)));
        self.set_components(parts)?;
        cursors.discard(reader);
        self.cursors = cursors;
        if self.components.len() > self.max_components {
            self.consolidate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap(content: &[u8]) -> Box<dyn ByteStream> {
        Box::new(HeapByteStream::copied_from(content, ByteOrder::BigEndian))
    }

    #[test]
    fn lookup_scans_backwards_from_cached_component() {
        let composite =
            CompositeByteStream::from_components(vec![heap(&[1, 2]), heap(&[3, 4]), heap(&[5, 6])])
                .expect("组合");
        assert_eq!(composite.component_index(5).expect("末尾分量"), 2);
        assert_eq!(composite.last_accessed.load(Ordering::Relaxed), 2);
        assert_eq!(composite.component_index(0).expect("首个分量"), 0);
        assert_eq!(composite.last_accessed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn zero_capacity_components_are_skipped() {
        let composite = CompositeByteStream::from_components(vec![
            heap(&[1]),
            heap(&[]),
            heap(&[2]),
        ])
        .expect("组合");
        assert_eq!(composite.component_index(1).expect("跳过空分量"), 2);
        assert_eq!(composite.get_u16(0).expect("跨空分量读取"), 0x0102);
    }

    #[test]
    fn failed_set_components_keeps_previous_table() {
        let mut composite =
            CompositeByteStream::from_components(vec![heap(&[1, 2])]).expect("组合");
        let little: Box<dyn ByteStream> =
            Box::new(HeapByteStream::copied_from(&[9], ByteOrder::LittleEndian));
        composite
            .set_components(vec![heap(&[7]), little])
            .expect_err("字节序不一致");
        assert_eq!(composite.offsets(), &[0, 2]);
        assert_eq!(composite.get_u8(1).expect("原分量仍可读"), 2);
    }
}
