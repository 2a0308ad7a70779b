use crate::{ByteStream, Cursors, Result};

/// 封闭 [`ByteStream`] 的实现集合，并承载只在 crate 内部使用的游标钩子。
///
/// 外部无法命名该 trait，因此游标只能经由带校验的公开方法修改。
pub trait Sealed {
    fn cursors(&self) -> &Cursors;

    fn cursors_mut(&mut self) -> &mut Cursors;

    /// 是否指向进程级共享的空存储。
    fn shares_empty_storage(&self) -> bool {
        false
    }

    /// 将 `[index, index + length)` 展开为若干非组合视图追加到 `out`。
    ///
    /// 普通流追加一个切片；组合流追加其分量切片，避免组合套组合。
    fn flatten_into(
        &self,
        index: usize,
        length: usize,
        out: &mut Vec<Box<dyn ByteStream>>,
    ) -> Result<()>;
}
