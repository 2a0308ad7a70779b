/// 多字节数值在字节流中的排列顺序。
///
/// # 教案式说明
/// - **意图（Why）**：字节序是字节流在构造时确定的属性，所有多字节读写都据此装配，
///   结果与宿主机的本地字节序无关。
/// - **逻辑（How）**：[`assemble`](Self::assemble) 与 [`disassemble`](Self::disassemble) 逐字节移位完成装配；
///   [`join`](Self::join) 与 [`split`](Self::split) 供组合缓冲把跨分量的宽整数拆为两个半宽访问。
/// - **契约（What）**：宽度不超过 8 字节；默认值为网络字节序（大端）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    /// 网络字节序。
    pub const NETWORK: ByteOrder = ByteOrder::BigEndian;

    /// 返回相反的字节序。
    pub fn swapped(self) -> Self {
        match self {
            Self::BigEndian => Self::LittleEndian,
            Self::LittleEndian => Self::BigEndian,
        }
    }

    /// 将最多 8 个字节按当前字节序组装为无符号整数。
    pub fn assemble(self, bytes: &[u8]) -> u64 {
        debug_assert!(bytes.len() <= 8);
        match self {
            Self::BigEndian => bytes
                .iter()
                .fold(0_u64, |acc, &byte| (acc << 8) | u64::from(byte)),
            Self::LittleEndian => bytes
                .iter()
                .rev()
                .fold(0_u64, |acc, &byte| (acc << 8) | u64::from(byte)),
        }
    }

    /// 将 `value` 的低 `out.len()` 个字节按当前字节序写入 `out`。
    pub fn disassemble(self, value: u64, out: &mut [u8]) {
        debug_assert!(out.len() <= 8);
        let width = out.len();
        for (position, slot) in out.iter_mut().enumerate() {
            let shift = match self {
                Self::BigEndian => (width - 1 - position) * 8,
                Self::LittleEndian => position * 8,
            };
            *slot = (value >> shift) as u8;
        }
    }

    /// 合并两个按地址先后读出的半宽值。
    ///
    /// 大端下先读出的是高位，小端下先读出的是低位。
    pub fn join(self, first: u64, second: u64, half_bits: u32) -> u64 {
        match self {
            Self::BigEndian => (first << half_bits) | second,
            Self::LittleEndian => first | (second << half_bits),
        }
    }

    /// [`join`](Self::join) 的逆操作，返回按地址先后写入的两个半宽值。
    pub fn split(self, value: u64, half_bits: u32) -> (u64, u64) {
        let mask = (1_u64 << half_bits) - 1;
        let high = value >> half_bits;
        let low = value & mask;
        match self {
            Self::BigEndian => (high, low),
            Self::LittleEndian => (low, high),
        }
    }
}
