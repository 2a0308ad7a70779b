//! 常用的单字节查找谓词，配合 [`ByteStream::index_of`](crate::ByteStream::index_of)
//! 与 [`ByteStream::bytes_before`](crate::ByteStream::bytes_before) 使用。
//!
//! ```
//! use spark_bytes::{ByteOrder, ByteStream, HeapByteStream, finder};
//!
//! let stream = HeapByteStream::copied_from(b"GET /\r\n", ByteOrder::BigEndian);
//! assert_eq!(stream.bytes_before(&mut finder::crlf), Some(5));
//! ```

pub fn nul(byte: u8) -> bool {
    byte == 0
}

pub fn not_nul(byte: u8) -> bool {
    byte != 0
}

pub fn cr(byte: u8) -> bool {
    byte == b'\r'
}

pub fn not_cr(byte: u8) -> bool {
    byte != b'\r'
}

pub fn lf(byte: u8) -> bool {
    byte == b'\n'
}

pub fn not_lf(byte: u8) -> bool {
    byte != b'\n'
}

/// CR 或 LF。
pub fn crlf(byte: u8) -> bool {
    byte == b'\r' || byte == b'\n'
}

pub fn not_crlf(byte: u8) -> bool {
    !crlf(byte)
}

/// 空格或水平制表符。
pub fn linear_whitespace(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}

pub fn not_linear_whitespace(byte: u8) -> bool {
    !linear_whitespace(byte)
}
