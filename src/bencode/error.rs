use thiserror::Error;

/// Errors produced by the bencode decoder.
#[derive(Debug, Error)]
pub enum BencodeError {
    /// Input ended before the value was complete.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A byte that cannot start or continue a value at this position.
    #[error("unexpected byte 0x{0:02x}")]
    UnexpectedByte(u8),

    /// Non-canonical or malformed integer (leading zeros, `-0`, empty).
    #[error("invalid integer")]
    InvalidInteger,

    /// Malformed byte-string length prefix.
    #[error("invalid string length")]
    InvalidLength,

    /// A dictionary key that is not a byte string.
    #[error("dictionary key is not a byte string")]
    NonStringKey,

    /// Bytes left over after the first complete value.
    #[error("{0} trailing bytes after value")]
    TrailingData(usize),

    /// Nesting depth limit exceeded.
    #[error("nesting too deep")]
    NestingTooDeep,
}
