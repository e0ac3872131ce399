/// Errors from encoding or decoding wire records.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failure.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The frame is truncated, empty, or inconsistent with its header.
    #[error("framing error: {0}")]
    FramingError(String),

    /// The frame advertises a payload larger than the decode bound.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A record field exceeds its fixed limit.
    #[error("{field} too long: {len} bytes (max {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// The frame header carries an opcode that does not match the payload.
    #[error("unexpected opcode: {0}")]
    UnexpectedOpcode(u8),
}

/// Result alias for wire operations.
pub type WireResult<T> = Result<T, WireError>;
