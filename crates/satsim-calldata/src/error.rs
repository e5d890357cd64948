use thiserror::Error;

/// Errors raised while decoding a calldata buffer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalldataError {
    #[error("Unexpected end of calldata: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },

    #[error("Invalid boolean byte: {0:#04x}")]
    InvalidBool(u8),

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("Length {0} does not fit the prefix width")]
    LengthOverflow(usize),
}
