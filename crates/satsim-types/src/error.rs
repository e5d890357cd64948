use thiserror::Error;

/// Errors that can occur in type operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypesError {
    #[error("Invalid address format: {0}")]
    InvalidAddressFormat(String),

    #[error("Invalid address length: expected 32, got {0}")]
    InvalidAddressLength(usize),

    #[error("Invalid hash length: expected 32, got {0}")]
    InvalidHashLength(usize),

    #[error("U256 overflow")]
    U256Overflow,

    #[error("Invalid U256 decimal string: {0}")]
    InvalidU256String(String),

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Unknown network: {0}")]
    UnknownNetwork(String),
}

impl From<hex::FromHexError> for TypesError {
    fn from(e: hex::FromHexError) -> Self {
        TypesError::InvalidHex(e.to_string())
    }
}
