use std::array::TryFromSliceError;
use thiserror::Error;

/// Specialisation of `std::Result`.
pub type Result<T, E = CspError> = std::result::Result<T, E>;
pub type Error = CspError;

#[derive(Error, Debug)]
/// error variants.
pub enum CspError {
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// A freshly drawn blind nonce was zero. Never leaves the engine.
    #[error("degenerate nonce")]
    InvalidNonce,

    /// Token never issued or already consumed; the two cases are not distinguished.
    #[error("token not found")]
    UnknownToken,

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("an error occured when signing: {0}")]
    SignFailure(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("deserialization from bytes failed")]
    InvalidBytes(#[from] TryFromSliceError),
}

impl From<rusqlite::Error> for CspError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<hex::FromHexError> for CspError {
    fn from(e: hex::FromHexError) -> Self {
        Self::InvalidRequest(format!("bad hex: {}", e))
    }
}
