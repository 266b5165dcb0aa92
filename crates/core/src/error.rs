use thiserror::Error;

#[derive(Debug, Error)]
pub enum OtlexError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("collect error: {0}")]
    Collect(String),

    #[error("shutdown error: {0}")]
    Shutdown(String),
}

pub type Result<T> = std::result::Result<T, OtlexError>;
