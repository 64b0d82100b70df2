use thiserror::Error;

#[derive(Debug, Error)]
pub enum QpError {
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Index out of range: {0}")]
    IndexOutOfRange(String),

    #[error("Block out of bounds: {0}")]
    BlockOutOfBounds(String),

    #[error("Cast error: {0}")]
    Cast(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, QpError>;
