use marktlern_core::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LearnError {
    #[error("invalid decision/outcome input: {0}")]
    InvalidInput(String),
    #[error("model training failed: {0}")]
    Model(#[from] ModelError),
}

pub type Result<T> = std::result::Result<T, LearnError>;
