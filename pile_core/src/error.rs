use std::io;
use thiserror::Error;
use uuid::Uuid;

use crate::element::TypeTag;

pub type Result<T> = std::result::Result<T, PileError>;

#[derive(Debug, Error)]
pub enum PileError {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Item already exists in the pile: {0}")]
    AlreadyExists(Uuid),

    #[error("Invalid item type `{actual}` for item {id}: expected one of {expected:?}")]
    InvalidType {
        id: Uuid,
        actual: TypeTag,
        expected: Vec<TypeTag>,
    },

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("No adapter registered for `{key}` (registered: {registered:?})")]
    UnknownAdapter {
        key: String,
        registered: Vec<String>,
    },

    #[error("Adapter configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl PileError {
    pub fn not_found(key: impl std::fmt::Display) -> Self {
        PileError::NotFound(key.to_string())
    }
}
