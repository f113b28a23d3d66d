//! Error types for header chain handling.

use thiserror::Error;

/// Header chain errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Two consecutive headers do not follow each other.
    #[error("Non-contiguous insert: item {index} is #{number} [{hash}], item {prev_index} is #{prev_number} [{prev_hash}]")]
    NonContiguous {
        index: usize,
        number: u64,
        hash: String,
        prev_index: usize,
        prev_number: u64,
        prev_hash: String,
    },

    /// Seal (proof-of-work) verification failed.
    #[error("Invalid seal on header #{number} [{hash}]")]
    InvalidSeal {
        index: usize,
        number: u64,
        hash: String,
    },

    /// Parent of an inserted header is unknown.
    #[error("Unknown parent for header #{number}: {parent}")]
    UnknownParent {
        index: usize,
        number: u64,
        parent: String,
    },

    /// Malformed header encoding.
    #[error("Invalid header encoding: {0}")]
    Decode(String),
}

impl ChainError {
    /// Index of the offending header within the submitted batch, if any.
    pub fn index(&self) -> Option<usize> {
        match self {
            ChainError::NonContiguous { index, .. }
            | ChainError::InvalidSeal { index, .. }
            | ChainError::UnknownParent { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
