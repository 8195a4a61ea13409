//! Error type for the foundation types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid peer address: {0}")]
    InvalidAddress(String),
}
