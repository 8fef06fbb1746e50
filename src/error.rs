use thiserror::Error;

use crate::data_item::DataItem;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataBagError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("no common schema: {common} vs {conflicting}")]
    NoCommonSchema { common: DataItem, conflicting: DataItem },
    #[error("object {0} is missing __schema__ attribute")]
    MissingObjectSchema(String),
    #[error("the DataBag is immutable")]
    Immutable,
    #[error("internal invariant violated: {0}")]
    Internal(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, DataBagError>;

// Helper conversions
impl From<rusqlite::Error> for DataBagError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for DataBagError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for DataBagError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for DataBagError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}

// Shorthands used across the crate.
pub(crate) fn invalid<T>(msg: impl Into<String>) -> Result<T> {
    Err(DataBagError::InvalidArgument(msg.into()))
}

pub(crate) fn precondition<T>(msg: impl Into<String>) -> Result<T> {
    Err(DataBagError::FailedPrecondition(msg.into()))
}

pub(crate) fn internal<T>(msg: impl Into<String>) -> Result<T> {
    Err(DataBagError::Internal(msg.into()))
}
