use chrono::{DateTime, Utc};
use thiserror::Error;

use shelfmatch_core::errors::ApplicationError;

pub mod build_log;
pub mod catalog;
pub mod memory;
pub mod rule;
pub mod store;

pub use build_log::SqlBuildLog;
pub use catalog::SqlCatalog;
pub use memory::{InMemoryBuildLog, InMemoryCatalog, InMemoryIdListStore, InMemoryRuleRepository};
pub use rule::SqlRuleRepository;
pub use store::SqlIdListStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        ApplicationError::Persistence(error.to_string())
    }
}

pub(crate) fn decode_err(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{raw}`: {error}")))
}

/// sqlite stores integers as i64; product and term ids are never negative.
pub(crate) fn to_u64(value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| RepositoryError::Decode(format!("negative id {value}")))
}

pub(crate) fn to_i64(value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| RepositoryError::Decode(format!("id {value} out of range")))
}
