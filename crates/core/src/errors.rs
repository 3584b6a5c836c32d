use thiserror::Error;

use crate::domain::product::ProductId;
use crate::domain::rule::RuleId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("rule {0} does not exist")]
    RuleNotFound(RuleId),
    #[error("product {0} does not exist")]
    ProductNotFound(ProductId),
    #[error("invalid rule import: {0}")]
    InvalidImport(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ApplicationError {
    /// Stable short class name, used by operator tooling to bucket failures.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::RuleNotFound(_))
            | Self::Domain(DomainError::ProductNotFound(_)) => "not_found",
            Self::Domain(DomainError::InvalidImport(_)) => "invalid_input",
            Self::Persistence(_) => "persistence",
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == "not_found"
    }
}
