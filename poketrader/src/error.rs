//! Error types for poketrader

use thiserror::Error;

/// Unified error type for marketplace operations.
///
/// Every variant except the storage faults is recoverable: it is reported to
/// the actor and the operation leaves no trace.
#[derive(Debug, Error)]
pub enum MarketError {
    /// Bad input (missing fields, self-trade, negative amounts, unknown ids)
    #[error("Invalid request: {0}")]
    Validation(String),
    /// The actor has no rights over the resource
    #[error("Not permitted: {0}")]
    Authorization(String),
    /// The resource is already committed elsewhere or no longer in the right state
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Balance too low for a debit or escrow
    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: i64, available: i64 },
    /// Referenced user, card, item or trade does not exist
    #[error("Not found: {0}")]
    NotFound(String),
    /// Stored state contradicts what the operation was built on
    #[error("Integrity violation: {0}")]
    Integrity(String),
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Filesystem operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A thread panicked while holding the database connection
    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

impl MarketError {
    /// Stable snake_case tag for the UI layer
    pub fn kind(&self) -> &'static str {
        match self {
            MarketError::Validation(_) => "validation",
            MarketError::Authorization(_) => "authorization",
            MarketError::Conflict(_) => "conflict",
            MarketError::InsufficientFunds { .. } => "insufficient_funds",
            MarketError::NotFound(_) => "not_found",
            MarketError::Integrity(_) => "integrity_violation",
            MarketError::Database(_) => "database",
            MarketError::Io(_) => "io",
            MarketError::LockPoisoned => "internal",
        }
    }

    /// True for faults of the storage layer rather than of the request
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            MarketError::Database(_) | MarketError::Io(_) | MarketError::LockPoisoned
        )
    }
}

/// Result alias for marketplace operations
pub type MarketResult<T> = std::result::Result<T, MarketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(MarketError::Validation("x".into()).kind(), "validation");
        assert_eq!(
            MarketError::InsufficientFunds {
                needed: 10,
                available: 5
            }
            .kind(),
            "insufficient_funds"
        );
        assert_eq!(MarketError::Integrity("x".into()).kind(), "integrity_violation");
    }

    #[test]
    fn display_includes_amounts() {
        let err = MarketError::InsufficientFunds {
            needed: 437,
            available: 100,
        };
        assert_eq!(err.to_string(), "Insufficient funds: need 437, have 100");
    }

    #[test]
    fn storage_faults_are_internal() {
        assert!(MarketError::LockPoisoned.is_internal());
        assert!(!MarketError::Conflict("x".into()).is_internal());
    }
}
