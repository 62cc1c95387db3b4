// ============================================================================
// Settlement Errors
// ============================================================================
//
// Every failure is terminal for the call that produced it and is surfaced
// verbatim. No variant is retried or swallowed inside the engine.
//
// ============================================================================

use crate::{Amount, MarketId};

/// Result type for settlement operations
pub type SettlementResult<T> = Result<T, SettlementError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Market not found: {0}")]
    NotFound(MarketId),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Market {0} is closed for betting")]
    MarketClosed(MarketId),

    #[error("Market {market_id} cannot be resolved before {end_time} (now {now})")]
    TooEarly {
        market_id: MarketId,
        end_time: u64,
        now: u64,
    },

    #[error("Market {0} is already resolved")]
    AlreadyResolved(MarketId),

    #[error("Market {0} is not resolved")]
    NotResolved(MarketId),

    #[error("Bet amount must be positive")]
    InvalidAmount,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("No winning stake for {participant} in market {market_id}")]
    NoStake {
        market_id: MarketId,
        participant: String,
    },

    #[error("{participant} already claimed from market {market_id}")]
    AlreadyClaimed {
        market_id: MarketId,
        participant: String,
    },

    #[error("Arithmetic overflow: {0}")]
    ArithmeticOverflow(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Market lock poisoned")]
    Poisoned,
}

/// Field-less view of [`SettlementError`] for callers that only branch on kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    InvalidOption,
    MarketClosed,
    TooEarly,
    AlreadyResolved,
    NotResolved,
    InvalidAmount,
    Unauthorized,
    NoStake,
    AlreadyClaimed,
    ArithmeticOverflow,
    Storage,
    Poisoned,
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettlementError::InvalidInput(_) => ErrorKind::InvalidInput,
            SettlementError::NotFound(_) => ErrorKind::NotFound,
            SettlementError::InvalidOption(_) => ErrorKind::InvalidOption,
            SettlementError::MarketClosed(_) => ErrorKind::MarketClosed,
            SettlementError::TooEarly { .. } => ErrorKind::TooEarly,
            SettlementError::AlreadyResolved(_) => ErrorKind::AlreadyResolved,
            SettlementError::NotResolved(_) => ErrorKind::NotResolved,
            SettlementError::InvalidAmount => ErrorKind::InvalidAmount,
            SettlementError::Unauthorized(_) => ErrorKind::Unauthorized,
            SettlementError::NoStake { .. } => ErrorKind::NoStake,
            SettlementError::AlreadyClaimed { .. } => ErrorKind::AlreadyClaimed,
            SettlementError::ArithmeticOverflow(_) => ErrorKind::ArithmeticOverflow,
            SettlementError::Storage(_) => ErrorKind::Storage,
            SettlementError::Poisoned => ErrorKind::Poisoned,
        }
    }

    pub(crate) fn overflow(what: &str) -> Self {
        SettlementError::ArithmeticOverflow(what.to_string())
    }
}

impl From<sled::Error> for SettlementError {
    fn from(e: sled::Error) -> Self {
        SettlementError::Storage(e.to_string())
    }
}

impl From<bincode::Error> for SettlementError {
    fn from(e: bincode::Error) -> Self {
        SettlementError::Storage(format!("Encoding failed: {}", e))
    }
}

/// Checked addition that reports which total overflowed
pub(crate) fn checked_add(a: Amount, b: Amount, what: &str) -> SettlementResult<Amount> {
    a.checked_add(b).ok_or_else(|| SettlementError::overflow(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SettlementError::TooEarly { market_id: 3, end_time: 100, now: 40 };
        assert_eq!(err.to_string(), "Market 3 cannot be resolved before 100 (now 40)");
        assert_eq!(err.kind(), ErrorKind::TooEarly);
    }

    #[test]
    fn test_checked_add_reports_overflow() {
        assert_eq!(checked_add(1, 2, "pool").unwrap(), 3);
        let err = checked_add(Amount::MAX, 1, "pool").unwrap_err();
        assert_eq!(err, SettlementError::ArithmeticOverflow("pool".to_string()));
    }
}
