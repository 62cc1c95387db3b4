//! BlackBook Settlement Engine
//! Pari-mutuel market lifecycle and payout settlement, exported as a library crate

pub mod clock;
pub mod config;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod market_resolve;
pub mod store;

/// Sequential market identifier
pub type MarketId = u64;

/// Stake and payout amounts, in the smallest indivisible unit
pub type Amount = u64;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{ErrorKind, SettlementError, SettlementResult};
pub use journal::{Transaction, TxType, GENESIS_HASH};
pub use ledger::{Ledger, Stake};
pub use market_resolve::{
    payout_for, BetReceipt, EngineStats, Market, MarketInfo, MarketManager, MarketStats, MarketStatus, Payout,
    Position, Resolution,
};
