//! Market Journal - append-only audit trail
//!
//! Every committed mutation of a market appends one `Transaction` to that
//! market's own hash chain:
//!
//!   hash = sha256(prev_hash, market, seq, type, account, option, amount,
//!                 timestamp, id, description)
//!
//! Strings enter the digest length-prefixed, so no choice of account or
//! description can shift bytes from one field into the next.
//!
//! Chains are per market so that recording activity on one market never
//! waits on another. Any caller can re-walk a chain with `verify_chain`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{SettlementError, SettlementResult};
use crate::market_resolve::Market;
use crate::{Amount, MarketId};

/// `prev_hash` of the first entry of every market
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TxType {
    MarketCreated,
    Bet,
    MarketClosed,
    MarketResolved,
    Payout,
    ResidualSwept,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: String,
    pub market_id: MarketId,
    /// Position in the market's chain, starting at 0
    pub seq: u64,
    pub tx_type: TxType,
    /// Bettor, claimant or the owner, depending on the type
    pub account: String,
    pub option: Option<usize>,
    pub amount: Amount,
    pub timestamp: u64,
    pub prev_hash: String,
    pub hash: String,
    pub description: String,
}

impl Transaction {
    /// Build the next entry for `market` and advance its chain head.
    ///
    /// `market` is the candidate record that will be committed together
    /// with the returned entry.
    pub fn append(
        market: &mut Market,
        tx_type: TxType,
        account: &str,
        option: Option<usize>,
        amount: Amount,
        timestamp: u64,
        description: String,
    ) -> Self {
        let mut tx = Self {
            id: uuid::Uuid::new_v4().to_string(),
            market_id: market.id,
            seq: market.journal_len,
            tx_type,
            account: account.to_string(),
            option,
            amount,
            timestamp,
            prev_hash: market.journal_head.clone(),
            hash: String::new(),
            description,
        };
        tx.hash = tx.compute_hash();

        market.journal_len += 1;
        market.journal_head = tx.hash.clone();
        tx
    }

    pub fn market_created(market: &mut Market, creator: &str, timestamp: u64) -> Self {
        let description = format!("Market created: {}", market.question);
        Self::append(market, TxType::MarketCreated, creator, None, 0, timestamp, description)
    }

    pub fn bet(market: &mut Market, bettor: &str, option: usize, amount: Amount, timestamp: u64) -> Self {
        let description = format!("Bet {} on {}", amount, market.options[option]);
        Self::append(market, TxType::Bet, bettor, Some(option), amount, timestamp, description)
    }

    pub fn market_closed(market: &mut Market, owner: &str, timestamp: u64) -> Self {
        Self::append(market, TxType::MarketClosed, owner, None, 0, timestamp, "Market closed early".to_string())
    }

    pub fn market_resolved(market: &mut Market, owner: &str, winning: usize, pool: Amount, timestamp: u64) -> Self {
        let description = format!("Market resolved: {} wins", market.options[winning]);
        Self::append(market, TxType::MarketResolved, owner, Some(winning), pool, timestamp, description)
    }

    pub fn payout(market: &mut Market, claimant: &str, winning: usize, amount: Amount, timestamp: u64) -> Self {
        let description = format!("Payout {} from resolved market", amount);
        Self::append(market, TxType::Payout, claimant, Some(winning), amount, timestamp, description)
    }

    pub fn residual_swept(market: &mut Market, owner: &str, amount: Amount, timestamp: u64) -> Self {
        let description = format!("Residual {} swept to owner", amount);
        Self::append(market, TxType::ResidualSwept, owner, None, amount, timestamp, description)
    }

    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        put_str(&mut hasher, &self.prev_hash);
        hasher.update(self.market_id.to_be_bytes());
        hasher.update(self.seq.to_be_bytes());
        put_str(&mut hasher, &format!("{:?}", self.tx_type));
        put_str(&mut hasher, &self.account);
        match self.option {
            Some(option) => {
                hasher.update([1u8]);
                hasher.update((option as u64).to_be_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(self.amount.to_be_bytes());
        hasher.update(self.timestamp.to_be_bytes());
        put_str(&mut hasher, &self.id);
        put_str(&mut hasher, &self.description);
        hex::encode(hasher.finalize())
    }
}

fn put_str(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_be_bytes());
    hasher.update(field.as_bytes());
}

/// Re-walk a market's chain (entries in `seq` order) and return its head
pub fn verify_chain(market_id: MarketId, entries: &[Transaction]) -> SettlementResult<String> {
    let mut head = GENESIS_HASH.to_string();

    for (expected_seq, tx) in entries.iter().enumerate() {
        let broken = |why: &str| {
            SettlementError::Storage(format!("Journal of market {} broken at seq {}: {}", market_id, tx.seq, why))
        };
        if tx.market_id != market_id {
            return Err(broken("foreign entry"));
        }
        if tx.seq != expected_seq as u64 {
            return Err(broken("gap in sequence"));
        }
        if tx.prev_hash != head {
            return Err(broken("prev_hash mismatch"));
        }
        if tx.compute_hash() != tx.hash {
            return Err(broken("hash mismatch"));
        }
        head = tx.hash.clone();
    }

    Ok(head)
}
