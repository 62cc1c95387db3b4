//! Stake Ledger for a single market
//!
//! Pure bookkeeping: participant -> option -> staked amount, plus the
//! per-stake `claimed` flag. No business rules live here; the staking and
//! payout engines decide *whether* a credit or claim is legal, the ledger
//! only records it.
//!
//! Credits are planned first (`plan_credit`) and applied only after the
//! store has committed them, so a failed commit never leaves the ledger
//! ahead of disk.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{checked_add, SettlementResult};
use crate::{Amount, MarketId};

// ============================================================================
// STAKE
// ============================================================================

/// A participant's accumulated wager on one option of one market
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stake {
    pub market_id: MarketId,
    pub participant: String,
    /// Option index into the market's option list
    pub option: usize,
    pub amount: Amount,
    /// Set once the payout for this stake has been withdrawn
    pub claimed: bool,
}

impl Stake {
    pub fn new(market_id: MarketId, participant: &str, option: usize) -> Self {
        Self {
            market_id,
            participant: participant.to_string(),
            option,
            amount: 0,
            claimed: false,
        }
    }
}

/// Outcome of a planned credit, ready to be committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credit {
    /// The stake as it will look after the credit
    pub stake: Stake,
    /// The option's pool after the credit
    pub option_total: Amount,
    /// The whole market pool after the credit
    pub pool_total: Amount,
}

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Debug, Clone)]
pub struct Ledger {
    market_id: MarketId,
    option_count: usize,
    /// (participant, option) -> stake
    stakes: BTreeMap<(String, usize), Stake>,
}

impl Ledger {
    pub fn new(market_id: MarketId, option_count: usize) -> Self {
        Self {
            market_id,
            option_count,
            stakes: BTreeMap::new(),
        }
    }

    pub fn get(&self, participant: &str, option: usize) -> Option<&Stake> {
        self.stakes.get(&(participant.to_string(), option))
    }

    /// Staked amount, zero when the participant never bet on `option`
    pub fn stake(&self, participant: &str, option: usize) -> Amount {
        self.get(participant, option).map(|s| s.amount).unwrap_or(0)
    }

    pub fn stakes_of<'a>(&'a self, participant: &'a str) -> impl Iterator<Item = &'a Stake> + 'a {
        self.stakes.values().filter(move |s| s.participant == participant)
    }

    pub fn stakes_on(&self, option: usize) -> impl Iterator<Item = &Stake> {
        self.stakes.values().filter(move |s| s.option == option)
    }

    /// Distinct participants with any stake in this market
    pub fn participants(&self) -> BTreeSet<&str> {
        self.stakes.keys().map(|(p, _)| p.as_str()).collect()
    }

    /// Sum of individual stakes on `option`, recomputed from the entries
    pub fn option_sum(&self, option: usize) -> u128 {
        self.stakes_on(option).map(|s| s.amount as u128).sum()
    }

    /// Work out a credit of `amount` without touching the ledger.
    ///
    /// `totals` are the market's current per-option pools; every counter
    /// that would wrap is rejected.
    pub fn plan_credit(&self, participant: &str, option: usize, amount: Amount, totals: &[Amount]) -> SettlementResult<Credit> {
        let mut stake = self
            .get(participant, option)
            .cloned()
            .unwrap_or_else(|| Stake::new(self.market_id, participant, option));
        stake.amount = checked_add(stake.amount, amount, "participant stake")?;

        let current = totals.get(option).copied().unwrap_or(0);
        let option_total = checked_add(current, amount, "option pool")?;

        let mut pool_total: Amount = 0;
        for total in totals {
            pool_total = checked_add(pool_total, *total, "market pool")?;
        }
        let pool_total = checked_add(pool_total, amount, "market pool")?;

        Ok(Credit { stake, option_total, pool_total })
    }

    /// Store a stake as committed (credit, claim or replay from disk)
    pub fn put(&mut self, stake: Stake) {
        debug_assert!(stake.option < self.option_count);
        self.stakes.insert((stake.participant.clone(), stake.option), stake);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SettlementError;

    #[test]
    fn test_plan_then_put_accumulates() {
        let mut ledger = Ledger::new(0, 2);
        let mut totals = vec![0, 0];

        let credit = ledger.plan_credit("ALICE", 0, 100, &totals).unwrap();
        assert_eq!(credit.stake.amount, 100);
        assert_eq!(credit.option_total, 100);
        assert_eq!(credit.pool_total, 100);
        // planning alone records nothing
        assert_eq!(ledger.stake("ALICE", 0), 0);

        totals[0] = credit.option_total;
        ledger.put(credit.stake);

        let credit = ledger.plan_credit("ALICE", 0, 50, &totals).unwrap();
        totals[0] = credit.option_total;
        ledger.put(credit.stake);

        assert_eq!(ledger.stake("ALICE", 0), 150);
        assert_eq!(ledger.option_sum(0), totals[0] as u128);
    }

    #[test]
    fn test_participants_and_sums() {
        let mut ledger = Ledger::new(4, 3);
        for (who, option, amount) in [("ALICE", 0, 10), ("BOB", 1, 20), ("ALICE", 2, 5)] {
            let mut stake = Stake::new(4, who, option);
            stake.amount = amount;
            ledger.put(stake);
        }

        assert_eq!(ledger.participants().len(), 2);
        assert_eq!((0..3).map(|o| ledger.option_sum(o)).sum::<u128>(), 35);
        assert_eq!(ledger.stakes_of("ALICE").count(), 2);
        assert_eq!(ledger.stakes_on(1).count(), 1);
    }

    #[test]
    fn test_credit_rejects_wrapping_pool() {
        let ledger = Ledger::new(0, 2);
        // each option fits but their sum does not
        let totals = vec![Amount::MAX - 1, 1];
        let err = ledger.plan_credit("ALICE", 1, 1, &totals).unwrap_err();
        assert!(matches!(err, SettlementError::ArithmeticOverflow(_)));
    }
}
