// Staking Engine - validates bets and records them in the ledger

use serde::Serialize;
use tracing::info;

use super::markets::{MarketManager, MarketStatus};
use crate::error::{SettlementError, SettlementResult};
use crate::journal::Transaction;
use crate::{Amount, MarketId};

/// Confirmation of a committed bet
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BetReceipt {
    pub market_id: MarketId,
    pub participant: String,
    pub option: String,
    pub amount: Amount,
    /// Participant's accumulated stake on this option
    pub stake_total: Amount,
    /// The option's pool after this bet
    pub option_total: Amount,
    pub tx_id: String,
}

impl MarketManager {
    /// Place a bet of `amount` on `option`.
    ///
    /// The market lock is held from the state check to the commit, so a
    /// bet racing a close or resolution is either fully recorded before it
    /// or rejected with `MarketClosed` after it.
    pub fn place_bet(&self, market_id: MarketId, participant: &str, option: &str, amount: Amount) -> SettlementResult<BetReceipt> {
        if participant.trim().is_empty() {
            return Err(SettlementError::InvalidInput("participant must not be empty".to_string()));
        }

        self.with_market(market_id, |slot, now| {
            let option_idx = slot.market.option_index(option)?;
            if slot.market.status_at(now) != MarketStatus::Open {
                return Err(SettlementError::MarketClosed(market_id));
            }
            if amount == 0 {
                return Err(SettlementError::InvalidAmount);
            }

            let credit = slot
                .ledger
                .plan_credit(participant, option_idx, amount, &slot.market.total_stake_per_option)?;

            let mut candidate = slot.market.clone();
            candidate.total_stake_per_option[option_idx] = credit.option_total;
            let entry = Transaction::bet(&mut candidate, participant, option_idx, amount, now);

            let receipt = BetReceipt {
                market_id,
                participant: participant.to_string(),
                option: option.to_string(),
                amount,
                stake_total: credit.stake.amount,
                option_total: credit.option_total,
                tx_id: entry.id.clone(),
            };
            self.commit(slot, candidate, vec![credit.stake], entry)?;

            info!(
                market_id,
                participant = %participant,
                option = %option,
                amount,
                pool = credit.pool_total,
                "bet placed"
            );
            Ok(receipt)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::error::SettlementError;
    use crate::market_resolve::MarketManager;
    use crate::Amount;
    use std::sync::Arc;

    fn setup() -> (MarketManager, Arc<ManualClock>, u64) {
        let clock = Arc::new(ManualClock::new(0));
        let manager = MarketManager::open_with_clock(&EngineConfig::temporary("OWNER"), clock.clone()).unwrap();
        let id = manager
            .create_market("Will it rain?", vec!["Yes".to_string(), "No".to_string()], 10)
            .unwrap();
        (manager, clock, id)
    }

    #[test]
    fn test_bets_accumulate() {
        let (manager, _, id) = setup();

        let first = manager.place_bet(id, "ALICE", "Yes", 100).unwrap();
        assert_eq!(first.stake_total, 100);
        let second = manager.place_bet(id, "ALICE", "Yes", 25).unwrap();
        assert_eq!(second.stake_total, 125);
        manager.place_bet(id, "BOB", "No", 300).unwrap();

        assert_eq!(manager.stake_of(id, "ALICE", "Yes").unwrap(), 125);
        assert_eq!(manager.stake_of(id, "ALICE", "No").unwrap(), 0);
        assert_eq!(manager.pool_totals(id).unwrap(), vec![125, 300]);
        assert_eq!(manager.positions("ALICE").unwrap().len(), 1);
    }

    #[test]
    fn test_validation_order() {
        let (manager, clock, id) = setup();

        assert_eq!(manager.place_bet(9, "ALICE", "Yes", 1).unwrap_err(), SettlementError::NotFound(9));
        assert!(matches!(
            manager.place_bet(id, "ALICE", "Maybe", 1).unwrap_err(),
            SettlementError::InvalidOption(_)
        ));
        assert_eq!(manager.place_bet(id, "ALICE", "Yes", 0).unwrap_err(), SettlementError::InvalidAmount);

        clock.set(10);
        assert_eq!(manager.place_bet(id, "ALICE", "Yes", 0).unwrap_err(), SettlementError::MarketClosed(id));
        assert_eq!(manager.place_bet(id, "ALICE", "Yes", 5).unwrap_err(), SettlementError::MarketClosed(id));
    }

    #[test]
    fn test_bet_after_early_close_rejected() {
        let (manager, _, id) = setup();
        manager.close_market(id, "OWNER").unwrap();
        assert_eq!(manager.place_bet(id, "ALICE", "Yes", 5).unwrap_err(), SettlementError::MarketClosed(id));
    }

    #[test]
    fn test_overflow_leaves_state_unchanged() {
        let (manager, _, id) = setup();
        manager.place_bet(id, "ALICE", "Yes", Amount::MAX - 10).unwrap();

        let err = manager.place_bet(id, "BOB", "No", 11).unwrap_err();
        assert!(matches!(err, SettlementError::ArithmeticOverflow(_)));
        assert_eq!(manager.pool_totals(id).unwrap(), vec![Amount::MAX - 10, 0]);
        assert_eq!(manager.stake_of(id, "BOB", "No").unwrap(), 0);

        // exactly filling the pool is still fine
        manager.place_bet(id, "BOB", "No", 10).unwrap();
        assert_eq!(manager.pool_totals(id).unwrap(), vec![Amount::MAX - 10, 10]);
    }

    #[test]
    fn test_each_bet_is_journaled() {
        let (manager, _, id) = setup();
        let receipt = manager.place_bet(id, "ALICE", "No", 7).unwrap();
        let entries = manager.transactions(id).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].id, receipt.tx_id);
        assert_eq!(entries[1].amount, 7);
        assert_eq!(manager.verify_journal().unwrap(), 2);
    }
}
