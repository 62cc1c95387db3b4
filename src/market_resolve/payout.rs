// ============================================================================
// Resolution & Payout Engine
// ============================================================================
//
// Payout for a winning stake s:
//
//   payout = s + floor(s * losing_pool / winning_pool)
//
// The product is taken in u128 so it cannot wrap. Truncation always rounds
// toward the engine: at resolution the sum of every winner's payout is
// fixed as `owed`, and `residual = total_pool - owed` is credited to the
// owner-controlled residual balance of the market. When nobody backed the
// winning option, nothing is owed and the whole pool is forfeit into the
// residual.
//
// So for every market:   paid_out <= owed = total_pool - residual
//
// ============================================================================

use serde::Serialize;
use tracing::info;

use super::markets::{Market, MarketManager, MarketStatus};
use crate::error::{checked_add, SettlementError, SettlementResult};
use crate::journal::Transaction;
use crate::ledger::Ledger;
use crate::{Amount, MarketId};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Resolution {
    pub market_id: MarketId,
    pub winning_option: String,
    pub winning_pool: Amount,
    pub losing_pool: Amount,
    /// Sum of all winners' payouts
    pub owed: Amount,
    /// Dust and forfeits held for the owner
    pub residual: Amount,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Payout {
    pub market_id: MarketId,
    pub participant: String,
    pub stake: Amount,
    /// Share of the losing pool
    pub winnings: Amount,
    /// stake + winnings
    pub amount: Amount,
}

/// `stake + floor(stake * losing_pool / winning_pool)`; zero when the winning pool is empty
pub fn payout_for(stake: Amount, winning_pool: Amount, losing_pool: Amount) -> SettlementResult<Amount> {
    if winning_pool == 0 {
        return Ok(0);
    }
    let share = (stake as u128) * (losing_pool as u128) / (winning_pool as u128);
    let total = (stake as u128) + share;
    Amount::try_from(total).map_err(|_| SettlementError::overflow("payout"))
}

fn pools(market: &Market, winning: usize) -> SettlementResult<(Amount, Amount)> {
    let winning_pool = market.total_stake_per_option[winning];
    let losing_pool = market
        .total_pool()?
        .checked_sub(winning_pool)
        .ok_or_else(|| SettlementError::overflow("losing pool"))?;
    Ok((winning_pool, losing_pool))
}

/// Fix the payout obligation and residual for `winning`
pub(crate) fn settle(market: &Market, ledger: &Ledger, winning: usize) -> SettlementResult<Resolution> {
    let (winning_pool, losing_pool) = pools(market, winning)?;
    let total_pool = checked_add(winning_pool, losing_pool, "market pool")?;

    let mut owed: Amount = 0;
    for stake in ledger.stakes_on(winning) {
        owed = checked_add(owed, payout_for(stake.amount, winning_pool, losing_pool)?, "payout obligation")?;
    }
    let residual = total_pool
        .checked_sub(owed)
        .ok_or_else(|| SettlementError::overflow("residual"))?;

    Ok(Resolution {
        market_id: market.id,
        winning_option: market.options[winning].clone(),
        winning_pool,
        losing_pool,
        owed,
        residual,
    })
}

impl MarketManager {
    /// Owner-only, once, and not before `end_time`
    pub fn resolve_market(&self, market_id: MarketId, winning_option: &str, caller: &str) -> SettlementResult<Resolution> {
        self.authorize(caller, "resolve markets")?;

        self.with_market(market_id, |slot, now| {
            if now < slot.market.end_time {
                return Err(SettlementError::TooEarly {
                    market_id,
                    end_time: slot.market.end_time,
                    now,
                });
            }
            if slot.market.status == MarketStatus::Resolved {
                return Err(SettlementError::AlreadyResolved(market_id));
            }
            let winning = slot.market.option_index(winning_option)?;

            let resolution = settle(&slot.market, &slot.ledger, winning)?;

            let mut candidate = slot.market.clone();
            candidate.status = MarketStatus::Resolved;
            candidate.winning_option = Some(winning);
            candidate.resolved_at = Some(now);
            candidate.owed = resolution.owed;
            candidate.residual = resolution.residual;
            let pool = checked_add(resolution.winning_pool, resolution.losing_pool, "market pool")?;
            let entry = Transaction::market_resolved(&mut candidate, caller, winning, pool, now);
            self.commit(slot, candidate, Vec::new(), entry)?;

            info!(
                market_id,
                winning = %resolution.winning_option,
                winning_pool = resolution.winning_pool,
                losing_pool = resolution.losing_pool,
                owed = resolution.owed,
                residual = resolution.residual,
                "market resolved"
            );
            Ok(resolution)
        })
    }

    /// Withdraw a winning stake's payout, exactly once
    pub fn claim(&self, market_id: MarketId, participant: &str) -> SettlementResult<Payout> {
        self.with_market(market_id, |slot, now| {
            let winning = match (slot.market.status, slot.market.winning_option) {
                (MarketStatus::Resolved, Some(winning)) => winning,
                _ => return Err(SettlementError::NotResolved(market_id)),
            };

            let mut stake = match slot.ledger.get(participant, winning) {
                Some(stake) if stake.amount > 0 => stake.clone(),
                _ => {
                    return Err(SettlementError::NoStake {
                        market_id,
                        participant: participant.to_string(),
                    })
                }
            };
            if stake.claimed {
                return Err(SettlementError::AlreadyClaimed {
                    market_id,
                    participant: participant.to_string(),
                });
            }

            let (winning_pool, losing_pool) = pools(&slot.market, winning)?;
            let amount = payout_for(stake.amount, winning_pool, losing_pool)?;

            let mut candidate = slot.market.clone();
            candidate.paid_out = checked_add(candidate.paid_out, amount, "paid out")?;
            if candidate.paid_out > candidate.owed {
                return Err(SettlementError::overflow("payouts exceed the fixed obligation"));
            }
            let entry = Transaction::payout(&mut candidate, participant, winning, amount, now);

            let payout = Payout {
                market_id,
                participant: participant.to_string(),
                stake: stake.amount,
                winnings: amount - stake.amount,
                amount,
            };
            stake.claimed = true;
            self.commit(slot, candidate, vec![stake], entry)?;

            info!(market_id, participant = %participant, amount, "payout claimed");
            Ok(payout)
        })
    }

    /// What `participant` would receive if `option` won, at current pools
    pub fn preview_payout(&self, market_id: MarketId, participant: &str, option: &str) -> SettlementResult<Amount> {
        self.with_market(market_id, |slot, _| {
            let idx = slot.market.option_index(option)?;
            let (winning_pool, losing_pool) = pools(&slot.market, idx)?;
            payout_for(slot.ledger.stake(participant, idx), winning_pool, losing_pool)
        })
    }

    /// Residual balance fixed at resolution (zero before)
    pub fn residual(&self, market_id: MarketId) -> SettlementResult<Amount> {
        self.with_market(market_id, |slot, _| Ok(slot.market.residual))
    }

    /// Owner-only: take the residual of a resolved market, exactly once
    pub fn sweep_residual(&self, market_id: MarketId, caller: &str) -> SettlementResult<Amount> {
        self.authorize(caller, "sweep residuals")?;

        self.with_market(market_id, |slot, now| {
            if slot.market.status != MarketStatus::Resolved {
                return Err(SettlementError::NotResolved(market_id));
            }
            if slot.market.residual_swept {
                return Err(SettlementError::AlreadyClaimed {
                    market_id,
                    participant: caller.to_string(),
                });
            }

            let amount = slot.market.residual;
            let mut candidate = slot.market.clone();
            candidate.residual_swept = true;
            let entry = Transaction::residual_swept(&mut candidate, caller, amount, now);
            self.commit(slot, candidate, Vec::new(), entry)?;

            info!(market_id, amount, "residual swept");
            Ok(amount)
        })
    }
}
