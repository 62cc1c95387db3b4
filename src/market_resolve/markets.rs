use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{checked_add, SettlementError, SettlementResult};
use crate::journal::{self, Transaction, GENESIS_HASH};
use crate::ledger::{Ledger, Stake};
use crate::store::{Commit, Store};
use crate::{Amount, MarketId};

/// Pari-mutuel market registry and settlement engine
///
/// Markets live in an append-only table indexed by sequential id. Each
/// market sits behind its own mutex together with its stake ledger, so
/// every bet, close, resolution and claim on a market is serialized with
/// the others on that market and never waits on a different one.

// ============================================================================
// MARKET
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Market {
    /// Sequential identifier, assigned at creation
    pub id: MarketId,

    /// Market question
    pub question: String,

    /// Distinct outcome labels (e.g., ["Yes", "No"])
    pub options: Vec<String>,

    /// Creation timestamp
    pub created_at: u64,

    /// Betting is allowed only while now < end_time
    pub end_time: u64,

    /// Stored status; an `Open` market past `end_time` reads as `Closed`
    pub status: MarketStatus,

    /// Winning option index (None until resolved)
    pub winning_option: Option<usize>,

    /// Resolution timestamp
    pub resolved_at: Option<u64>,

    /// Pool per option
    pub total_stake_per_option: Vec<Amount>,

    /// Total payout obligation, fixed at resolution
    pub owed: Amount,

    /// Paid out to claimants so far
    pub paid_out: Amount,

    /// Truncation dust plus forfeited pools, held for the owner
    pub residual: Amount,

    pub residual_swept: bool,

    pub journal_len: u64,
    pub journal_head: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MarketStatus {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "closed")]
    Closed,
    #[serde(rename = "resolved")]
    Resolved,
}

impl Market {
    pub fn new(id: MarketId, question: String, options: Vec<String>, created_at: u64, end_time: u64) -> Self {
        let option_count = options.len();
        Self {
            id,
            question,
            options,
            created_at,
            end_time,
            status: MarketStatus::Open,
            winning_option: None,
            resolved_at: None,
            total_stake_per_option: vec![0; option_count],
            owed: 0,
            paid_out: 0,
            residual: 0,
            residual_swept: false,
            journal_len: 0,
            journal_head: GENESIS_HASH.to_string(),
        }
    }

    /// Effective state at `now`
    pub fn status_at(&self, now: u64) -> MarketStatus {
        match self.status {
            MarketStatus::Open if now >= self.end_time => MarketStatus::Closed,
            status => status,
        }
    }

    pub fn option_index(&self, label: &str) -> SettlementResult<usize> {
        self.options
            .iter()
            .position(|o| o == label)
            .ok_or_else(|| SettlementError::InvalidOption(format!("'{}' is not an option of market {}", label, self.id)))
    }

    pub fn winning_label(&self) -> Option<&str> {
        self.winning_option.and_then(|idx| self.options.get(idx)).map(|s| s.as_str())
    }

    pub fn total_pool(&self) -> SettlementResult<Amount> {
        self.total_stake_per_option
            .iter()
            .try_fold(0, |acc, v| checked_add(acc, *v, "market pool"))
    }

    pub fn info(&self, now: u64) -> MarketInfo {
        MarketInfo {
            id: self.id,
            question: self.question.clone(),
            options: self.options.clone(),
            end_time: self.end_time,
            state: self.status_at(now),
            winning_option: self.winning_label().map(str::to_string),
            total_stake_per_option: self.total_stake_per_option.clone(),
        }
    }
}

/// Read-only snapshot returned by `get_market_info`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketInfo {
    pub id: MarketId,
    pub question: String,
    pub options: Vec<String>,
    pub end_time: u64,
    pub state: MarketStatus,
    pub winning_option: Option<String>,
    pub total_stake_per_option: Vec<Amount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketStats {
    pub market_id: MarketId,
    pub question: String,
    pub state: MarketStatus,
    pub options: Vec<String>,
    pub pools: Vec<Amount>,
    pub total_pool: Amount,
    /// Share of the pool on each option; display only
    pub implied_odds: Vec<f64>,
    pub bettors: usize,
    pub winning_option: Option<String>,
}

/// One stake as seen from the participant's side
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Position {
    pub market_id: MarketId,
    pub option: String,
    pub amount: Amount,
    pub claimed: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct EngineStats {
    pub markets: u64,
    pub open: u64,
    pub closed: u64,
    pub resolved: u64,
    pub total_staked: u128,
    pub total_paid_out: u128,
    pub residual_held: u128,
    pub residual_swept: u128,
    pub journal_entries: usize,
}

// ============================================================================
// MARKET MANAGER
// ============================================================================

/// A market and the stakes placed on it, locked together
pub(crate) struct MarketSlot {
    pub(crate) market: Market,
    pub(crate) ledger: Ledger,
}

type SharedSlot = Arc<Mutex<MarketSlot>>;

pub struct MarketManager {
    owner: String,
    clock: Arc<dyn Clock>,
    store: Store,
    markets: RwLock<Vec<SharedSlot>>,
    /// Serializes creators so ids stay dense; the registry lock is only
    /// taken for the final push
    create_lock: Mutex<()>,
}

impl MarketManager {
    pub fn open(config: &EngineConfig) -> SettlementResult<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Open (or create) the store and replay every market and stake into memory
    pub fn open_with_clock(config: &EngineConfig, clock: Arc<dyn Clock>) -> SettlementResult<Self> {
        let owner = config.owner.trim().to_string();
        if owner.is_empty() {
            return Err(SettlementError::InvalidInput("owner must not be empty".to_string()));
        }

        let store = Store::open(config)?;
        store.bind_owner(&owner)?;
        let slots = Self::replay(&store)?;

        info!(owner = %owner, markets = slots.len(), "settlement engine ready");
        Ok(Self {
            owner,
            clock,
            store,
            markets: RwLock::new(slots),
            create_lock: Mutex::new(()),
        })
    }

    fn replay(store: &Store) -> SettlementResult<Vec<SharedSlot>> {
        let markets = store.load_markets()?;
        let mut ledgers = Vec::with_capacity(markets.len());
        for (expected, market) in markets.iter().enumerate() {
            if market.id != expected as MarketId {
                return Err(SettlementError::Storage(format!(
                    "market table has a gap: expected id {}, found {}",
                    expected, market.id
                )));
            }
            ledgers.push(Ledger::new(market.id, market.options.len()));
        }

        let mut stake_count = 0usize;
        for stake in store.load_stakes()? {
            let idx = stake.market_id as usize;
            let option_count = markets.get(idx).map(|m| m.options.len()).unwrap_or(0);
            if stake.option >= option_count {
                return Err(SettlementError::Storage(format!(
                    "stake of {} references unknown market/option {}/{}",
                    stake.participant, stake.market_id, stake.option
                )));
            }
            ledgers[idx].put(stake);
            stake_count += 1;
        }

        let mut slots = Vec::with_capacity(markets.len());
        for (market, ledger) in markets.into_iter().zip(ledgers) {
            for (option, total) in market.total_stake_per_option.iter().enumerate() {
                if ledger.option_sum(option) != *total as u128 {
                    return Err(SettlementError::Storage(format!(
                        "market {} option {} total {} diverges from its stakes ({})",
                        market.id,
                        option,
                        total,
                        ledger.option_sum(option)
                    )));
                }
            }
            slots.push(Arc::new(Mutex::new(MarketSlot { market, ledger })));
        }

        debug!(markets = slots.len(), stakes = stake_count, "replayed settlement state");
        Ok(slots)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub(crate) fn authorize(&self, caller: &str, action: &str) -> SettlementResult<()> {
        if caller != self.owner {
            warn!(caller = %caller, action = %action, "rejected privileged call");
            return Err(SettlementError::Unauthorized(format!("{} may not {}", caller, action)));
        }
        Ok(())
    }

    /// Number of markets ever created
    pub fn market_count(&self) -> u64 {
        self.markets.read().unwrap_or_else(PoisonError::into_inner).len() as u64
    }

    fn slot(&self, market_id: MarketId) -> SettlementResult<SharedSlot> {
        let markets = self.markets.read().unwrap_or_else(PoisonError::into_inner);
        usize::try_from(market_id)
            .ok()
            .and_then(|idx| markets.get(idx))
            .cloned()
            .ok_or(SettlementError::NotFound(market_id))
    }

    fn all_slots(&self) -> Vec<SharedSlot> {
        self.markets.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Run `f` with the market locked and the clock read once
    pub(crate) fn with_market<T, F>(&self, market_id: MarketId, f: F) -> SettlementResult<T>
    where
        F: FnOnce(&mut MarketSlot, u64) -> SettlementResult<T>,
    {
        let slot = self.slot(market_id)?;
        let mut guard = slot.lock().map_err(|_| SettlementError::Poisoned)?;
        let now = self.clock.now();
        f(&mut *guard, now)
    }

    /// Persist a candidate market with its touched stakes and journal entry,
    /// then swap it into memory
    pub(crate) fn commit(&self, slot: &mut MarketSlot, market: Market, stakes: Vec<Stake>, entry: Transaction) -> SettlementResult<()> {
        self.store.commit(Commit {
            market: &market,
            stakes: &stakes,
            entries: std::slice::from_ref(&entry),
        })?;
        slot.market = market;
        for stake in stakes {
            slot.ledger.put(stake);
        }
        Ok(())
    }

    // ========================================================================
    // REGISTRY
    // ========================================================================

    /// Create a market open for `duration_secs` from now
    pub fn create_market(&self, question: &str, options: Vec<String>, duration_secs: u64) -> SettlementResult<MarketId> {
        if options.len() < 2 {
            return Err(SettlementError::InvalidInput("Market must have at least 2 options".to_string()));
        }
        if options.iter().any(|o| o.trim().is_empty()) {
            return Err(SettlementError::InvalidInput("Option labels must not be blank".to_string()));
        }
        for (i, option) in options.iter().enumerate() {
            if options[..i].contains(option) {
                return Err(SettlementError::InvalidInput(format!("Duplicate option '{}'", option)));
            }
        }
        if duration_secs == 0 {
            return Err(SettlementError::InvalidInput("Duration must be positive".to_string()));
        }

        let _creating = self.create_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        let end_time = now
            .checked_add(duration_secs)
            .ok_or_else(|| SettlementError::overflow("market end time"))?;

        let id = self.market_count();
        let mut market = Market::new(id, question.to_string(), options, now, end_time);
        let entry = Transaction::market_created(&mut market, "SYSTEM", now);
        self.store.commit(Commit {
            market: &market,
            stakes: &[],
            entries: std::slice::from_ref(&entry),
        })?;

        info!(market_id = id, question = %market.question, options = ?market.options, end_time, "market created");
        let ledger = Ledger::new(id, market.options.len());
        self.markets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(Mutex::new(MarketSlot { market, ledger })));
        Ok(id)
    }

    pub fn get_market_info(&self, market_id: MarketId) -> SettlementResult<MarketInfo> {
        self.with_market(market_id, |slot, now| Ok(slot.market.info(now)))
    }

    pub fn list_markets(&self) -> SettlementResult<Vec<MarketInfo>> {
        let mut infos = Vec::new();
        for slot in self.all_slots() {
            let guard = slot.lock().map_err(|_| SettlementError::Poisoned)?;
            infos.push(guard.market.info(self.clock.now()));
        }
        Ok(infos)
    }

    /// Markets still accepting bets
    pub fn open_markets(&self) -> SettlementResult<Vec<MarketInfo>> {
        Ok(self
            .list_markets()?
            .into_iter()
            .filter(|m| m.state == MarketStatus::Open)
            .collect())
    }

    /// Owner-only early close: stops betting before `end_time`
    pub fn close_market(&self, market_id: MarketId, caller: &str) -> SettlementResult<()> {
        self.authorize(caller, "close markets")?;
        self.with_market(market_id, |slot, now| {
            match slot.market.status_at(now) {
                MarketStatus::Open => {}
                MarketStatus::Closed => return Err(SettlementError::MarketClosed(market_id)),
                MarketStatus::Resolved => return Err(SettlementError::AlreadyResolved(market_id)),
            }

            let mut candidate = slot.market.clone();
            candidate.status = MarketStatus::Closed;
            let entry = Transaction::market_closed(&mut candidate, caller, now);
            self.commit(slot, candidate, Vec::new(), entry)?;

            info!(market_id, "market closed early");
            Ok(())
        })
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Current pool per option; readable in every state
    pub fn pool_totals(&self, market_id: MarketId) -> SettlementResult<Vec<Amount>> {
        self.with_market(market_id, |slot, _| Ok(slot.market.total_stake_per_option.clone()))
    }

    pub fn stake_of(&self, market_id: MarketId, participant: &str, option: &str) -> SettlementResult<Amount> {
        self.with_market(market_id, |slot, _| {
            let idx = slot.market.option_index(option)?;
            Ok(slot.ledger.stake(participant, idx))
        })
    }

    /// Every stake a participant holds, across markets
    pub fn positions(&self, participant: &str) -> SettlementResult<Vec<Position>> {
        let mut positions = Vec::new();
        for slot in self.all_slots() {
            let guard = slot.lock().map_err(|_| SettlementError::Poisoned)?;
            for stake in guard.ledger.stakes_of(participant) {
                positions.push(Position {
                    market_id: guard.market.id,
                    option: guard.market.options[stake.option].clone(),
                    amount: stake.amount,
                    claimed: stake.claimed,
                });
            }
        }
        Ok(positions)
    }

    pub fn market_stats(&self, market_id: MarketId) -> SettlementResult<MarketStats> {
        self.with_market(market_id, |slot, now| {
            let market = &slot.market;
            let total_pool = market.total_pool()?;
            let implied_odds = if total_pool == 0 {
                vec![1.0 / market.options.len() as f64; market.options.len()]
            } else {
                market
                    .total_stake_per_option
                    .iter()
                    .map(|v| *v as f64 / total_pool as f64)
                    .collect()
            };

            Ok(MarketStats {
                market_id,
                question: market.question.clone(),
                state: market.status_at(now),
                options: market.options.clone(),
                pools: market.total_stake_per_option.clone(),
                total_pool,
                implied_odds,
                bettors: slot.ledger.participants().len(),
                winning_option: market.winning_label().map(str::to_string),
            })
        })
    }

    pub fn stats(&self) -> SettlementResult<EngineStats> {
        let mut stats = EngineStats::default();
        for slot in self.all_slots() {
            let guard = slot.lock().map_err(|_| SettlementError::Poisoned)?;
            let market = &guard.market;
            stats.markets += 1;
            match market.status_at(self.clock.now()) {
                MarketStatus::Open => stats.open += 1,
                MarketStatus::Closed => stats.closed += 1,
                MarketStatus::Resolved => stats.resolved += 1,
            }
            stats.total_staked += market.total_stake_per_option.iter().map(|v| *v as u128).sum::<u128>();
            stats.total_paid_out += market.paid_out as u128;
            if market.residual_swept {
                stats.residual_swept += market.residual as u128;
            } else {
                stats.residual_held += market.residual as u128;
            }
        }
        stats.journal_entries = self.store.journal_len();
        Ok(stats)
    }

    // ========================================================================
    // JOURNAL
    // ========================================================================

    pub fn transactions(&self, market_id: MarketId) -> SettlementResult<Vec<Transaction>> {
        self.slot(market_id)?;
        self.store.load_journal(market_id)
    }

    /// Most recent entries across all markets, newest first
    pub fn recent_transactions(&self, limit: usize) -> SettlementResult<Vec<Transaction>> {
        let mut entries = Vec::new();
        for market_id in 0..self.market_count() {
            entries.extend(self.store.load_journal(market_id)?);
        }
        entries.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then(b.market_id.cmp(&a.market_id))
                .then(b.seq.cmp(&a.seq))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    /// Re-walk every market's hash chain and check it ends at the stored head.
    /// Returns the number of entries verified.
    pub fn verify_journal(&self) -> SettlementResult<usize> {
        let mut verified = 0;
        for slot in self.all_slots() {
            let guard = slot.lock().map_err(|_| SettlementError::Poisoned)?;
            let market = &guard.market;
            let entries = self.store.load_journal(market.id)?;
            let head = journal::verify_chain(market.id, &entries)?;
            if head != market.journal_head || entries.len() as u64 != market.journal_len {
                return Err(SettlementError::Storage(format!(
                    "journal of market {} does not end at the recorded head",
                    market.id
                )));
            }
            verified += entries.len();
        }
        debug!(entries = verified, "journal verified");
        Ok(verified)
    }

    pub fn flush(&self) -> SettlementResult<()> {
        self.store.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn options(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    fn manager() -> (MarketManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = MarketManager::open_with_clock(&EngineConfig::temporary("OWNER"), clock.clone()).unwrap();
        (manager, clock)
    }

    #[test]
    fn test_status_at() {
        let market = Market::new(0, "Q".to_string(), options(&["Yes", "No"]), 0, 10);
        assert_eq!(market.status_at(9), MarketStatus::Open);
        assert_eq!(market.status_at(10), MarketStatus::Closed);
    }

    #[test]
    fn test_create_market_sequential_ids() {
        let (manager, _) = manager();
        assert_eq!(manager.market_count(), 0);

        for expected in 0..3 {
            let before = manager.market_count();
            let id = manager.create_market("Q?", options(&["Yes", "No"]), 60).unwrap();
            assert_eq!(id, expected);
            assert_eq!(id, before);
            assert_eq!(manager.market_count(), before + 1);
        }

        let info = manager.get_market_info(1).unwrap();
        assert_eq!(info.end_time, 1_060);
        assert_eq!(info.state, MarketStatus::Open);
        assert_eq!(info.winning_option, None);
    }

    #[test]
    fn test_create_market_rejects_bad_input() {
        let (manager, _) = manager();
        let cases = vec![
            (options(&["Yes"]), 60),
            (options(&["Yes", "Yes"]), 60),
            (options(&["Yes", " "]), 60),
            (options(&["Yes", "No"]), 0),
        ];
        for (opts, duration) in cases {
            let err = manager.create_market("Q?", opts, duration).unwrap_err();
            assert!(matches!(err, SettlementError::InvalidInput(_)));
        }
        assert_eq!(manager.market_count(), 0);
    }

    #[test]
    fn test_unknown_market() {
        let (manager, _) = manager();
        assert_eq!(manager.get_market_info(0).unwrap_err(), SettlementError::NotFound(0));
        assert_eq!(manager.pool_totals(u64::MAX).unwrap_err(), SettlementError::NotFound(u64::MAX));
    }

    #[test]
    fn test_state_closes_with_time() {
        let (manager, clock) = manager();
        let id = manager.create_market("Q?", options(&["Yes", "No"]), 10).unwrap();
        assert_eq!(manager.open_markets().unwrap().len(), 1);

        clock.advance(10);
        assert_eq!(manager.get_market_info(id).unwrap().state, MarketStatus::Closed);
        assert!(manager.open_markets().unwrap().is_empty());
    }

    #[test]
    fn test_close_market_owner_only() {
        let (manager, _) = manager();
        let id = manager.create_market("Q?", options(&["Yes", "No"]), 100).unwrap();

        let err = manager.close_market(id, "MALLORY").unwrap_err();
        assert!(matches!(err, SettlementError::Unauthorized(_)));

        manager.close_market(id, "OWNER").unwrap();
        assert_eq!(manager.get_market_info(id).unwrap().state, MarketStatus::Closed);
        assert_eq!(manager.close_market(id, "OWNER").unwrap_err(), SettlementError::MarketClosed(id));
    }

    #[test]
    fn test_journal_records_creation() {
        let (manager, _) = manager();
        let id = manager.create_market("Q?", options(&["Yes", "No"]), 100).unwrap();
        let entries = manager.transactions(id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tx_type, journal::TxType::MarketCreated);
        assert_eq!(manager.verify_journal().unwrap(), 1);
    }

    #[test]
    fn test_stats_empty_market() {
        let (manager, _) = manager();
        let id = manager.create_market("Q?", options(&["A", "B", "C", "D"]), 100).unwrap();
        let stats = manager.market_stats(id).unwrap();
        assert_eq!(stats.total_pool, 0);
        assert_eq!(stats.implied_odds, vec![0.25; 4]);
        assert_eq!(stats.bettors, 0);
    }
}
