// ============================================================================
// Persistent Tables - sled
// ============================================================================
//
// Trees:
//   markets  id(be u64)                          -> Market   (append-only)
//   stakes   id(be u64) | option(be u64) | who   -> Stake
//   journal  id(be u64) | seq(be u64)            -> Transaction
//   meta     "owner"                             -> owner identity
//
// Values are bincode-encoded. Big-endian keys keep iteration in id/seq
// order. A mutation is one multi-tree transaction: the market record, the
// stakes it touches and its journal entry land together or not at all.
//
// ============================================================================

use sled::transaction::{TransactionError, TransactionResult};
use sled::{Transactional, Tree};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{SettlementError, SettlementResult};
use crate::journal::Transaction;
use crate::ledger::Stake;
use crate::market_resolve::Market;
use crate::MarketId;

const OWNER_KEY: &[u8] = b"owner";

pub struct Store {
    db: sled::Db,
    markets: Tree,
    stakes: Tree,
    journal: Tree,
    meta: Tree,
    flush_every_write: bool,
}

/// Everything one mutation writes
pub struct Commit<'a> {
    pub market: &'a Market,
    pub stakes: &'a [Stake],
    pub entries: &'a [Transaction],
}

impl Store {
    pub fn open(config: &EngineConfig) -> SettlementResult<Self> {
        let db = if config.temporary {
            sled::Config::new().temporary(true).open()?
        } else {
            sled::Config::new().path(&config.data_dir).open()?
        };

        let store = Self {
            markets: db.open_tree("markets")?,
            stakes: db.open_tree("stakes")?,
            journal: db.open_tree("journal")?,
            meta: db.open_tree("meta")?,
            db,
            flush_every_write: config.flush_every_write,
        };
        debug!(temporary = config.temporary, dir = %config.data_dir.display(), "settlement store opened");
        Ok(store)
    }

    /// Record the owner on first open; later opens must present the same one
    pub fn bind_owner(&self, owner: &str) -> SettlementResult<()> {
        match self.meta.get(OWNER_KEY)? {
            Some(stored) if &stored[..] != owner.as_bytes() => Err(SettlementError::Unauthorized(format!(
                "store is owned by {}",
                String::from_utf8_lossy(&stored)
            ))),
            Some(_) => Ok(()),
            None => {
                self.meta.insert(OWNER_KEY, owner.as_bytes())?;
                self.meta.flush()?;
                Ok(())
            }
        }
    }

    pub fn load_markets(&self) -> SettlementResult<Vec<Market>> {
        let mut markets = Vec::new();
        for row in self.markets.iter() {
            let (_, value) = row?;
            markets.push(bincode::deserialize::<Market>(&value)?);
        }
        Ok(markets)
    }

    pub fn load_stakes(&self) -> SettlementResult<Vec<Stake>> {
        let mut stakes = Vec::new();
        for row in self.stakes.iter() {
            let (_, value) = row?;
            stakes.push(bincode::deserialize::<Stake>(&value)?);
        }
        Ok(stakes)
    }

    /// Journal of one market in `seq` order
    pub fn load_journal(&self, market_id: MarketId) -> SettlementResult<Vec<Transaction>> {
        let mut entries = Vec::new();
        for row in self.journal.scan_prefix(market_id.to_be_bytes()) {
            let (_, value) = row?;
            entries.push(bincode::deserialize::<Transaction>(&value)?);
        }
        Ok(entries)
    }

    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    /// Write a market record, its touched stakes and journal entries atomically
    pub fn commit(&self, commit: Commit<'_>) -> SettlementResult<()> {
        let market_key = commit.market.id.to_be_bytes();
        let market_value = bincode::serialize(commit.market)?;

        let mut stake_rows = Vec::with_capacity(commit.stakes.len());
        for stake in commit.stakes {
            stake_rows.push((stake_key(stake), bincode::serialize(stake)?));
        }

        let mut journal_rows = Vec::with_capacity(commit.entries.len());
        for tx in commit.entries {
            journal_rows.push((journal_key(tx.market_id, tx.seq), bincode::serialize(tx)?));
        }

        let result: TransactionResult<()> = (&self.markets, &self.stakes, &self.journal).transaction(
            |(markets, stakes, journal)| {
                markets.insert(&market_key[..], market_value.as_slice())?;
                for (key, value) in &stake_rows {
                    stakes.insert(key.as_slice(), value.as_slice())?;
                }
                for (key, value) in &journal_rows {
                    journal.insert(key.as_slice(), value.as_slice())?;
                }
                Ok(())
            },
        );

        match result {
            Ok(()) => {}
            Err(TransactionError::Storage(e)) => return Err(e.into()),
            Err(TransactionError::Abort(())) => {
                return Err(SettlementError::Storage("transaction aborted".to_string()))
            }
        }

        if self.flush_every_write {
            self.db.flush()?;
        }
        Ok(())
    }

    pub fn flush(&self) -> SettlementResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn stake_key(stake: &Stake) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + stake.participant.len());
    key.extend_from_slice(&stake.market_id.to_be_bytes());
    key.extend_from_slice(&(stake.option as u64).to_be_bytes());
    key.extend_from_slice(stake.participant.as_bytes());
    key
}

fn journal_key(market_id: MarketId, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&market_id.to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_market(id: MarketId) -> Market {
        Market::new(id, "Q?".to_string(), vec!["Yes".to_string(), "No".to_string()], 0, 10)
    }

    #[test]
    fn test_commit_and_reload() {
        let store = Store::open(&EngineConfig::temporary("OWNER")).unwrap();

        let mut market = sample_market(0);
        let created = Transaction::market_created(&mut market, "OWNER", 0);
        let mut stake = Stake::new(0, "ALICE", 1);
        stake.amount = 40;
        market.total_stake_per_option[1] = 40;
        let bet = Transaction::bet(&mut market, "ALICE", 1, 40, 1);

        store
            .commit(Commit { market: &market, stakes: &[stake.clone()], entries: &[created, bet] })
            .unwrap();

        let markets = store.load_markets().unwrap();
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].total_stake_per_option, vec![0, 40]);
        assert_eq!(store.load_stakes().unwrap(), vec![stake]);
        assert_eq!(store.load_journal(0).unwrap().len(), 2);
        assert!(store.load_journal(1).unwrap().is_empty());
    }

    #[test]
    fn test_owner_binding() {
        let store = Store::open(&EngineConfig::temporary("OWNER")).unwrap();
        store.bind_owner("OWNER").unwrap();
        store.bind_owner("OWNER").unwrap();
        let err = store.bind_owner("MALLORY").unwrap_err();
        assert!(matches!(err, SettlementError::Unauthorized(_)));
    }

    #[test]
    fn test_journal_keys_order_by_seq() {
        assert!(journal_key(1, 2) < journal_key(1, 10));
        assert!(journal_key(1, u64::MAX) < journal_key(2, 0));
    }
}
