// Engine configuration

use std::path::PathBuf;

use crate::error::{SettlementError, SettlementResult};

pub const DEFAULT_DATA_DIR: &str = "data/settlement";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// The single identity allowed to close, resolve and sweep markets
    pub owner: String,
    /// sled directory (ignored when `temporary`)
    pub data_dir: PathBuf,
    /// Keep everything in memory and discard on drop
    pub temporary: bool,
    /// Flush sled after every committed mutation
    pub flush_every_write: bool,
}

impl EngineConfig {
    pub fn new(owner: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            owner: owner.into(),
            data_dir: data_dir.into(),
            temporary: false,
            flush_every_write: false,
        }
    }

    /// In-memory store, used by tests and dry runs
    pub fn temporary(owner: impl Into<String>) -> Self {
        Self {
            temporary: true,
            ..Self::new(owner, DEFAULT_DATA_DIR)
        }
    }

    /// Load from the process environment (and `.env` if present)
    ///
    /// * `BLACKBOOK_OWNER` - required
    /// * `BLACKBOOK_DATA_DIR` - defaults to `data/settlement`
    /// * `BLACKBOOK_TEMPORARY` - `true`/`1` for an in-memory store
    /// * `BLACKBOOK_FLUSH_EVERY_WRITE` - `true`/`1`
    pub fn from_env() -> SettlementResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> SettlementResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let owner = lookup("BLACKBOOK_OWNER")
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .ok_or_else(|| SettlementError::InvalidInput("BLACKBOOK_OWNER is not set".to_string()))?;

        let data_dir = lookup("BLACKBOOK_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());

        Ok(Self {
            owner,
            data_dir: PathBuf::from(data_dir),
            temporary: lookup("BLACKBOOK_TEMPORARY").map(|v| is_enabled(&v)).unwrap_or(false),
            flush_every_write: lookup("BLACKBOOK_FLUSH_EVERY_WRITE").map(|v| is_enabled(&v)).unwrap_or(false),
        })
    }
}

fn is_enabled(value: &str) -> bool {
    value == "true" || value == "1"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[("BLACKBOOK_OWNER", "L1_OWNER")])).unwrap();
        assert_eq!(config.owner, "L1_OWNER");
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert!(!config.temporary);
        assert!(!config.flush_every_write);
    }

    #[test]
    fn test_flags_and_dir() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("BLACKBOOK_OWNER", " L1_OWNER "),
            ("BLACKBOOK_DATA_DIR", "/tmp/bb"),
            ("BLACKBOOK_TEMPORARY", "1"),
            ("BLACKBOOK_FLUSH_EVERY_WRITE", "true"),
        ]))
        .unwrap();
        assert_eq!(config.owner, "L1_OWNER");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/bb"));
        assert!(config.temporary);
        assert!(config.flush_every_write);
    }

    #[test]
    fn test_missing_owner() {
        let err = EngineConfig::from_lookup(lookup(&[("BLACKBOOK_OWNER", "   ")])).unwrap_err();
        assert!(matches!(err, SettlementError::InvalidInput(_)));
    }
}
