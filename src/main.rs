// BlackBook Settlement Engine - Inspector
// Opens the settlement store, prints every market and checks the journal

use serde::Serialize;
use tracing::{error, info, Level};

use blackbook_settlement::{EngineConfig, MarketInfo, MarketManager, SettlementError, SettlementResult};

/// MarketInfo with a human-readable deadline
#[derive(Serialize)]
struct MarketView {
    #[serde(flatten)]
    info: MarketInfo,
    end_time_utc: Option<String>,
}

impl From<MarketInfo> for MarketView {
    fn from(info: MarketInfo) -> Self {
        let end_time_utc = i64::try_from(info.end_time)
            .ok()
            .and_then(|secs| chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0))
            .map(|t| t.to_rfc3339());
        Self { info, end_time_utc }
    }
}

fn main() {
    let level = std::env::var("BLACKBOOK_LOG")
        .ok()
        .and_then(|v| v.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    if let Err(e) = run() {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> SettlementResult<()> {
    let config = EngineConfig::from_env()?;
    let manager = MarketManager::open(&config)?;

    info!(owner = %manager.owner(), market_count = manager.market_count(), "📒 settlement store loaded");

    for info in manager.list_markets()? {
        let view = MarketView::from(info);
        let json = serde_json::to_string_pretty(&view)
            .map_err(|e| SettlementError::Storage(format!("Failed to render market: {}", e)))?;
        println!("{}", json);
    }

    let stats = manager.stats()?;
    info!(
        open = stats.open,
        closed = stats.closed,
        resolved = stats.resolved,
        total_staked = %stats.total_staked,
        total_paid_out = %stats.total_paid_out,
        residual_held = %stats.residual_held,
        "📊 engine stats"
    );

    let verified = manager.verify_journal()?;
    info!(entries = verified, "✅ journal verified");
    Ok(())
}
