// ============================================================================
// Market Resolve Module - Market Lifecycle & Settlement
// ============================================================================
//
// This module contains the core pari-mutuel settlement engine:
//   - markets: registry, lifecycle state, reads and the journal surface
//   - staking: bet validation and recording while a market is open
//   - payout: resolution, proportional payouts and residual accounting
//
// Lifecycle:  Open --(end_time passes / owner close)--> Closed --(owner resolve)--> Resolved
//
// ============================================================================

pub mod markets;
pub mod staking;
pub mod payout;

pub use markets::*;
pub use staking::*;
pub use payout::*;
