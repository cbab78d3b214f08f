//! Trade Arena engine — settlement, progression, and contest lifecycle
//!
//! Provides:
//! - Pure trade settlement: P&L, XP, rank tiers, achievements
//! - Multiplayer contests with per-key optimistic concurrency
//! - Leaderboard derivation
//! - Binance candle client with a deterministic synthetic fallback

pub mod achievements;
pub mod api;
pub mod contest;
pub mod error;
pub mod leaderboard;
pub mod ledger;
pub mod progression;
pub mod rank;
pub mod synthetic;
pub mod types;

// Re-exports for convenience
pub use achievements::{Achievement, AchievementId, Rarity, ACHIEVEMENTS};
pub use api::BinanceClient;
pub use contest::{ContestEngine, RoundOutcome, CONTEST_LEVERAGE};
pub use error::{EngineError, EngineResult};
pub use leaderboard::{is_complete, leader, standings, LeaderboardEntry};
pub use ledger::{compute_pnl, settle_trade, Settlement};
pub use progression::ProgressionEngine;
pub use rank::{rank_for, RankTier, RANK_TIERS};
pub use synthetic::{interval_ms, synthetic_candles, PriceFeed};
pub use types::*;
