//! Core entities: profiles, trade intents, contests, candles

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::achievements::AchievementId;
use crate::rank::{self, RankTier};

/// XP needed per level; `level = xp / 1000 + 1`
pub const XP_PER_LEVEL: u64 = 1000;

/// Leverage applied when the caller does not override it
pub const DEFAULT_LEVERAGE: Decimal = dec!(5);

/// Balance a fresh profile starts with
pub const STARTING_BALANCE: Decimal = dec!(10000);

/// SELL rounds allowed per contest participant
pub const SELL_CAP: u32 = 2;

/// Trade direction chosen for a settlement or contest round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Position {
    Buy,
    Sell,
    Hold,
}

impl Position {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        }
    }
}

/// A single OHLCV candle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// A user's lifetime progression state.
///
/// Created on first contact, mutated only through settlement, never deleted.
/// `level` and rank tier are derived from the totals rather than stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub username: String,
    pub balance: Decimal,
    pub total_profit: Decimal,
    pub xp: u64,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub best_trade: Decimal,
    pub worst_trade: Decimal,
    pub current_streak: u32,
    pub longest_streak: u32,
    /// Monotonically growing: ids are only ever inserted
    pub achievements: BTreeSet<AchievementId>,
    pub created_at: i64,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            balance: STARTING_BALANCE,
            total_profit: Decimal::ZERO,
            xp: 0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            best_trade: Decimal::ZERO,
            worst_trade: Decimal::ZERO,
            current_streak: 0,
            longest_streak: 0,
            achievements: BTreeSet::new(),
            created_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn level(&self) -> u64 {
        self.xp / XP_PER_LEVEL + 1
    }

    pub fn rank(&self) -> &'static RankTier {
        rank::rank_for(self.total_profit)
    }
}

/// What the caller wants settled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    pub position: Position,
    pub bet_amount: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    #[serde(default = "default_leverage")]
    pub leverage: Decimal,
}

fn default_leverage() -> Decimal {
    DEFAULT_LEVERAGE
}

impl TradeIntent {
    /// Intent with the default 5x leverage
    pub fn new(
        position: Position,
        bet_amount: Decimal,
        entry_price: Decimal,
        exit_price: Decimal,
    ) -> Self {
        Self {
            position,
            bet_amount,
            entry_price,
            exit_price,
            leverage: DEFAULT_LEVERAGE,
        }
    }
}

/// Immutable log entry, created exactly once per settled trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub user_id: String,
    pub position: Position,
    pub bet_amount: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub leverage: Decimal,
    pub timestamp: i64,
}

/// Where a participant stands in the per-round cycle.
///
/// The chart-playback stage between bet submission and resolution is
/// presentation-side; the store only ever sees these three states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    /// Waiting for a bet; the participant may park here indefinitely
    Betting,
    /// A round resolved; awaiting the explicit next-round action
    Result,
    /// Out of rounds or sells; no further mutation allowed
    Terminal,
}

/// A user's per-contest state, distinct from their global profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContestParticipant {
    pub user_id: String,
    pub username: String,
    /// Cumulative over all resolved rounds, starts at 0
    pub profit: Decimal,
    pub rounds_played: u32,
    pub sells_used: u32,
    /// Epoch ms; breaks leaderboard ties
    pub joined_at: i64,
    pub phase: RoundPhase,
}

impl ContestParticipant {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>, joined_at: i64) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            profit: Decimal::ZERO,
            rounds_played: 0,
            sells_used: 0,
            joined_at,
            phase: RoundPhase::Betting,
        }
    }

    pub fn is_finished(&self, max_rounds: u32) -> bool {
        self.rounds_played >= max_rounds || self.sells_used >= SELL_CAP
    }

    /// Effective balance inside the contest
    pub fn balance(&self, starting_balance: Decimal) -> Decimal {
        starting_balance + self.profit
    }
}

/// Contest header, immutable after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContestMeta {
    /// Short human-entry code, e.g. "K4WN7Q"
    pub contest_id: String,
    pub host_id: String,
    pub title: String,
    pub starting_balance: Decimal,
    pub max_rounds: u32,
    pub created_at: i64,
}

/// The assembled contest aggregate: header plus current participants
#[derive(Debug, Clone, Serialize)]
pub struct Contest {
    pub meta: ContestMeta,
    pub participants: HashMap<String, ContestParticipant>,
}

impl Contest {
    pub fn participant(&self, user_id: &str) -> Option<&ContestParticipant> {
        self.participants.get(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_derivation() {
        let mut profile = UserProfile::new("u1", "ava");
        assert_eq!(profile.level(), 1);
        profile.xp = 999;
        assert_eq!(profile.level(), 1);
        profile.xp = 1000;
        assert_eq!(profile.level(), 2);
        profile.xp = 5250;
        assert_eq!(profile.level(), 6);
    }

    #[test]
    fn test_participant_finished_by_rounds_or_sells() {
        let mut p = ContestParticipant::new("u1", "ava", 0);
        assert!(!p.is_finished(5));
        p.rounds_played = 5;
        assert!(p.is_finished(5));

        let mut p = ContestParticipant::new("u2", "bo", 0);
        p.sells_used = SELL_CAP;
        assert!(p.is_finished(100));
    }

    #[test]
    fn test_position_serde_uses_wire_names() {
        assert_eq!(serde_json::to_string(&Position::Buy).unwrap(), "\"BUY\"");
        let p: Position = serde_json::from_str("\"SELL\"").unwrap();
        assert_eq!(p, Position::Sell);
    }
}
