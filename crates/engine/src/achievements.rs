//! Achievement catalog — one-time unlocks over profile milestones
//!
//! Predicates are total functions of the profile; the unlock pass checks
//! "already held" before testing, so re-running it is a no-op.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::UserProfile;

/// Display rarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

/// Stable achievement identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementId {
    FirstTrade,
    TenTrades,
    HundredTrades,
    FirstWin,
    HotStreak,
    Unstoppable,
    BigWin,
    HighRoller,
    Comeback,
    Millionaire,
}

impl AchievementId {
    pub fn label(&self) -> &'static str {
        match self {
            Self::FirstTrade => "First Steps",
            Self::TenTrades => "Finding a Rhythm",
            Self::HundredTrades => "Market Veteran",
            Self::FirstWin => "On the Board",
            Self::HotStreak => "Hot Streak",
            Self::Unstoppable => "Unstoppable",
            Self::BigWin => "Whale Bite",
            Self::HighRoller => "High Roller",
            Self::Comeback => "The Comeback",
            Self::Millionaire => "Millionaire's Club",
        }
    }

    /// Whether the profile currently satisfies this achievement.
    fn is_met(&self, p: &UserProfile) -> bool {
        match self {
            Self::FirstTrade => p.total_trades >= 1,
            Self::TenTrades => p.total_trades >= 10,
            Self::HundredTrades => p.total_trades >= 100,
            Self::FirstWin => p.winning_trades >= 1,
            Self::HotStreak => p.current_streak >= 5,
            Self::Unstoppable => p.longest_streak >= 10,
            Self::BigWin => p.best_trade >= dec!(1000),
            Self::HighRoller => p.total_profit >= dec!(10000),
            Self::Comeback => p.worst_trade <= dec!(-500) && p.total_profit > Decimal::ZERO,
            Self::Millionaire => p.total_profit >= dec!(1000000),
        }
    }
}

/// Catalog entry: id plus reward metadata
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Achievement {
    pub id: AchievementId,
    pub rarity: Rarity,
    pub xp_reward: u64,
}

pub const ACHIEVEMENTS: [Achievement; 10] = [
    Achievement { id: AchievementId::FirstTrade, rarity: Rarity::Common, xp_reward: 50 },
    Achievement { id: AchievementId::TenTrades, rarity: Rarity::Common, xp_reward: 100 },
    Achievement { id: AchievementId::HundredTrades, rarity: Rarity::Rare, xp_reward: 500 },
    Achievement { id: AchievementId::FirstWin, rarity: Rarity::Common, xp_reward: 50 },
    Achievement { id: AchievementId::HotStreak, rarity: Rarity::Rare, xp_reward: 200 },
    Achievement { id: AchievementId::Unstoppable, rarity: Rarity::Epic, xp_reward: 500 },
    Achievement { id: AchievementId::BigWin, rarity: Rarity::Rare, xp_reward: 250 },
    Achievement { id: AchievementId::HighRoller, rarity: Rarity::Epic, xp_reward: 500 },
    Achievement { id: AchievementId::Comeback, rarity: Rarity::Rare, xp_reward: 300 },
    Achievement { id: AchievementId::Millionaire, rarity: Rarity::Legendary, xp_reward: 2000 },
];

/// Evaluate every catalog entry the profile does not already hold, insert the
/// newly met ids, and credit their XP. Returns the new unlocks in catalog
/// order.
pub fn unlock(profile: &mut UserProfile) -> Vec<AchievementId> {
    let mut unlocked = Vec::new();

    for entry in &ACHIEVEMENTS {
        if profile.achievements.contains(&entry.id) {
            continue;
        }
        if entry.id.is_met(profile) {
            profile.achievements.insert(entry.id);
            profile.xp += entry.xp_reward;
            unlocked.push(entry.id);
        }
    }

    unlocked
}
