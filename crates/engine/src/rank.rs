//! Rank tiers — seven contiguous profit bands mapping to trader titles

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// One profit band. `min_profit` is inclusive, `max_profit` exclusive;
/// the first tier is unbounded below and the last unbounded above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankTier {
    pub tier: u8,
    pub name: &'static str,
    pub min_profit: Decimal,
    pub max_profit: Decimal,
}

/// Ordered, contiguous, and exhaustive over every possible total profit.
/// Apprentice starts at exactly 0: break-even counts as tier 1.
pub const RANK_TIERS: [RankTier; 7] = [
    RankTier { tier: 0, name: "Novice Trader", min_profit: Decimal::MIN, max_profit: Decimal::ZERO },
    RankTier { tier: 1, name: "Apprentice Trader", min_profit: Decimal::ZERO, max_profit: dec!(1000) },
    RankTier { tier: 2, name: "Skilled Trader", min_profit: dec!(1000), max_profit: dec!(10000) },
    RankTier { tier: 3, name: "Expert Trader", min_profit: dec!(10000), max_profit: dec!(50000) },
    RankTier { tier: 4, name: "Master Trader", min_profit: dec!(50000), max_profit: dec!(250000) },
    RankTier { tier: 5, name: "Elite Trader", min_profit: dec!(250000), max_profit: dec!(1000000) },
    RankTier { tier: 6, name: "Legendary Trader", min_profit: dec!(1000000), max_profit: Decimal::MAX },
];

/// The unique tier whose range contains `total_profit`. Linear scan over the
/// 7-entry table; the last tier's upper bound is treated as inclusive so
/// Decimal::MAX itself still resolves.
pub fn rank_for(total_profit: Decimal) -> &'static RankTier {
    RANK_TIERS
        .iter()
        .find(|t| total_profit >= t.min_profit && total_profit < t.max_profit)
        .unwrap_or(&RANK_TIERS[RANK_TIERS.len() - 1])
}
