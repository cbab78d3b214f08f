//! Trade settlement — the pure core of the progression system
//!
//! `settle_trade` turns an intent into an updated profile, an immutable trade
//! record, and any newly unlocked achievements. No I/O happens here;
//! persisting the result is the caller's job, so a validation failure can
//! never leave partial state.

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::achievements::{self, AchievementId};
use crate::error::{EngineError, EngineResult};
use crate::types::{Position, TradeIntent, TradeRecord, UserProfile};

/// Flat XP per settled trade: win / loss / break-even
const XP_WIN: u64 = 100;
const XP_LOSS: u64 = 10;
const XP_FLAT: u64 = 25;

/// Everything produced by settling one trade
#[derive(Debug, Clone)]
pub struct Settlement {
    pub profile: UserProfile,
    pub record: TradeRecord,
    pub unlocked: Vec<AchievementId>,
}

/// Leveraged P&L of a single trade, rounded to cents (half away from zero).
///
/// BUY profits when the price rises, SELL when it falls, HOLD is always 0.
pub fn compute_pnl(
    position: Position,
    bet_amount: Decimal,
    entry_price: Decimal,
    exit_price: Decimal,
    leverage: Decimal,
) -> Decimal {
    let pct_move = match position {
        Position::Buy => (exit_price - entry_price) / entry_price,
        Position::Sell => (entry_price - exit_price) / entry_price,
        Position::Hold => return Decimal::ZERO,
    };

    (bet_amount * pct_move * leverage)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn validate(intent: &TradeIntent) -> EngineResult<()> {
    if intent.bet_amount <= Decimal::ZERO {
        return Err(EngineError::Validation(format!(
            "bet_amount must be positive, got {}",
            intent.bet_amount
        )));
    }
    if intent.entry_price <= Decimal::ZERO || intent.exit_price <= Decimal::ZERO {
        return Err(EngineError::Validation(format!(
            "prices must be positive, got entry {} exit {}",
            intent.entry_price, intent.exit_price
        )));
    }
    if intent.leverage <= Decimal::ZERO {
        return Err(EngineError::Validation(format!(
            "leverage must be positive, got {}",
            intent.leverage
        )));
    }
    Ok(())
}

/// Settle one trade against a profile.
///
/// Mutation order matters for the streak and best/worst bookkeeping:
/// balance and totals first, then win/loss counters and XP, then extremes,
/// then the achievement pass (which may add more XP).
pub fn settle_trade(profile: &UserProfile, intent: &TradeIntent) -> EngineResult<Settlement> {
    validate(intent)?;

    let pnl = compute_pnl(
        intent.position,
        intent.bet_amount,
        intent.entry_price,
        intent.exit_price,
        intent.leverage,
    );

    let mut updated = profile.clone();
    updated.balance += pnl;
    updated.total_profit += pnl;
    updated.total_trades += 1;

    if pnl > Decimal::ZERO {
        updated.winning_trades += 1;
        updated.current_streak += 1;
        updated.longest_streak = updated.longest_streak.max(updated.current_streak);
        updated.xp += XP_WIN;
    } else if pnl < Decimal::ZERO {
        updated.losing_trades += 1;
        updated.current_streak = 0;
        updated.xp += XP_LOSS;
    } else {
        updated.xp += XP_FLAT;
    }

    updated.best_trade = updated.best_trade.max(pnl);
    updated.worst_trade = updated.worst_trade.min(pnl);

    let unlocked = achievements::unlock(&mut updated);

    let record = TradeRecord {
        user_id: profile.user_id.clone(),
        position: intent.position,
        bet_amount: intent.bet_amount,
        entry_price: intent.entry_price,
        exit_price: intent.exit_price,
        pnl,
        leverage: intent.leverage,
        timestamp: Utc::now().timestamp_millis(),
    };

    debug!(
        user = %profile.user_id,
        position = intent.position.label(),
        pnl = %pnl,
        unlocked = unlocked.len(),
        "trade settled"
    );

    Ok(Settlement {
        profile: updated,
        record,
        unlocked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn intent(position: Position, bet: Decimal, entry: Decimal, exit: Decimal) -> TradeIntent {
        TradeIntent::new(position, bet, entry, exit)
    }

    #[test]
    fn test_buy_pnl_canonical() {
        // 10% move at 5x on a 1000 bet
        let pnl = compute_pnl(Position::Buy, dec!(1000), dec!(100), dec!(110), dec!(5));
        assert_eq!(pnl, dec!(500.00));
    }

    #[test]
    fn test_sell_pnl_mirrors_buy() {
        let pnl = compute_pnl(Position::Sell, dec!(1000), dec!(100), dec!(110), dec!(5));
        assert_eq!(pnl, dec!(-500.00));
    }

    #[test]
    fn test_hold_pnl_is_zero() {
        let pnl = compute_pnl(Position::Hold, dec!(1000), dec!(100), dec!(9999), dec!(5));
        assert_eq!(pnl, Decimal::ZERO);
    }

    #[test]
    fn test_pnl_rounds_half_away_from_zero() {
        // 100 * (1/3) * 5 = 166.666... → 166.67
        let pnl = compute_pnl(Position::Buy, dec!(100), dec!(3), dec!(4), dec!(5));
        assert_eq!(pnl, dec!(166.67));

        // symmetric on the negative side
        let pnl = compute_pnl(Position::Sell, dec!(100), dec!(3), dec!(4), dec!(5));
        assert_eq!(pnl, dec!(-166.67));

        // exact midpoint: 0.125 rounds to 0.13, not 0.12
        let pnl = compute_pnl(Position::Buy, dec!(0.25), dec!(100), dec!(110), dec!(1));
        assert_eq!(pnl, dec!(0.03));
    }

    #[test]
    fn test_rejects_bad_inputs_before_any_mutation() {
        let profile = UserProfile::new("u1", "ava");

        let bad_bet = intent(Position::Buy, dec!(0), dec!(100), dec!(110));
        assert!(matches!(
            settle_trade(&profile, &bad_bet),
            Err(EngineError::Validation(_))
        ));

        let bad_price = intent(Position::Buy, dec!(100), dec!(-1), dec!(110));
        assert!(matches!(
            settle_trade(&profile, &bad_price),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_winning_trade_mutations() {
        let profile = UserProfile::new("u1", "ava");
        let settlement =
            settle_trade(&profile, &intent(Position::Buy, dec!(1000), dec!(100), dec!(110)))
                .unwrap();

        let p = &settlement.profile;
        assert_eq!(p.balance, dec!(10500.00));
        assert_eq!(p.total_profit, dec!(500.00));
        assert_eq!(p.total_trades, 1);
        assert_eq!(p.winning_trades, 1);
        assert_eq!(p.losing_trades, 0);
        assert_eq!(p.current_streak, 1);
        assert_eq!(p.longest_streak, 1);
        assert_eq!(p.best_trade, dec!(500.00));
        assert_eq!(p.worst_trade, Decimal::ZERO);
        // 100 trade XP + FirstTrade(50) + FirstWin(50)
        assert_eq!(p.xp, 200);
        assert_eq!(settlement.unlocked.len(), 2);
        assert_eq!(settlement.record.pnl, dec!(500.00));
    }

    #[test]
    fn test_losing_trade_resets_streak() {
        let profile = UserProfile::new("u1", "ava");
        let won =
            settle_trade(&profile, &intent(Position::Buy, dec!(1000), dec!(100), dec!(110)))
                .unwrap();
        let lost = settle_trade(
            &won.profile,
            &intent(Position::Buy, dec!(1000), dec!(100), dec!(90)),
        )
        .unwrap();

        let p = &lost.profile;
        assert_eq!(p.current_streak, 0);
        assert_eq!(p.longest_streak, 1);
        assert_eq!(p.losing_trades, 1);
        assert_eq!(p.worst_trade, dec!(-500.00));
        assert_eq!(p.total_profit, Decimal::ZERO);
    }

    #[test]
    fn test_hold_awards_flat_xp() {
        let profile = UserProfile::new("u1", "ava");
        let settlement =
            settle_trade(&profile, &intent(Position::Hold, dec!(100), dec!(100), dec!(200)))
                .unwrap();
        // 25 flat + FirstTrade(50); a HOLD is still a trade
        assert_eq!(settlement.profile.xp, 75);
        assert_eq!(settlement.profile.winning_trades, 0);
        assert_eq!(settlement.profile.losing_trades, 0);
    }

    #[test]
    fn test_total_profit_is_order_independent() {
        let intents = [
            intent(Position::Buy, dec!(500), dec!(100), dec!(103)),
            intent(Position::Sell, dec!(200), dec!(50), dec!(55)),
            intent(Position::Hold, dec!(100), dec!(10), dec!(20)),
            intent(Position::Buy, dec!(1000), dec!(200), dec!(190)),
        ];

        let forward = intents.iter().fold(UserProfile::new("u1", "ava"), |p, i| {
            settle_trade(&p, i).unwrap().profile
        });
        let reverse = intents
            .iter()
            .rev()
            .fold(UserProfile::new("u1", "ava"), |p, i| {
                settle_trade(&p, i).unwrap().profile
            });

        let expected: Decimal = intents
            .iter()
            .map(|i| compute_pnl(i.position, i.bet_amount, i.entry_price, i.exit_price, i.leverage))
            .sum();

        assert_eq!(forward.total_profit, expected);
        assert_eq!(reverse.total_profit, expected);
    }

    #[test]
    fn test_rank_moves_with_total_profit() {
        let profile = UserProfile::new("u1", "ava");
        assert_eq!(profile.rank().name, "Apprentice Trader");

        let lost = settle_trade(&profile, &intent(Position::Buy, dec!(100), dec!(100), dec!(90)))
            .unwrap();
        assert_eq!(lost.profile.rank().name, "Novice Trader");
    }
}
