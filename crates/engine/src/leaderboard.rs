//! Leaderboard derivation — pure, recomputed on demand, never stored

use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::{Contest, ContestParticipant};

/// One leaderboard row
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub username: String,
    pub profit: Decimal,
    pub balance: Decimal,
    pub rounds_played: u32,
    pub finished: bool,
}

/// Current standings: profit descending, ties broken by who joined first.
pub fn standings(contest: &Contest) -> Vec<LeaderboardEntry> {
    let mut rows: Vec<&ContestParticipant> = contest.participants.values().collect();
    rows.sort_by(|a, b| b.profit.cmp(&a.profit).then(a.joined_at.cmp(&b.joined_at)));

    rows.into_iter()
        .enumerate()
        .map(|(i, p)| LeaderboardEntry {
            rank: i + 1,
            user_id: p.user_id.clone(),
            username: p.username.clone(),
            profit: p.profit,
            balance: p.balance(contest.meta.starting_balance),
            rounds_played: p.rounds_played,
            finished: p.is_finished(contest.meta.max_rounds),
        })
        .collect()
}

/// The participant currently on top, if anyone has joined.
pub fn leader(contest: &Contest) -> Option<LeaderboardEntry> {
    standings(contest).into_iter().next()
}

/// True once every participant has exhausted their rounds or sells.
pub fn is_complete(contest: &Contest) -> bool {
    !contest.participants.is_empty()
        && contest
            .participants
            .values()
            .all(|p| p.is_finished(contest.meta.max_rounds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContestMeta, ContestParticipant};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn contest(entries: &[(&str, Decimal, i64)]) -> Contest {
        let mut participants = HashMap::new();
        for (user, profit, joined_at) in entries {
            let mut p = ContestParticipant::new(*user, *user, *joined_at);
            p.profit = *profit;
            participants.insert(user.to_string(), p);
        }
        Contest {
            meta: ContestMeta {
                contest_id: "TEST42".to_string(),
                host_id: "host".to_string(),
                title: "test".to_string(),
                starting_balance: dec!(10000),
                max_rounds: 5,
                created_at: 0,
            },
            participants,
        }
    }

    #[test]
    fn test_orders_by_profit_descending() {
        let contest = contest(&[
            ("low", dec!(-50), 1),
            ("high", dec!(900), 2),
            ("mid", dec!(100), 3),
        ]);

        let rows = standings(&contest);
        let order: Vec<&str> = rows.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(order, vec!["high", "mid", "low"]);
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[2].rank, 3);
        assert_eq!(rows[0].balance, dec!(10900));
    }

    #[test]
    fn test_ties_broken_by_join_order() {
        let contest = contest(&[
            ("late", dec!(100), 200),
            ("early", dec!(100), 100),
        ]);

        let rows = standings(&contest);
        assert_eq!(rows[0].user_id, "early");
        assert_eq!(rows[1].user_id, "late");
    }

    #[test]
    fn test_leader_and_completion() {
        let mut c = contest(&[("a", dec!(10), 1), ("b", dec!(20), 2)]);
        assert_eq!(leader(&c).unwrap().user_id, "b");
        assert!(!is_complete(&c));

        for p in c.participants.values_mut() {
            p.rounds_played = 5;
        }
        assert!(is_complete(&c));
    }
}
