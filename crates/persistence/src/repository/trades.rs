//! Trade log repository — append-only settlement history

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;

use crate::DbResult;

/// One settled trade as stored. Monetary columns are Decimal-as-TEXT.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecordRow {
    pub id: Option<i64>,
    pub user_id: String,
    pub position: String,
    pub bet_amount: String,
    pub entry_price: String,
    pub exit_price: String,
    pub pnl: String,
    pub leverage: String,
    pub timestamp: i64,
}

/// Lifetime aggregates over a user's trade log
#[derive(Debug, Clone, Serialize)]
pub struct TradeTotals {
    pub trades: i64,
    pub total_pnl: Decimal,
}

/// Repository for the `trade_records` table
pub struct TradeRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TradeRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one settlement. Rows are never updated or deleted.
    pub async fn save(&self, row: &TradeRecordRow) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trade_records (
                user_id, position, bet_amount, entry_price, exit_price,
                pnl, leverage, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.user_id)
        .bind(&row.position)
        .bind(&row.bet_amount)
        .bind(&row.entry_price)
        .bind(&row.exit_price)
        .bind(&row.pnl)
        .bind(&row.leverage)
        .bind(row.timestamp)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent trades for a user, newest first.
    pub async fn list_for_user(&self, user_id: &str, limit: i64) -> DbResult<Vec<TradeRecordRow>> {
        let rows = sqlx::query_as::<_, TradeRecordRow>(
            r#"
            SELECT id, user_id, position, bet_amount, entry_price, exit_price,
                   pnl, leverage, timestamp
            FROM trade_records
            WHERE user_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// Count plus exact Decimal sum of a user's recorded pnl.
    pub async fn totals_for_user(&self, user_id: &str) -> DbResult<TradeTotals> {
        let pnls: Vec<(String,)> =
            sqlx::query_as("SELECT pnl FROM trade_records WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(self.pool)
                .await?;

        // Summed in Rust: CAST(... AS REAL) would lose cents on long histories
        let total_pnl = pnls
            .iter()
            .filter_map(|(p,)| Decimal::from_str(p).ok())
            .sum();

        Ok(TradeTotals {
            trades: pnls.len() as i64,
            total_pnl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use rust_decimal_macros::dec;

    fn row(user: &str, pnl: &str, ts: i64) -> TradeRecordRow {
        TradeRecordRow {
            id: None,
            user_id: user.to_string(),
            position: "BUY".to_string(),
            bet_amount: "1000".to_string(),
            entry_price: "100".to_string(),
            exit_price: "110".to_string(),
            pnl: pnl.to_string(),
            leverage: "5".to_string(),
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn test_save_and_list() {
        let db = Database::in_memory().await.unwrap();
        let repo = TradeRepository::new(db.pool());

        repo.save(&row("u1", "500.00", 1)).await.unwrap();
        repo.save(&row("u1", "-250.00", 2)).await.unwrap();
        repo.save(&row("u2", "10.00", 3)).await.unwrap();

        let trades = repo.list_for_user("u1", 10).await.unwrap();
        assert_eq!(trades.len(), 2);
        // newest first
        assert_eq!(trades[0].pnl, "-250.00");
    }

    #[tokio::test]
    async fn test_totals_sum_exactly() {
        let db = Database::in_memory().await.unwrap();
        let repo = TradeRepository::new(db.pool());

        repo.save(&row("u1", "0.10", 1)).await.unwrap();
        repo.save(&row("u1", "0.20", 2)).await.unwrap();

        let totals = repo.totals_for_user("u1").await.unwrap();
        assert_eq!(totals.trades, 2);
        assert_eq!(totals.total_pnl, dec!(0.30));
    }
}
