//! Single-player progression — persisted settlement
//!
//! Wraps the pure ledger in the same read-compute-commit discipline the
//! contest engine uses: profiles live under their own store key, and a
//! settled trade is appended to the trade log only after the profile commit
//! succeeds.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use persistence::repository::{TradeRecordRow, TradeRepository};
use persistence::{SqlitePool, VersionedStore};

use crate::error::{EngineError, EngineResult};
use crate::ledger::{self, Settlement};
use crate::types::{Position, TradeIntent, TradeRecord, UserProfile};

const MAX_CAS_ATTEMPTS: u32 = 5;

pub struct ProgressionEngine {
    store: Arc<dyn VersionedStore>,
    /// Trade log destination; `None` runs settlement without history
    trade_log: Option<SqlitePool>,
}

fn profile_key(user_id: &str) -> String {
    format!("profile:{user_id}")
}

fn record_to_row(record: &TradeRecord) -> TradeRecordRow {
    TradeRecordRow {
        id: None,
        user_id: record.user_id.clone(),
        position: record.position.label().to_string(),
        bet_amount: record.bet_amount.to_string(),
        entry_price: record.entry_price.to_string(),
        exit_price: record.exit_price.to_string(),
        pnl: record.pnl.to_string(),
        leverage: record.leverage.to_string(),
        timestamp: record.timestamp,
    }
}

fn row_to_record(row: &TradeRecordRow) -> EngineResult<TradeRecord> {
    let position = match row.position.as_str() {
        "BUY" => Position::Buy,
        "SELL" => Position::Sell,
        "HOLD" => Position::Hold,
        other => {
            return Err(EngineError::Validation(format!(
                "unknown position {other} in trade log"
            )))
        }
    };

    let decimal = |field: &str, value: &str| {
        Decimal::from_str(value)
            .map_err(|e| EngineError::Validation(format!("bad {field} in trade log: {e}")))
    };

    Ok(TradeRecord {
        user_id: row.user_id.clone(),
        position,
        bet_amount: decimal("bet_amount", &row.bet_amount)?,
        entry_price: decimal("entry_price", &row.entry_price)?,
        exit_price: decimal("exit_price", &row.exit_price)?,
        pnl: decimal("pnl", &row.pnl)?,
        leverage: decimal("leverage", &row.leverage)?,
        timestamp: row.timestamp,
    })
}

impl ProgressionEngine {
    pub fn new(store: Arc<dyn VersionedStore>, trade_log: Option<SqlitePool>) -> Self {
        Self { store, trade_log }
    }

    /// Fetch an existing profile.
    pub async fn get_profile(&self, user_id: &str) -> EngineResult<UserProfile> {
        let key = profile_key(user_id);
        let doc = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("profile {user_id}")))?;
        serde_json::from_str(&doc.doc).map_err(|source| EngineError::Corrupt { key, source })
    }

    /// Fetch a profile, creating a fresh one on first contact.
    pub async fn get_or_create_profile(
        &self,
        user_id: &str,
        username: &str,
    ) -> EngineResult<UserProfile> {
        match self.get_profile(user_id).await {
            Ok(profile) => Ok(profile),
            Err(EngineError::NotFound(_)) => {
                let fresh = UserProfile::new(user_id, username);
                let key = profile_key(user_id);
                let doc = serde_json::to_string(&fresh)
                    .map_err(|source| EngineError::Corrupt { key: key.clone(), source })?;
                if self.store.insert_if_absent(&key, &doc).await? {
                    info!(user = user_id, "profile created");
                    Ok(fresh)
                } else {
                    // lost a first-contact race; the winner's profile stands
                    self.get_profile(user_id).await
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Settle a trade against the user's profile and persist the outcome.
    ///
    /// The ledger runs against the freshly read profile each attempt, so a
    /// conflicting commit (a duplicate submission racing itself) retries with
    /// current state rather than double-applying.
    pub async fn settle(
        &self,
        user_id: &str,
        username: &str,
        intent: &TradeIntent,
    ) -> EngineResult<Settlement> {
        let key = profile_key(user_id);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let (profile, version) = match self.store.get(&key).await? {
                Some(doc) => {
                    let profile: UserProfile = serde_json::from_str(&doc.doc)
                        .map_err(|source| EngineError::Corrupt { key: key.clone(), source })?;
                    (profile, doc.version)
                }
                None => {
                    self.get_or_create_profile(user_id, username).await?;
                    continue; // re-read for the stored version
                }
            };

            let settlement = ledger::settle_trade(&profile, intent)?;
            let doc = serde_json::to_string(&settlement.profile)
                .map_err(|source| EngineError::Corrupt { key: key.clone(), source })?;

            if self.store.compare_and_set(&key, version, &doc).await? {
                // profile already committed; the history append is best-effort
                if let Some(pool) = &self.trade_log {
                    if let Err(e) = TradeRepository::new(pool)
                        .save(&record_to_row(&settlement.record))
                        .await
                    {
                        warn!(user = user_id, error = %e, "failed to append trade record");
                    }
                }
                info!(
                    user = user_id,
                    pnl = %settlement.record.pnl,
                    total_profit = %settlement.profile.total_profit,
                    rank = settlement.profile.rank().name,
                    "settlement committed"
                );
                return Ok(settlement);
            }

            debug!(user = user_id, "profile commit conflicted, retrying");
        }

        Err(EngineError::Conflict(format!(
            "settlement for {user_id} kept conflicting"
        )))
    }

    /// Most recent settled trades, newest first. Empty without a trade log.
    pub async fn recent_trades(&self, user_id: &str, limit: i64) -> EngineResult<Vec<TradeRecord>> {
        let Some(pool) = &self.trade_log else {
            return Ok(Vec::new());
        };

        let rows = TradeRepository::new(pool).list_for_user(user_id, limit).await?;
        rows.iter().map(row_to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;
    use persistence::MemoryStore;
    use rust_decimal_macros::dec;

    fn engine() -> ProgressionEngine {
        ProgressionEngine::new(Arc::new(MemoryStore::new()), None)
    }

    #[tokio::test]
    async fn test_first_contact_creates_profile() {
        let engine = engine();

        assert!(matches!(
            engine.get_profile("u1").await,
            Err(EngineError::NotFound(_))
        ));

        let profile = engine.get_or_create_profile("u1", "ava").await.unwrap();
        assert_eq!(profile.total_trades, 0);

        // second call returns the same profile, not a fresh one
        let again = engine.get_or_create_profile("u1", "ava").await.unwrap();
        assert_eq!(again.created_at, profile.created_at);
    }

    #[tokio::test]
    async fn test_settle_persists_updated_profile() {
        let engine = engine();
        let intent = TradeIntent::new(Position::Buy, dec!(1000), dec!(100), dec!(110));

        let settlement = engine.settle("u1", "ava", &intent).await.unwrap();
        assert_eq!(settlement.profile.total_profit, dec!(500.00));

        let stored = engine.get_profile("u1").await.unwrap();
        assert_eq!(stored.total_profit, dec!(500.00));
        assert_eq!(stored.total_trades, 1);
    }

    #[tokio::test]
    async fn test_sequential_settlements_accumulate() {
        let engine = engine();
        let win = TradeIntent::new(Position::Buy, dec!(1000), dec!(100), dec!(110));
        let loss = TradeIntent::new(Position::Buy, dec!(1000), dec!(100), dec!(95));

        engine.settle("u1", "ava", &win).await.unwrap();
        engine.settle("u1", "ava", &loss).await.unwrap();
        let third = engine.settle("u1", "ava", &win).await.unwrap();

        // 500 - 250 + 500
        assert_eq!(third.profile.total_profit, dec!(750.00));
        assert_eq!(third.profile.total_trades, 3);
        assert_eq!(third.profile.current_streak, 1);
    }

    #[tokio::test]
    async fn test_validation_failure_leaves_no_state() {
        let engine = engine();
        let bad = TradeIntent::new(Position::Buy, dec!(-5), dec!(100), dec!(110));

        engine.get_or_create_profile("u1", "ava").await.unwrap();
        assert!(engine.settle("u1", "ava", &bad).await.is_err());

        let stored = engine.get_profile("u1").await.unwrap();
        assert_eq!(stored.total_trades, 0);
        assert_eq!(stored.xp, 0);
    }

    #[tokio::test]
    async fn test_trade_log_roundtrip() {
        let db = persistence::Database::in_memory().await.unwrap();
        let engine = ProgressionEngine::new(
            Arc::new(MemoryStore::new()),
            Some(db.pool_clone()),
        );

        let intent = TradeIntent::new(Position::Sell, dec!(200), dec!(50), dec!(45));
        let settlement = engine.settle("u1", "ava", &intent).await.unwrap();

        let trades = engine.recent_trades("u1", 10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].pnl, settlement.record.pnl);
        assert_eq!(trades[0].position, Position::Sell);
    }
}
