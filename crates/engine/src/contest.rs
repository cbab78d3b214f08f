//! Contest lifecycle — create, join, resolve rounds, advance
//!
//! Every mutation runs a bounded read-compute-commit loop against the
//! versioned store. Documents are keyed per (contest, participant), so two
//! users resolving rounds in the same contest never contend; only duplicate
//! submissions on one participant's own key retry.

use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use persistence::{VersionedDoc, VersionedStore};

use crate::error::{EngineError, EngineResult};
use crate::ledger;
use crate::types::{
    Contest, ContestMeta, ContestParticipant, Position, RoundPhase, SELL_CAP,
};

/// Bounded optimistic retries before surfacing a conflict
const MAX_CAS_ATTEMPTS: u32 = 5;
/// Attempts to find an unused contest code
const MAX_CODE_ATTEMPTS: u32 = 8;

const CODE_LEN: usize = 6;
/// Human-entry alphabet: no 0/O, 1/I ambiguity
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Contest rounds always run at fixed 5x leverage
pub const CONTEST_LEVERAGE: Decimal = dec!(5);

/// What a resolved round hands back to the caller
#[derive(Debug, Clone, Serialize)]
pub struct RoundOutcome {
    pub participant: ContestParticipant,
    pub pnl: Decimal,
    pub is_finished: bool,
}

/// Owns contest lifecycle; scoring delegates to the ledger formula.
pub struct ContestEngine {
    store: Arc<dyn VersionedStore>,
}

fn meta_key(code: &str) -> String {
    format!("contest:{code}")
}

fn participant_key(code: &str, user_id: &str) -> String {
    format!("contest:{code}:p:{user_id}")
}

fn participant_prefix(code: &str) -> String {
    format!("contest:{code}:p:")
}

fn parse_doc<T: DeserializeOwned>(key: &str, doc: &VersionedDoc) -> EngineResult<T> {
    serde_json::from_str(&doc.doc).map_err(|source| EngineError::Corrupt {
        key: key.to_string(),
        source,
    })
}

fn encode<T: Serialize>(key: &str, value: &T) -> EngineResult<String> {
    serde_json::to_string(value).map_err(|source| EngineError::Corrupt {
        key: key.to_string(),
        source,
    })
}

impl ContestEngine {
    pub fn new(store: Arc<dyn VersionedStore>) -> Self {
        Self { store }
    }

    /// Fixed-length code from the unambiguous alphabet
    pub fn generate_code(rng: &mut impl Rng) -> String {
        (0..CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }

    async fn load_meta(&self, code: &str) -> EngineResult<ContestMeta> {
        let key = meta_key(code);
        let doc = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("contest {code}")))?;
        parse_doc(&key, &doc)
    }

    /// Create a contest and enroll the host as its first participant.
    /// Retries code generation until the store accepts an unused key.
    pub async fn create_contest(
        &self,
        host_id: &str,
        host_name: &str,
        title: &str,
        starting_balance: Decimal,
        max_rounds: u32,
    ) -> EngineResult<Contest> {
        if title.trim().is_empty() {
            return Err(EngineError::Validation("title must not be empty".into()));
        }
        if starting_balance <= Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "starting_balance must be positive, got {starting_balance}"
            )));
        }
        if max_rounds == 0 {
            return Err(EngineError::Validation("max_rounds must be at least 1".into()));
        }

        let now = chrono::Utc::now().timestamp_millis();

        for attempt in 0..MAX_CODE_ATTEMPTS {
            let code = Self::generate_code(&mut rand::thread_rng());
            let meta = ContestMeta {
                contest_id: code.clone(),
                host_id: host_id.to_string(),
                title: title.trim().to_string(),
                starting_balance,
                max_rounds,
                created_at: now,
            };

            let key = meta_key(&code);
            if !self.store.insert_if_absent(&key, &encode(&key, &meta)?).await? {
                debug!(attempt, code = %code, "contest code collision, regenerating");
                continue;
            }

            let host = ContestParticipant::new(host_id, host_name, now);
            let p_key = participant_key(&code, host_id);
            self.store
                .insert_if_absent(&p_key, &encode(&p_key, &host)?)
                .await?;

            info!(contest = %code, host = host_id, max_rounds, "contest created");

            let mut participants = HashMap::new();
            participants.insert(host_id.to_string(), host);
            return Ok(Contest { meta, participants });
        }

        Err(EngineError::Conflict(
            "could not allocate an unused contest code".into(),
        ))
    }

    /// Assemble the contest aggregate: header plus all participants.
    pub async fn get_contest(&self, code: &str) -> EngineResult<Contest> {
        let meta = self.load_meta(code).await?;

        let mut participants = HashMap::new();
        for (key, doc) in self.store.list_prefix(&participant_prefix(code)).await? {
            let p: ContestParticipant = parse_doc(&key, &doc)?;
            participants.insert(p.user_id.clone(), p);
        }

        Ok(Contest { meta, participants })
    }

    /// Add a participant. Re-joining is a no-op returning the existing entry;
    /// concurrent duplicate joins are settled by the store (first insert
    /// wins, the loser reads the winner's row).
    pub async fn join_contest(
        &self,
        code: &str,
        user_id: &str,
        username: &str,
    ) -> EngineResult<ContestParticipant> {
        self.load_meta(code).await?;

        let key = participant_key(code, user_id);
        if let Some(doc) = self.store.get(&key).await? {
            return parse_doc(&key, &doc);
        }

        let fresh = ContestParticipant::new(user_id, username, chrono::Utc::now().timestamp_millis());
        if self.store.insert_if_absent(&key, &encode(&key, &fresh)?).await? {
            info!(contest = code, user = user_id, "participant joined");
            return Ok(fresh);
        }

        // lost a duplicate-join race; the winner's entry is authoritative
        let doc = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("participant {user_id}")))?;
        parse_doc(&key, &doc)
    }

    /// Resolve one betting round for one participant.
    ///
    /// Validation runs against the freshly read state inside the CAS loop, so
    /// either the whole round commits or nothing is persisted.
    pub async fn resolve_round(
        &self,
        code: &str,
        user_id: &str,
        position: Position,
        bet_amount: Decimal,
        entry_price: Decimal,
        exit_price: Decimal,
    ) -> EngineResult<RoundOutcome> {
        if bet_amount <= Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "bet_amount must be positive, got {bet_amount}"
            )));
        }
        if entry_price <= Decimal::ZERO || exit_price <= Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "prices must be positive, got entry {entry_price} exit {exit_price}"
            )));
        }

        let meta = self.load_meta(code).await?;
        let key = participant_key(code, user_id);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let doc = self.store.get(&key).await?.ok_or_else(|| {
                EngineError::NotFound(format!("user {user_id} is not in contest {code}"))
            })?;
            let mut p: ContestParticipant = parse_doc(&key, &doc)?;

            // checked ahead of the phase gate so a third SELL reports the
            // cap rather than a generic terminal-state rejection
            if position == Position::Sell && p.sells_used >= SELL_CAP {
                return Err(EngineError::SellCapExceeded(SELL_CAP));
            }

            match p.phase {
                RoundPhase::Betting => {}
                RoundPhase::Result => {
                    return Err(EngineError::Validation(
                        "round already resolved; advance to the next round first".into(),
                    ))
                }
                RoundPhase::Terminal => {
                    return Err(EngineError::Validation(
                        "contest is already finished for this participant".into(),
                    ))
                }
            }

            let available = p.balance(meta.starting_balance);
            if bet_amount > available {
                return Err(EngineError::InsufficientFunds {
                    requested: bet_amount,
                    available,
                });
            }

            let pnl =
                ledger::compute_pnl(position, bet_amount, entry_price, exit_price, CONTEST_LEVERAGE);

            p.profit += pnl;
            p.rounds_played += 1;
            if position == Position::Sell {
                p.sells_used += 1;
            }

            let is_finished = p.is_finished(meta.max_rounds);
            p.phase = if is_finished {
                RoundPhase::Terminal
            } else {
                RoundPhase::Result
            };

            if self
                .store
                .compare_and_set(&key, doc.version, &encode(&key, &p)?)
                .await?
            {
                info!(
                    contest = code,
                    user = user_id,
                    round = p.rounds_played,
                    pnl = %pnl,
                    is_finished,
                    "round resolved"
                );
                return Ok(RoundOutcome {
                    participant: p,
                    pnl,
                    is_finished,
                });
            }

            debug!(contest = code, user = user_id, "round commit conflicted, retrying");
        }

        Err(EngineError::Conflict(format!(
            "round resolution for {user_id} in {code} kept conflicting"
        )))
    }

    /// The explicit "next round" action after a resolved round. Already
    /// betting is a no-op (a double click must not error); a finished
    /// participant cannot re-enter.
    pub async fn next_round(&self, code: &str, user_id: &str) -> EngineResult<ContestParticipant> {
        self.load_meta(code).await?;
        let key = participant_key(code, user_id);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let doc = self.store.get(&key).await?.ok_or_else(|| {
                EngineError::NotFound(format!("user {user_id} is not in contest {code}"))
            })?;
            let mut p: ContestParticipant = parse_doc(&key, &doc)?;

            match p.phase {
                RoundPhase::Betting => return Ok(p),
                RoundPhase::Terminal => {
                    return Err(EngineError::Validation(
                        "contest is already finished for this participant".into(),
                    ))
                }
                RoundPhase::Result => {}
            }

            p.phase = RoundPhase::Betting;
            if self
                .store
                .compare_and_set(&key, doc.version, &encode(&key, &p)?)
                .await?
            {
                return Ok(p);
            }
        }

        Err(EngineError::Conflict(format!(
            "next-round transition for {user_id} in {code} kept conflicting"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::MemoryStore;
    use rust_decimal_macros::dec;

    fn engine() -> ContestEngine {
        ContestEngine::new(Arc::new(MemoryStore::new()))
    }

    async fn contest_with(engine: &ContestEngine, max_rounds: u32) -> Contest {
        engine
            .create_contest("host", "Hosta", "Friday night", dec!(10000), max_rounds)
            .await
            .unwrap()
    }

    #[test]
    fn test_code_shape() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let code = ContestEngine::generate_code(&mut rng);
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[tokio::test]
    async fn test_create_enrolls_host() {
        let engine = engine();
        let contest = contest_with(&engine, 5).await;

        assert_eq!(contest.participants.len(), 1);
        let host = contest.participant("host").unwrap();
        assert_eq!(host.profit, Decimal::ZERO);
        assert_eq!(host.phase, RoundPhase::Betting);

        let fetched = engine.get_contest(&contest.meta.contest_id).await.unwrap();
        assert_eq!(fetched.meta.title, "Friday night");
        assert_eq!(fetched.participants.len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_inputs() {
        let engine = engine();
        assert!(matches!(
            engine.create_contest("h", "h", "  ", dec!(1000), 5).await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            engine.create_contest("h", "h", "t", dec!(0), 5).await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            engine.create_contest("h", "h", "t", dec!(1000), 0).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_join_unknown_contest() {
        let engine = engine();
        assert!(matches!(
            engine.join_contest("ZZZZZZ", "u1", "ava").await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejoin_is_noop() {
        let engine = engine();
        let contest = contest_with(&engine, 5).await;
        let code = &contest.meta.contest_id;

        let first = engine.join_contest(code, "u1", "ava").await.unwrap();
        // play a round so the second join would be observable if it reset state
        engine
            .resolve_round(code, "u1", Position::Buy, dec!(100), dec!(100), dec!(110))
            .await
            .unwrap();

        let second = engine.join_contest(code, "u1", "ava").await.unwrap();
        assert_eq!(second.joined_at, first.joined_at);
        assert_eq!(second.rounds_played, 1);

        let fetched = engine.get_contest(code).await.unwrap();
        assert_eq!(fetched.participants.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_joins_yield_one_entry() {
        let engine = Arc::new(engine());
        let contest = contest_with(&engine, 5).await;
        let code = contest.meta.contest_id.clone();

        let a = {
            let engine = engine.clone();
            let code = code.clone();
            tokio::spawn(async move { engine.join_contest(&code, "u1", "ava").await })
        };
        let b = {
            let engine = engine.clone();
            let code = code.clone();
            tokio::spawn(async move { engine.join_contest(&code, "u1", "ava").await })
        };

        let (ra, rb) = tokio::join!(a, b);
        let pa = ra.unwrap().unwrap();
        let pb = rb.unwrap().unwrap();
        assert_eq!(pa.joined_at, pb.joined_at);

        let fetched = engine.get_contest(&code).await.unwrap();
        assert_eq!(fetched.participants.len(), 2); // host + u1
    }

    #[tokio::test]
    async fn test_resolve_round_applies_pnl() {
        let engine = engine();
        let contest = contest_with(&engine, 5).await;
        let code = &contest.meta.contest_id;

        let outcome = engine
            .resolve_round(code, "host", Position::Buy, dec!(1000), dec!(100), dec!(110))
            .await
            .unwrap();

        assert_eq!(outcome.pnl, dec!(500.00));
        assert_eq!(outcome.participant.profit, dec!(500.00));
        assert_eq!(outcome.participant.rounds_played, 1);
        assert_eq!(outcome.participant.sells_used, 0);
        assert_eq!(outcome.participant.phase, RoundPhase::Result);
        assert!(!outcome.is_finished);
    }

    #[tokio::test]
    async fn test_resolve_requires_next_round_between_bets() {
        let engine = engine();
        let contest = contest_with(&engine, 5).await;
        let code = &contest.meta.contest_id;

        engine
            .resolve_round(code, "host", Position::Buy, dec!(100), dec!(100), dec!(101))
            .await
            .unwrap();

        // second resolve without advancing is rejected
        assert!(matches!(
            engine
                .resolve_round(code, "host", Position::Buy, dec!(100), dec!(100), dec!(101))
                .await,
            Err(EngineError::Validation(_))
        ));

        engine.next_round(code, "host").await.unwrap();
        engine
            .resolve_round(code, "host", Position::Buy, dec!(100), dec!(100), dec!(101))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_third_sell_rejected_without_state_change() {
        let engine = engine();
        let contest = contest_with(&engine, 10).await;
        let code = &contest.meta.contest_id;

        engine
            .resolve_round(code, "host", Position::Sell, dec!(100), dec!(100), dec!(99))
            .await
            .unwrap();
        engine.next_round(code, "host").await.unwrap();
        // the second sell hits the cap, which terminates the run
        engine
            .resolve_round(code, "host", Position::Sell, dec!(100), dec!(100), dec!(99))
            .await
            .unwrap();

        let p = engine.get_contest(code).await.unwrap();
        let host = p.participant("host").unwrap().clone();
        assert_eq!(host.sells_used, 2);
        assert_eq!(host.phase, RoundPhase::Terminal);

        let err = engine
            .resolve_round(code, "host", Position::Sell, dec!(100), dec!(100), dec!(99))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SellCapExceeded(2)));

        let after = engine.get_contest(code).await.unwrap();
        let host_after = after.participant("host").unwrap();
        assert_eq!(host_after.profit, host.profit);
        assert_eq!(host_after.rounds_played, host.rounds_played);
    }

    #[tokio::test]
    async fn test_second_sell_caps_and_terminates() {
        let engine = engine();
        let contest = contest_with(&engine, 10).await;
        let code = &contest.meta.contest_id;

        // interleave buys so the sell cap, not round exhaustion, is the limit
        engine
            .resolve_round(code, "host", Position::Sell, dec!(100), dec!(100), dec!(99))
            .await
            .unwrap();
        engine.next_round(code, "host").await.unwrap();
        engine
            .resolve_round(code, "host", Position::Buy, dec!(100), dec!(100), dec!(101))
            .await
            .unwrap();
        engine.next_round(code, "host").await.unwrap();

        // sells_used is 1 here; a second sell is fine and caps the count
        let outcome = engine
            .resolve_round(code, "host", Position::Sell, dec!(100), dec!(100), dec!(99))
            .await
            .unwrap();
        assert_eq!(outcome.participant.sells_used, 2);
        assert!(outcome.is_finished);
    }

    #[tokio::test]
    async fn test_insufficient_funds_checked_against_fresh_state() {
        let engine = engine();
        let contest = contest_with(&engine, 10).await;
        let code = &contest.meta.contest_id;

        // lose most of the balance first
        engine
            .resolve_round(code, "host", Position::Buy, dec!(1900), dec!(100), dec!(1))
            .await
            .unwrap();
        engine.next_round(code, "host").await.unwrap();

        let fetched = engine.get_contest(code).await.unwrap();
        let available = fetched
            .participant("host")
            .unwrap()
            .balance(fetched.meta.starting_balance);

        let err = engine
            .resolve_round(code, "host", Position::Buy, available + dec!(1), dec!(100), dec!(110))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn test_round_exhaustion_terminates() {
        let engine = engine();
        let contest = contest_with(&engine, 2).await;
        let code = &contest.meta.contest_id;

        let first = engine
            .resolve_round(code, "host", Position::Buy, dec!(100), dec!(100), dec!(101))
            .await
            .unwrap();
        assert!(!first.is_finished);
        engine.next_round(code, "host").await.unwrap();

        let second = engine
            .resolve_round(code, "host", Position::Hold, dec!(100), dec!(100), dec!(101))
            .await
            .unwrap();
        assert!(second.is_finished);
        assert_eq!(second.participant.phase, RoundPhase::Terminal);

        assert!(matches!(
            engine.next_round(code, "host").await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_next_round_is_idempotent_while_betting() {
        let engine = engine();
        let contest = contest_with(&engine, 5).await;
        let code = &contest.meta.contest_id;

        let p = engine.next_round(code, "host").await.unwrap();
        assert_eq!(p.phase, RoundPhase::Betting);
        assert_eq!(p.rounds_played, 0);
    }
}
