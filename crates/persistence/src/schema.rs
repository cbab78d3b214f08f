//! Database schema definitions

/// SQL to create all tables
/// NOTE: monetary columns stored as TEXT to preserve rust_decimal::Decimal precision
pub const CREATE_TABLES: &str = r#"
-- Versioned JSON documents (profiles, contest metadata, participants).
-- `version` backs the compare-and-set discipline: every successful commit
-- bumps it by one.
CREATE TABLE IF NOT EXISTS documents (
    key TEXT PRIMARY KEY,
    doc TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Immutable settlement log, one row per settled trade
CREATE TABLE IF NOT EXISTS trade_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    position TEXT NOT NULL,
    bet_amount TEXT NOT NULL,
    entry_price TEXT NOT NULL,
    exit_price TEXT NOT NULL,
    pnl TEXT NOT NULL,
    leverage TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trades_user ON trade_records(user_id, timestamp DESC)
"#;

/// Connection pragmas, applied after the tables exist
pub const PRAGMAS: &[&str] = &[
    "PRAGMA journal_mode=WAL",
    "PRAGMA synchronous=NORMAL",
    "PRAGMA foreign_keys=ON",
];
