//! Trade Arena — trading-education contest & progression server
//!
//! Usage:
//!   trade-arena serve --port 3001              — Launch the HTTP API
//!   trade-arena simulate --players 4 --rounds 5 — Run a bot contest locally

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use engine::{
    leaderboard, BinanceClient, Contest, ContestEngine, EngineError, Position, PriceFeed,
    ProgressionEngine, RoundOutcome, TradeIntent, SELL_CAP,
};
use persistence::SqliteStore;
use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "trade-arena")]
#[command(about = "Trading-education contest & progression server", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the HTTP API server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
    /// Run a local bot contest against live or synthetic prices (no server)
    Simulate {
        /// Number of bot participants
        #[arg(long, default_value_t = 4)]
        players: usize,
        /// Betting rounds per participant
        #[arg(long, default_value_t = 5)]
        rounds: u32,
        /// Symbol to fetch candles for
        #[arg(long, default_value = "BTCUSDT")]
        symbol: String,
    },
}

#[derive(Clone)]
struct AppState {
    contests: Arc<ContestEngine>,
    progression: Arc<ProgressionEngine>,
    prices: Arc<PriceFeed>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,trade_arena=debug")
    } else {
        EnvFilter::new("info,engine=info,trade_arena=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve { host, port } => cmd_serve(&host, port).await?,
        Commands::Simulate {
            players,
            rounds,
            symbol,
        } => cmd_simulate(players, rounds, &symbol).await?,
    }

    Ok(())
}

// ============================================================================
// Serve command — Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    info!("Trade Arena v{} starting...", APP_VERSION);

    let db_path = std::env::var("ARENA_DB_PATH").unwrap_or_else(|_| "data/arena.db".to_string());
    let db = persistence::Database::new(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("Database initialization failed: {}", e))?;
    info!("Database initialized: {}", db_path);

    let store = Arc::new(SqliteStore::new(db.pool_clone()));
    let state = AppState {
        contests: Arc::new(ContestEngine::new(store.clone())),
        progression: Arc::new(ProgressionEngine::new(store, Some(db.pool_clone()))),
        prices: Arc::new(PriceFeed::new(BinanceClient::new())),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/contests", post(api_create_contest))
        .route("/contests/:code", get(api_get_contest))
        .route("/contests/:code/join", post(api_join_contest))
        .route("/contests/:code/resolve", post(api_resolve_round))
        .route("/contests/:code/next", post(api_next_round))
        .route("/contests/:code/leaderboard", get(api_leaderboard))
        .route("/settle", post(api_settle))
        .route("/profiles/:user_id", get(api_get_profile))
        .route("/candles", get(api_candles))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Trade Arena v{} ===", APP_VERSION);
    println!("Contest & Progression Server");
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health                     - Health check");
    println!("  POST /api/contests                   - Create a contest");
    println!("  GET  /api/contests/:code             - Contest state");
    println!("  POST /api/contests/:code/join        - Join a contest");
    println!("  POST /api/contests/:code/resolve     - Resolve a betting round");
    println!("  POST /api/contests/:code/next        - Advance to the next round");
    println!("  GET  /api/contests/:code/leaderboard - Current standings");
    println!("  POST /api/settle                     - Settle a single-player trade");
    println!("  GET  /api/profiles/:user_id          - Profile + recent trades");
    println!("  GET  /api/candles                    - Candle proxy (synthetic fallback)");
    println!("\n  Database: {}", db_path);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// API Handlers
// ============================================================================

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

fn error_reply(e: EngineError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        EngineError::Validation(_)
        | EngineError::InsufficientFunds { .. }
        | EngineError::SellCapExceeded(_) => StatusCode::BAD_REQUEST,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::ExternalData(_) => StatusCode::BAD_GATEWAY,
        EngineError::Corrupt { .. } | EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    )
}

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "trade-arena",
        "version": APP_VERSION,
    }))
}

#[derive(Deserialize)]
struct CreateContestRequest {
    host_id: String,
    username: String,
    title: String,
    starting_balance: Option<Decimal>,
    max_rounds: Option<u32>,
}

/// POST /api/contests — create a contest, host auto-joins
async fn api_create_contest(
    State(state): State<AppState>,
    Json(req): Json<CreateContestRequest>,
) -> ApiResult {
    let starting_balance = req.starting_balance.unwrap_or_else(|| Decimal::from(10_000));
    let max_rounds = req.max_rounds.unwrap_or(5);

    let contest = state
        .contests
        .create_contest(&req.host_id, &req.username, &req.title, starting_balance, max_rounds)
        .await
        .map_err(error_reply)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "contest": contest,
    })))
}

/// GET /api/contests/:code — the assembled contest aggregate
async fn api_get_contest(State(state): State<AppState>, Path(code): Path<String>) -> ApiResult {
    let contest = state.contests.get_contest(&code).await.map_err(error_reply)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "contest": contest,
        "complete": leaderboard::is_complete(&contest),
    })))
}

#[derive(Deserialize)]
struct JoinRequest {
    user_id: String,
    username: String,
}

/// POST /api/contests/:code/join — idempotent join
async fn api_join_contest(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<JoinRequest>,
) -> ApiResult {
    let participant = state
        .contests
        .join_contest(&code, &req.user_id, &req.username)
        .await
        .map_err(error_reply)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "participant": participant,
    })))
}

#[derive(Deserialize)]
struct ResolveRequest {
    user_id: String,
    position: Position,
    bet_amount: Decimal,
    entry_price: Decimal,
    exit_price: Decimal,
}

/// POST /api/contests/:code/resolve — resolve one betting round
async fn api_resolve_round(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult {
    let RoundOutcome {
        participant,
        pnl,
        is_finished,
    } = state
        .contests
        .resolve_round(
            &code,
            &req.user_id,
            req.position,
            req.bet_amount,
            req.entry_price,
            req.exit_price,
        )
        .await
        .map_err(error_reply)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "participant": participant,
        "pnl": pnl,
        "is_finished": is_finished,
    })))
}

#[derive(Deserialize)]
struct NextRequest {
    user_id: String,
}

/// POST /api/contests/:code/next — explicit next-round action
async fn api_next_round(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<NextRequest>,
) -> ApiResult {
    let participant = state
        .contests
        .next_round(&code, &req.user_id)
        .await
        .map_err(error_reply)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "participant": participant,
    })))
}

/// GET /api/contests/:code/leaderboard — standings, recomputed on demand
async fn api_leaderboard(State(state): State<AppState>, Path(code): Path<String>) -> ApiResult {
    let contest = state.contests.get_contest(&code).await.map_err(error_reply)?;
    let rows = leaderboard::standings(&contest);

    Ok(Json(serde_json::json!({
        "success": true,
        "contest_id": contest.meta.contest_id,
        "leaderboard": rows,
        "complete": leaderboard::is_complete(&contest),
    })))
}

#[derive(Deserialize)]
struct SettleRequest {
    user_id: String,
    username: String,
    position: Position,
    bet_amount: Decimal,
    entry_price: Decimal,
    exit_price: Decimal,
    leverage: Option<Decimal>,
}

/// POST /api/settle — single-player settlement against the global profile
async fn api_settle(State(state): State<AppState>, Json(req): Json<SettleRequest>) -> ApiResult {
    let mut intent = TradeIntent::new(req.position, req.bet_amount, req.entry_price, req.exit_price);
    if let Some(leverage) = req.leverage {
        intent.leverage = leverage;
    }

    let settlement = state
        .progression
        .settle(&req.user_id, &req.username, &intent)
        .await
        .map_err(error_reply)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "profile": settlement.profile,
        "level": settlement.profile.level(),
        "rank": settlement.profile.rank(),
        "record": settlement.record,
        "unlocked": settlement.unlocked,
    })))
}

/// GET /api/profiles/:user_id — profile, derived rank, recent trades
async fn api_get_profile(State(state): State<AppState>, Path(user_id): Path<String>) -> ApiResult {
    let profile = state
        .progression
        .get_profile(&user_id)
        .await
        .map_err(error_reply)?;
    let trades = state
        .progression
        .recent_trades(&user_id, 20)
        .await
        .map_err(error_reply)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "profile": profile,
        "level": profile.level(),
        "rank": profile.rank(),
        "recent_trades": trades,
    })))
}

#[derive(Deserialize)]
struct CandleQuery {
    symbol: Option<String>,
    interval: Option<String>,
    limit: Option<u32>,
}

/// GET /api/candles — live candles, synthetic series when the source is down
async fn api_candles(
    State(state): State<AppState>,
    Query(query): Query<CandleQuery>,
) -> Json<serde_json::Value> {
    let symbol = query.symbol.unwrap_or_else(|| "BTCUSDT".to_string());
    let interval = query.interval.unwrap_or_else(|| "1m".to_string());
    let limit = query.limit.unwrap_or(60).clamp(1, 500);

    let candles = state.prices.candles(&symbol, &interval, limit).await;

    Json(serde_json::json!({
        "success": true,
        "symbol": symbol,
        "interval": interval,
        "candles": candles,
    }))
}

// ============================================================================
// Simulate command — bot contest in the terminal
// ============================================================================

const BOT_NAMES: &[&str] = &["ava", "bjorn", "chen", "dara", "emil", "freya", "goro", "hana"];

async fn cmd_simulate(players: usize, rounds: u32, symbol: &str) -> anyhow::Result<()> {
    println!("\n=== Trade Arena v{} ===", APP_VERSION);
    println!("Simulating {} bots over {} rounds on {}\n", players, rounds, symbol);

    let store = Arc::new(persistence::MemoryStore::new());
    let engine = ContestEngine::new(store);
    let feed = PriceFeed::new(BinanceClient::new());

    // one candle per round; the feed substitutes a synthetic series offline
    let candles = feed.candles(symbol, "1m", rounds).await;

    let players = players.clamp(1, BOT_NAMES.len());
    let host = BOT_NAMES[0];
    let contest = engine
        .create_contest(host, host, "Bot Arena", Decimal::from(10_000), rounds)
        .await
        .map_err(|e| anyhow::anyhow!("contest creation failed: {}", e))?;
    let code = contest.meta.contest_id.clone();

    for name in BOT_NAMES.iter().take(players).skip(1) {
        engine
            .join_contest(&code, name, name)
            .await
            .map_err(|e| anyhow::anyhow!("join failed: {}", e))?;
    }
    println!("Contest {} — {} participants", code, players);

    let mut rng = rand::thread_rng();

    for (round, candle) in candles.iter().enumerate() {
        let snapshot = engine
            .get_contest(&code)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        for name in BOT_NAMES.iter().take(players) {
            let Some(p) = snapshot.participant(name) else { continue };
            if p.is_finished(rounds) {
                continue;
            }

            let position = match rng.gen_range(0..10) {
                0..=5 => Position::Buy,
                6..=7 => Position::Hold,
                _ if p.sells_used < SELL_CAP => Position::Sell,
                _ => Position::Buy,
            };
            let bet = p.balance(snapshot.meta.starting_balance) / Decimal::from(10);
            if bet <= Decimal::ZERO {
                continue; // busted bot sits the round out
            }

            let outcome = engine
                .resolve_round(&code, name, position, bet, candle.open, candle.close)
                .await
                .map_err(|e| anyhow::anyhow!("round failed for {name}: {e}"))?;

            println!(
                "  round {:>2}  {:<6} {:<4} bet {:>9.2}  pnl {:>+9.2}  total {:>+9.2}{}",
                round + 1,
                name,
                position.label(),
                bet,
                outcome.pnl,
                outcome.participant.profit,
                if outcome.is_finished { "  [done]" } else { "" },
            );

            if !outcome.is_finished {
                engine
                    .next_round(&code, name)
                    .await
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
            }
        }
    }

    let finale = engine
        .get_contest(&code)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    print_standings(&finale);

    Ok(())
}

fn print_standings(contest: &Contest) {
    let rows = leaderboard::standings(contest);

    println!("\nFinal standings — {}:", contest.meta.title);
    println!(
        "  {:>3}  {:<10} {:>12} {:>12} {:>7}",
        "#", "Player", "Profit", "Balance", "Rounds"
    );
    println!("  {}", "-".repeat(50));
    for row in rows {
        println!(
            "  {:>3}  {:<10} {:>+12.2} {:>12.2} {:>7}",
            row.rank, row.username, row.profit, row.balance, row.rounds_played,
        );
    }
}
