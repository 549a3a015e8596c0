//! Lending Market Indexer
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    JSON-RPC (Base mainnet)                   │
//! │        eth_getLogs    eth_getBlockByNumber    eth_call       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Indexer Process                        │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │  LogFeed task ──► Dispatcher task ──► Engine workers    ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │  Axum query API  /health  /positions/*  /markets/*      ││
//! │  └─────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         PostgreSQL                           │
//! │  user_transactions  user_positions  market_parameters  ...  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context};
use ethers::providers::{Http, Middleware, Provider};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lending_indexer::{
    engine::ChainReads,
    routes,
    services::{EthContractReader, FeedConfig, LogFeed},
    AppState, Config, Database, Dispatcher, LendingStore, ReconciliationEngine,
};

/// 피드 → 디스패처 채널 크기 (배치 단위)
const FEED_CHANNEL_CAPACITY: usize = 4;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 환경변수 로드
    dotenvy::dotenv().ok();

    // 로깅 초기화
    // RUST_LOG=debug,sqlx=warn 형태로 레벨 제어 가능
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lending_indexer=debug,sqlx=warn,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting Lending Market Indexer");

    // 설정 로드
    let config = Config::from_env()?;
    tracing::info!(
        markets = config.markets.len(),
        start_block = config.start_block,
        block_interval = config.block_interval,
        "📋 Configuration loaded"
    );

    // 데이터베이스 연결
    let db = Arc::new(
        Database::connect(
            &config.database_url,
            config.db_max_connections,
            config.write_timeout,
        )
        .await?,
    );
    tracing::info!(max_connections = config.db_max_connections, "🗄️  Database connected");

    // 마이그레이션 실행
    db.run_migrations().await?;
    tracing::info!("📦 Migrations completed");

    // RPC 연결 + 체인 확인
    let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
        .context("RPC_URL must be a valid http(s) URL")?;
    let chain_id = provider
        .get_chainid()
        .await
        .context("failed to query chain id")?
        .as_u64();
    if chain_id != config.chain_id {
        bail!("RPC chain id {} does not match CHAIN_ID {}", chain_id, config.chain_id);
    }
    let client = Arc::new(provider);
    tracing::info!(chain_id, "⛓️  RPC connected");

    // 엔진 구성
    let store: Arc<dyn LendingStore> = db.clone();
    let reads = ChainReads::new(
        Arc::new(EthContractReader::new(client.clone())),
        config.read_timeout,
        config.read_at_event_block,
    );
    let engine = Arc::new(ReconciliationEngine::new(
        reads,
        store.clone(),
        config.markets.clone(),
        config.write_timeout,
    ));

    let from_block =
        Dispatcher::resume_block(store.as_ref(), config.chain_id, config.start_block).await?;
    tracing::info!(from_block, "⏩ Resuming indexing");

    let cancel = CancellationToken::new();
    let (batch_tx, batch_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);

    // 피드
    let feed = LogFeed::new(client, FeedConfig::from(&config));
    let feed_task = tokio::spawn(feed.run(from_block, batch_tx, cancel.clone()));

    // 디스패처
    let dispatcher = Dispatcher::new(engine, store.clone(), config.chain_id, config.max_in_flight);
    let dispatcher_task = tokio::spawn(dispatcher.run(batch_rx, cancel.clone()));

    // Ctrl+C → 전체 종료
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("🛑 Shutdown requested");
            }
            cancel.cancel();
        });
    }

    // 조회 API
    let state = AppState {
        store,
        config: Arc::new(config.clone()),
    };
    let app = routes::create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🌐 Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    // 진행 중인 배치가 끝날 때까지 대기
    match feed_task.await {
        Ok(Err(e)) => tracing::error!(error = %e, "Event feed failed"),
        Err(e) => tracing::error!(error = %e, "Event feed task panicked"),
        Ok(Ok(())) => {}
    }
    if let Err(e) = dispatcher_task.await {
        tracing::error!(error = %e, "Dispatcher task panicked");
    }

    tracing::info!("👋 Indexer stopped");
    Ok(())
}
