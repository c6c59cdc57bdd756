// region:    --- Imports
use axum::extract::DefaultBodyLimit;
use realtime_auction::auction::events::RELAY_CHANNELS;
use realtime_auction::bidding::{BidPlacementEngine, BidStore, PostgresBidStore};
use realtime_auction::config::{Config, HUB_COMMAND_CAPACITY};
use realtime_auction::database::DatabaseManager;
use realtime_auction::handlers::{self, AppState};
use realtime_auction::lock::{DistributedLock, PostgresLock};
use realtime_auction::message_broker::{EventPublisher, EventSubscriber, KafkaManager};
use realtime_auction::relay::EventRelay;
use realtime_auction::scheduler::OutboxScheduler;
use realtime_auction::ws::{Hub, StoreDirectory};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// endregion: --- Imports

// region:    --- Main
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    // logging 초기화 (RUST_LOG가 없으면 LOG_LEVEL 사용)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .without_time()
        .with_target(false)
        .init();

    // DatabaseManager 생성
    let db_manager = Arc::new(
        DatabaseManager::connect(&config.database_url, config.database_max_connections).await?,
    );

    // 데이터베이스 초기화
    if config.init_schema {
        if let Err(e) = db_manager.initialize_database().await {
            error!("{:<12} --> 데이터베이스 초기화 실패: {:?}", "Main", e);
            return Err(e.into());
        }
        info!("{:<12} --> 데이터베이스 초기화 성공", "Main");
    }

    // Kafka 매니저 생성 및 토픽 생성
    let kafka_manager = KafkaManager::new(&config.kafka_brokers, &config.kafka_group_prefix)?;
    if let Err(e) = kafka_manager.create_topics(RELAY_CHANNELS, 3, 1).await {
        error!("{:<12} --> Kafka 토픽 생성 실패: {:?}", "Main", e);
        return Err(e.into());
    }
    info!("{:<12} --> Kafka 초기화 성공", "Main");
    let publisher: Arc<dyn EventPublisher> = kafka_manager.get_producer();
    let subscriber: Arc<dyn EventSubscriber> = kafka_manager.get_consumer();

    // 입찰 저장소
    let store: Arc<dyn BidStore> = Arc::new(PostgresBidStore::new(Arc::clone(&db_manager)));

    // 실시간 Hub (참가자 활동은 입찰 저장소에서 조회)
    let (hub, hub_handle) = Hub::with_directory(
        HUB_COMMAND_CAPACITY,
        Arc::new(StoreDirectory::new(Arc::clone(&store))),
    );
    tokio::spawn(hub.run());

    // 이벤트 릴레이
    let relay = EventRelay::new(subscriber, hub_handle.clone(), config.relay_scope);
    tokio::spawn(async move {
        if let Err(e) = relay.run().await {
            error!("{:<12} --> 릴레이 종료: {:?}", "Main", e);
        }
    });

    // 입찰 엔진
    let lock: Arc<dyn DistributedLock> = Arc::new(PostgresLock::new(db_manager.get_pool()));
    let engine = Arc::new(BidPlacementEngine::new(
        Arc::clone(&store),
        lock,
        Arc::clone(&publisher),
        config.bid_lock_ttl,
    ));

    // 아웃박스 재발행
    OutboxScheduler::new(store, publisher, config.outbox_interval).start();

    // 테스트 페이지를 위한 cors 설정
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // 라우터 설정
    let routes_all = handlers::router(AppState {
        engine,
        hub: hub_handle,
        send_buffer: config.ws_send_buffer,
    })
    .layer(cors)
    .layer(DefaultBodyLimit::max(1024 * 1024));

    let listener = TcpListener::bind(&config.api_addr).await?;
    info!(
        "{:<12} --> Web Server: Listening on {}",
        "Main",
        listener.local_addr()?
    );

    // 서버 실행
    if let Err(err) = axum::serve(listener, routes_all.into_make_service()).await {
        error!("{:<12} --> Server error: {}", "Main", err);
    }
    Ok(())
}
// endregion: --- Main
