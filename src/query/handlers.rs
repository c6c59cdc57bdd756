// region:    --- Imports
use super::queries;
use crate::bidding::model::{Bid, BidHistory, BidderStats, Item, OutboxEvent};
use crate::database::DatabaseManager;
use crate::points::{BidderPoints, PointHistory};
use sqlx::Error as SqlxError;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Query Handlers

/// 상품 조회
pub async fn get_item(
    db_manager: &DatabaseManager,
    item_id: Uuid,
) -> Result<Option<Item>, SqlxError> {
    debug!("{:<12} --> 상품 조회 id: {}", "Query", item_id);
    sqlx::query_as::<_, Item>(queries::GET_ITEM)
        .bind(item_id)
        .fetch_optional(db_manager.pool())
        .await
}

/// 현재 최고 입찰 조회
pub async fn get_winning_bid(
    db_manager: &DatabaseManager,
    item_id: Uuid,
) -> Result<Option<Bid>, SqlxError> {
    debug!("{:<12} --> 최고 입찰 조회 id: {}", "Query", item_id);
    sqlx::query_as::<_, Bid>(queries::GET_WINNING_BID)
        .bind(item_id)
        .fetch_optional(db_manager.pool())
        .await
}

/// 입찰 이력 조회 (전체 건수 포함)
pub async fn get_bid_history(
    db_manager: &DatabaseManager,
    item_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<BidHistory, SqlxError> {
    info!("{:<12} --> 입찰 이력 조회 id: {}", "Query", item_id);
    db_manager
        .transaction(|tx| {
            Box::pin(async move {
                let total: i64 = sqlx::query_scalar(queries::COUNT_BIDS)
                    .bind(item_id)
                    .fetch_one(&mut **tx)
                    .await?;
                let bids = sqlx::query_as::<_, Bid>(queries::GET_BID_HISTORY)
                    .bind(item_id)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&mut **tx)
                    .await?;
                Ok::<_, SqlxError>(BidHistory { total, bids })
            })
        })
        .await
}

/// 경매 안에서 입찰자별 활동 요약
pub async fn get_bidder_stats(
    db_manager: &DatabaseManager,
    auction_id: Uuid,
    bidder_ids: &[Uuid],
) -> Result<Vec<BidderStats>, SqlxError> {
    debug!(
        "{:<12} --> 참가자 활동 조회 auction: {} bidders: {}",
        "Query",
        auction_id,
        bidder_ids.len()
    );
    sqlx::query_as::<_, BidderStats>(queries::GET_BIDDER_STATS)
        .bind(auction_id)
        .bind(bidder_ids)
        .fetch_all(db_manager.pool())
        .await
}

/// 입찰자 포인트 조회
pub async fn get_bidder_points(
    db_manager: &DatabaseManager,
    bidder_id: Uuid,
) -> Result<Option<BidderPoints>, SqlxError> {
    info!("{:<12} --> 포인트 조회 bidder: {}", "Query", bidder_id);
    sqlx::query_as::<_, BidderPoints>(queries::GET_BIDDER_POINTS)
        .bind(bidder_id)
        .fetch_optional(db_manager.pool())
        .await
}

/// 포인트 이력 조회
pub async fn get_point_history(
    db_manager: &DatabaseManager,
    bidder_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<PointHistory>, SqlxError> {
    info!("{:<12} --> 포인트 이력 조회 bidder: {}", "Query", bidder_id);
    db_manager
        .transaction(|tx| {
            Box::pin(async move {
                sqlx::query_as::<_, PointHistory>(queries::GET_POINT_HISTORY)
                    .bind(bidder_id)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&mut **tx)
                    .await
            })
        })
        .await
}

/// 미발행 아웃박스 이벤트 조회
pub async fn get_pending_outbox(
    db_manager: &DatabaseManager,
    limit: i64,
) -> Result<Vec<OutboxEvent>, SqlxError> {
    sqlx::query_as::<_, OutboxEvent>(queries::GET_PENDING_OUTBOX)
        .bind(limit)
        .fetch_all(db_manager.pool())
        .await
}

/// 아웃박스 이벤트 발행 완료 표시
pub async fn mark_outbox_published(
    db_manager: &DatabaseManager,
    outbox_id: i64,
) -> Result<(), SqlxError> {
    sqlx::query(queries::MARK_OUTBOX_PUBLISHED)
        .bind(outbox_id)
        .execute(db_manager.pool())
        .await?;
    Ok(())
}

/// 이벤트 하나 점유. 점유했으면 true
pub async fn claim_outbox_event(
    db_manager: &DatabaseManager,
    outbox_id: i64,
    lease: Duration,
) -> Result<bool, SqlxError> {
    let claimed: Option<i64> = sqlx::query_scalar(queries::CLAIM_OUTBOX_EVENT)
        .bind(outbox_id)
        .bind(lease.as_secs_f64())
        .fetch_optional(db_manager.pool())
        .await?;
    Ok(claimed.is_some())
}

/// 미발행 이벤트 한 배치 점유 (id 순)
pub async fn claim_pending_outbox(
    db_manager: &DatabaseManager,
    limit: i64,
    lease: Duration,
) -> Result<Vec<OutboxEvent>, SqlxError> {
    let mut events = sqlx::query_as::<_, OutboxEvent>(queries::CLAIM_PENDING_OUTBOX)
        .bind(limit)
        .bind(lease.as_secs_f64())
        .fetch_all(db_manager.pool())
        .await?;
    // UPDATE ... RETURNING은 순서를 보장하지 않는다
    events.sort_by_key(|event| event.id);
    Ok(events)
}

/// 점유 해제
pub async fn release_outbox_claim(
    db_manager: &DatabaseManager,
    outbox_id: i64,
) -> Result<(), SqlxError> {
    sqlx::query(queries::RELEASE_OUTBOX_CLAIM)
        .bind(outbox_id)
        .execute(db_manager.pool())
        .await?;
    Ok(())
}

// endregion: --- Query Handlers
