/// 입찰 저장소
/// 입찰 확정 트랜잭션과 읽기 조회를 한 인터페이스로 묶는다.
// region:    --- Imports
use super::model::{Bid, BidHistory, BidderStats, Item, OutboxEvent};
use crate::auction::events::BidPlacedEvent;
use crate::config::OUTBOX_CLAIM_LEASE;
use crate::database::DatabaseManager;
use crate::error::{AppError, BidError};
use crate::points::repository::{self, PointsLedger};
use crate::points::{BidderPoints, LedgerContext, LedgerEntry, PointHistory, PointHistoryType};
use crate::query::{handlers as query, queries};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgConnection;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Bid Store
/// 입찰 확정 결과
#[derive(Debug, Clone)]
pub struct BidCommit {
    pub bid: Bid,
    /// 입찰자의 변경 후 포인트
    pub points: BidderPoints,
    /// 같은 트랜잭션에서 기록된 bid:placed 이벤트
    pub outbox: OutboxEvent,
}

#[async_trait]
pub trait BidStore: Send + Sync {
    async fn find_item(&self, item_id: Uuid) -> Result<Option<Item>, BidError>;

    async fn find_winning_bid(&self, item_id: Uuid) -> Result<Option<Bid>, BidError>;

    /// 하나의 트랜잭션으로 입찰을 확정한다. 실패하면 아무것도 남기지 않는다.
    /// 1. 입찰자 포인트 확인
    /// 2. 밀려난 최고 입찰의 예약 해제
    /// 3. 입찰 저장 후 최고 입찰 표시 교체
    /// 4. 입찰 금액 예약
    /// 5. 아웃박스 이벤트 기록
    async fn commit_bid(
        &self,
        item: &Item,
        bidder_id: Uuid,
        price: i64,
        displaced: Option<&Bid>,
    ) -> Result<BidCommit, BidError>;

    /// 발행 완료 표시 (점유도 함께 해제)
    async fn mark_published(&self, outbox_id: i64) -> Result<(), AppError>;

    /// 미발행 이벤트 조회 (점유 여부와 무관, 읽기 전용)
    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxEvent>, AppError>;

    /// 발행 전에 이벤트를 점유한다. 다른 발행자가 잡고 있거나 이미 발행됐으면 false
    async fn claim_outbox(&self, outbox_id: i64) -> Result<bool, AppError>;

    /// 점유되지 않은 미발행 이벤트를 한 배치 점유해서 id 순으로 돌려준다
    async fn claim_pending_outbox(&self, limit: i64) -> Result<Vec<OutboxEvent>, AppError>;

    /// 발행에 실패한 이벤트의 점유 해제
    async fn release_outbox_claim(&self, outbox_id: i64) -> Result<(), AppError>;

    async fn bid_history(&self, item_id: Uuid, limit: i64, offset: i64)
        -> Result<BidHistory, AppError>;

    /// 경매 안에서 입찰자별 입찰 수와 마지막 입찰 시각. 입찰이 없는 입찰자는 빠진다.
    async fn bidder_stats(
        &self,
        auction_id: Uuid,
        bidder_ids: &[Uuid],
    ) -> Result<Vec<BidderStats>, AppError>;

    async fn points(&self, bidder_id: Uuid) -> Result<Option<BidderPoints>, AppError>;

    async fn point_history(
        &self,
        bidder_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PointHistory>, AppError>;

    async fn grant_points(
        &self,
        bidder_id: Uuid,
        amount: i64,
        admin_id: Option<i64>,
    ) -> Result<LedgerEntry, AppError>;
}

/// 밀려난 입찰의 예약 해제 이력 정보
pub(crate) fn release_context(item: &Item, displaced: &Bid) -> LedgerContext {
    LedgerContext {
        reason: Some("상위 입찰로 인한 예약 해제".to_string()),
        related_bid_id: Some(displaced.id),
        related_auction_id: Some(item.auction_id),
        admin_id: None,
    }
}

/// 새 입찰의 예약 이력 정보
pub(crate) fn reserve_context(item: &Item, bid: &Bid) -> LedgerContext {
    LedgerContext {
        reason: Some("입찰 예약".to_string()),
        related_auction_id: Some(item.auction_id),
        ..LedgerContext::for_bid(bid.id)
    }
}

// endregion: --- Bid Store

// region:    --- Postgres Bid Store
pub struct PostgresBidStore {
    db_manager: Arc<DatabaseManager>,
}

impl PostgresBidStore {
    pub fn new(db_manager: Arc<DatabaseManager>) -> Self {
        Self { db_manager }
    }

    async fn write_bid(
        conn: &mut PgConnection,
        item: &Item,
        bidder_id: Uuid,
        price: i64,
        displaced: Option<&Bid>,
    ) -> Result<BidCommit, BidError> {
        // 두 입찰자 행은 항상 같은 순서로 잠근다 (상품 간 교착 방지)
        let mut bidders = vec![bidder_id];
        if let Some(previous) = displaced {
            bidders.push(previous.bidder_id);
        }
        bidders.sort();
        let mut locked = HashMap::new();
        for id in bidders {
            if let Some(points) = PointsLedger::lock_points(&mut *conn, id).await? {
                locked.insert(id, points);
            }
        }

        let current = locked
            .remove(&bidder_id)
            .ok_or(BidError::PointsRecordMissing(bidder_id))?;
        if current.available_points < price {
            return Err(BidError::InsufficientPoints {
                available: current.available_points,
                required: price,
            });
        }

        if let Some(previous) = displaced {
            let previous_points = locked
                .remove(&previous.bidder_id)
                .ok_or(BidError::PointsRecordMissing(previous.bidder_id))?;
            PointsLedger::apply::<BidError>(
                &mut *conn,
                &previous_points,
                PointHistoryType::Release,
                previous.price,
                release_context(item, previous),
            )
            .await?;
        }

        let inserted = sqlx::query_as::<_, Bid>(queries::INSERT_BID)
            .bind(item.id)
            .bind(bidder_id)
            .bind(price)
            .bind(Utc::now())
            .fetch_one(&mut *conn)
            .await?;
        sqlx::query(queries::CLEAR_WINNING_BIDS)
            .bind(item.id)
            .bind(inserted.id)
            .execute(&mut *conn)
            .await?;
        let bid = sqlx::query_as::<_, Bid>(queries::SET_WINNING_BID)
            .bind(inserted.id)
            .fetch_one(&mut *conn)
            .await?;

        let entry = PointsLedger::apply::<BidError>(
            &mut *conn,
            &current,
            PointHistoryType::Reserve,
            price,
            reserve_context(item, &bid),
        )
        .await?;

        let event = BidPlacedEvent::new(item, &bid);
        let outbox = sqlx::query_as::<_, OutboxEvent>(queries::INSERT_OUTBOX_EVENT)
            .bind(event.channel())
            .bind(serde_json::to_string(&event)?)
            .bind(Utc::now())
            .fetch_one(&mut *conn)
            .await?;

        Ok(BidCommit {
            bid,
            points: entry.after,
            outbox,
        })
    }
}

#[async_trait]
impl BidStore for PostgresBidStore {
    async fn find_item(&self, item_id: Uuid) -> Result<Option<Item>, BidError> {
        Ok(query::get_item(&self.db_manager, item_id).await?)
    }

    async fn find_winning_bid(&self, item_id: Uuid) -> Result<Option<Bid>, BidError> {
        Ok(query::get_winning_bid(&self.db_manager, item_id).await?)
    }

    async fn commit_bid(
        &self,
        item: &Item,
        bidder_id: Uuid,
        price: i64,
        displaced: Option<&Bid>,
    ) -> Result<BidCommit, BidError> {
        // 오류로 빠져나가면 tx가 drop 되면서 롤백된다
        let mut tx = self.db_manager.pool().begin().await?;
        let commit = Self::write_bid(&mut *tx, item, bidder_id, price, displaced).await?;
        tx.commit().await?;
        info!(
            "{:<12} --> 입찰 트랜잭션 커밋 bid={} item={}",
            "Store", commit.bid.id, item.id
        );
        Ok(commit)
    }

    async fn mark_published(&self, outbox_id: i64) -> Result<(), AppError> {
        query::mark_outbox_published(&self.db_manager, outbox_id).await?;
        debug!("{:<12} --> 아웃박스 발행 완료 id={}", "Store", outbox_id);
        Ok(())
    }

    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxEvent>, AppError> {
        Ok(query::get_pending_outbox(&self.db_manager, limit).await?)
    }

    async fn claim_outbox(&self, outbox_id: i64) -> Result<bool, AppError> {
        Ok(query::claim_outbox_event(&self.db_manager, outbox_id, OUTBOX_CLAIM_LEASE).await?)
    }

    async fn claim_pending_outbox(&self, limit: i64) -> Result<Vec<OutboxEvent>, AppError> {
        Ok(query::claim_pending_outbox(&self.db_manager, limit, OUTBOX_CLAIM_LEASE).await?)
    }

    async fn release_outbox_claim(&self, outbox_id: i64) -> Result<(), AppError> {
        query::release_outbox_claim(&self.db_manager, outbox_id).await?;
        debug!("{:<12} --> 아웃박스 점유 해제 id={}", "Store", outbox_id);
        Ok(())
    }

    async fn bid_history(
        &self,
        item_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<BidHistory, AppError> {
        Ok(query::get_bid_history(&self.db_manager, item_id, limit, offset).await?)
    }

    async fn bidder_stats(
        &self,
        auction_id: Uuid,
        bidder_ids: &[Uuid],
    ) -> Result<Vec<BidderStats>, AppError> {
        if bidder_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(query::get_bidder_stats(&self.db_manager, auction_id, bidder_ids).await?)
    }

    async fn points(&self, bidder_id: Uuid) -> Result<Option<BidderPoints>, AppError> {
        Ok(query::get_bidder_points(&self.db_manager, bidder_id).await?)
    }

    async fn point_history(
        &self,
        bidder_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PointHistory>, AppError> {
        Ok(query::get_point_history(&self.db_manager, bidder_id, limit, offset).await?)
    }

    async fn grant_points(
        &self,
        bidder_id: Uuid,
        amount: i64,
        admin_id: Option<i64>,
    ) -> Result<LedgerEntry, AppError> {
        repository::grant_points(&self.db_manager, bidder_id, amount, admin_id).await
    }
}

// endregion: --- Postgres Bid Store
