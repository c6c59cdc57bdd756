/// 입찰 커맨드 처리
/// 1. 검증 (부작용 없음)
/// 2. 상품 락 획득 (한 번만 시도)
/// 3. 최고 입찰자 중복 확인
/// 4. 입찰 트랜잭션
/// 5. 락 해제
/// 6. 이벤트 발행 (커밋 이후, 실패해도 입찰은 유효)
// region:    --- Imports
use super::model::{Bid, Item, OutboxEvent};
use super::store::{BidCommit, BidStore};
use crate::error::BidError;
use crate::lock::{acquire_guard, item_lock_key, owner_token, DistributedLock};
use crate::message_broker::EventPublisher;
use crate::points::BidderPoints;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Commands
/// 입찰 명령
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlaceBidCommand {
    pub item_id: Uuid,
    pub bidder_id: Uuid,
    pub price: i64,
}

/// 입찰 결과: 저장된 입찰과 입찰자의 변경 후 포인트
#[derive(Debug, Serialize, Clone)]
pub struct PlaceBidOutcome {
    pub bid: Bid,
    pub points: BidderPoints,
}

/// 상품 상태와 가격 검증
pub fn validate_bid(item: &Item, price: i64) -> Result<(), BidError> {
    if item.started_at.is_none() {
        return Err(BidError::ItemNotStarted);
    }
    if item.ended_at.is_some() {
        return Err(BidError::ItemAlreadyEnded);
    }
    // 공개된 가격과 정확히 같아야 한다 (가격 공개 전이면 불일치)
    if item.current_price != Some(price) {
        return Err(BidError::PriceMismatch {
            current: item.current_price,
            bid: price,
        });
    }
    Ok(())
}

// endregion: --- Commands

// region:    --- Bid Placement Engine
pub struct BidPlacementEngine {
    store: Arc<dyn BidStore>,
    lock: Arc<dyn DistributedLock>,
    publisher: Arc<dyn EventPublisher>,
    lock_ttl: Duration,
}

impl BidPlacementEngine {
    pub fn new(
        store: Arc<dyn BidStore>,
        lock: Arc<dyn DistributedLock>,
        publisher: Arc<dyn EventPublisher>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            store,
            lock,
            publisher,
            lock_ttl,
        }
    }

    pub fn store(&self) -> Arc<dyn BidStore> {
        Arc::clone(&self.store)
    }

    /// 입찰
    pub async fn place_bid(&self, cmd: PlaceBidCommand) -> Result<PlaceBidOutcome, BidError> {
        info!("{:<12} --> 입찰 요청 처리 시작: {:?}", "Command", cmd);

        let item = self
            .store
            .find_item(cmd.item_id)
            .await?
            .ok_or(BidError::ItemNotFound(cmd.item_id))?;
        validate_bid(&item, cmd.price)?;

        let guard = acquire_guard(
            &self.lock,
            item_lock_key(item.id),
            owner_token(cmd.bidder_id),
            self.lock_ttl,
        )
        .await?
        .ok_or_else(|| {
            info!(
                "{:<12} --> 다른 입찰이 처리 중입니다 item={}",
                "Command", item.id
            );
            BidError::LockContended
        })?;

        let result = self.commit_locked(&item, &cmd).await;

        let key = guard.key().to_string();
        match guard.release().await {
            Ok(true) => {}
            Ok(false) => warn!("{:<12} --> 락이 이미 만료되었습니다 key={}", "Command", key),
            Err(e) => warn!("{:<12} --> 락 해제 실패 key={}: {}", "Command", key, e),
        }

        let commit = match result {
            Ok(commit) => commit,
            Err(e) => {
                if let BidError::PointsRecordMissing(bidder_id) = &e {
                    error!(
                        "{:<12} --> 입찰자 포인트 행이 없습니다 bidder={}",
                        "Command", bidder_id
                    );
                } else {
                    info!("{:<12} --> 입찰 거절 ({}): {}", "Command", e.code(), e);
                }
                return Err(e);
            }
        };

        info!(
            "{:<12} --> 입찰 확정 bid={} item={} bidder={} price={}",
            "Command", commit.bid.id, item.id, commit.bid.bidder_id, commit.bid.price
        );
        self.publish(&commit.outbox).await;

        Ok(PlaceBidOutcome {
            bid: commit.bid,
            points: commit.points,
        })
    }

    /// 락을 잡은 상태에서 실행되는 구간
    async fn commit_locked(
        &self,
        item: &Item,
        cmd: &PlaceBidCommand,
    ) -> Result<BidCommit, BidError> {
        let winning = self.store.find_winning_bid(item.id).await?;
        if let Some(current) = &winning {
            if current.bidder_id == cmd.bidder_id {
                return Err(BidError::AlreadyWinningBidder);
            }
        }
        self.store
            .commit_bid(item, cmd.bidder_id, cmd.price, winning.as_ref())
            .await
    }

    /// 커밋 이후 발행. 먼저 아웃박스 행을 점유해서 스케줄러와 중복 발행하지 않는다.
    /// 발행이 실패하면 점유를 풀어 스케줄러가 재발행하게 한다.
    async fn publish(&self, outbox: &OutboxEvent) {
        match self.store.claim_outbox(outbox.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    "{:<12} --> 다른 발행자가 이미 처리 중 id={}",
                    "Command", outbox.id
                );
                return;
            }
            Err(e) => {
                warn!(
                    "{:<12} --> 아웃박스 점유 실패, 스케줄러에 맡깁니다 id={}: {}",
                    "Command", outbox.id, e
                );
                return;
            }
        }

        match self.publisher.publish(&outbox.channel, &outbox.payload).await {
            Ok(()) => {
                if let Err(e) = self.store.mark_published(outbox.id).await {
                    warn!(
                        "{:<12} --> 아웃박스 발행 표시 실패 id={}: {}",
                        "Command", outbox.id, e
                    );
                }
            }
            Err(e) => {
                warn!(
                    "{:<12} --> 이벤트 발행 실패, 아웃박스에 남깁니다 id={}: {}",
                    "Command", outbox.id, e
                );
                if let Err(e) = self.store.release_outbox_claim(outbox.id).await {
                    warn!(
                        "{:<12} --> 아웃박스 점유 해제 실패 id={}: {}",
                        "Command", outbox.id, e
                    );
                }
            }
        }
    }
}

// endregion: --- Bid Placement Engine
