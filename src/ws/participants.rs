/// 룸 참가자의 입찰 활동 조회
/// Hub 루프 밖의 태스크에서 호출된다.
// region:    --- Imports
use crate::bidding::model::BidderStats;
use crate::bidding::BidStore;
use crate::error::AppError;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Participant Directory
#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    /// 룸(경매)에서 입찰자별 입찰 수와 마지막 입찰 시각
    async fn bid_stats(
        &self,
        auction_id: &str,
        bidder_ids: &[Uuid],
    ) -> Result<Vec<BidderStats>, AppError>;
}

/// 활동 정보 없음 (모두 0건으로 표시)
pub struct NoActivity;

#[async_trait]
impl ParticipantDirectory for NoActivity {
    async fn bid_stats(
        &self,
        _auction_id: &str,
        _bidder_ids: &[Uuid],
    ) -> Result<Vec<BidderStats>, AppError> {
        Ok(Vec::new())
    }
}

/// 입찰 저장소 기반 조회
pub struct StoreDirectory {
    store: Arc<dyn BidStore>,
}

impl StoreDirectory {
    pub fn new(store: Arc<dyn BidStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ParticipantDirectory for StoreDirectory {
    async fn bid_stats(
        &self,
        auction_id: &str,
        bidder_ids: &[Uuid],
    ) -> Result<Vec<BidderStats>, AppError> {
        // 경매 id가 아닌 룸 이름은 입찰 기록이 있을 수 없다
        let Ok(auction_id) = Uuid::parse_str(auction_id) else {
            return Ok(Vec::new());
        };
        self.store.bidder_stats(auction_id, bidder_ids).await
    }
}

// endregion: --- Participant Directory
