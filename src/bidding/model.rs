use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// 상품 모델 (경매 관리 흐름이 소유, 입찰 코어에서는 읽기 전용)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Item {
    pub id: Uuid,
    pub auction_id: Uuid,
    /// 경매인이 공개한 현재 가격. 가격 공개 전에는 None
    pub current_price: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

// 입찰 모델
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bid {
    pub id: i64,
    pub item_id: Uuid,
    pub bidder_id: Uuid,
    pub price: i64,
    pub is_winning: bool,
    pub bid_at: DateTime<Utc>,
}

// 아웃박스 이벤트 (입찰 트랜잭션과 함께 기록되는 발행 대기 이벤트)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxEvent {
    pub id: i64,
    pub channel: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

// 입찰 이력 페이지 (전체 건수 포함)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidHistory {
    pub total: i64,
    pub bids: Vec<Bid>,
}

// 경매 단위 입찰자 활동 요약
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BidderStats {
    pub bidder_id: Uuid,
    pub bid_count: i64,
    pub last_bid_at: Option<DateTime<Utc>>,
}
