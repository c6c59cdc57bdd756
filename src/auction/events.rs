use crate::bidding::model::{Bid, Item};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Pub/Sub 채널
pub const CHANNEL_AUCTION_STARTED: &str = "auction:started";
pub const CHANNEL_PRICE_OPEN: &str = "auction:price_open";
pub const CHANNEL_BID: &str = "auction:bid";
pub const CHANNEL_AUCTION_ENDED: &str = "auction:ended";
pub const CHANNEL_AUCTION_CANCELLED: &str = "auction:cancelled";
pub const CHANNEL_ITEM_STARTED: &str = "auction:item_started";
pub const CHANNEL_ITEM_ENDED: &str = "auction:item_ended";

/// 릴레이가 구독하는 채널 목록
pub const RELAY_CHANNELS: &[&str] = &[
    CHANNEL_AUCTION_STARTED,
    CHANNEL_PRICE_OPEN,
    CHANNEL_BID,
    CHANNEL_AUCTION_ENDED,
    CHANNEL_AUCTION_CANCELLED,
    CHANNEL_ITEM_STARTED,
    CHANNEL_ITEM_ENDED,
];

pub const BID_PLACED: &str = "bid:placed";

// 입찰 이벤트 (auction:bid 채널로 발행)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidPlacedEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub auction_id: Uuid,
    pub item_id: Uuid,
    pub bid: BidSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidSnapshot {
    pub id: i64,
    pub bidder_id: Uuid,
    pub price: i64,
    pub is_winning: bool,
    /// RFC3339 (초 단위)
    pub bid_at: String,
}

impl BidPlacedEvent {
    pub fn new(item: &Item, bid: &Bid) -> Self {
        Self {
            event_type: BID_PLACED.to_string(),
            auction_id: item.auction_id,
            item_id: bid.item_id,
            bid: BidSnapshot {
                id: bid.id,
                bidder_id: bid.bidder_id,
                price: bid.price,
                is_winning: bid.is_winning,
                bid_at: bid.bid_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            },
        }
    }

    pub fn channel(&self) -> &'static str {
        CHANNEL_BID
    }
}
