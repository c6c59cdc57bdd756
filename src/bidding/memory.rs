/// 메모리 입찰 저장소 (테스트 및 로컬 실행)
/// 입찰 확정은 상태 사본에서 모든 단계를 수행한 뒤 성공할 때만 한 번에 교체한다.
// region:    --- Imports
use super::model::{Bid, BidHistory, BidderStats, Item, OutboxEvent};
use super::store::{release_context, reserve_context, BidCommit, BidStore};
use crate::auction::events::BidPlacedEvent;
use crate::config::OUTBOX_CLAIM_LEASE;
use crate::error::{AppError, BidError};
use crate::points::ledger;
use crate::points::{BidderPoints, LedgerContext, LedgerEntry, PointHistory, PointHistoryType};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Memory State
#[derive(Debug, Clone)]
struct OutboxEntry {
    event: OutboxEvent,
    claimed_at: Option<Instant>,
    published: bool,
}

impl OutboxEntry {
    /// 미발행이고 점유가 없거나 만료됨
    fn claimable(&self, now: Instant) -> bool {
        !self.published
            && self
                .claimed_at
                .map_or(true, |at| now.duration_since(at) > OUTBOX_CLAIM_LEASE)
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    items: HashMap<Uuid, Item>,
    bids: Vec<Bid>,
    points: HashMap<Uuid, BidderPoints>,
    history: Vec<PointHistory>,
    outbox: Vec<OutboxEntry>,
    next_bid_id: i64,
    next_history_id: i64,
    next_outbox_id: i64,
}

impl MemoryState {
    /// 원장 연산 적용 후 이력 추가
    fn apply_points(
        &mut self,
        bidder_id: Uuid,
        kind: PointHistoryType,
        amount: i64,
        ctx: LedgerContext,
    ) -> Result<LedgerEntry, BidError> {
        let current = self
            .points
            .get(&bidder_id)
            .ok_or(BidError::PointsRecordMissing(bidder_id))?;
        let mut entry = ledger::apply(current, kind, amount, ctx)?;
        self.next_history_id += 1;
        entry.history.id = self.next_history_id;
        self.points.insert(bidder_id, entry.after.clone());
        self.history.push(entry.history.clone());
        Ok(entry)
    }

    fn write_bid(
        &mut self,
        item: &Item,
        bidder_id: Uuid,
        price: i64,
        displaced: Option<&Bid>,
    ) -> Result<BidCommit, BidError> {
        let current = self
            .points
            .get(&bidder_id)
            .ok_or(BidError::PointsRecordMissing(bidder_id))?;
        if current.available_points < price {
            return Err(BidError::InsufficientPoints {
                available: current.available_points,
                required: price,
            });
        }

        if let Some(previous) = displaced {
            self.apply_points(
                previous.bidder_id,
                PointHistoryType::Release,
                previous.price,
                release_context(item, previous),
            )?;
        }

        self.next_bid_id += 1;
        let bid_id = self.next_bid_id;
        self.bids.push(Bid {
            id: bid_id,
            item_id: item.id,
            bidder_id,
            price,
            is_winning: false,
            bid_at: Utc::now(),
        });
        for bid in self.bids.iter_mut().filter(|b| b.item_id == item.id) {
            bid.is_winning = bid.id == bid_id;
        }
        let bid = self
            .bids
            .last()
            .cloned()
            .ok_or(BidError::ItemNotFound(item.id))?;

        let entry = self.apply_points(
            bidder_id,
            PointHistoryType::Reserve,
            price,
            reserve_context(item, &bid),
        )?;

        let event = BidPlacedEvent::new(item, &bid);
        self.next_outbox_id += 1;
        let outbox = OutboxEvent {
            id: self.next_outbox_id,
            channel: event.channel().to_string(),
            payload: serde_json::to_string(&event)?,
            created_at: Utc::now(),
        };
        self.outbox.push(OutboxEntry {
            event: outbox.clone(),
            claimed_at: None,
            published: false,
        });

        Ok(BidCommit {
            bid,
            points: entry.after,
            outbox,
        })
    }
}

// endregion: --- Memory State

// region:    --- Memory Bid Store
#[derive(Debug, Default)]
pub struct MemoryBidStore {
    state: Mutex<MemoryState>,
}

impl MemoryBidStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 상품 등록 (경매 관리 흐름 대신)
    pub async fn insert_item(&self, item: Item) {
        self.state.lock().await.items.insert(item.id, item);
    }

    /// 공개 가격 변경
    pub async fn set_current_price(&self, item_id: Uuid, price: i64) {
        if let Some(item) = self.state.lock().await.items.get_mut(&item_id) {
            item.current_price = Some(price);
        }
    }

    /// 입찰자 포인트 행 생성
    pub async fn insert_points(&self, points: BidderPoints) {
        self.state
            .lock()
            .await
            .points
            .insert(points.bidder_id, points);
    }

    /// 상품의 전체 입찰 (저장 순)
    pub async fn bids_for(&self, item_id: Uuid) -> Vec<Bid> {
        let state = self.state.lock().await;
        state
            .bids
            .iter()
            .filter(|bid| bid.item_id == item_id)
            .cloned()
            .collect()
    }

    /// 입찰자의 전체 이력 (기록 순)
    pub async fn history_for(&self, bidder_id: Uuid) -> Vec<PointHistory> {
        let state = self.state.lock().await;
        state
            .history
            .iter()
            .filter(|history| history.bidder_id == bidder_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BidStore for MemoryBidStore {
    async fn find_item(&self, item_id: Uuid) -> Result<Option<Item>, BidError> {
        Ok(self.state.lock().await.items.get(&item_id).cloned())
    }

    async fn find_winning_bid(&self, item_id: Uuid) -> Result<Option<Bid>, BidError> {
        let state = self.state.lock().await;
        Ok(state
            .bids
            .iter()
            .find(|bid| bid.item_id == item_id && bid.is_winning)
            .cloned())
    }

    async fn commit_bid(
        &self,
        item: &Item,
        bidder_id: Uuid,
        price: i64,
        displaced: Option<&Bid>,
    ) -> Result<BidCommit, BidError> {
        let mut state = self.state.lock().await;
        let mut staged = state.clone();
        let commit = staged.write_bid(item, bidder_id, price, displaced)?;
        *state = staged;
        Ok(commit)
    }

    async fn mark_published(&self, outbox_id: i64) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.outbox.iter_mut().find(|e| e.event.id == outbox_id) {
            entry.published = true;
            entry.claimed_at = None;
        }
        Ok(())
    }

    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxEvent>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .outbox
            .iter()
            .filter(|entry| !entry.published)
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|entry| entry.event.clone())
            .collect())
    }

    async fn claim_outbox(&self, outbox_id: i64) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        match state.outbox.iter_mut().find(|e| e.event.id == outbox_id) {
            Some(entry) if entry.claimable(now) => {
                entry.claimed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_pending_outbox(&self, limit: i64) -> Result<Vec<OutboxEvent>, AppError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        Ok(state
            .outbox
            .iter_mut()
            .filter(|entry| entry.claimable(now))
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|entry| {
                entry.claimed_at = Some(now);
                entry.event.clone()
            })
            .collect())
    }

    async fn release_outbox_claim(&self, outbox_id: i64) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state
            .outbox
            .iter_mut()
            .find(|e| e.event.id == outbox_id && !e.published)
        {
            entry.claimed_at = None;
        }
        Ok(())
    }

    async fn bid_history(
        &self,
        item_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<BidHistory, AppError> {
        let state = self.state.lock().await;
        let matching: Vec<&Bid> = state
            .bids
            .iter()
            .filter(|bid| bid.item_id == item_id)
            .collect();
        let total = i64::try_from(matching.len()).unwrap_or(i64::MAX);
        let bids = matching
            .into_iter()
            .rev()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect();
        Ok(BidHistory { total, bids })
    }

    async fn bidder_stats(
        &self,
        auction_id: Uuid,
        bidder_ids: &[Uuid],
    ) -> Result<Vec<BidderStats>, AppError> {
        let state = self.state.lock().await;
        let mut stats: HashMap<Uuid, BidderStats> = HashMap::new();
        for bid in &state.bids {
            let in_auction = state
                .items
                .get(&bid.item_id)
                .is_some_and(|item| item.auction_id == auction_id);
            if !in_auction || !bidder_ids.contains(&bid.bidder_id) {
                continue;
            }
            let entry = stats.entry(bid.bidder_id).or_insert(BidderStats {
                bidder_id: bid.bidder_id,
                bid_count: 0,
                last_bid_at: None,
            });
            entry.bid_count += 1;
            entry.last_bid_at = entry.last_bid_at.max(Some(bid.bid_at));
        }
        Ok(stats.into_values().collect())
    }

    async fn points(&self, bidder_id: Uuid) -> Result<Option<BidderPoints>, AppError> {
        Ok(self.state.lock().await.points.get(&bidder_id).cloned())
    }

    async fn point_history(
        &self,
        bidder_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PointHistory>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .history
            .iter()
            .rev()
            .filter(|history| history.bidder_id == bidder_id)
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn grant_points(
        &self,
        bidder_id: Uuid,
        amount: i64,
        admin_id: Option<i64>,
    ) -> Result<LedgerEntry, AppError> {
        let mut state = self.state.lock().await;
        let current = state
            .points
            .get(&bidder_id)
            .ok_or_else(|| AppError::NotFound(format!("bidder_points {bidder_id}")))?;
        let ctx = LedgerContext {
            reason: Some("관리자 포인트 지급".to_string()),
            admin_id,
            ..Default::default()
        };
        let mut entry = ledger::apply(current, PointHistoryType::Grant, amount, ctx)?;
        state.next_history_id += 1;
        entry.history.id = state.next_history_id;
        state.points.insert(bidder_id, entry.after.clone());
        state.history.push(entry.history.clone());
        Ok(entry)
    }
}

// endregion: --- Memory Bid Store

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn open_item(price: i64) -> Item {
        Item {
            id: Uuid::new_v4(),
            auction_id: Uuid::new_v4(),
            current_price: Some(price),
            started_at: Some(Utc::now()),
            ended_at: None,
        }
    }

    #[tokio::test]
    async fn failed_commit_leaves_state_untouched() {
        let store = MemoryBidStore::new();
        let item = open_item(500);
        store.insert_item(item.clone()).await;

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.insert_points(BidderPoints::new(a, 1_000)).await;
        store.insert_points(BidderPoints::new(b, 1_000)).await;
        let first = store.commit_bid(&item, a, 500, None).await.unwrap();

        // 밀려난 입찰자의 예약이 부족하면 해제 단계에서 실패해야 한다
        let mut bogus = first.bid.clone();
        bogus.price = 5_000;
        let err = store.commit_bid(&item, b, 500, Some(&bogus)).await.unwrap_err();
        assert!(matches!(err, BidError::Ledger(_)));

        assert_eq!(store.bids_for(item.id).await.len(), 1);
        assert!(store.history_for(b).await.is_empty());
        assert_eq!(store.points(a).await.unwrap().unwrap().reserved_points, 500);
        assert_eq!(store.pending_outbox(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn grant_then_history_is_newest_first() {
        let store = MemoryBidStore::new();
        let bidder = Uuid::new_v4();
        store.insert_points(BidderPoints::new(bidder, 0)).await;

        store.grant_points(bidder, 100, Some(7)).await.unwrap();
        let entry = store.grant_points(bidder, 50, None).await.unwrap();
        assert_eq!(entry.after.total_points, 150);
        assert_eq!(entry.after.available_points, 150);

        let history = store.point_history(bidder, 10, 0).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].amount, 50);
        assert_eq!(history[1].admin_id, Some(7));

        let missing = store.grant_points(Uuid::new_v4(), 10, None).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn claimed_outbox_event_is_handed_out_once() {
        let store = MemoryBidStore::new();
        let item = open_item(500);
        store.insert_item(item.clone()).await;
        let a = Uuid::new_v4();
        store.insert_points(BidderPoints::new(a, 1_000)).await;
        let commit = store.commit_bid(&item, a, 500, None).await.unwrap();
        let id = commit.outbox.id;

        assert!(store.claim_outbox(id).await.unwrap());
        assert!(!store.claim_outbox(id).await.unwrap());
        assert!(store.claim_pending_outbox(10).await.unwrap().is_empty());
        // 점유 중이어도 미발행 상태로 남는다
        assert_eq!(store.pending_outbox(10).await.unwrap().len(), 1);

        store.release_outbox_claim(id).await.unwrap();
        let batch = store.claim_pending_outbox(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);

        // 점유한 쪽이 사라지면 만료 후 다시 가져갈 수 있다
        tokio::time::advance(OUTBOX_CLAIM_LEASE + Duration::from_secs(1)).await;
        assert!(store.claim_outbox(id).await.unwrap());

        store.mark_published(id).await.unwrap();
        store.release_outbox_claim(id).await.unwrap();
        assert!(!store.claim_outbox(id).await.unwrap());
        assert!(store.pending_outbox(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bidder_stats_are_scoped_to_auction() {
        let store = MemoryBidStore::new();
        let first = open_item(500);
        let second = Item {
            id: Uuid::new_v4(),
            ..first.clone()
        };
        let elsewhere = open_item(500);
        for item in [&first, &second, &elsewhere] {
            store.insert_item(item.clone()).await;
        }
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let idle = Uuid::new_v4();
        for id in [a, b, idle] {
            store.insert_points(BidderPoints::new(id, 10_000)).await;
        }

        let one = store.commit_bid(&first, a, 500, None).await.unwrap();
        let two = store.commit_bid(&first, b, 500, Some(&one.bid)).await.unwrap();
        let three = store.commit_bid(&second, a, 500, None).await.unwrap();
        store.commit_bid(&elsewhere, b, 500, None).await.unwrap();

        let mut stats = store
            .bidder_stats(first.auction_id, &[a, b, idle])
            .await
            .unwrap();
        stats.sort_by_key(|s| s.bid_count);
        assert_eq!(stats.len(), 2);
        assert_eq!((stats[0].bidder_id, stats[0].bid_count), (b, 1));
        assert_eq!(stats[0].last_bid_at, Some(two.bid.bid_at));
        assert_eq!((stats[1].bidder_id, stats[1].bid_count), (a, 2));
        assert_eq!(stats[1].last_bid_at, Some(three.bid.bid_at));
    }

    #[tokio::test]
    async fn bid_history_reports_total_beyond_page() {
        let store = MemoryBidStore::new();
        let item = open_item(500);
        store.insert_item(item.clone()).await;
        let mut previous = None;
        for _ in 0..3 {
            let bidder = Uuid::new_v4();
            store.insert_points(BidderPoints::new(bidder, 1_000)).await;
            let commit = store
                .commit_bid(&item, bidder, 500, previous.as_ref())
                .await
                .unwrap();
            previous = Some(commit.bid);
        }

        let page = store.bid_history(item.id, 2, 0).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.bids.len(), 2);
        assert_eq!(Some(&page.bids[0]), previous.as_ref());

        let rest = store.bid_history(item.id, 2, 2).await.unwrap();
        assert_eq!((rest.total, rest.bids.len()), (3, 1));
    }
}
