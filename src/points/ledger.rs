/// 포인트 원장
/// 입찰자별 잔액 불변식: total = available + reserved, 모든 값 >= 0
/// 모든 변경은 before/after 스냅샷을 가진 이력 한 건을 남긴다.
// region:    --- Imports
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Models
/// 입찰자 포인트 잔액
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BidderPoints {
    pub bidder_id: Uuid,
    pub total_points: i64,
    pub available_points: i64,
    pub reserved_points: i64,
    pub updated_at: DateTime<Utc>,
}

impl BidderPoints {
    pub fn new(bidder_id: Uuid, available_points: i64) -> Self {
        Self {
            bidder_id,
            total_points: available_points,
            available_points,
            reserved_points: 0,
            updated_at: Utc::now(),
        }
    }

    /// 잔액 불변식 검사
    pub fn is_consistent(&self) -> bool {
        self.available_points >= 0
            && self.reserved_points >= 0
            && self.total_points == self.available_points + self.reserved_points
    }
}

/// 포인트 이력 유형
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointHistoryType {
    Grant,
    Reserve,
    Release,
    Consume,
    Refund,
}

impl PointHistoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointHistoryType::Grant => "grant",
            PointHistoryType::Reserve => "reserve",
            PointHistoryType::Release => "release",
            PointHistoryType::Consume => "consume",
            PointHistoryType::Refund => "refund",
        }
    }
}

impl TryFrom<String> for PointHistoryType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "grant" => Ok(PointHistoryType::Grant),
            "reserve" => Ok(PointHistoryType::Reserve),
            "release" => Ok(PointHistoryType::Release),
            "consume" => Ok(PointHistoryType::Consume),
            "refund" => Ok(PointHistoryType::Refund),
            other => Err(format!("알 수 없는 포인트 이력 유형: {other}")),
        }
    }
}

/// 포인트 이력 (한 번 기록되면 변경되지 않는다)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PointHistory {
    pub id: i64,
    pub bidder_id: Uuid,
    pub amount: i64,
    #[sqlx(try_from = "String")]
    #[serde(rename = "type")]
    pub kind: PointHistoryType,
    pub reason: Option<String>,
    pub related_bid_id: Option<i64>,
    pub related_auction_id: Option<Uuid>,
    pub admin_id: Option<i64>,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reserved_before: i64,
    pub reserved_after: i64,
    pub total_before: i64,
    pub total_after: i64,
    pub created_at: DateTime<Utc>,
}

/// 이력에 남길 부가 정보
#[derive(Debug, Clone, Default)]
pub struct LedgerContext {
    pub reason: Option<String>,
    pub related_bid_id: Option<i64>,
    pub related_auction_id: Option<Uuid>,
    pub admin_id: Option<i64>,
}

impl LedgerContext {
    pub fn for_bid(bid_id: i64) -> Self {
        Self {
            related_bid_id: Some(bid_id),
            ..Default::default()
        }
    }
}

// endregion: --- Models

// region:    --- Operations
/// 원장 변경 결과: 변경 후 잔액과 기록할 이력
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub after: BidderPoints,
    pub history: PointHistory,
}

/// 원장 연산 적용
/// 어떤 값이든 0 미만이 되면 거부하고, 원래 잔액은 건드리지 않는다.
pub fn apply(
    before: &BidderPoints,
    kind: PointHistoryType,
    amount: i64,
    ctx: LedgerContext,
) -> Result<LedgerEntry, LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }

    let mut after = before.clone();
    match kind {
        PointHistoryType::Grant => {
            after.total_points = checked_add(before.total_points, amount)?;
            after.available_points = checked_add(before.available_points, amount)?;
        }
        PointHistoryType::Reserve => {
            after.available_points = take_available(before, amount)?;
            after.reserved_points = checked_add(before.reserved_points, amount)?;
        }
        PointHistoryType::Release | PointHistoryType::Refund => {
            after.reserved_points = take_reserved(before, amount)?;
            after.available_points = checked_add(before.available_points, amount)?;
        }
        PointHistoryType::Consume => {
            after.reserved_points = take_reserved(before, amount)?;
            after.total_points = before
                .total_points
                .checked_sub(amount)
                .ok_or(LedgerError::Overflow)?;
        }
    }
    after.updated_at = Utc::now();

    let history = PointHistory {
        id: 0,
        bidder_id: before.bidder_id,
        amount,
        kind,
        reason: ctx.reason,
        related_bid_id: ctx.related_bid_id,
        related_auction_id: ctx.related_auction_id,
        admin_id: ctx.admin_id,
        balance_before: before.available_points,
        balance_after: after.available_points,
        reserved_before: before.reserved_points,
        reserved_after: after.reserved_points,
        total_before: before.total_points,
        total_after: after.total_points,
        created_at: after.updated_at,
    };

    Ok(LedgerEntry { after, history })
}

fn checked_add(value: i64, amount: i64) -> Result<i64, LedgerError> {
    value.checked_add(amount).ok_or(LedgerError::Overflow)
}

fn take_available(points: &BidderPoints, amount: i64) -> Result<i64, LedgerError> {
    if points.available_points < amount {
        return Err(LedgerError::InsufficientAvailable {
            available: points.available_points,
            required: amount,
        });
    }
    Ok(points.available_points - amount)
}

fn take_reserved(points: &BidderPoints, amount: i64) -> Result<i64, LedgerError> {
    if points.reserved_points < amount {
        return Err(LedgerError::InsufficientReserved {
            reserved: points.reserved_points,
            required: amount,
        });
    }
    Ok(points.reserved_points - amount)
}

// endregion: --- Operations

#[cfg(test)]
mod tests {
    use super::*;

    fn points(available: i64, reserved: i64) -> BidderPoints {
        BidderPoints {
            bidder_id: Uuid::new_v4(),
            total_points: available + reserved,
            available_points: available,
            reserved_points: reserved,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn reserve_moves_available_into_escrow() {
        let before = points(1000, 0);
        let entry = apply(&before, PointHistoryType::Reserve, 500, LedgerContext::for_bid(7)).unwrap();

        assert_eq!(entry.after.available_points, 500);
        assert_eq!(entry.after.reserved_points, 500);
        assert_eq!(entry.after.total_points, 1000);
        assert!(entry.after.is_consistent());

        let h = &entry.history;
        assert_eq!(h.kind, PointHistoryType::Reserve);
        assert_eq!((h.balance_before, h.reserved_before), (1000, 0));
        assert_eq!((h.balance_after, h.reserved_after), (500, 500));
        assert_eq!(h.related_bid_id, Some(7));
    }

    #[test]
    fn release_and_refund_return_escrow() {
        let before = points(300, 500);
        for kind in [PointHistoryType::Release, PointHistoryType::Refund] {
            let entry = apply(&before, kind, 500, LedgerContext::default()).unwrap();
            assert_eq!(entry.after.available_points, 800);
            assert_eq!(entry.after.reserved_points, 0);
            assert_eq!(entry.after.total_points, 800);
        }
    }

    #[test]
    fn grant_and_consume_change_total() {
        let granted = apply(&points(0, 0), PointHistoryType::Grant, 1000, LedgerContext::default())
            .unwrap()
            .after;
        assert_eq!((granted.total_points, granted.available_points), (1000, 1000));

        let consumed = apply(&points(200, 500), PointHistoryType::Consume, 500, LedgerContext::default())
            .unwrap()
            .after;
        assert_eq!(consumed.total_points, 200);
        assert_eq!(consumed.reserved_points, 0);
        assert!(consumed.is_consistent());
    }

    #[test]
    fn rejects_operations_that_would_go_negative() {
        assert_eq!(
            apply(&points(400, 0), PointHistoryType::Reserve, 500, LedgerContext::default())
                .unwrap_err(),
            LedgerError::InsufficientAvailable { available: 400, required: 500 }
        );
        assert_eq!(
            apply(&points(1000, 100), PointHistoryType::Release, 500, LedgerContext::default())
                .unwrap_err(),
            LedgerError::InsufficientReserved { reserved: 100, required: 500 }
        );
        assert!(matches!(
            apply(&points(0, 100), PointHistoryType::Consume, 101, LedgerContext::default()),
            Err(LedgerError::InsufficientReserved { .. })
        ));
    }

    #[test]
    fn rejects_non_positive_amounts_and_overflow() {
        assert_eq!(
            apply(&points(10, 0), PointHistoryType::Grant, 0, LedgerContext::default()).unwrap_err(),
            LedgerError::InvalidAmount(0)
        );
        assert_eq!(
            apply(&points(i64::MAX, 0), PointHistoryType::Grant, 1, LedgerContext::default())
                .unwrap_err(),
            LedgerError::Overflow
        );
    }
}
