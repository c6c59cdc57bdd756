/// 포인트 원장 영속화 (PostgreSQL)
/// 모든 함수는 호출자의 트랜잭션 안에서 실행된다.
// region:    --- Imports
use super::ledger::{self, BidderPoints, LedgerContext, LedgerEntry, PointHistory, PointHistoryType};
use crate::database::DatabaseManager;
use crate::error::{AppError, LedgerError};
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Queries
const SELECT_POINTS_FOR_UPDATE: &str = r#"
    SELECT bidder_id, total_points, available_points, reserved_points, updated_at
    FROM bidder_points
    WHERE bidder_id = $1
    FOR UPDATE
"#;

const UPDATE_POINTS: &str = r#"
    UPDATE bidder_points
    SET total_points = $2, available_points = $3, reserved_points = $4, updated_at = $5
    WHERE bidder_id = $1
"#;

const INSERT_POINT_HISTORY: &str = r#"
    INSERT INTO point_history (
        bidder_id, amount, type, reason, related_bid_id, related_auction_id, admin_id,
        balance_before, balance_after, reserved_before, reserved_after,
        total_before, total_after, created_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
    RETURNING id
"#;

// endregion: --- Queries

// region:    --- Points Ledger
pub struct PointsLedger;

impl PointsLedger {
    /// 잔액 조회 (행 잠금)
    pub async fn lock_points(
        conn: &mut PgConnection,
        bidder_id: Uuid,
    ) -> Result<Option<BidderPoints>, sqlx::Error> {
        sqlx::query_as::<_, BidderPoints>(SELECT_POINTS_FOR_UPDATE)
            .bind(bidder_id)
            .fetch_optional(conn)
            .await
    }

    /// 이미 잠근 잔액에 연산을 적용하고 이력을 남긴다.
    /// 원장 규칙 위반 시 아무것도 쓰지 않고 오류를 돌려준다 (호출자가 롤백).
    pub async fn apply<E>(
        conn: &mut PgConnection,
        current: &BidderPoints,
        kind: PointHistoryType,
        amount: i64,
        ctx: LedgerContext,
    ) -> Result<LedgerEntry, E>
    where
        E: From<sqlx::Error> + From<LedgerError>,
    {
        let mut entry = ledger::apply(current, kind, amount, ctx)?;

        sqlx::query(UPDATE_POINTS)
            .bind(entry.after.bidder_id)
            .bind(entry.after.total_points)
            .bind(entry.after.available_points)
            .bind(entry.after.reserved_points)
            .bind(entry.after.updated_at)
            .execute(&mut *conn)
            .await?;

        entry.history.id = Self::insert_history(&mut *conn, &entry.history).await?;
        Ok(entry)
    }

    async fn insert_history(
        conn: &mut PgConnection,
        history: &PointHistory,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(INSERT_POINT_HISTORY)
            .bind(history.bidder_id)
            .bind(history.amount)
            .bind(history.kind.as_str())
            .bind(&history.reason)
            .bind(history.related_bid_id)
            .bind(history.related_auction_id)
            .bind(history.admin_id)
            .bind(history.balance_before)
            .bind(history.balance_after)
            .bind(history.reserved_before)
            .bind(history.reserved_after)
            .bind(history.total_before)
            .bind(history.total_after)
            .bind(history.created_at)
            .fetch_one(conn)
            .await
    }
}

/// 포인트 지급 (관리자 흐름의 진입점, 자체 트랜잭션)
pub async fn grant_points(
    db_manager: &DatabaseManager,
    bidder_id: Uuid,
    amount: i64,
    admin_id: Option<i64>,
) -> Result<LedgerEntry, AppError> {
    info!(
        "{:<12} --> 포인트 지급 bidder={} amount={}",
        "Points", bidder_id, amount
    );
    db_manager
        .transaction(|tx| {
            Box::pin(async move {
                let current = PointsLedger::lock_points(&mut **tx, bidder_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("bidder_points {bidder_id}")))?;
                let ctx = LedgerContext {
                    reason: Some("관리자 포인트 지급".to_string()),
                    admin_id,
                    ..Default::default()
                };
                PointsLedger::apply::<AppError>(
                    &mut **tx,
                    &current,
                    PointHistoryType::Grant,
                    amount,
                    ctx,
                )
                .await
            })
        })
        .await
}

// endregion: --- Points Ledger
