// region:    --- Imports
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Ledger Error
/// 포인트 원장 연산 오류
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("포인트 금액은 0보다 커야 합니다: {0}")]
    InvalidAmount(i64),

    #[error("사용 가능 포인트가 부족합니다 (available={available}, required={required})")]
    InsufficientAvailable { available: i64, required: i64 },

    #[error("예약 포인트가 부족합니다 (reserved={reserved}, required={required})")]
    InsufficientReserved { reserved: i64, required: i64 },

    #[error("포인트 계산 중 오버플로가 발생했습니다")]
    Overflow,
}

// endregion: --- Ledger Error

// region:    --- Lock Error
/// 분산 락 백엔드 오류
#[derive(Debug, Error)]
pub enum LockError {
    #[error("락 저장소 오류: {0}")]
    Backend(#[from] sqlx::Error),
}

// endregion: --- Lock Error

// region:    --- Broker Error
/// Pub/Sub 오류
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Kafka 오류: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("구독 채널이 닫혔습니다")]
    Closed,
}

// endregion: --- Broker Error

// region:    --- Bid Error
/// 오류 분류 (처리 방식이 분류별로 다르다)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    State,
    Contention,
    Consistency,
    Infrastructure,
}

/// 입찰 처리 오류
#[derive(Debug, Error)]
pub enum BidError {
    #[error("상품을 찾을 수 없습니다: {0}")]
    ItemNotFound(Uuid),

    #[error("경매가 아직 시작되지 않았습니다.")]
    ItemNotStarted,

    #[error("경매가 이미 종료되었습니다.")]
    ItemAlreadyEnded,

    #[error("입찰 금액이 현재 가격과 일치하지 않습니다 (current={current:?}, bid={bid})")]
    PriceMismatch { current: Option<i64>, bid: i64 },

    #[error("다른 입찰이 처리 중입니다. 다시 시도해 주세요.")]
    LockContended,

    #[error("이미 최고 입찰자입니다.")]
    AlreadyWinningBidder,

    #[error("입찰자 포인트 정보가 없습니다: {0}")]
    PointsRecordMissing(Uuid),

    #[error("사용 가능 포인트가 부족합니다 (available={available}, required={required})")]
    InsufficientPoints { available: i64, required: i64 },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("데이터베이스 오류: {0}")]
    Database(#[from] sqlx::Error),

    #[error("이벤트 직렬화 오류: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BidError {
    /// 클라이언트에 노출되는 오류 코드
    pub fn code(&self) -> &'static str {
        match self {
            BidError::ItemNotFound(_) => "ITEM_NOT_FOUND",
            BidError::ItemNotStarted => "NOT_STARTED",
            BidError::ItemAlreadyEnded => "ALREADY_ENDED",
            BidError::PriceMismatch { .. } => "PRICE_MISMATCH",
            BidError::LockContended => "LOCK_CONTENDED",
            BidError::AlreadyWinningBidder => "ALREADY_WINNING_BIDDER",
            BidError::PointsRecordMissing(_) => "POINTS_NOT_FOUND",
            BidError::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            BidError::Ledger(_)
            | BidError::Lock(_)
            | BidError::Database(_)
            | BidError::Serialization(_) => "INTERNAL_ERROR",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BidError::PriceMismatch { .. } | BidError::AlreadyWinningBidder => {
                ErrorKind::Validation
            }
            BidError::ItemNotFound(_) | BidError::ItemNotStarted | BidError::ItemAlreadyEnded => {
                ErrorKind::State
            }
            BidError::LockContended => ErrorKind::Contention,
            BidError::PointsRecordMissing(_) | BidError::InsufficientPoints { .. } => {
                ErrorKind::Consistency
            }
            BidError::Ledger(_)
            | BidError::Lock(_)
            | BidError::Database(_)
            | BidError::Serialization(_) => ErrorKind::Infrastructure,
        }
    }

    fn status(&self) -> StatusCode {
        match (self, self.kind()) {
            (BidError::ItemNotFound(_), _) => StatusCode::NOT_FOUND,
            (_, ErrorKind::Validation) | (_, ErrorKind::State) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::Contention) => StatusCode::CONFLICT,
            (_, ErrorKind::Consistency) => StatusCode::UNPROCESSABLE_ENTITY,
            (_, ErrorKind::Infrastructure) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BidError {
    fn into_response(self) -> Response {
        let status = self.status();
        // 인프라 오류는 상세 내용을 숨긴다
        let message = match self.kind() {
            ErrorKind::Infrastructure => "내부 서버 오류".to_string(),
            _ => self.to_string(),
        };
        (
            status,
            Json(serde_json::json!({ "error": message, "code": self.code() })),
        )
            .into_response()
    }
}

// endregion: --- Bid Error

// region:    --- App Error
/// 프로세스 수준 오류
#[derive(Debug, Error)]
pub enum AppError {
    #[error("설정 오류: {0}")]
    Config(String),

    #[error("데이터베이스 오류: {0}")]
    Database(#[from] sqlx::Error),

    #[error("원장 오류: {0}")]
    Ledger(#[from] LedgerError),

    #[error("찾을 수 없습니다: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            AppError::Ledger(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "LEDGER_REJECTED",
                self.to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "내부 서버 오류".to_string(),
            ),
        };
        (
            status,
            Json(serde_json::json!({ "error": message, "code": code })),
        )
            .into_response()
    }
}

// endregion: --- App Error

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_follow_handling_table() {
        assert_eq!(
            BidError::PriceMismatch { current: Some(500), bid: 400 }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(BidError::AlreadyWinningBidder.kind(), ErrorKind::Validation);
        assert_eq!(BidError::ItemNotStarted.kind(), ErrorKind::State);
        assert_eq!(BidError::LockContended.kind(), ErrorKind::Contention);
        assert_eq!(
            BidError::PointsRecordMissing(Uuid::nil()).kind(),
            ErrorKind::Consistency
        );
        assert_eq!(
            BidError::Ledger(LedgerError::Overflow).kind(),
            ErrorKind::Infrastructure
        );
    }

    #[test]
    fn contention_maps_to_conflict() {
        let response = BidError::LockContended.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
