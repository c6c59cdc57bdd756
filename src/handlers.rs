// region:    --- Imports
use crate::bidding::{BidPlacementEngine, PlaceBidCommand};
use crate::error::{AppError, BidError};
use crate::ws::upgrade::ws_handler;
use crate::ws::HubHandle;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

// endregion: --- Imports

// region:    --- App State
const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BidPlacementEngine>,
    pub hub: HubHandle,
    /// 연결별 송신 큐 크기
    pub send_buffer: usize,
}

/// HTTP + WebSocket 라우터
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/items/:id/bid", post(handle_bid))
        .route("/items/:id/winning-bid", get(handle_get_winning_bid))
        .route("/items/:id/bids", get(handle_get_bid_history))
        .route(
            "/bidders/:id/points",
            get(handle_get_points).post(handle_grant_points),
        )
        .route("/bidders/:id/points/history", get(handle_get_point_history))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

// endregion: --- App State

// region:    --- Requests
#[derive(Debug, Deserialize)]
pub struct BidRequest {
    pub bidder_id: Uuid,
    pub price: i64,
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub points: i64,
    pub admin_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Page {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Page {
    /// (limit, offset) 범위 보정
    pub fn bounds(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

// endregion: --- Requests

// region:    --- Command Handlers

/// 입찰 요청 처리
pub async fn handle_bid(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    Json(request): Json<BidRequest>,
) -> Result<Response, BidError> {
    let cmd = PlaceBidCommand {
        item_id,
        bidder_id: request.bidder_id,
        price: request.price,
    };
    let outcome = state.engine.place_bid(cmd).await?;
    Ok((StatusCode::CREATED, Json(outcome)).into_response())
}

/// 포인트 지급 (관리자)
pub async fn handle_grant_points(
    State(state): State<AppState>,
    Path(bidder_id): Path<Uuid>,
    Json(request): Json<GrantRequest>,
) -> Result<Response, AppError> {
    info!(
        "{:<12} --> 포인트 지급 요청 bidder: {} points: {}",
        "Command", bidder_id, request.points
    );
    let entry = state
        .engine
        .store()
        .grant_points(bidder_id, request.points, request.admin_id)
        .await?;
    Ok(Json(serde_json::json!({
        "points": entry.after,
        "history": entry.history,
    }))
    .into_response())
}

// endregion: --- Command Handlers

// region:    --- Query Handlers

/// 상태 확인
pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "rooms": state.hub.room_count(),
    }))
}

/// 현재 최고 입찰 조회 (없으면 null)
pub async fn handle_get_winning_bid(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
) -> Result<Response, BidError> {
    info!("{:<12} --> 최고 입찰 조회 id: {}", "HandlerQuery", item_id);
    let bid = state.engine.store().find_winning_bid(item_id).await?;
    Ok(Json(bid).into_response())
}

/// 입찰 이력 조회 ({"total", "bids"})
pub async fn handle_get_bid_history(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    Query(page): Query<Page>,
) -> Result<Response, AppError> {
    info!("{:<12} --> 입찰 이력 조회 id: {}", "HandlerQuery", item_id);
    let (limit, offset) = page.bounds();
    let history = state
        .engine
        .store()
        .bid_history(item_id, limit, offset)
        .await?;
    Ok(Json(history).into_response())
}

/// 포인트 조회
pub async fn handle_get_points(
    State(state): State<AppState>,
    Path(bidder_id): Path<Uuid>,
) -> Result<Response, AppError> {
    info!("{:<12} --> 포인트 조회 bidder: {}", "HandlerQuery", bidder_id);
    let points = state
        .engine
        .store()
        .points(bidder_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("bidder_points {bidder_id}")))?;
    Ok(Json(points).into_response())
}

/// 포인트 이력 조회
pub async fn handle_get_point_history(
    State(state): State<AppState>,
    Path(bidder_id): Path<Uuid>,
    Query(page): Query<Page>,
) -> Result<Response, AppError> {
    info!(
        "{:<12} --> 포인트 이력 조회 bidder: {}",
        "HandlerQuery", bidder_id
    );
    let (limit, offset) = page.bounds();
    let history = state
        .engine
        .store()
        .point_history(bidder_id, limit, offset)
        .await?;
    Ok(Json(history).into_response())
}

// endregion: --- Query Handlers

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds_are_clamped() {
        assert_eq!(Page::default().bounds(), (DEFAULT_PAGE_SIZE, 0));
        let page = Page {
            limit: Some(10_000),
            offset: Some(-5),
        };
        assert_eq!(page.bounds(), (MAX_PAGE_SIZE, 0));
        let page = Page {
            limit: Some(0),
            offset: Some(20),
        };
        assert_eq!(page.bounds(), (1, 20));
    }
}
