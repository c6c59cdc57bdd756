/// WebSocket 업그레이드 핸들러
/// 인증은 앞단 게이트웨이가 처리하고 쿼리 파라미터로 신원을 넘겨받는다.
use super::client::{serve_connection, Identity, Role};
use crate::config::MAX_MESSAGE_SIZE;
use crate::handlers::AppState;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub user_id: Option<String>,
    pub role: Option<Role>,
    pub display_name: Option<String>,
}

/// 쿼리 파라미터로 연결 신원 구성. 입찰자는 user_id가 UUID여야 한다.
pub fn identity_from(params: ConnectParams) -> Result<Identity, (StatusCode, &'static str)> {
    let user_id = params
        .user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or((StatusCode::UNAUTHORIZED, "Unauthorized"))?;
    let role = params.role.unwrap_or(Role::Viewer);

    let bidder_id = match role {
        Role::Bidder => Some(
            Uuid::parse_str(&user_id).map_err(|_| (StatusCode::BAD_REQUEST, "Invalid bidder id"))?,
        ),
        _ => None,
    };
    let display_name = params
        .display_name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| user_id.clone());

    Ok(Identity {
        user_id,
        role,
        bidder_id,
        display_name,
    })
}

/// GET /ws
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = match identity_from(params) {
        Ok(identity) => identity,
        Err((status, message)) => {
            warn!("{:<12} --> WebSocket 연결 거부: {}", "Handler", message);
            return (status, message).into_response();
        }
    };
    info!(
        "{:<12} --> WebSocket 업그레이드 user={} role={:?}",
        "Handler", identity.user_id, identity.role
    );

    let hub = state.hub.clone();
    let send_buffer = state.send_buffer;
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| serve_connection(socket, identity, hub, send_buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(user_id: Option<&str>, role: Option<Role>) -> ConnectParams {
        ConnectParams {
            user_id: user_id.map(str::to_string),
            role,
            display_name: None,
        }
    }

    #[test]
    fn missing_user_is_unauthorized() {
        let err = identity_from(params(None, None)).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
        let err = identity_from(params(Some("  "), Some(Role::Viewer))).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn bidder_requires_uuid() {
        let err = identity_from(params(Some("42"), Some(Role::Bidder))).unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        let id = Uuid::new_v4();
        let identity = identity_from(params(Some(&id.to_string()), Some(Role::Bidder))).unwrap();
        assert_eq!(identity.bidder_id, Some(id));
        assert_eq!(identity.display_name, id.to_string());
    }

    #[test]
    fn viewer_defaults() {
        let identity = identity_from(params(Some("guest"), None)).unwrap();
        assert_eq!(identity.role, Role::Viewer);
        assert_eq!(identity.bidder_id, None);
    }
}
