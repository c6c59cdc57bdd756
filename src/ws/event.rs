/// WebSocket 이벤트 정의
/// 서버 → 클라이언트: {"type", "auction_id"?, "data", "timestamp"}
/// 클라이언트 → 서버: {"type": "subscribe" | "unsubscribe" | "ping", "data": {"auction_id"}}
// region:    --- Imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// endregion: --- Imports

// region:    --- Event Types
pub const EVENT_PARTICIPANT_JOINED: &str = "participant:joined";
pub const EVENT_PARTICIPANT_LEFT: &str = "participant:left";
pub const EVENT_PARTICIPANTS_LIST: &str = "participants:list";
pub const EVENT_SUBSCRIBED: &str = "subscribed";
pub const EVENT_UNSUBSCRIBED: &str = "unsubscribed";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_PONG: &str = "pong";

// endregion: --- Event Types

// region:    --- Server Event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl WsEvent {
    pub fn new(event_type: &str, auction_id: Option<&str>, data: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            auction_id: auction_id.map(str::to_string),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self::new(
            EVENT_ERROR,
            None,
            serde_json::json!({ "code": code, "message": message }),
        )
    }
}

/// 경매 참가자 (입찰자만 해당)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantData {
    pub bidder_id: String,
    pub display_name: String,
    pub is_online: bool,
    /// 이 경매에서의 입찰 수
    pub bid_count: i64,
    pub last_bid_at: Option<DateTime<Utc>>,
}

// endregion: --- Server Event

// region:    --- Client Frame
#[derive(Debug, Deserialize)]
struct RawClientFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    data: Option<Value>,
}

/// 파싱된 클라이언트 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Subscribe { auction_id: String },
    Unsubscribe { auction_id: String },
    Ping,
    Unknown(String),
}

/// 클라이언트 프레임 오류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// JSON이 아니거나 type이 없음
    Malformed,
    /// data 또는 data.auction_id 누락
    InvalidData,
    /// auction_id가 빈 문자열
    InvalidAuctionId,
}

impl FrameError {
    pub fn code(&self) -> &'static str {
        match self {
            FrameError::Malformed => "INVALID_EVENT",
            FrameError::InvalidData => "INVALID_DATA",
            FrameError::InvalidAuctionId => "INVALID_AUCTION_ID",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            FrameError::Malformed => "Invalid event format",
            FrameError::InvalidData => "Invalid subscribe data",
            FrameError::InvalidAuctionId => "Invalid auction ID",
        }
    }

    pub fn to_event(self) -> WsEvent {
        WsEvent::error(self.code(), self.message())
    }
}

pub fn parse_client_frame(text: &str) -> Result<ClientMessage, FrameError> {
    let frame: RawClientFrame = serde_json::from_str(text).map_err(|_| FrameError::Malformed)?;
    match frame.frame_type.as_str() {
        "subscribe" => Ok(ClientMessage::Subscribe {
            auction_id: auction_id_of(frame.data.as_ref())?,
        }),
        "unsubscribe" => Ok(ClientMessage::Unsubscribe {
            auction_id: auction_id_of(frame.data.as_ref())?,
        }),
        "ping" => Ok(ClientMessage::Ping),
        other => Ok(ClientMessage::Unknown(other.to_string())),
    }
}

/// auction_id는 문자열(UUID)과 숫자를 모두 받는다
fn auction_id_of(data: Option<&Value>) -> Result<String, FrameError> {
    let id = match data.and_then(|d| d.get("auction_id")) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(FrameError::InvalidData),
    };
    if id.is_empty() {
        return Err(FrameError::InvalidAuctionId);
    }
    Ok(id)
}

// endregion: --- Client Frame

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscribe_unsubscribe_and_ping() {
        assert_eq!(
            parse_client_frame(r#"{"type":"subscribe","data":{"auction_id":"a-1"}}"#),
            Ok(ClientMessage::Subscribe { auction_id: "a-1".to_string() })
        );
        assert_eq!(
            parse_client_frame(r#"{"type":"unsubscribe","data":{"auction_id":17}}"#),
            Ok(ClientMessage::Unsubscribe { auction_id: "17".to_string() })
        );
        assert_eq!(parse_client_frame(r#"{"type":"ping"}"#), Ok(ClientMessage::Ping));
        assert_eq!(
            parse_client_frame(r#"{"type":"bid"}"#),
            Ok(ClientMessage::Unknown("bid".to_string()))
        );
    }

    #[test]
    fn rejects_bad_frames() {
        assert_eq!(parse_client_frame("not json"), Err(FrameError::Malformed));
        assert_eq!(parse_client_frame(r#"{"data":{}}"#), Err(FrameError::Malformed));
        assert_eq!(
            parse_client_frame(r#"{"type":"subscribe"}"#),
            Err(FrameError::InvalidData)
        );
        assert_eq!(
            parse_client_frame(r#"{"type":"subscribe","data":{"auction_id":""}}"#),
            Err(FrameError::InvalidAuctionId)
        );
    }

    #[test]
    fn envelope_omits_missing_auction_id() {
        let value = serde_json::to_value(WsEvent::error("X", "y")).unwrap();
        assert_eq!(value["type"], "error");
        assert!(value.get("auction_id").is_none());
        assert_eq!(value["data"]["code"], "X");
        assert!(value["timestamp"].is_string());
    }
}
