/// 이벤트 릴레이
/// 다른 프로세스(경매 관리, 입찰 API 인스턴스)가 발행한 도메인 이벤트를 Hub로 전달한다.
/// 페이로드의 type은 봉투 타입이 되고, 나머지 필드가 data가 된다.
// region:    --- Imports
use crate::auction::events::RELAY_CHANNELS;
use crate::config::RelayScope;
use crate::error::BrokerError;
use crate::message_broker::{BrokerMessage, EventSubscriber};
use crate::ws::event::WsEvent;
use crate::ws::HubHandle;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

// endregion: --- Imports

// region:    --- Event Relay
pub struct EventRelay {
    subscriber: Arc<dyn EventSubscriber>,
    hub: HubHandle,
    scope: RelayScope,
}

impl EventRelay {
    pub fn new(subscriber: Arc<dyn EventSubscriber>, hub: HubHandle, scope: RelayScope) -> Self {
        Self {
            subscriber,
            hub,
            scope,
        }
    }

    /// 구독을 시작하고 구독이 끝날 때까지 전달한다
    pub async fn run(self) -> Result<(), BrokerError> {
        let mut messages = self.subscriber.subscribe(RELAY_CHANNELS).await?;
        info!(
            "{:<12} --> 릴레이 시작 channels={} scope={:?}",
            "Relay",
            RELAY_CHANNELS.len(),
            self.scope
        );

        while let Some(message) = messages.recv().await {
            self.forward(message).await;
        }

        warn!("{:<12} --> 구독이 종료되었습니다", "Relay");
        Err(BrokerError::Closed)
    }

    async fn forward(&self, message: BrokerMessage) {
        let event = match relay_frame(&message.payload) {
            Some(event) => event,
            None => {
                warn!(
                    "{:<12} --> 잘못된 페이로드를 건너뜁니다 channel={}",
                    "Relay", message.channel
                );
                return;
            }
        };
        debug!(
            "{:<12} --> 전달 channel={} type={}",
            "Relay", message.channel, event.event_type
        );

        match (self.scope, event.auction_id.clone()) {
            (RelayScope::Room, Some(room)) => self.hub.broadcast_to_room(&room, event).await,
            (RelayScope::Room, None) => {
                warn!(
                    "{:<12} --> auction_id가 없어 룸으로 보낼 수 없습니다 type={}",
                    "Relay", event.event_type
                );
            }
            (RelayScope::All, _) => self.hub.broadcast_to_all(event).await,
        }
    }
}

/// 페이로드를 클라이언트 봉투로 변환. JSON 객체가 아니거나 type이 없으면 None
pub fn relay_frame(payload: &str) -> Option<WsEvent> {
    let Value::Object(mut fields) = serde_json::from_str::<Value>(payload).ok()? else {
        return None;
    };
    let event_type = match fields.remove("type") {
        Some(Value::String(event_type)) if !event_type.is_empty() => event_type,
        _ => return None,
    };
    let auction_id = match fields.get("auction_id") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };

    Some(WsEvent {
        event_type,
        auction_id,
        data: Value::Object(fields),
        timestamp: Utc::now(),
    })
}

// endregion: --- Event Relay

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_type_and_lifts_auction_id() {
        let event = relay_frame(
            r#"{"type":"bid:placed","auction_id":"a-1","item_id":"i-1","bid":{"price":500}}"#,
        )
        .unwrap();
        assert_eq!(event.event_type, "bid:placed");
        assert_eq!(event.auction_id.as_deref(), Some("a-1"));
        assert!(event.data.get("type").is_none());
        assert_eq!(event.data["item_id"], "i-1");
        assert_eq!(event.data["bid"]["price"], 500);
    }

    #[test]
    fn rejects_payloads_without_type() {
        assert!(relay_frame("not json").is_none());
        assert!(relay_frame("[1,2]").is_none());
        assert!(relay_frame(r#"{"auction_id":"a-1"}"#).is_none());
    }

    #[test]
    fn numeric_auction_id_is_stringified() {
        let event = relay_frame(r#"{"type":"auction:started","auction_id":7}"#).unwrap();
        assert_eq!(event.auction_id.as_deref(), Some("7"));
    }
}
