/// WebSocket 연결 하나
/// 연결마다 읽기 루프와 쓰기 루프가 독립적으로 돈다.
// region:    --- Imports
use super::event::parse_client_frame;
use super::event::FrameError;
use super::hub::HubHandle;
use crate::config::{PING_PERIOD, PONG_WAIT, WRITE_WAIT};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, info};
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Client
/// 연결 식별자 (연결마다 새로 발급)
pub type ClientId = Uuid;

/// 사용자 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Bidder,
    Auctioneer,
    SystemAdmin,
    Viewer,
}

/// 연결한 사용자 (인증은 앞단에서 끝난 상태)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
    /// 입찰자인 경우에만 설정
    pub bidder_id: Option<Uuid>,
    pub display_name: String,
}

impl Identity {
    pub fn bidder(bidder_id: Uuid, display_name: &str) -> Self {
        Self {
            user_id: bidder_id.to_string(),
            role: Role::Bidder,
            bidder_id: Some(bidder_id),
            display_name: display_name.to_string(),
        }
    }

    pub fn viewer(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            role: Role::Viewer,
            bidder_id: None,
            display_name: user_id.to_string(),
        }
    }
}

/// Hub 레지스트리에 등록되는 연결 상태
/// 송신 큐의 Sender는 Hub만 가진다. Hub가 Client를 버리면 쓰기 루프가 종료된다.
pub struct Client {
    pub id: ClientId,
    pub identity: Identity,
    pub(crate) sender: mpsc::Sender<Arc<str>>,
    pub(crate) rooms: HashSet<String>,
}

impl Client {
    /// 클라이언트와 송신 큐 수신 측 생성
    pub fn new(identity: Identity, send_buffer: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (sender, receiver) = mpsc::channel(send_buffer.max(1));
        let client = Self {
            id: Uuid::new_v4(),
            identity,
            sender,
            rooms: HashSet::new(),
        };
        (client, receiver)
    }

    pub fn is_bidder(&self) -> bool {
        self.identity.role == Role::Bidder && self.identity.bidder_id.is_some()
    }

    pub fn rooms(&self) -> impl Iterator<Item = &String> {
        self.rooms.iter()
    }
}

// endregion: --- Client

// region:    --- Connection Loops
/// 연결 하나를 끝까지 처리한다
/// 어느 한쪽 루프가 끝나면 다른 쪽도 중단하고 Hub에서 등록 해제한다.
pub async fn serve_connection(
    socket: WebSocket,
    identity: Identity,
    hub: HubHandle,
    send_buffer: usize,
) {
    let (client, outbound) = Client::new(identity, send_buffer);
    let client_id = client.id;
    info!(
        "{:<12} --> 연결 수립 client={} user={} role={:?}",
        "Connection", client_id, client.identity.user_id, client.identity.role
    );
    hub.register(client).await;

    let (sink, stream) = socket.split();
    let mut write_task = tokio::spawn(write_pump(sink, outbound, client_id));
    let mut read_task = tokio::spawn(read_pump(stream, client_id, hub.clone()));

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    hub.unregister(client_id).await;
    info!("{:<12} --> 연결 종료 client={}", "Connection", client_id);
}

/// 읽기 루프: 프레임을 파싱해 Hub로 넘긴다
/// 어떤 프레임이든 받으면 읽기 데드라인이 갱신된다 (Pong 포함).
pub async fn read_pump<R, E>(mut stream: R, client_id: ClientId, hub: HubHandle)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let frame = match timeout(PONG_WAIT, stream.next()).await {
            Err(_) => {
                info!("{:<12} --> 읽기 데드라인 초과 client={}", "Connection", client_id);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!("{:<12} --> 읽기 오류 client={}: {}", "Connection", client_id, e);
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => hub.inbound(client_id, parse_client_frame(&text)).await,
            Message::Binary(bytes) => {
                let parsed = std::str::from_utf8(&bytes)
                    .map_err(|_| FrameError::Malformed)
                    .and_then(parse_client_frame);
                hub.inbound(client_id, parsed).await
            }
            Message::Close(_) => break,
            // Ping 응답은 axum이 처리한다
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

/// 쓰기 루프: 송신 큐를 비우고 주기적으로 Ping을 보낸다
/// 큐가 닫히면 (Hub가 연결을 끊음) Close 프레임을 보내고 끝낸다.
pub async fn write_pump<W>(mut sink: W, mut outbound: mpsc::Receiver<Arc<str>>, client_id: ClientId)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut ticker = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    loop {
        let message = tokio::select! {
            queued = outbound.recv() => match queued {
                Some(text) => Message::Text(text.to_string()),
                None => {
                    let _ = send_with_deadline(&mut sink, Message::Close(None), client_id).await;
                    return;
                }
            },
            _ = ticker.tick() => Message::Ping(Vec::new()),
        };

        if !send_with_deadline(&mut sink, message, client_id).await {
            return;
        }
    }
}

async fn send_with_deadline<W>(sink: &mut W, message: Message, client_id: ClientId) -> bool
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match timeout(WRITE_WAIT, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("{:<12} --> 쓰기 오류 client={}: {}", "Connection", client_id, e);
            false
        }
        Err(_) => {
            info!("{:<12} --> 쓰기 타임아웃 client={}", "Connection", client_id);
            false
        }
    }
}

// endregion: --- Connection Loops

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_connection_gets_its_own_id() {
        let (a, _a_rx) = Client::new(Identity::viewer("same-user"), 4);
        let (b, _b_rx) = Client::new(Identity::viewer("same-user"), 4);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.get_version_num(), 4);
    }

    #[test]
    fn only_bidders_with_id_count_as_bidders() {
        let (bidder, _rx) = Client::new(Identity::bidder(Uuid::new_v4(), "alice"), 4);
        assert!(bidder.is_bidder());
        let (viewer, _rx) = Client::new(Identity::viewer("v"), 4);
        assert!(!viewer.is_bidder());
    }
}
