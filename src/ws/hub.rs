/// 실시간 Hub
/// 하나의 코디네이터 태스크가 연결 레지스트리를 소유하고 명령을 순서대로 처리한다.
/// 룸 맵은 읽기가 대부분이므로 RwLock으로 따로 공유한다.
/// 참가자 활동 조회는 별도 태스크에서 하고 결과를 명령으로 돌려받는다.
// region:    --- Imports
use super::client::{Client, ClientId};
use super::participants::{NoActivity, ParticipantDirectory};
use crate::bidding::model::BidderStats;
use super::event::{
    ClientMessage, FrameError, ParticipantData, WsEvent, EVENT_PARTICIPANTS_LIST,
    EVENT_PARTICIPANT_JOINED, EVENT_PARTICIPANT_LEFT, EVENT_PONG, EVENT_SUBSCRIBED,
    EVENT_UNSUBSCRIBED,
};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Hub Commands
type Rooms = Arc<RwLock<HashMap<String, HashSet<ClientId>>>>;

type ActivityMap = HashMap<Uuid, BidderStats>;

pub enum HubCommand {
    Register(Client),
    Unregister(ClientId),
    /// room이 None이면 전체 연결로 전송
    Broadcast {
        room: Option<String>,
        event: WsEvent,
    },
    Inbound {
        client_id: ClientId,
        message: Result<ClientMessage, FrameError>,
    },
    /// 구독 후 참가자 활동 조회가 끝남
    Subscribed {
        client_id: ClientId,
        auction_id: String,
        announce: bool,
        activity: ActivityMap,
    },
}

// endregion: --- Hub Commands

// region:    --- Hub Handle
/// Hub에 명령을 보내는 핸들 (복제해서 여러 곳에 주입)
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
    rooms: Rooms,
}

impl HubHandle {
    async fn send(&self, command: HubCommand) {
        if self.tx.send(command).await.is_err() {
            warn!("{:<12} --> Hub가 종료되어 명령을 버립니다", "Hub");
        }
    }

    pub async fn register(&self, client: Client) {
        self.send(HubCommand::Register(client)).await
    }

    pub async fn unregister(&self, client_id: ClientId) {
        self.send(HubCommand::Unregister(client_id)).await
    }

    /// 경매 룸에 브로드캐스트
    pub async fn broadcast_to_room(&self, room: &str, event: WsEvent) {
        self.send(HubCommand::Broadcast {
            room: Some(room.to_string()),
            event,
        })
        .await
    }

    /// 전체 연결에 브로드캐스트
    pub async fn broadcast_to_all(&self, event: WsEvent) {
        self.send(HubCommand::Broadcast { room: None, event }).await
    }

    pub async fn inbound(&self, client_id: ClientId, message: Result<ClientMessage, FrameError>) {
        self.send(HubCommand::Inbound { client_id, message }).await
    }

    /// 룸의 연결 수
    pub fn room_size(&self, room: &str) -> usize {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms.get(room).map_or(0, HashSet::len)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

// endregion: --- Hub Handle

// region:    --- Hub
pub struct Hub {
    rx: mpsc::Receiver<HubCommand>,
    /// 조회 태스크가 결과를 돌려보낼 때 사용 (Hub 종료를 막지 않도록 weak)
    loopback: mpsc::WeakSender<HubCommand>,
    clients: HashMap<ClientId, Client>,
    rooms: Rooms,
    directory: Arc<dyn ParticipantDirectory>,
}

impl Hub {
    /// 참가자 활동 조회 없이 생성
    pub fn new(command_capacity: usize) -> (Self, HubHandle) {
        Self::with_directory(command_capacity, Arc::new(NoActivity))
    }

    /// Hub와 핸들 생성. `run`을 별도 태스크로 실행해야 한다.
    pub fn with_directory(
        command_capacity: usize,
        directory: Arc<dyn ParticipantDirectory>,
    ) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(command_capacity);
        let rooms: Rooms = Arc::new(RwLock::new(HashMap::new()));
        let hub = Self {
            rx,
            loopback: tx.downgrade(),
            clients: HashMap::new(),
            rooms: Arc::clone(&rooms),
            directory,
        };
        (hub, HubHandle { tx, rooms })
    }

    /// 메인 루프. 모든 핸들이 버려지면 종료된다.
    pub async fn run(mut self) {
        info!("{:<12} --> Hub 시작", "Hub");
        while let Some(command) = self.rx.recv().await {
            match command {
                HubCommand::Register(client) => self.register(client),
                HubCommand::Unregister(client_id) => {
                    if self.clients.contains_key(&client_id) {
                        self.disconnect(vec![client_id]);
                    }
                }
                HubCommand::Broadcast { room, event } => self.broadcast(room.as_deref(), &event),
                HubCommand::Inbound { client_id, message } => self.handle_inbound(client_id, message),
                HubCommand::Subscribed {
                    client_id,
                    auction_id,
                    announce,
                    activity,
                } => {
                    let failed = self.complete_subscribe(client_id, auction_id, announce, &activity);
                    self.disconnect(failed);
                }
            }
        }
        info!("{:<12} --> Hub 종료", "Hub");
    }

    fn register(&mut self, client: Client) {
        info!(
            "{:<12} --> 클라이언트 등록 client={} user={} role={:?}",
            "Hub", client.id, client.identity.user_id, client.identity.role
        );
        self.clients.insert(client.id, client);
    }

    // region:    --- Fan-out
    /// 한 번 직렬화해서 대상 연결의 송신 큐에 넣는다 (블로킹 없음)
    fn broadcast(&mut self, room: Option<&str>, event: &WsEvent) {
        let Some(message) = serialize(event) else {
            return;
        };
        let targets: Vec<ClientId> = match room {
            Some(room) => self.members(room),
            None => self.clients.keys().copied().collect(),
        };
        debug!(
            "{:<12} --> 브로드캐스트 type={} room={:?} targets={}",
            "Hub",
            event.event_type,
            room,
            targets.len()
        );
        let failed = self.fan_out(&targets, &message);
        self.disconnect(failed);
    }

    /// 전송 실패(큐 가득 참 또는 닫힘)한 연결 목록을 돌려준다
    fn fan_out(&self, targets: &[ClientId], message: &Arc<str>) -> Vec<ClientId> {
        let mut failed = Vec::new();
        for client_id in targets {
            let Some(client) = self.clients.get(client_id) else {
                continue;
            };
            match client.sender.try_send(Arc::clone(message)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "{:<12} --> 송신 큐가 가득 찬 느린 클라이언트를 끊습니다 client={}",
                        "Hub", client_id
                    );
                    failed.push(*client_id);
                }
                Err(TrySendError::Closed(_)) => failed.push(*client_id),
            }
        }
        failed
    }

    fn send_to(&self, client_id: ClientId, event: &WsEvent) -> Vec<ClientId> {
        match serialize(event) {
            Some(message) => self.fan_out(&[client_id], &message),
            None => Vec::new(),
        }
    }

    fn members(&self, room: &str) -> Vec<ClientId> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    // endregion: --- Fan-out

    // region:    --- Disconnect
    /// 레지스트리와 모든 룸에서 제거하고 송신 큐를 닫는다
    /// 퇴장 알림 전송이 또 실패하면 그 연결도 이어서 끊는다.
    fn disconnect(&mut self, client_ids: Vec<ClientId>) {
        let mut pending = client_ids;
        while let Some(client_id) = pending.pop() {
            let Some(client) = self.clients.remove(&client_id) else {
                continue;
            };
            for room in client.rooms() {
                self.leave_room(room, client_id);
                if client.is_bidder() {
                    pending.extend(self.announce_left(room, &client));
                }
            }
            info!(
                "{:<12} --> 클라이언트 해제 client={} user={}",
                "Hub", client_id, client.identity.user_id
            );
            // client가 여기서 drop 되면서 송신 큐가 닫힌다
        }
    }

    /// 룸에서 제거. 빈 룸은 삭제한다. 실제로 제거했으면 true
    fn leave_room(&self, room: &str, client_id: ClientId) -> bool {
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        let Some(members) = rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&client_id);
        if members.is_empty() {
            rooms.remove(room);
        }
        removed
    }

    // endregion: --- Disconnect

    // region:    --- Client Events
    fn handle_inbound(&mut self, client_id: ClientId, message: Result<ClientMessage, FrameError>) {
        if !self.clients.contains_key(&client_id) {
            debug!("{:<12} --> 등록되지 않은 클라이언트 이벤트 client={}", "Hub", client_id);
            return;
        }
        let failed = match message {
            Ok(ClientMessage::Subscribe { auction_id }) => self.subscribe(client_id, auction_id),
            Ok(ClientMessage::Unsubscribe { auction_id }) => self.unsubscribe(client_id, auction_id),
            Ok(ClientMessage::Ping) => self.send_to(
                client_id,
                &WsEvent::new(EVENT_PONG, None, json!({ "message": "pong" })),
            ),
            Ok(ClientMessage::Unknown(event_type)) => {
                warn!("{:<12} --> 알 수 없는 이벤트 타입: {}", "Hub", event_type);
                self.send_to(client_id, &WsEvent::error("UNKNOWN_EVENT", "Unknown event type"))
            }
            Err(e) => self.send_to(client_id, &e.to_event()),
        };
        self.disconnect(failed);
    }

    /// 룸 참가. 룸에 입찰자가 있으면 활동 조회를 태스크로 넘기고
    /// 결과가 돌아오면 `complete_subscribe`에서 알림을 보낸다.
    fn subscribe(&mut self, client_id: ClientId, auction_id: String) -> Vec<ClientId> {
        let newly_joined = {
            let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
            rooms.entry(auction_id.clone()).or_default().insert(client_id)
        };

        let Some(client) = self.clients.get_mut(&client_id) else {
            return Vec::new();
        };
        client.rooms.insert(auction_id.clone());
        let announce = newly_joined && client.is_bidder();
        info!(
            "{:<12} --> 룸 참가 client={} auction={}",
            "Hub", client_id, auction_id
        );

        let bidder_ids = self.bidder_ids(&auction_id);
        if bidder_ids.is_empty() {
            return self.complete_subscribe(client_id, auction_id, announce, &HashMap::new());
        }

        let directory = Arc::clone(&self.directory);
        let loopback = self.loopback.clone();
        tokio::spawn(async move {
            let activity = match directory.bid_stats(&auction_id, &bidder_ids).await {
                Ok(stats) => stats.into_iter().map(|s| (s.bidder_id, s)).collect(),
                Err(e) => {
                    warn!(
                        "{:<12} --> 참가자 활동 조회 실패 auction={}: {}",
                        "Hub", auction_id, e
                    );
                    HashMap::new()
                }
            };
            if let Some(tx) = loopback.upgrade() {
                let _ = tx
                    .send(HubCommand::Subscribed {
                        client_id,
                        auction_id,
                        announce,
                        activity,
                    })
                    .await;
            }
        });
        Vec::new()
    }

    /// 다른 멤버에게 참가 알림, 본인에게 참가자 목록과 확인 메시지 순으로 보낸다
    fn complete_subscribe(
        &self,
        client_id: ClientId,
        auction_id: String,
        announce: bool,
        activity: &ActivityMap,
    ) -> Vec<ClientId> {
        let mut failed = Vec::new();
        let Some(client) = self.clients.get(&client_id) else {
            return failed;
        };

        // 조회 중에 나갔으면 참가 알림은 생략한다
        if announce && client.rooms.contains(&auction_id) {
            failed.extend(self.announce_joined(&auction_id, client, activity));
        }

        let participants = self.participants(&auction_id, activity);
        let list = WsEvent::new(
            EVENT_PARTICIPANTS_LIST,
            Some(&auction_id),
            json!({ "auction_id": auction_id, "participants": participants }),
        );
        failed.extend(self.send_to(client_id, &list));

        let ack = WsEvent::new(
            EVENT_SUBSCRIBED,
            Some(&auction_id),
            json!({
                "auction_id": auction_id,
                "message": "Successfully subscribed to auction",
            }),
        );
        failed.extend(self.send_to(client_id, &ack));
        failed
    }

    fn unsubscribe(&mut self, client_id: ClientId, auction_id: String) -> Vec<ClientId> {
        let mut failed = Vec::new();
        let was_member = self.leave_room(&auction_id, client_id);
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.rooms.remove(&auction_id);
        }
        if let Some(client) = self.clients.get(&client_id) {
            if was_member && client.is_bidder() {
                failed.extend(self.announce_left(&auction_id, client));
            }
        }
        info!(
            "{:<12} --> 룸 퇴장 client={} auction={}",
            "Hub", client_id, auction_id
        );

        let ack = WsEvent::new(
            EVENT_UNSUBSCRIBED,
            Some(&auction_id),
            json!({
                "auction_id": auction_id,
                "message": "Successfully unsubscribed from auction",
            }),
        );
        failed.extend(self.send_to(client_id, &ack));
        failed
    }

    /// 참가한 본인을 제외한 룸 멤버에게 알린다
    fn announce_joined(&self, room: &str, client: &Client, activity: &ActivityMap) -> Vec<ClientId> {
        let event = WsEvent::new(
            EVENT_PARTICIPANT_JOINED,
            Some(room),
            json!({ "auction_id": room, "participant": participant_of(client, activity) }),
        );
        let others: Vec<ClientId> = self
            .members(room)
            .into_iter()
            .filter(|id| *id != client.id)
            .collect();
        match serialize(&event) {
            Some(message) => self.fan_out(&others, &message),
            None => Vec::new(),
        }
    }

    fn announce_left(&self, room: &str, client: &Client) -> Vec<ClientId> {
        let bidder_id = client
            .identity
            .bidder_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        let event = WsEvent::new(
            EVENT_PARTICIPANT_LEFT,
            Some(room),
            json!({ "auction_id": room, "bidder_id": bidder_id }),
        );
        let others: Vec<ClientId> = self
            .members(room)
            .into_iter()
            .filter(|id| *id != client.id)
            .collect();
        match serialize(&event) {
            Some(message) => self.fan_out(&others, &message),
            None => Vec::new(),
        }
    }

    /// 룸에 접속한 입찰자 id (중복 제거)
    fn bidder_ids(&self, room: &str) -> Vec<Uuid> {
        let ids: HashSet<Uuid> = self
            .members(room)
            .iter()
            .filter_map(|id| self.clients.get(id))
            .filter_map(|client| client.identity.bidder_id.filter(|_| client.is_bidder()))
            .collect();
        ids.into_iter().collect()
    }

    /// 룸의 입찰자 목록 (bidder_id 기준 중복 제거)
    fn participants(&self, room: &str, activity: &ActivityMap) -> Vec<ParticipantData> {
        let mut seen = HashSet::new();
        let mut participants: Vec<ParticipantData> = self
            .members(room)
            .iter()
            .filter_map(|id| self.clients.get(id))
            .filter(|client| client.is_bidder())
            .filter(|client| seen.insert(client.identity.bidder_id))
            .map(|client| participant_of(client, activity))
            .collect();
        participants.sort_by(|a, b| a.bidder_id.cmp(&b.bidder_id));
        participants
    }

    // endregion: --- Client Events
}

fn participant_of(client: &Client, activity: &ActivityMap) -> ParticipantData {
    let stats = client.identity.bidder_id.and_then(|id| activity.get(&id));
    ParticipantData {
        bidder_id: client
            .identity
            .bidder_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
        display_name: client.identity.display_name.clone(),
        is_online: true,
        bid_count: stats.map_or(0, |s| s.bid_count),
        last_bid_at: stats.and_then(|s| s.last_bid_at),
    }
}

fn serialize(event: &WsEvent) -> Option<Arc<str>> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            error!("{:<12} --> 이벤트 직렬화 실패: {:?}", "Hub", e);
            None
        }
    }
}

// endregion: --- Hub

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::ws::client::Identity;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;
    use std::time::Duration;
    use tokio::time::timeout;

    /// 고정된 활동 정보를 돌려주는 조회
    struct FixedActivity(Vec<BidderStats>);

    #[async_trait]
    impl ParticipantDirectory for FixedActivity {
        async fn bid_stats(
            &self,
            _auction_id: &str,
            bidder_ids: &[Uuid],
        ) -> Result<Vec<BidderStats>, AppError> {
            Ok(self
                .0
                .iter()
                .filter(|s| bidder_ids.contains(&s.bidder_id))
                .cloned()
                .collect())
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<Arc<str>>) -> Value {
        let text = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("queue closed");
        serde_json::from_str(&text).unwrap()
    }

    fn start_hub() -> HubHandle {
        let (hub, handle) = Hub::new(64);
        tokio::spawn(hub.run());
        handle
    }

    async fn connect(
        hub: &HubHandle,
        identity: Identity,
        buffer: usize,
    ) -> (ClientId, mpsc::Receiver<Arc<str>>) {
        let (client, rx) = Client::new(identity, buffer);
        let id = client.id;
        hub.register(client).await;
        (id, rx)
    }

    async fn subscribe(hub: &HubHandle, id: ClientId, rx: &mut mpsc::Receiver<Arc<str>>, room: &str) {
        hub.inbound(id, Ok(ClientMessage::Subscribe { auction_id: room.to_string() }))
            .await;
        assert_eq!(next_event(rx).await["type"], "participants:list");
        assert_eq!(next_event(rx).await["type"], "subscribed");
    }

    #[tokio::test]
    async fn subscribe_sends_participant_snapshot_then_ack() {
        let bidder_id = Uuid::new_v4();
        let last_bid_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let (hub, handle) = Hub::with_directory(
            64,
            Arc::new(FixedActivity(vec![BidderStats {
                bidder_id,
                bid_count: 3,
                last_bid_at: Some(last_bid_at),
            }])),
        );
        tokio::spawn(hub.run());
        let (id, mut rx) = connect(&handle, Identity::bidder(bidder_id, "alice"), 8).await;

        handle
            .inbound(id, Ok(ClientMessage::Subscribe { auction_id: "r1".to_string() }))
            .await;

        let list = next_event(&mut rx).await;
        assert_eq!(list["type"], "participants:list");
        assert_eq!(list["auction_id"], "r1");
        let me = &list["data"]["participants"][0];
        assert_eq!(me["bidder_id"], bidder_id.to_string());
        assert_eq!(me["display_name"], "alice");
        assert_eq!(me["is_online"], true);
        assert_eq!(me["bid_count"], 3);
        assert_eq!(
            serde_json::from_value::<chrono::DateTime<Utc>>(me["last_bid_at"].clone()).unwrap(),
            last_bid_at
        );

        let ack = next_event(&mut rx).await;
        assert_eq!(ack["type"], "subscribed");
        assert_eq!(handle.room_size("r1"), 1);
    }

    #[tokio::test]
    async fn joined_announcement_carries_activity() {
        let bidder_id = Uuid::new_v4();
        let (hub, handle) = Hub::with_directory(
            64,
            Arc::new(FixedActivity(vec![BidderStats {
                bidder_id,
                bid_count: 1,
                last_bid_at: Some(Utc::now()),
            }])),
        );
        tokio::spawn(hub.run());
        let (viewer, mut viewer_rx) = connect(&handle, Identity::viewer("v"), 8).await;
        subscribe(&handle, viewer, &mut viewer_rx, "r1").await;

        let (newcomer, mut newcomer_rx) =
            connect(&handle, Identity::bidder(bidder_id, "carol"), 8).await;
        subscribe(&handle, newcomer, &mut newcomer_rx, "r1").await;

        let joined = next_event(&mut viewer_rx).await;
        assert_eq!(joined["type"], "participant:joined");
        assert_eq!(joined["data"]["participant"]["bid_count"], 1);
        assert!(joined["data"]["participant"]["last_bid_at"].is_string());
    }

    #[tokio::test]
    async fn bidders_without_activity_show_zero_bids() {
        let hub = start_hub();
        let (id, mut rx) = connect(&hub, Identity::bidder(Uuid::new_v4(), "dave"), 8).await;
        hub.inbound(id, Ok(ClientMessage::Subscribe { auction_id: "r1".to_string() }))
            .await;
        let list = next_event(&mut rx).await;
        assert_eq!(list["data"]["participants"][0]["bid_count"], 0);
        assert!(list["data"]["participants"][0]["last_bid_at"].is_null());
    }

    #[tokio::test]
    async fn ping_unknown_and_malformed_frames_get_replies() {
        let hub = start_hub();
        let (id, mut rx) = connect(&hub, Identity::viewer("v"), 8).await;

        hub.inbound(id, Ok(ClientMessage::Ping)).await;
        assert_eq!(next_event(&mut rx).await["type"], "pong");

        hub.inbound(id, Ok(ClientMessage::Unknown("bid".to_string()))).await;
        let unknown = next_event(&mut rx).await;
        assert_eq!(unknown["type"], "error");
        assert_eq!(unknown["data"]["code"], "UNKNOWN_EVENT");

        hub.inbound(id, Err(FrameError::Malformed)).await;
        assert_eq!(next_event(&mut rx).await["data"]["code"], "INVALID_EVENT");
    }

    #[tokio::test]
    async fn other_members_see_bidder_join_and_leave() {
        let hub = start_hub();
        let (viewer, mut viewer_rx) = connect(&hub, Identity::viewer("v"), 8).await;
        subscribe(&hub, viewer, &mut viewer_rx, "r1").await;

        let bidder_id = Uuid::new_v4();
        let (bidder, mut bidder_rx) = connect(&hub, Identity::bidder(bidder_id, "bob"), 8).await;
        subscribe(&hub, bidder, &mut bidder_rx, "r1").await;

        let joined = next_event(&mut viewer_rx).await;
        assert_eq!(joined["type"], "participant:joined");
        assert_eq!(joined["data"]["participant"]["bidder_id"], bidder_id.to_string());

        hub.unregister(bidder).await;
        let left = next_event(&mut viewer_rx).await;
        assert_eq!(left["type"], "participant:left");
        assert_eq!(left["data"]["bidder_id"], bidder_id.to_string());
        assert!(bidder_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn unsubscribe_and_disconnect_remove_empty_rooms() {
        let hub = start_hub();
        let (a, mut a_rx) = connect(&hub, Identity::viewer("a"), 8).await;
        subscribe(&hub, a, &mut a_rx, "r1").await;
        subscribe(&hub, a, &mut a_rx, "r2").await;
        assert_eq!(hub.room_count(), 2);

        hub.inbound(a, Ok(ClientMessage::Unsubscribe { auction_id: "r1".to_string() }))
            .await;
        assert_eq!(next_event(&mut a_rx).await["type"], "unsubscribed");
        assert_eq!(hub.room_size("r1"), 0);

        hub.unregister(a).await;
        assert!(a_rx.recv().await.is_none());
        assert_eq!(hub.room_count(), 0);
    }
}
