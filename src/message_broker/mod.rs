// region:    --- Imports
use crate::error::BrokerError;
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Pub/Sub Traits
/// 구독 채널 버퍼 크기
const SUBSCRIPTION_BUFFER: usize = 1024;

/// 수신한 Pub/Sub 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: String,
}

/// 이벤트 발행
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError>;
}

/// 이벤트 구독
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn subscribe(&self, channels: &[&str]) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError>;
}

/// 논리 채널명 → Kafka 토픽명 (토픽명에 ':'를 쓸 수 없다)
pub fn topic_for(channel: &str) -> String {
    channel.replace(':', ".")
}

/// Kafka 토픽명 → 논리 채널명
pub fn channel_for(topic: &str) -> String {
    topic.replacen('.', ":", 1)
}

// endregion: --- Pub/Sub Traits

// region:    --- Kafka Producer
#[derive(Clone)]
pub struct KafkaProducer {
    producer: Arc<FutureProducer>,
}

/// KafkaProducer 구현
impl KafkaProducer {
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(KafkaProducer {
            producer: Arc::new(producer),
        })
    }

    /// 메시지 전송
    pub async fn send_message(&self, topic: &str, key: &str, value: &str) -> Result<(), BrokerError> {
        debug!(
            "{:<12} --> Kafka 메시지 전송: topic={}, key={}",
            "Producer", topic, key
        );
        let record = FutureRecord::to(topic).key(key).payload(value);

        self.producer
            .send(record, Duration::from_secs(0))
            .await
            .map_err(|(e, _)| BrokerError::Kafka(e))?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for KafkaProducer {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        self.send_message(&topic_for(channel), channel, payload).await
    }
}

// endregion: --- Kafka Producer

// region:    --- Kafka Consumer
pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
}

/// KafkaConsumer 구현
impl KafkaConsumer {
    /// 인스턴스마다 다른 group_id를 써야 모든 Hub가 모든 이벤트를 받는다
    pub fn new(brokers: &str, group_id: &str) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .set("session.timeout.ms", "6000")
            .set("allow.auto.create.topics", "true")
            .create()?;

        Ok(KafkaConsumer {
            consumer: Arc::new(consumer),
        })
    }

    fn to_broker_message(message: &BorrowedMessage<'_>) -> Option<BrokerMessage> {
        let payload = match message.payload_view::<str>() {
            Some(Ok(payload)) => payload.to_string(),
            Some(Err(e)) => {
                error!("{:<12} --> UTF-8 디코딩 오류: {:?}", "Consumer", e);
                return None;
            }
            None => {
                warn!("{:<12} --> 빈 페이로드 수신", "Consumer");
                return None;
            }
        };
        Some(BrokerMessage {
            channel: channel_for(message.topic()),
            payload,
        })
    }
}

#[async_trait]
impl EventSubscriber for KafkaConsumer {
    async fn subscribe(&self, channels: &[&str]) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError> {
        let topics: Vec<String> = channels.iter().map(|c| topic_for(c)).collect();
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topic_refs)?;
        info!("{:<12} --> Kafka 구독 시작: {:?}", "Consumer", topics);

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let consumer = Arc::clone(&self.consumer);
        tokio::spawn(async move {
            loop {
                let message = match consumer.recv().await {
                    Ok(message) => {
                        debug!(
                            "{:<12} --> 메시지 수신: topic={}, partition={}, offset={}",
                            "Consumer",
                            message.topic(),
                            message.partition(),
                            message.offset()
                        );
                        Self::to_broker_message(&message)
                    }
                    Err(e) => {
                        error!("{:<12} --> 메시지 수신 오류: {:?}", "Consumer", e);
                        None
                    }
                };

                if let Some(message) = message {
                    if tx.send(message).await.is_err() {
                        info!("{:<12} --> 구독자가 종료되어 수신을 멈춥니다", "Consumer");
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }
}

// endregion: --- Kafka Consumer

// region:    --- Kafka Manager
pub struct KafkaManager {
    producer: Arc<KafkaProducer>,
    consumer: Arc<KafkaConsumer>,
    brokers: String,
}

/// KafkaManager 구현
impl KafkaManager {
    pub fn new(brokers: &str, group_prefix: &str) -> Result<Self, BrokerError> {
        let group_id = format!("{}-{}", group_prefix, Uuid::new_v4());
        info!("{:<12} --> Kafka 컨슈머 그룹: {}", "Manager", group_id);

        Ok(KafkaManager {
            producer: Arc::new(KafkaProducer::new(brokers)?),
            consumer: Arc::new(KafkaConsumer::new(brokers, &group_id)?),
            brokers: brokers.to_string(),
        })
    }

    /// 프로듀서 반환
    pub fn get_producer(&self) -> Arc<KafkaProducer> {
        Arc::clone(&self.producer)
    }

    /// 컨슈머 반환
    pub fn get_consumer(&self) -> Arc<KafkaConsumer> {
        Arc::clone(&self.consumer)
    }

    /// 채널별 토픽 생성 (이미 있으면 무시)
    pub async fn create_topics(
        &self,
        channels: &[&str],
        num_partitions: i32,
        replication_factor: i32,
    ) -> Result<(), BrokerError> {
        let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .create()?;

        let topics: Vec<String> = channels.iter().map(|c| topic_for(c)).collect();
        let new_topics: Vec<NewTopic<'_>> = topics
            .iter()
            .map(|t| NewTopic::new(t, num_partitions, TopicReplication::Fixed(replication_factor)))
            .collect();

        let results = admin_client
            .create_topics(&new_topics, &AdminOptions::new())
            .await?;
        for result in results {
            match result {
                Ok(topic) => info!("{:<12} --> Kafka 토픽 생성 성공: {}", "Manager", topic),
                Err((topic, code)) => {
                    debug!("{:<12} --> Kafka 토픽 생성 생략: {} ({:?})", "Manager", topic, code)
                }
            }
        }
        Ok(())
    }
}

// endregion: --- Kafka Manager

// region:    --- Memory Broker
/// 단일 프로세스용 Pub/Sub (테스트 및 로컬 실행)
#[derive(Clone)]
pub struct MemoryBroker {
    tx: broadcast::Sender<BrokerMessage>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIPTION_BUFFER);
        Self { tx }
    }
}

#[async_trait]
impl EventPublisher for MemoryBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        // 구독자가 없으면 메시지는 버려진다
        let _ = self.tx.send(BrokerMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for MemoryBroker {
    async fn subscribe(&self, channels: &[&str]) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError> {
        let channels: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
        let mut source = self.tx.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(message) => {
                        if !channels.contains(&message.channel) {
                            continue;
                        }
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("{:<12} --> 메시지 {}건 유실", "MemoryBroker", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}

// endregion: --- Memory Broker

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_topic_mapping_round_trips() {
        assert_eq!(topic_for("auction:bid"), "auction.bid");
        assert_eq!(channel_for("auction.item_started"), "auction:item_started");
    }

    #[tokio::test]
    async fn memory_broker_delivers_only_subscribed_channels() {
        let broker = MemoryBroker::new();
        let mut rx = broker.subscribe(&["auction:bid"]).await.unwrap();

        broker.publish("auction:ended", "{}").await.unwrap();
        broker.publish("auction:bid", r#"{"type":"bid:placed"}"#).await.unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.channel, "auction:bid");
        assert_eq!(message.payload, r#"{"type":"bid:placed"}"#);
    }

    #[tokio::test]
    async fn memory_broker_publish_without_subscribers_is_ok() {
        let broker = MemoryBroker::new();
        assert!(broker.publish("auction:bid", "{}").await.is_ok());
    }
}
