/// 아웃박스 재발행 스케줄러
/// 입찰 커밋 직후 발행이 실패했거나 프로세스가 그 사이에 죽은 경우,
/// 아웃박스에 남은 이벤트를 주기적으로 다시 발행한다.
// region:    --- Imports
use crate::bidding::BidStore;
use crate::config::OUTBOX_BATCH_SIZE;
use crate::error::AppError;
use crate::message_broker::EventPublisher;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

// endregion: --- Imports

// region:    --- Outbox Scheduler
pub struct OutboxScheduler {
    store: Arc<dyn BidStore>,
    publisher: Arc<dyn EventPublisher>,
    period: Duration,
}

impl OutboxScheduler {
    pub fn new(
        store: Arc<dyn BidStore>,
        publisher: Arc<dyn EventPublisher>,
        period: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            period,
        }
    }

    /// 스케줄러 시작
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("{:<12} --> 아웃박스 스케줄러 시작 ({:?})", "Scheduler", self.period);
            let mut interval = interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = self.drain_once().await {
                    error!(
                        "{:<12} --> 아웃박스 재발행 중 오류 발생: {:?}",
                        "Scheduler", e
                    );
                }
            }
        })
    }

    /// 미발행 이벤트를 한 배치 점유해서 발행. 발행한 건수를 돌려준다.
    /// 점유한 행만 발행하므로 입찰 직후 발행이나 다른 인스턴스와 겹치지 않는다.
    /// 발행이 실패하면 순서를 지키기 위해 이번 배치를 멈추고 남은 점유를 푼다.
    pub async fn drain_once(&self) -> Result<usize, AppError> {
        let claimed = self.store.claim_pending_outbox(OUTBOX_BATCH_SIZE).await?;
        if claimed.is_empty() {
            return Ok(0);
        }

        let mut published = 0;
        let mut batch = claimed.into_iter();
        while let Some(event) = batch.next() {
            if let Err(e) = self.publisher.publish(&event.channel, &event.payload).await {
                warn!(
                    "{:<12} --> 재발행 실패 id={} channel={}: {}",
                    "Scheduler", event.id, event.channel, e
                );
                for unsent in std::iter::once(event).chain(batch) {
                    self.store.release_outbox_claim(unsent.id).await?;
                }
                break;
            }
            self.store.mark_published(event.id).await?;
            published += 1;
        }

        debug!("{:<12} --> 아웃박스 {}건 재발행", "Scheduler", published);
        Ok(published)
    }
}

// endregion: --- Outbox Scheduler
