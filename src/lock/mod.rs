/// 상품 단위 분산 락
/// 1. 획득: 키가 없을(또는 만료된) 때만 TTL과 함께 설정 (한 번의 원자적 연산)
/// 2. 해제: 현재 값이 소유 토큰과 같을 때만 삭제 (원자적 compare-and-delete)
/// 재시도나 대기는 하지 않는다. 실패는 즉시 호출자에게 돌려준다.
// region:    --- Imports
use crate::error::LockError;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Lock Trait
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// 키가 비어 있으면 소유 토큰으로 설정하고 true, 이미 잡혀 있으면 false
    async fn acquire(&self, key: &str, owner_token: &str, ttl: Duration) -> Result<bool, LockError>;

    /// 소유 토큰이 일치할 때만 삭제. 삭제했으면 true
    async fn release(&self, key: &str, owner_token: &str) -> Result<bool, LockError>;
}

/// 상품 입찰 락 키
pub fn item_lock_key(item_id: Uuid) -> String {
    format!("bid:lock:item:{item_id}")
}

/// 소유 토큰 (요청마다 고유)
pub fn owner_token(bidder_id: Uuid) -> String {
    format!("{}:{}", bidder_id, Uuid::new_v4())
}

/// 락을 잡고 가드를 돌려준다. 이미 잡혀 있으면 None
pub async fn acquire_guard(
    lock: &Arc<dyn DistributedLock>,
    key: String,
    owner_token: String,
    ttl: Duration,
) -> Result<Option<LockGuard>, LockError> {
    if !lock.acquire(&key, &owner_token, ttl).await? {
        return Ok(None);
    }
    Ok(Some(LockGuard {
        lock: Arc::clone(lock),
        key,
        owner_token,
        released: false,
    }))
}

// endregion: --- Lock Trait

// region:    --- Lock Guard
/// 보유 중인 락
/// `release`를 호출하지 못하고 drop 되면 (패닉, 취소) 백그라운드에서 해제한다.
pub struct LockGuard {
    lock: Arc<dyn DistributedLock>,
    key: String,
    owner_token: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 명시적 해제. 완료를 확인하기 전에 취소되거나 실패하면 drop에서 다시 해제한다.
    pub async fn release(mut self) -> Result<bool, LockError> {
        let result = self.lock.release(&self.key, &self.owner_token).await;
        self.released = result.is_ok();
        result
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let lock = Arc::clone(&self.lock);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.owner_token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = lock.release(&key, &token).await {
                        warn!("{:<12} --> 락 지연 해제 실패 key={}: {}", "Lock", key, e);
                    }
                });
            }
            // 런타임이 없으면 TTL 만료에 맡긴다
            Err(_) => warn!("{:<12} --> 런타임 없음, TTL 만료 대기 key={}", "Lock", key),
        }
    }
}

// endregion: --- Lock Guard

// region:    --- Postgres Lock
const ACQUIRE_LOCK: &str = r#"
    INSERT INTO distributed_locks (lock_key, owner_token, expires_at)
    VALUES ($1, $2, NOW() + make_interval(secs => $3))
    ON CONFLICT (lock_key) DO UPDATE
        SET owner_token = EXCLUDED.owner_token, expires_at = EXCLUDED.expires_at
        WHERE distributed_locks.expires_at <= NOW()
    RETURNING lock_key
"#;

const RELEASE_LOCK: &str =
    "DELETE FROM distributed_locks WHERE lock_key = $1 AND owner_token = $2";

/// PostgreSQL 기반 락
/// 같은 데이터베이스를 쓰는 모든 프로세스 사이에서 상호 배제가 보장된다.
pub struct PostgresLock {
    pool: Arc<PgPool>,
}

impl PostgresLock {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DistributedLock for PostgresLock {
    async fn acquire(&self, key: &str, owner_token: &str, ttl: Duration) -> Result<bool, LockError> {
        let acquired = sqlx::query_scalar::<_, String>(ACQUIRE_LOCK)
            .bind(key)
            .bind(owner_token)
            .bind(ttl.as_secs_f64())
            .fetch_optional(&*self.pool)
            .await?
            .is_some();
        debug!("{:<12} --> 락 획득 시도 key={} acquired={}", "Lock", key, acquired);
        Ok(acquired)
    }

    async fn release(&self, key: &str, owner_token: &str) -> Result<bool, LockError> {
        let result = sqlx::query(RELEASE_LOCK)
            .bind(key)
            .bind(owner_token)
            .execute(&*self.pool)
            .await?;
        let released = result.rows_affected() == 1;
        debug!("{:<12} --> 락 해제 key={} released={}", "Lock", key, released);
        Ok(released)
    }
}

// endregion: --- Postgres Lock

// region:    --- Memory Lock
/// 단일 프로세스용 락 (테스트 및 로컬 실행)
#[derive(Default)]
pub struct MemoryLock {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 현재 소유 토큰 (만료된 것은 없는 것으로 본다)
    pub fn holder(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(token, _)| token.clone())
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn acquire(&self, key: &str, owner_token: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if let Some((_, expires_at)) = entries.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        entries.insert(key.to_string(), (owner_token.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, key: &str, owner_token: &str) -> Result<bool, LockError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((token, _)) if token == owner_token => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// endregion: --- Memory Lock
