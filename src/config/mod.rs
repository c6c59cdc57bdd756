/// 환경 변수 기반 설정 및 프로토콜 상수
// region:    --- Imports
use crate::error::AppError;
use std::time::Duration;

// endregion: --- Imports

// region:    --- Constants
/// 입찰 락 기본 TTL (밀리초)
pub const DEFAULT_BID_LOCK_TTL_MS: u64 = 5_000;

/// WebSocket 쓰기 타임아웃
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Pong 대기 타임아웃 (읽기 데드라인)
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping 전송 간격. PONG_WAIT 보다 짧아야 한다.
pub const PING_PERIOD: Duration = Duration::from_secs(30);

/// 수신 메시지 최대 크기 (512KB)
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024;

/// 클라이언트별 송신 큐 기본 크기
pub const DEFAULT_SEND_BUFFER: usize = 256;

/// Hub 명령 큐 크기
pub const HUB_COMMAND_CAPACITY: usize = 256;

/// 아웃박스 재발행 배치 크기
pub const OUTBOX_BATCH_SIZE: i64 = 100;

/// 아웃박스 점유 유지 시간. 브로커 발행 타임아웃보다 길어야 한다.
/// 점유한 인스턴스가 이 시간 안에 끝내지 못하면 다른 인스턴스가 다시 가져간다.
pub const OUTBOX_CLAIM_LEASE: Duration = Duration::from_secs(30);

// endregion: --- Constants

// region:    --- Relay Scope
/// 다른 프로세스에서 온 이벤트를 어디로 전달할지
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayScope {
    /// 모든 연결에 전달 (클라이언트가 auction_id로 직접 필터링)
    All,
    /// 해당 경매 룸에만 전달
    Room,
}

impl std::str::FromStr for RelayScope {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(RelayScope::All),
            "room" => Ok(RelayScope::Room),
            other => Err(AppError::Config(format!(
                "RELAY_SCOPE must be 'all' or 'room', got '{other}'"
            ))),
        }
    }
}

// endregion: --- Relay Scope

// region:    --- Config
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub kafka_brokers: String,
    /// 인스턴스마다 고유한 컨슈머 그룹을 만들 때 쓰는 접두사
    pub kafka_group_prefix: String,
    pub api_addr: String,
    pub log_level: String,
    pub bid_lock_ttl: Duration,
    pub ws_send_buffer: usize,
    pub relay_scope: RelayScope,
    pub outbox_interval: Duration,
    /// 기동 시 스키마 생성 여부 (INIT_SCHEMA)
    pub init_schema: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL must be set".to_string()))?;

        Ok(Self {
            database_url,
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 5)?,
            kafka_brokers: std::env::var("KAFKA_BROKERS")
                .unwrap_or_else(|_| "localhost:9092".to_string()),
            kafka_group_prefix: std::env::var("KAFKA_GROUP_PREFIX")
                .unwrap_or_else(|_| "realtime-hub".to_string()),
            api_addr: std::env::var("API_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            bid_lock_ttl: Duration::from_millis(parse_env(
                "BID_LOCK_TTL_MS",
                DEFAULT_BID_LOCK_TTL_MS,
            )?),
            ws_send_buffer: parse_env("WS_SEND_BUFFER", DEFAULT_SEND_BUFFER)?,
            relay_scope: std::env::var("RELAY_SCOPE")
                .unwrap_or_else(|_| "all".to_string())
                .parse()?,
            outbox_interval: Duration::from_secs(parse_env("OUTBOX_INTERVAL_SECS", 5)?),
            init_schema: parse_env("INIT_SCHEMA", true)?,
        })
    }
}

/// 값이 없으면 기본값, 있는데 파싱이 안 되면 설정 오류
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: '{raw}'"))),
        Err(_) => Ok(default),
    }
}

// endregion: --- Config

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_period_is_shorter_than_read_deadline() {
        assert!(PING_PERIOD < PONG_WAIT);
    }

    #[test]
    fn relay_scope_parses_case_insensitively() {
        assert_eq!("ALL".parse::<RelayScope>().unwrap(), RelayScope::All);
        assert_eq!(" room ".parse::<RelayScope>().unwrap(), RelayScope::Room);
        assert!("auction".parse::<RelayScope>().is_err());
    }
}
