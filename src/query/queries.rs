/// 상품 조회
pub const GET_ITEM: &str =
    "SELECT id, auction_id, current_price, started_at, ended_at FROM items WHERE id = $1";

/// 현재 최고 입찰 조회
pub const GET_WINNING_BID: &str = r#"
    SELECT id, item_id, bidder_id, price, is_winning, bid_at
    FROM bids
    WHERE item_id = $1 AND is_winning
"#;

/// 입찰 이력 조회 (최신순)
pub const GET_BID_HISTORY: &str = r#"
    SELECT id, item_id, bidder_id, price, is_winning, bid_at
    FROM bids
    WHERE item_id = $1
    ORDER BY bid_at DESC, id DESC
    LIMIT $2 OFFSET $3
"#;

/// 상품의 전체 입찰 수
pub const COUNT_BIDS: &str = "SELECT COUNT(*) FROM bids WHERE item_id = $1";

/// 경매 안에서 입찰자별 입찰 수와 마지막 입찰 시각
pub const GET_BIDDER_STATS: &str = r#"
    SELECT b.bidder_id, COUNT(b.id) AS bid_count, MAX(b.bid_at) AS last_bid_at
    FROM bids b
    JOIN items i ON i.id = b.item_id
    WHERE i.auction_id = $1 AND b.bidder_id = ANY($2)
    GROUP BY b.bidder_id
"#;

/// 입찰자 포인트 조회
pub const GET_BIDDER_POINTS: &str = r#"
    SELECT bidder_id, total_points, available_points, reserved_points, updated_at
    FROM bidder_points
    WHERE bidder_id = $1
"#;

/// 포인트 이력 조회 (최신순)
pub const GET_POINT_HISTORY: &str = r#"
    SELECT id, bidder_id, amount, type AS kind, reason, related_bid_id, related_auction_id,
           admin_id, balance_before, balance_after, reserved_before, reserved_after,
           total_before, total_after, created_at
    FROM point_history
    WHERE bidder_id = $1
    ORDER BY created_at DESC, id DESC
    LIMIT $2 OFFSET $3
"#;

/// 새 입찰 저장 (최고 입찰 표시는 이후 단계에서 설정)
pub const INSERT_BID: &str = r#"
    INSERT INTO bids (item_id, bidder_id, price, is_winning, bid_at)
    VALUES ($1, $2, $3, FALSE, $4)
    RETURNING id, item_id, bidder_id, price, is_winning, bid_at
"#;

/// 같은 상품의 다른 입찰에서 최고 입찰 표시 해제
pub const CLEAR_WINNING_BIDS: &str =
    "UPDATE bids SET is_winning = FALSE WHERE item_id = $1 AND id <> $2 AND is_winning";

/// 새 입찰을 최고 입찰로 표시
pub const SET_WINNING_BID: &str = r#"
    UPDATE bids SET is_winning = TRUE
    WHERE id = $1
    RETURNING id, item_id, bidder_id, price, is_winning, bid_at
"#;

/// 아웃박스 이벤트 기록
pub const INSERT_OUTBOX_EVENT: &str = r#"
    INSERT INTO outbox_events (channel, payload, created_at)
    VALUES ($1, $2, $3)
    RETURNING id, channel, payload, created_at
"#;

/// 발행 완료 표시
pub const MARK_OUTBOX_PUBLISHED: &str = r#"
    UPDATE outbox_events SET published_at = NOW(), claimed_at = NULL
    WHERE id = $1 AND published_at IS NULL
"#;

/// 미발행 아웃박스 이벤트 조회 (오래된 순)
pub const GET_PENDING_OUTBOX: &str = r#"
    SELECT id, channel, payload, created_at
    FROM outbox_events
    WHERE published_at IS NULL
    ORDER BY id
    LIMIT $1
"#;

/// 이벤트 하나를 발행 대상으로 점유 (점유가 없거나 만료된 경우만)
pub const CLAIM_OUTBOX_EVENT: &str = r#"
    UPDATE outbox_events SET claimed_at = NOW()
    WHERE id = $1
      AND published_at IS NULL
      AND (claimed_at IS NULL OR claimed_at < NOW() - make_interval(secs => $2))
    RETURNING id
"#;

/// 미발행 이벤트 한 배치를 점유. 다른 인스턴스가 잡고 있는 행은 건너뛴다.
pub const CLAIM_PENDING_OUTBOX: &str = r#"
    UPDATE outbox_events SET claimed_at = NOW()
    WHERE id IN (
        SELECT id FROM outbox_events
        WHERE published_at IS NULL
          AND (claimed_at IS NULL OR claimed_at < NOW() - make_interval(secs => $2))
        ORDER BY id
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    )
    RETURNING id, channel, payload, created_at
"#;

/// 발행 실패 시 점유 해제
pub const RELEASE_OUTBOX_CLAIM: &str =
    "UPDATE outbox_events SET claimed_at = NULL WHERE id = $1 AND published_at IS NULL";
