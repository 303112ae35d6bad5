use std::ops::RangeInclusive;
use std::time::Duration;

/// Silence after which a neighbour or network member is evicted.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(15);
/// Minimum spacing between two heartbeat pings to the same target.
pub const HEARTBEAT_SPACING: Duration = Duration::from_millis(15_000 / 8);
pub const NEIGHBOUR_REQUEST_INTERVAL: Duration = Duration::from_secs(10);
/// Connection slots kept free for peers that contact us.
pub const RESERVED_INBOUND_SLOTS: usize = 2;
pub const BLOCK_GROUP_TIMEOUT: Duration = Duration::from_secs(60);
pub const BLOCK_REQUEST_INTERVAL: Duration = Duration::from_secs(1);
pub const CYCLE_SLEEP: Duration = Duration::from_millis(1);
pub const INBOUND_QUEUE_CAPACITY: usize = 64;
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
pub const GENERATED_PAYLOAD_LEN: usize = 15;
pub const GENERATOR_INTERVAL_MS: RangeInclusive<u64> = 2_000..=3_000;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub const DEFAULT_TRANSACTIONS_PER_BLOCK: usize = 4;
pub const DEFAULT_MAX_NEIGHBOURS: usize = 3;
