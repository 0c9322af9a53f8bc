use crate::common::get_current_time_or_zero;
use log::{debug, warn};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::Rng;

const NODE_ID_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const EPOCH: u64 = 1288834974657;

struct GeneratorClock {
    last_timestamp: u64,
    sequence: u64,
}

/// Time-ordered 64-bit id generator (timestamp | node id | per-millisecond sequence).
pub(crate) struct SnowflakeIdGenerator {
    node_id: u64,
    sequence_mask: u64,
    timestamp_left_shift: u64,
    clock: Mutex<GeneratorClock>,
}

impl SnowflakeIdGenerator {
    pub fn new() -> Self {
        let max_node_id = (1u64 << NODE_ID_BITS) - 1;
        let mut node_id = Self::random_node_id();
        if node_id > max_node_id {
            warn!("Node id can't be greater than {}", max_node_id);
            node_id = OsRng.gen_range(1..=max_node_id);
        }
        debug!("Initialized id generator with node id: {}", node_id);

        SnowflakeIdGenerator {
            node_id,
            sequence_mask: (1u64 << SEQUENCE_BITS) - 1,
            timestamp_left_shift: SEQUENCE_BITS + NODE_ID_BITS,
            clock: Mutex::new(GeneratorClock {
                last_timestamp: 0,
                sequence: 0,
            }),
        }
    }

    pub fn get_id(&self) -> u64 {
        let mut clock = self.clock.lock();

        let mut timestamp = get_current_time_or_zero() as u64;
        if timestamp < clock.last_timestamp {
            // clock moved backwards, keep issuing ids from the last known instant
            timestamp = clock.last_timestamp;
        }

        if timestamp == clock.last_timestamp {
            clock.sequence = (clock.sequence + 1) & self.sequence_mask;
            if clock.sequence == 0 {
                // sequence exhausted for this millisecond, borrow the next one
                timestamp = clock.last_timestamp + 1;
            }
        } else {
            clock.sequence = 0;
        }
        clock.last_timestamp = timestamp;

        (timestamp.saturating_sub(EPOCH) << self.timestamp_left_shift)
            | (self.node_id << SEQUENCE_BITS)
            | clock.sequence
    }

    fn random_node_id() -> u64 {
        let uuid = uuid::Uuid::new_v4();
        let uid = uuid.as_bytes();
        let rnd_byte = OsRng.gen::<u64>() & 0x000000FF;

        ((0x000000FF & uid[uid.len() - 1] as u64) | (0x0000FF00 & ((rnd_byte) << 8))) >> 6
    }
}
