use snowflake::SnowflakeIdBucket;
use std::sync::{Mutex, MutexGuard, OnceLock};

fn bucket() -> MutexGuard<'static, SnowflakeIdBucket> {
    static BUCKET: OnceLock<Mutex<SnowflakeIdBucket>> = OnceLock::new();
    BUCKET
        .get_or_init(|| Mutex::new(SnowflakeIdBucket::new(1, 1)))
        .lock()
        // The bucket holds no invariant a panic could break.
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reconfigures the generator for this process.
///
/// `machine_id` and `node_id` must each fit in 5 bits (0-31) so that two
/// engine instances writing to the same database never collide.
pub fn init(machine_id: i32, node_id: i32) {
    *bucket() = SnowflakeIdBucket::new(machine_id & 0x1f, node_id & 0x1f);
}

/// Returns a fresh Snowflake id rendered as a decimal string.
pub fn next_id() -> String {
    bucket().get_id().to_string()
}
