pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const MAX_DIFFICULTY: u32 = HASH_HEX_SIZE as u32;
pub const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 10;
/// The mining loop samples the clock and the cancel flag once per this many attempts (+1).
pub const ATTEMPT_CHECK_MASK: u64 = 0x3ff;
pub const GENESIS_NAME: &str = "Genesis Block";
pub const GENESIS_TIMESTAMP: u64 = 0;
