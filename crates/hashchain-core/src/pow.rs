use crate::{
    block::{hash_to_hex, Block},
    constants::{ATTEMPT_CHECK_MASK, DEFAULT_PROGRESS_INTERVAL_SECS, MAX_DIFFICULTY},
    error::{LedgerError, Result},
    Hash,
};
use sha2::{Digest, Sha256};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::{info, warn};

/// Shared flag that asks an in-flight mine to stop. Once set it stays set.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct MiningOptions {
    /// How often a progress line is logged while a block is being mined.
    pub progress_interval: Duration,
    pub deadline: Option<Instant>,
    pub cancel: Option<CancelToken>,
}

impl Default for MiningOptions {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_secs(DEFAULT_PROGRESS_INTERVAL_SECS),
            deadline: None,
            cancel: None,
        }
    }
}

impl MiningOptions {
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MiningReport {
    pub index: u64,
    pub difficulty: u32,
    pub nonce: u64,
    /// Number of hashes computed, including the winning one.
    pub attempts: u64,
    /// Progress lines logged while searching.
    pub progress_reports: u64,
    pub elapsed: Duration,
    pub hash: String,
}

/// Increments the block's nonce from its current value until the hex hash
/// starts with `difficulty` zeros. On cancellation or deadline the block is
/// left with the last tried nonce and the matching hash.
pub fn mine(block: &mut Block, difficulty: u32, options: &MiningOptions) -> Result<MiningReport> {
    if difficulty > MAX_DIFFICULTY {
        return Err(LedgerError::DifficultyOutOfRange {
            difficulty,
            max: MAX_DIFFICULTY,
        });
    }

    // Everything but the nonce is fixed for the whole search.
    let mut template = Sha256::new();
    template.update(block.hash_prefix());

    let start = Instant::now();
    let mut last_report = start;
    let mut attempts: u64 = 0;
    let mut progress_reports: u64 = 0;
    let mut nonce = block.nonce;

    loop {
        let hash = attempt(&template, nonce);
        attempts += 1;

        if leading_zero_nibbles(&hash) >= difficulty {
            block.nonce = nonce;
            block.hash = hash_to_hex(&hash);
            let elapsed = start.elapsed();
            info!(
                "Mined block {} with nonce {} and hash {} ({} attempts, difficulty {})",
                block.index, nonce, block.hash, attempts, difficulty
            );
            return Ok(MiningReport {
                index: block.index,
                difficulty,
                nonce,
                attempts,
                progress_reports,
                elapsed,
                hash: block.hash.clone(),
            });
        }

        if attempts & ATTEMPT_CHECK_MASK == 0 {
            let stop = if options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                Some(LedgerError::MiningCancelled {
                    index: block.index,
                    attempts,
                })
            } else if options.deadline.is_some_and(|d| Instant::now() >= d) {
                Some(LedgerError::MiningDeadlineExceeded {
                    index: block.index,
                    attempts,
                })
            } else {
                None
            };
            if let Some(err) = stop {
                block.nonce = nonce;
                block.hash = hash_to_hex(&hash);
                warn!("{err}");
                return Err(err);
            }

            let now = Instant::now();
            if now.duration_since(last_report) >= options.progress_interval {
                info!(
                    "Calculated total of {} hashes for block {}",
                    attempts,
                    block.index.saturating_add(1)
                );
                progress_reports += 1;
                last_report = now;
            }
        }

        nonce = nonce
            .checked_add(1)
            .ok_or(LedgerError::NonceExhausted { index: block.index })?;
    }
}

fn attempt(template: &Sha256, nonce: u64) -> Hash {
    let digest = template.clone().chain_update(nonce.to_le_bytes()).finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..]);
    out
}

/// Number of leading zero hex digits in the hash.
pub fn leading_zero_nibbles(hash: &Hash) -> u32 {
    let mut total = 0u32;
    for b in hash {
        if *b == 0 {
            total += 2;
        } else {
            if *b < 0x10 {
                total += 1;
            }
            break;
        }
    }
    total
}

/// The difficulty predicate on a hex hash string.
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|c| c == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Payload;
    use serde_json::json;

    fn candidate() -> Block {
        let mut data = Payload::new();
        data.insert("Name".to_string(), json!("A"));
        let mut block = Block::new(1_600_000_000_000, data);
        block.index = 1;
        block.previous_hash = "00ab".to_string();
        block
    }

    #[test]
    fn leading_zero_nibbles_examples() {
        let mut h = [0u8; 32];
        assert_eq!(leading_zero_nibbles(&h), 64);
        h[0] = 0x0F;
        assert_eq!(leading_zero_nibbles(&h), 1);
        h[0] = 0x10;
        assert_eq!(leading_zero_nibbles(&h), 0);
        h = [0u8; 32];
        h[1] = 0x80;
        assert_eq!(leading_zero_nibbles(&h), 2);
        h[1] = 0x04;
        assert_eq!(leading_zero_nibbles(&h), 3);
    }

    #[test]
    fn nibbles_agree_with_hex_prefix() {
        let mut h = [0xffu8; 32];
        h[0] = 0x00;
        h[1] = 0x0a;
        let hex = hash_to_hex(&h);
        assert!(hex.starts_with("000a"));
        assert!(meets_difficulty(&hex, leading_zero_nibbles(&h)));
        assert!(!meets_difficulty(&hex, leading_zero_nibbles(&h) + 1));
    }

    #[test]
    fn meets_difficulty_examples() {
        assert!(meets_difficulty("abc", 0));
        assert!(meets_difficulty("00f", 2));
        assert!(!meets_difficulty("00f", 3));
        assert!(!meets_difficulty("0", 2));
        assert!(meets_difficulty("", 0));
    }

    #[test]
    fn difficulty_zero_hashes_once() {
        let mut block = candidate();
        let report = block.mine(0, &MiningOptions::default()).unwrap();
        assert_eq!(report.attempts, 1);
        assert_eq!(block.nonce, 0);
        // The stamped index and previous hash are now reflected in the hash.
        assert!(block.has_valid_hash());
    }

    #[test]
    fn mined_hash_meets_difficulty() {
        for difficulty in 1..=3 {
            let mut block = candidate();
            let report = block.mine(difficulty, &MiningOptions::default()).unwrap();
            assert!(meets_difficulty(&block.hash, difficulty));
            assert_eq!(&block.hash[..difficulty as usize], "0".repeat(difficulty as usize));
            assert!(block.has_valid_hash());
            assert_eq!(report.hash, block.hash);
            assert_eq!(report.nonce, block.nonce);
            assert_eq!(report.attempts, block.nonce + 1);
        }
    }

    #[test]
    fn mining_is_deterministic() {
        let mut a = candidate();
        let mut b = candidate();
        a.mine(2, &MiningOptions::default()).unwrap();
        b.mine(2, &MiningOptions::default()).unwrap();
        assert_eq!(a.nonce, b.nonce);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn difficulty_above_hash_width_is_rejected() {
        let mut block = candidate();
        let err = block.mine(MAX_DIFFICULTY + 1, &MiningOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::DifficultyOutOfRange { difficulty: 65, max: 64 }
        ));
        assert_eq!(block.nonce, 0);
    }

    #[test]
    fn cancelled_mine_stops_with_consistent_block() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut block = candidate();
        let options = MiningOptions::default().with_cancel(cancel);
        let err = block.mine(MAX_DIFFICULTY, &options).unwrap_err();
        match err {
            LedgerError::MiningCancelled { index, attempts } => {
                assert_eq!(index, 1);
                assert_eq!(attempts, ATTEMPT_CHECK_MASK + 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(block.has_valid_hash());
    }

    #[test]
    fn deadline_stops_mining() {
        let mut block = candidate();
        let options = MiningOptions::default().with_timeout(Duration::from_millis(20));
        let err = block.mine(MAX_DIFFICULTY, &options).unwrap_err();
        assert!(matches!(err, LedgerError::MiningDeadlineExceeded { index: 1, .. }));
        assert!(block.has_valid_hash());
    }

    #[test]
    fn progress_is_reported_on_interval() {
        let options = MiningOptions::default().with_progress_interval(Duration::ZERO);
        let report = (0..10u64)
            .map(|ts| {
                let mut block = candidate();
                block.timestamp = ts;
                block.mine(4, &options).unwrap()
            })
            .find(|report| report.attempts > ATTEMPT_CHECK_MASK + 1)
            .expect("a difficulty 4 search longer than one check window");
        assert!(report.progress_reports >= 1);
        assert_eq!(
            report.progress_reports,
            (report.attempts - 1) / (ATTEMPT_CHECK_MASK + 1)
        );

        let mut block = candidate();
        let report = block.mine(4, &MiningOptions::default()).unwrap();
        if report.elapsed < Duration::from_secs(DEFAULT_PROGRESS_INTERVAL_SECS) {
            assert_eq!(report.progress_reports, 0);
        }
    }

    #[test]
    fn progress_line_at_max_index_does_not_overflow() {
        let mut block = candidate();
        block.index = u64::MAX;
        let options = MiningOptions::default()
            .with_progress_interval(Duration::ZERO)
            .with_timeout(Duration::from_millis(20));
        let err = block.mine(MAX_DIFFICULTY, &options).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::MiningDeadlineExceeded { index: u64::MAX, .. }
        ));
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn higher_difficulty_costs_more_attempts() {
        let trials = 5;
        let mut easy = 0u64;
        let mut hard = 0u64;
        for t in 0..trials {
            let mut data = Payload::new();
            data.insert("trial".to_string(), json!(t));
            let mut block = Block::new(t, data.clone());
            easy += block.mine(1, &MiningOptions::default()).unwrap().attempts;
            let mut block = Block::new(t, data);
            hard += block.mine(4, &MiningOptions::default()).unwrap().attempts;
        }
        assert!(hard > easy, "difficulty 4 took {hard} attempts, difficulty 1 took {easy}");
    }
}
