//! Append-only, hash-linked ledger where every block after genesis is admitted
//! by proof of work.

pub mod block;
pub mod chain;
pub mod constants;
pub mod error;
pub mod pow;

use std::collections::BTreeMap;

pub type Hash = [u8; constants::HASH_SIZE];

/// Opaque block payload. Keys are kept sorted so the hashed encoding is canonical.
pub type Payload = BTreeMap<String, serde_json::Value>;

pub use block::{unix_millis, Block};
pub use chain::{genesis_block, Capped, Chain, ChainFault, DifficultyPolicy, Escalating, Fixed};
pub use error::{LedgerError, Result};
pub use pow::{CancelToken, MiningOptions, MiningReport};
