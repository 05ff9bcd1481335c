use crate::{
    error::{LedgerError, Result},
    pow::{self, MiningOptions, MiningReport},
    Hash, Payload,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// A single ledger entry. `index`, `previous_hash`, `nonce` and `hash` are
/// placeholders until a [`crate::chain::Chain`] stamps and mines the block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub data: Payload,
    pub previous_hash: String,
    pub hash: String,
    pub nonce: u64,
}

impl Block {
    pub fn new(timestamp: u64, data: Payload) -> Self {
        let mut block = Self {
            index: 0,
            timestamp,
            data,
            previous_hash: String::new(),
            hash: String::new(),
            nonce: 0,
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Builds a block from an untyped JSON value. Only objects are accepted
    /// as payloads.
    pub fn from_json(timestamp: u64, data: serde_json::Value) -> Result<Self> {
        match data {
            serde_json::Value::Object(map) => Ok(Self::new(timestamp, map.into_iter().collect())),
            other => Err(LedgerError::InvalidPayload(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Hex-encoded SHA-256 over the canonical encoding of the five hashed fields.
    pub fn digest(
        index: u64,
        timestamp: u64,
        data: &Payload,
        previous_hash: &str,
        nonce: u64,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(hash_prefix(index, timestamp, data, previous_hash));
        hasher.update(nonce.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn calculate_hash(&self) -> String {
        Self::digest(
            self.index,
            self.timestamp,
            &self.data,
            &self.previous_hash,
            self.nonce,
        )
    }

    /// True when the stored hash still matches the block's own fields.
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    /// Bytes fed to the hasher ahead of the nonce. Mining hashes this once
    /// and clones the hasher state for every attempt.
    pub fn hash_prefix(&self) -> Vec<u8> {
        hash_prefix(self.index, self.timestamp, &self.data, &self.previous_hash)
    }

    /// Searches nonces until the hash has `difficulty` leading `'0'` hex digits.
    pub fn mine(&mut self, difficulty: u32, options: &MiningOptions) -> Result<MiningReport> {
        pow::mine(self, difficulty, options)
    }
}

fn hash_prefix(index: u64, timestamp: u64, data: &Payload, previous_hash: &str) -> Vec<u8> {
    let payload = canonical_payload(data);
    let mut bytes = Vec::with_capacity(8 + 8 + 8 + payload.len() + 8 + previous_hash.len());
    bytes.extend_from_slice(&index.to_le_bytes());
    bytes.extend_from_slice(&timestamp.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(&(previous_hash.len() as u64).to_le_bytes());
    bytes.extend_from_slice(previous_hash.as_bytes());
    bytes
}

/// Compact JSON with keys in sorted order. `Payload` is a BTreeMap and nested
/// objects are `serde_json::Map`, which is sorted as well.
pub fn canonical_payload(data: &Payload) -> Vec<u8> {
    // A string-keyed map of JSON values always serializes.
    serde_json::to_vec(data).unwrap_or_default()
}

pub fn hash_to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Milliseconds since the Unix epoch, for callers stamping new blocks.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
