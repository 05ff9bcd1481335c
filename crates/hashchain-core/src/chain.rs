use crate::{
    block::Block,
    constants::{GENESIS_NAME, GENESIS_TIMESTAMP},
    error::{LedgerError, Result},
    pow::{MiningOptions, MiningReport},
    Payload,
};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::io::Write;
use tracing::{debug, warn};

const DUMP_INDENT: &[u8] = b"    ";

/// Decides how many leading zero hex digits the next block needs, given the
/// chain length before it is appended.
pub trait DifficultyPolicy: Send + Sync {
    fn difficulty_for(&self, height: u64) -> u32;
}

/// Difficulty equals the current chain length, so each block costs roughly
/// sixteen times more than the one before it.
#[derive(Clone, Copy, Debug, Default)]
pub struct Escalating;

impl DifficultyPolicy for Escalating {
    fn difficulty_for(&self, height: u64) -> u32 {
        u32::try_from(height).unwrap_or(u32::MAX)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Fixed(pub u32);

impl DifficultyPolicy for Fixed {
    fn difficulty_for(&self, _height: u64) -> u32 {
        self.0
    }
}

/// Escalating until `max`, then flat.
#[derive(Clone, Copy, Debug)]
pub struct Capped {
    pub max: u32,
}

impl DifficultyPolicy for Capped {
    fn difficulty_for(&self, height: u64) -> u32 {
        Escalating.difficulty_for(height).min(self.max)
    }
}

impl<P: DifficultyPolicy + ?Sized> DifficultyPolicy for Box<P> {
    fn difficulty_for(&self, height: u64) -> u32 {
        (**self).difficulty_for(height)
    }
}

/// First check that failed in [`Chain::audit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainFault {
    /// The stored hash does not match a recomputation over the block's fields.
    DigestMismatch { index: usize },
    /// `previous_hash` does not point at the predecessor's hash.
    LinkageMismatch { index: usize },
}

/// Append-only sequence of blocks, seeded with the genesis block.
pub struct Chain<P: DifficultyPolicy = Escalating> {
    blocks: Vec<Block>,
    policy: P,
}

#[derive(Serialize)]
struct ChainDump<'a> {
    blocks: &'a [Block],
}

impl Chain<Escalating> {
    pub fn new() -> Self {
        Self::with_policy(Escalating)
    }
}

impl Default for Chain<Escalating> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: DifficultyPolicy> Chain<P> {
    pub fn with_policy(policy: P) -> Self {
        Self {
            blocks: vec![genesis_block()],
            policy,
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn get(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Never true for a constructed chain; genesis is always present.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn latest(&self) -> Result<&Block> {
        self.blocks.last().ok_or(LedgerError::EmptyChain)
    }

    /// Difficulty the next appended block will be mined at.
    pub fn next_difficulty(&self) -> u32 {
        self.policy.difficulty_for(self.blocks.len() as u64)
    }

    pub fn append(&mut self, candidate: Block) -> Result<MiningReport> {
        self.append_with(candidate, &MiningOptions::default())
    }

    /// Stamps the candidate with its position and the tip hash, mines it and
    /// pushes it. On error the chain is left as it was.
    pub fn append_with(
        &mut self,
        mut candidate: Block,
        options: &MiningOptions,
    ) -> Result<MiningReport> {
        candidate.previous_hash = self.latest()?.hash.clone();
        candidate.index = self.blocks.len() as u64;
        let difficulty = self.next_difficulty();
        debug!(
            index = candidate.index,
            difficulty,
            previous_hash = %candidate.previous_hash,
            "appending block"
        );

        let report = candidate.mine(difficulty, options)?;
        self.blocks.push(candidate);
        Ok(report)
    }

    /// Walks the chain from index 1 and returns the first broken digest or
    /// link. Genesis's own digest is taken on trust.
    pub fn audit(&self) -> Option<ChainFault> {
        for (i, pair) in self.blocks.windows(2).enumerate() {
            let (prev, curr) = (&pair[0], &pair[1]);
            let index = i + 1;
            let fault = if !curr.has_valid_hash() {
                Some(ChainFault::DigestMismatch { index })
            } else if curr.previous_hash != prev.hash {
                Some(ChainFault::LinkageMismatch { index })
            } else {
                None
            };
            if fault.is_some() {
                warn!(?fault, "chain failed validation");
                return fault;
            }
        }
        None
    }

    pub fn is_valid(&self) -> bool {
        self.audit().is_none()
    }

    /// The whole chain as JSON indented by four spaces.
    pub fn dump(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.dump_to(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    pub fn dump_to<W: Write>(&self, writer: W) -> Result<()> {
        let formatter = PrettyFormatter::with_indent(DUMP_INDENT);
        let mut serializer = serde_json::Serializer::with_formatter(writer, formatter);
        ChainDump {
            blocks: &self.blocks,
        }
        .serialize(&mut serializer)?;
        Ok(())
    }
}

pub fn genesis_payload() -> Payload {
    let mut data = Payload::new();
    data.insert("Name".to_string(), GENESIS_NAME.into());
    data.insert("CurrentAccount".to_string(), 0.into());
    data
}

/// Fixed, unmined root block. Identical for every chain.
pub fn genesis_block() -> Block {
    Block::new(GENESIS_TIMESTAMP, genesis_payload())
}
