//! Chained opinion digests.
//!
//! A node's opinion on the mesh is, per layer, either *abstain* or a set of
//! supported blocks (an empty set being the "empty layer" vote; unlisted
//! blocks are against). The digest of an opinion is a Blake2b-256 chain:
//! each layer's entry hashes the previous layer's digest together with a
//! tag byte and the sorted supported ids. Ballot opinions and the local
//! opinion fold through the same chain, so agreement checks are a single
//! digest comparison.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;
use weft_types::BlockId;

type Blake2b256 = Blake2b<U32>;

const TAG_ABSTAIN: u8 = 0;
const TAG_VOTES: u8 = 1;

/// Digest of an opinion vector over a run of layers.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpinionHash([u8; 32]);

impl OpinionHash {
    /// Chain seed: the digest "before" the first retained layer.
    pub const SEED: Self = Self([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for OpinionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpinionHash(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "\u{2026})")
    }
}

impl fmt::Display for OpinionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// One layer's contribution to an opinion chain.
#[derive(Clone, Copy, Debug)]
pub enum LayerEntry<'a> {
    /// No opinion on the layer (hare undecided, within the abstain window).
    Abstain,
    /// Supported block ids, sorted ascending. Empty means "empty layer".
    Votes(&'a [BlockId]),
}

/// Extend `prev` with one layer's entry.
pub fn fold(prev: &OpinionHash, entry: LayerEntry<'_>) -> OpinionHash {
    let mut hasher = Blake2b256::new();
    hasher.update(prev.as_bytes());
    match entry {
        LayerEntry::Abstain => {
            hasher.update([TAG_ABSTAIN]);
        }
        LayerEntry::Votes(ids) => {
            debug_assert!(ids.windows(2).all(|w| w[0] < w[1]));
            hasher.update([TAG_VOTES]);
            for id in ids {
                hasher.update(id.as_bytes());
            }
        }
    }
    OpinionHash(hasher.finalize().into())
}
