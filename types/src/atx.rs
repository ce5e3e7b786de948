//! Activation proof headers.
//!
//! The engine never sees full activation proofs; the embedding node decodes
//! and verifies them and hands over only the header fields the tally needs:
//! the voting weight units and the tick height of the proof.

use crate::{AtxId, EpochId};
use serde::{Deserialize, Serialize};

/// Header of one identity's activation proof for one epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtxHeader {
    pub id: AtxId,
    /// Epoch the proof targets (the epoch in which its ballots vote).
    pub epoch: EpochId,
    /// Voting weight units granted by this proof.
    pub weight: u64,
    /// Tick height reached by the proof; blocks above the epoch's reference
    /// height are ineligible for vote accounting.
    pub height: u64,
}
