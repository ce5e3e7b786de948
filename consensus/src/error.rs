//! Typed errors returned by the ingestion methods.
//!
//! The `Missing*` variants mean a dependency has not been fed to the engine
//! yet; the caller is expected to fetch it and retry the same input. The
//! engine stores nothing for a refused input. `Malformed*` rejections are
//! permanent. `Internal` means an engine invariant was violated and the
//! instance must be abandoned.

use thiserror::Error;
use weft_types::{AtxId, BallotId, BlockId, EpochId, LayerId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("missing activation proof {0}")]
    MissingAtx(AtxId),

    #[error("missing base ballot {0}")]
    MissingBase(BallotId),

    #[error("missing reference ballot {0}")]
    MissingReference(BallotId),

    #[error("no beacon recorded for {0}")]
    MissingBeacon(EpochId),

    #[error("unusable active set for {0}")]
    BadActiveSet(EpochId),

    #[error("malformed ballot {id}: {reason}")]
    MalformedBallot { id: BallotId, reason: String },

    #[error("malformed block {id}: {reason}")]
    MalformedBlock { id: BlockId, reason: String },

    #[error("{layer} is at or below the eviction boundary {evicted}")]
    Stale { layer: LayerId, evicted: LayerId },

    #[error("cannot evict up to {requested}: verified frontier is {verified}")]
    EvictBeyondVerified {
        requested: LayerId,
        verified: LayerId,
    },

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the caller should fetch the dependency and retry.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            EngineError::MissingAtx(_)
                | EngineError::MissingBase(_)
                | EngineError::MissingReference(_)
                | EngineError::MissingBeacon(_)
        )
    }

    /// Whether the input is permanently rejected.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            EngineError::MalformedBallot { .. }
                | EngineError::MalformedBlock { .. }
                | EngineError::BadActiveSet(_)
        )
    }
}
