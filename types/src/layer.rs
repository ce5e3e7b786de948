//! Layer and epoch identifiers.
//!
//! A layer is a fixed time-slot counted from genesis; epochs partition the
//! layers into fixed runs of `layers_per_epoch`. The epoch stride is a
//! configuration value, so the conversion takes it as a parameter rather
//! than reading a process-wide constant.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-bit layer number counted from genesis. All mesh ordering is by layer.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LayerId(u32);

impl LayerId {
    /// The genesis layer.
    pub const GENESIS: Self = Self(0);

    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(&self) -> u32 {
        self.0
    }

    /// The layer `count` slots after this one, saturating at `u32::MAX`.
    pub fn add(&self, count: u32) -> Self {
        Self(self.0.saturating_add(count))
    }

    /// The layer `count` slots before this one, saturating at genesis.
    pub fn sub(&self, count: u32) -> Self {
        Self(self.0.saturating_sub(count))
    }

    /// The immediately following layer.
    pub fn next(&self) -> Self {
        self.add(1)
    }

    /// The immediately preceding layer, or `None` at genesis.
    pub fn prev(&self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }

    /// Number of layers from `earlier` up to this one; zero if `earlier` is
    /// not actually earlier.
    pub fn since(&self, earlier: Self) -> u32 {
        self.0.saturating_sub(earlier.0)
    }

    /// The epoch this layer belongs to, given the epoch stride.
    pub fn epoch(&self, layers_per_epoch: u32) -> EpochId {
        EpochId(self.0 / layers_per_epoch.max(1))
    }

    /// Iterate layers `self..=end` in ascending order.
    pub fn range_to(self, end: Self) -> impl Iterator<Item = LayerId> {
        (self.0..=end.0).map(LayerId)
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer {}", self.0)
    }
}

/// A run of `layers_per_epoch` contiguous layers sharing one active set.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EpochId(u32);

impl EpochId {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(&self) -> u32 {
        self.0
    }

    /// First layer of this epoch, given the epoch stride.
    pub fn first_layer(&self, layers_per_epoch: u32) -> LayerId {
        LayerId(self.0.saturating_mul(layers_per_epoch))
    }

    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch {}", self.0)
    }
}
