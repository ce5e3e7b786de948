//! Engine tuning parameters.
//!
//! Every field is honored by the engine; nothing is read from process-wide
//! state. The defaults below are the documented defaults of this
//! implementation and are safe for a mesh with a few-minute layer interval.

use serde::{Deserialize, Serialize};

/// What to do when more than one block in a layer crosses the support
/// threshold at once. A consistent honest majority never produces this, so
/// the default treats it as an unverifiable layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiSupport {
    /// Fail verification of the layer and log a warning.
    #[default]
    Reject,
    /// Pick the first supported block in (height, id) order.
    First,
}

/// Configuration for the voting engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Epoch stride: number of layers sharing one active set.
    pub layers_per_epoch: u32,

    /// Distance (in layers) between the verified frontier and the newest
    /// seen layer at which the full tallier takes over a stalled layer.
    pub hdist: u32,

    /// Distance at which self-healing overrides the stalled layer with the
    /// full tally's current leader, threshold or not. Must be >= `hdist`
    /// to give the full tallier a chance first.
    pub zdist: u32,

    /// How many layers a ballot with a mismatched beacon is ignored by the
    /// full tallier before its votes are counted after all.
    pub bad_beacon_vote_delay_layers: u32,

    /// Global threshold as a fraction of expected weight: numerator.
    pub global_threshold_num: u64,
    /// Global threshold as a fraction of expected weight: denominator.
    pub global_threshold_denom: u64,

    /// Local threshold fraction, used to derive a local opinion for layers
    /// whose hare never terminated: numerator.
    pub local_threshold_num: u64,
    /// Local threshold fraction: denominator.
    pub local_threshold_denom: u64,

    /// Upper bound on retained layers past the eviction boundary; older
    /// verified layers are pruned automatically during `advance`.
    pub window_size: u32,

    /// Policy for simultaneous multiple support decisions in one layer.
    pub multi_support: MultiSupport,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            layers_per_epoch: 4032,
            hdist: 10,
            zdist: 20,
            bad_beacon_vote_delay_layers: 10,
            global_threshold_num: 60,
            global_threshold_denom: 100,
            local_threshold_num: 20,
            local_threshold_denom: 100,
            window_size: 10_000,
            multi_support: MultiSupport::Reject,
        }
    }
}
