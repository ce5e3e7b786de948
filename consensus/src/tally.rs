//! Expected-weight and threshold math, and the shared layer decision.
//!
//! The expected weight over a layer range is what a fully eligible, honest
//! network would cast; the global threshold is a configured fraction of the
//! expected weight of all ballots voting on a candidate layer. Both modes
//! share [`verify_layer`], which turns per-block decisions into a layer
//! verdict.

use tracing::{debug, warn};
use weft_types::{BlockId, LayerId, Sign, Weight};

use crate::config::{Config, MultiSupport};
use crate::state::{BlockInfo, State};

/// Expected vote weight cast by ballots of a single layer: the epoch's
/// activation weight spread evenly over its layers.
pub(crate) fn expected_layer_weight(state: &State, config: &Config, lid: LayerId) -> Weight {
    let epoch = lid.epoch(config.layers_per_epoch);
    let units = state.epochs.get(&epoch).map(|e| e.weight).unwrap_or(0);
    Weight::from_units(units)
        .div_units(config.layers_per_epoch.max(1) as u64)
        .unwrap_or(Weight::ZERO)
}

/// Expected weight of all ballots voting on `lid`: the sum of per-layer
/// expected weights over `(lid, upto]`.
pub(crate) fn expected_weight_after(
    state: &State,
    config: &Config,
    lid: LayerId,
    upto: LayerId,
) -> Weight {
    if upto <= lid {
        return Weight::ZERO;
    }
    let mut acc = Weight::ZERO;
    for layer in lid.next().range_to(upto) {
        acc = acc.saturating_add(expected_layer_weight(state, config, layer));
    }
    acc
}

/// Global verification threshold for a candidate layer.
pub(crate) fn global_threshold(state: &State, config: &Config, lid: LayerId) -> Weight {
    expected_weight_after(state, config, lid, state.last)
        .fraction(config.global_threshold_num, config.global_threshold_denom)
        .unwrap_or(Weight::ZERO)
}

/// Local threshold, used to derive a local opinion for layers whose hare
/// never terminated.
pub(crate) fn local_threshold(state: &State, config: &Config, lid: LayerId) -> Weight {
    expected_weight_after(state, config, lid, state.last)
        .fraction(config.local_threshold_num, config.local_threshold_denom)
        .unwrap_or(Weight::ZERO)
}

/// Outcome of a layer verification attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LayerVerdict {
    /// The layer is decided; `None` means it verified as empty.
    Verified(Option<BlockId>),
    /// Not enough evidence yet.
    Undecided,
}

/// Turn per-block decisions into a layer verdict and, on success, write
/// the decisions back as block validity.
///
/// Blocks must be ordered by (height, id) ascending (the order breaks ties
/// under [`MultiSupport::First`]). Any block left neutral fails
/// verification of the whole layer, wherever it sits relative to the
/// supported ones. With no supported block the layer verifies as empty
/// when `empty_ok` holds.
pub(crate) fn verify_layer(
    lid: LayerId,
    blocks: &mut [BlockInfo],
    empty_ok: bool,
    multi: MultiSupport,
    decide: impl Fn(&BlockInfo) -> Sign,
) -> LayerVerdict {
    let mut decisions: Vec<Sign> = Vec::with_capacity(blocks.len());
    let mut any_neutral = false;
    for block in blocks.iter() {
        let decision = decide(block);
        if decision == Sign::Neutral {
            any_neutral = true;
        }
        decisions.push(decision);
    }

    if any_neutral {
        debug!(%lid, "undecided block fails the layer");
        return LayerVerdict::Undecided;
    }

    let supported: Vec<usize> = decisions
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == Sign::Support)
        .map(|(i, _)| i)
        .collect();

    let canonical = match supported.as_slice() {
        [] => {
            if !empty_ok {
                debug!(%lid, "no supported block and empty weight below threshold");
                return LayerVerdict::Undecided;
            }
            None
        }
        [single] => Some(blocks[*single].id),
        many => match multi {
            MultiSupport::Reject => {
                warn!(%lid, count = many.len(), "multiple blocks crossed the support threshold");
                return LayerVerdict::Undecided;
            }
            MultiSupport::First => Some(blocks[many[0]].id),
        },
    };

    for (block, decision) in blocks.iter_mut().zip(&decisions) {
        block.validity = *decision;
    }
    LayerVerdict::Verified(canonical)
}
