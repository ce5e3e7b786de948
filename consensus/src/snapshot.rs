//! Decision checkpointing.
//!
//! A snapshot captures the durable outcome of the engine — the verified
//! frontier, the eviction boundary, per-layer decisions and per-block
//! validity — as a plain serializable value. The embedding node persists it
//! however it likes. Restoring rebuilds the decision state and the opinion
//! chain; running tallies restart empty and re-accumulate from ballots
//! ingested after the restore.

use serde::{Deserialize, Serialize};
use weft_types::{BlockId, LayerId, Validity};

use crate::config::Config;
use crate::state::State;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    pub id: BlockId,
    pub height: u64,
    pub validity: Validity,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSnapshot {
    pub layer: LayerId,
    pub hare_terminated: bool,
    /// `Some(None)` is a decided empty layer.
    pub hare_output: Option<Option<BlockId>>,
    pub result: Option<Option<BlockId>>,
    pub blocks: Vec<BlockSnapshot>,
}

/// Opaque decision checkpoint; serialize with any serde format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub verified: LayerId,
    pub evicted: LayerId,
    pub layers: Vec<LayerSnapshot>,
}

pub(crate) fn capture(state: &State) -> Snapshot {
    Snapshot {
        verified: state.verified,
        evicted: state.evicted,
        layers: state
            .layers
            .iter()
            .map(|(&layer, info)| LayerSnapshot {
                layer,
                hare_terminated: info.hare_terminated,
                hare_output: info.hare_output,
                result: info.result,
                blocks: info
                    .blocks
                    .iter()
                    .map(|block| BlockSnapshot {
                        id: block.id,
                        height: block.height,
                        validity: block.validity,
                    })
                    .collect(),
            })
            .collect(),
    }
}

pub(crate) fn rebuild(snapshot: &Snapshot, config: &Config) -> State {
    let mut state = State::new();
    state.evicted = snapshot.evicted;
    let top = snapshot
        .layers
        .iter()
        .map(|layer| layer.layer)
        .max()
        .unwrap_or(snapshot.verified);
    state.ensure_layer(top, config.layers_per_epoch);
    for layer_snapshot in &snapshot.layers {
        for block in &layer_snapshot.blocks {
            if state
                .intern_block(
                    layer_snapshot.layer,
                    block.id,
                    block.height,
                    config.layers_per_epoch,
                )
                .is_err()
            {
                continue;
            }
        }
        if let Some(layer) = state.layer_mut(layer_snapshot.layer) {
            layer.hare_terminated = layer_snapshot.hare_terminated;
            layer.hare_output = layer_snapshot.hare_output;
            layer.result = layer_snapshot.result;
            for block in &layer_snapshot.blocks {
                if let Some(entry) = layer.block_mut(&block.id) {
                    entry.validity = block.validity;
                    entry.hare = match layer_snapshot.hare_output {
                        Some(Some(out)) if out == block.id => weft_types::Sign::Support,
                        Some(_) => weft_types::Sign::Against,
                        None => weft_types::Sign::Neutral,
                    };
                }
            }
        }
    }
    state.verified = snapshot.verified;
    state.processed = snapshot.verified.max(state.evicted.next());
    state.last = top.max(snapshot.verified);
    state.rebuild_opinions(state.evicted.next());
    state
}
