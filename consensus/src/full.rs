//! The full tallier — the catch-up path.
//!
//! Every counted ballot casts a signed vote on every block of every layer
//! it covers: supported blocks gain the ballot's weight, everything else
//! loses it, and a layer on which the ballot supports nothing gains "empty"
//! weight. Ballots with a mismatched beacon are held back until they are
//! old enough; once counted a vote is never retracted.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;
use weft_types::{BallotId, BlockId, LayerId, Sign, Weight};

use crate::config::Config;
use crate::state::{LayerVote, State};
use crate::tally::{self, LayerVerdict};

#[derive(Clone, Debug, Default)]
pub(crate) struct Full {
    /// Bad-beacon ballots waiting out their delay, keyed by the layer at
    /// which they become countable.
    delayed: BTreeMap<LayerId, Vec<BallotId>>,
    /// Ballots whose votes are in the margins; late-interned blocks
    /// backfill against this set.
    counted: HashSet<BallotId>,
}

impl Full {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a freshly ingested ballot, or park it if its beacon was bad
    /// and it is still recent.
    pub fn on_ballot(&mut self, state: &mut State, config: &Config, id: BallotId) {
        let Some(ballot) = state.ballots.get(&id) else {
            return;
        };
        if ballot.bad_beacon {
            let eligible = ballot.layer.add(config.bad_beacon_vote_delay_layers);
            if state.last < eligible {
                debug!(ballot = %id, %eligible, "bad beacon vote delayed");
                self.delayed.entry(eligible).or_default().push(id);
                return;
            }
        }
        self.count(state, id);
    }

    /// Count every delayed ballot whose delay has elapsed.
    pub fn drain_delayed(&mut self, state: &mut State) {
        loop {
            let next = self.delayed.keys().next().copied();
            match next {
                Some(eligible) if eligible <= state.last => {
                    if let Some((_, ids)) = self.delayed.pop_first() {
                        for id in ids {
                            debug!(ballot = %id, "bad beacon vote now counted");
                            self.count(state, id);
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn count(&mut self, state: &mut State, id: BallotId) {
        if !self.counted.insert(id) {
            return;
        }
        let evicted = state.evicted;
        let State {
            ballots, layers, ..
        } = state;
        let Some(ballot) = ballots.get(&id) else {
            return;
        };
        let weight = ballot.weight;
        for (lid, vote) in &ballot.votes {
            if *lid <= evicted {
                continue;
            }
            let Some(layer) = layers.get_mut(lid) else {
                continue;
            };
            let LayerVote::Support(supported) = vote else {
                // abstain contributes neither margin nor empty weight
                continue;
            };
            for block in &mut layer.blocks {
                if supported.binary_search(&block.id).is_ok() {
                    block.margin = block.margin.saturating_add(weight);
                } else {
                    block.margin = block.margin.saturating_sub(weight);
                }
            }
            if supported.is_empty() {
                layer.empty = layer.empty.saturating_add(weight);
            } else {
                layer.empty = layer.empty.saturating_sub(weight);
            }
        }
    }

    /// Initialize the margin of a block that was interned after ballots
    /// for its layer were already counted: every counted ballot covering
    /// the layer votes against it unless it abstained there.
    pub fn on_new_block(&self, state: &mut State, lid: LayerId, id: BlockId) {
        let State {
            ballots, layers, ..
        } = state;
        let mut margin = Weight::ZERO;
        for ballot in ballots.values() {
            if !self.counted.contains(&ballot.id) {
                continue;
            }
            if let Some(LayerVote::Support(supported)) = ballot.votes.get(&lid) {
                margin = if supported.binary_search(&id).is_ok() {
                    margin.saturating_add(ballot.weight)
                } else {
                    margin.saturating_sub(ballot.weight)
                };
            }
        }
        if let Some(block) = layers.get_mut(&lid).and_then(|layer| layer.block_mut(&id)) {
            block.margin = margin;
        }
    }

    /// Attempt to verify `lid` by per-block margins.
    pub fn verify(&self, state: &mut State, config: &Config, lid: LayerId) -> LayerVerdict {
        let Some(layer) = state.layer(lid) else {
            return LayerVerdict::Undecided;
        };
        if !layer.hare_terminated {
            debug!(%lid, "hare is not terminated");
            return LayerVerdict::Undecided;
        }
        let reference_height = layer.reference_height;
        let empty = layer.empty;
        let threshold = tally::global_threshold(state, config, lid);
        let empty_ok = empty.decide(&threshold) == Sign::Support;
        debug!(%lid, %threshold, %empty, empty_ok, "full mode verification");

        let multi = config.multi_support;
        let Some(layer) = state.layer_mut(lid) else {
            return LayerVerdict::Undecided;
        };
        tally::verify_layer(lid, &mut layer.blocks, empty_ok, multi, |block| {
            if block.height > reference_height {
                Sign::Neutral
            } else {
                block.margin.decide(&threshold)
            }
        })
    }
}
