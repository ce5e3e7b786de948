//! The verifying tallier — the fast path for a healthy network.
//!
//! When nearly every ballot inherits the local opinion unchanged, there is
//! no need to count individual votes: a ballot that agrees with the local
//! opinion on everything before its layer implicitly supports the local
//! choice everywhere. The tallier keeps one running sum of such "good"
//! weight plus a per-layer exclusion sum, and verification is a single
//! threshold comparison.

use tracing::debug;
use weft_types::{BallotId, LayerId, Sign, Weight};

use crate::config::Config;
use crate::opinion::OpinionHash;
use crate::state::{BallotInfo, State};
use crate::tally::{self, LayerVerdict};

/// The fields of a ballot the good-weight rules look at; detached from the
/// ballot store so counting can mutate layer state.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BallotView {
    pub id: BallotId,
    pub layer: LayerId,
    pub weight: Weight,
    pub bad_beacon: bool,
    pub opinion: OpinionHash,
    pub reference_height: u64,
}

impl From<&BallotInfo> for BallotView {
    fn from(info: &BallotInfo) -> Self {
        Self {
            id: info.id,
            layer: info.layer,
            weight: info.weight,
            bad_beacon: info.bad_beacon,
            opinion: info.opinion,
            reference_height: info.reference.height,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Verifying {
    /// Total good weight of all counted ballots.
    pub total_good: Weight,
}

impl Verifying {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one ballot. A ballot is good iff its beacon matched, its
    /// opinion equals the local opinion through the previous layer, and its
    /// creator's height is not below the previous layer's reference cutoff.
    /// Good weight is added to the exclusion sum of every tracked layer
    /// from the ballot's own layer up.
    pub fn count_ballot(&mut self, state: &mut State, ballot: &BallotView) -> bool {
        let prev_opinion = state.opinion_before(ballot.layer);
        let prev_reference_height = ballot
            .layer
            .prev()
            .and_then(|prev| state.layer(prev))
            .map(|layer| layer.reference_height)
            .unwrap_or(0);
        let counted = !(ballot.bad_beacon
            || prev_opinion != ballot.opinion
            || prev_reference_height > ballot.reference_height);
        debug!(
            ballot = %ballot.id,
            layer = %ballot.layer,
            weight = %ballot.weight,
            bad_beacon = ballot.bad_beacon,
            counted,
            "count ballot in verifying mode"
        );
        if !counted {
            return false;
        }
        // every existing layer at or above the ballot must exclude it, so
        // layers created ahead of the processed frontier stay consistent
        let top = state.top_layer();
        for lid in ballot.layer.range_to(top) {
            if let Some(layer) = state.layer_mut(lid) {
                layer.good_uncounted = layer.good_uncounted.saturating_add(ballot.weight);
            }
        }
        self.total_good = self.total_good.saturating_add(ballot.weight);
        true
    }

    /// Roll back every contribution from ballots later than `changed`,
    /// keeping the weight already settled at or before it. Callers recount
    /// the later layers afterwards.
    pub fn reset(&mut self, state: &mut State, changed: LayerId) {
        let settled = state
            .layer(changed)
            .map(|layer| layer.good_uncounted)
            .unwrap_or(Weight::ZERO);
        self.total_good = settled;
        let top = state.top_layer();
        for lid in changed.next().range_to(top) {
            if let Some(layer) = state.layer_mut(lid) {
                layer.good_uncounted = settled;
            }
        }
    }

    /// Re-count every ballot of layers `from ..= processed`; used after a
    /// local opinion change invalidated their goodness.
    pub fn recount(&mut self, state: &mut State, from: LayerId) {
        let processed = state.processed;
        for lid in from.range_to(processed) {
            let ids: Vec<BallotId> = state
                .layer(lid)
                .map(|layer| layer.ballots.clone())
                .unwrap_or_default();
            for id in ids {
                if let Some(view) = state.ballots.get(&id).map(BallotView::from) {
                    self.count_ballot(state, &view);
                }
            }
        }
    }

    /// Attempt to verify `lid` against the global threshold.
    pub fn verify(&self, state: &mut State, config: &Config, lid: LayerId) -> LayerVerdict {
        let Some(layer) = state.layer(lid) else {
            return LayerVerdict::Undecided;
        };
        if !layer.hare_terminated {
            debug!(%lid, "hare is not terminated");
            return LayerVerdict::Undecided;
        }
        let good_uncounted = layer.good_uncounted;
        let reference_height = layer.reference_height;

        let mut margin = self.total_good.saturating_sub(good_uncounted);
        // absent eligible weight counts as votes against
        let expected = tally::expected_weight_after(state, config, lid, state.last);
        let uncounted = expected.saturating_sub(margin);
        if uncounted.sign() == Sign::Support {
            margin = margin.saturating_sub(uncounted);
        }
        let threshold = tally::global_threshold(state, config, lid);
        debug!(
            %lid,
            %margin,
            %threshold,
            total_good = %self.total_good,
            good_uncounted = %good_uncounted,
            "verifying threshold check"
        );
        if margin.decide(&threshold) != Sign::Support {
            return LayerVerdict::Undecided;
        }

        let multi = config.multi_support;
        let Some(layer) = state.layer_mut(lid) else {
            return LayerVerdict::Undecided;
        };
        tally::verify_layer(lid, &mut layer.blocks, true, multi, |block| {
            if block.height > reference_height {
                Sign::Neutral
            } else {
                block.hare
            }
        })
    }
}
