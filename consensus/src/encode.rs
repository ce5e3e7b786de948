//! Producing ballots: encode the local opinion as a base plus minimal diff.
//!
//! The base is the most recent ingested ballot whose opinion already agrees
//! with the local opinion on everything before its layer; the diff then
//! only has to spell out the layers from the base's layer up to (excluding)
//! the newest seen layer. With no agreeing ballot the diff starts at the
//! eviction boundary and no base is named.

use tracing::debug;
use weft_types::{BallotId, BlockId, LayerId, Sign};

use crate::ballots::{BlockVote, Votes};
use crate::config::Config;
use crate::state::{BallotInfo, State};
use crate::tally;

pub(crate) fn encode_votes(state: &State, config: &Config, prefer: Option<BallotId>) -> Votes {
    let base = choose_base(state, prefer);
    let (base_id, start) = match base {
        Some(ballot) => (Some(ballot.id), ballot.layer),
        None => (None, state.evicted.next()),
    };
    let mut votes = Votes {
        base: base_id,
        ..Votes::default()
    };
    let Some(end) = state.last.prev() else {
        return votes;
    };
    for lid in start.range_to(end) {
        match local_opinion(state, config, lid) {
            None => votes.abstain.push(lid),
            Some(ids) => {
                for id in ids {
                    let height = state.block(&id).map(|block| block.height).unwrap_or(0);
                    votes.support.push(BlockVote {
                        id,
                        layer: lid,
                        height,
                    });
                }
            }
        }
    }
    debug!(
        base = ?votes.base,
        support = votes.support.len(),
        abstain = votes.abstain.len(),
        "encoded votes"
    );
    votes
}

/// The local opinion on one layer: `None` abstains, otherwise the supported
/// ids. Falls back to full-tally margins against the local threshold for
/// layers whose hare never terminated and that are too old to wait for.
fn local_opinion(state: &State, config: &Config, lid: LayerId) -> Option<Vec<BlockId>> {
    let Some(layer) = state.layer(lid) else {
        return None;
    };
    if let Some(ids) = layer.local_support() {
        return Some(ids);
    }
    if state.last.since(lid) <= config.hdist {
        return None;
    }
    let threshold = tally::local_threshold(state, config, lid);
    let supported: Vec<BlockId> = layer
        .blocks
        .iter()
        .filter(|block| block.margin.decide(&threshold) == Sign::Support)
        .map(|block| block.id)
        .collect();
    if !supported.is_empty() {
        return Some(supported);
    }
    if layer.empty.decide(&threshold) == Sign::Support {
        return Some(Vec::new());
    }
    None
}

fn choose_base<'a>(state: &'a State, prefer: Option<BallotId>) -> Option<&'a BallotInfo> {
    let agrees = |ballot: &BallotInfo| {
        !ballot.bad_beacon && ballot.opinion == state.opinion_before(ballot.layer)
    };
    if let Some(id) = prefer {
        if let Some(ballot) = state.ballots.get(&id) {
            if agrees(ballot) {
                return Some(ballot);
            }
        }
    }
    for (_, layer) in state.layers.iter().rev() {
        for id in &layer.ballots {
            if let Some(ballot) = state.ballots.get(id) {
                if agrees(ballot) {
                    return Some(ballot);
                }
            }
        }
    }
    None
}
