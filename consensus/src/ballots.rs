//! Ballot ingestion: decoding a base + diff into an explicit opinion.
//!
//! A ballot arrives as a pointer to a base ballot plus explicit
//! support/against/abstain diffs. Resolution inherits the base's
//! materialized opinion, applies the diffs, computes the ballot's voting
//! weight from its activation proof, and detects a mismatched beacon.
//! Everything is resolved from in-memory state; a missing dependency is a
//! typed refusal and nothing partial is stored.

use std::collections::{BTreeMap, HashSet};

use weft_types::{AtxId, BallotId, Beacon, BlockId, LayerId, TxId, Weight};

use crate::config::Config;
use crate::error::EngineError;
use crate::state::{fold_votes, BallotInfo, LayerVote, RefInfo, State};

/// A candidate block as handed to the engine. The transaction list is
/// opaque; only the header fields feed the tally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub layer: LayerId,
    /// Tick height of the creator's activation proof.
    pub height: u64,
    pub txs: Vec<TxId>,
}

/// One explicit vote on a block. Carries the block's coordinates so the
/// block can be interned before its body arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockVote {
    pub id: BlockId,
    pub layer: LayerId,
    pub height: u64,
}

/// Explicit vote diffs plus the base ballot they apply to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Votes {
    /// Ballot whose opinion is inherited; `None` means no inheritance.
    pub base: Option<BallotId>,
    pub support: Vec<BlockVote>,
    pub against: Vec<BlockVote>,
    pub abstain: Vec<LayerId>,
}

/// Epoch data carried by a reference ballot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpochData {
    /// Beacon the creator observed for the epoch.
    pub beacon: Beacon,
    /// The creator's total eligibility count for the epoch.
    pub eligibility_slots: u32,
}

/// How a ballot declares its epoch reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BallotRef {
    /// This ballot is the epoch's reference ballot and carries the data.
    Data(EpochData),
    /// Points at the epoch's reference ballot.
    Ballot(BallotId),
}

/// A decoded ballot as handed to the engine. Signature and eligibility
/// proofs are verified by the caller's preflight; the engine only sees the
/// proof count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ballot {
    pub id: BallotId,
    pub layer: LayerId,
    pub atx: AtxId,
    pub reference: BallotRef,
    pub votes: Votes,
    /// Number of eligibility proofs attached to the ballot.
    pub eligibilities: u32,
}

fn malformed(id: BallotId, reason: impl Into<String>) -> EngineError {
    EngineError::MalformedBallot {
        id,
        reason: reason.into(),
    }
}

/// Structural checks that need no state.
fn check_shape(ballot: &Ballot) -> Result<(), EngineError> {
    if ballot.eligibilities == 0 {
        return Err(malformed(ballot.id, "no eligibility proofs"));
    }
    let mut seen = HashSet::new();
    for vote in ballot.votes.support.iter().chain(&ballot.votes.against) {
        if vote.layer >= ballot.layer {
            return Err(malformed(
                ballot.id,
                format!("vote on {} not before the ballot", vote.layer),
            ));
        }
        if !seen.insert(vote.id) {
            return Err(malformed(
                ballot.id,
                format!("conflicting votes on block {}", vote.id),
            ));
        }
    }
    let abstained: HashSet<LayerId> = ballot.votes.abstain.iter().copied().collect();
    for &lid in &ballot.votes.abstain {
        if lid >= ballot.layer {
            return Err(malformed(
                ballot.id,
                format!("abstain on {} not before the ballot", lid),
            ));
        }
    }
    for vote in ballot.votes.support.iter().chain(&ballot.votes.against) {
        if abstained.contains(&vote.layer) {
            return Err(malformed(
                ballot.id,
                format!("explicit vote on abstained {}", vote.layer),
            ));
        }
    }
    Ok(())
}

/// Resolve a decoded ballot against in-memory state.
///
/// Interns any block first mentioned by the ballot's diffs and returns
/// those alongside the resolved ballot, so the full tallier can backfill
/// their margins. Fails without side effects on the ballot store itself;
/// interned blocks are kept (they are valid first mentions regardless).
pub(crate) fn resolve(
    state: &mut State,
    config: &Config,
    ballot: &Ballot,
) -> Result<(BallotInfo, Vec<(LayerId, BlockId)>), EngineError> {
    check_shape(ballot)?;

    let epoch = ballot.layer.epoch(config.layers_per_epoch);

    let atx = *state
        .atxs
        .get(&ballot.atx)
        .ok_or(EngineError::MissingAtx(ballot.atx))?;
    if atx.epoch != epoch {
        return Err(malformed(
            ballot.id,
            format!("activation proof targets {}, ballot is in {}", atx.epoch, epoch),
        ));
    }

    let reference = match &ballot.reference {
        BallotRef::Data(data) => {
            if data.eligibility_slots == 0 {
                return Err(EngineError::BadActiveSet(epoch));
            }
            RefInfo {
                ballot: ballot.id,
                height: atx.height,
                beacon: data.beacon,
                eligibility_slots: data.eligibility_slots,
            }
        }
        BallotRef::Ballot(rid) => {
            let reference = state
                .ballots
                .get(rid)
                .ok_or(EngineError::MissingReference(*rid))?;
            RefInfo {
                ballot: *rid,
                height: atx.height,
                beacon: reference.reference.beacon,
                eligibility_slots: reference.reference.eligibility_slots,
            }
        }
    };

    let weight = Weight::from_units(atx.weight)
        .div_units(reference.eligibility_slots as u64)
        .ok_or(EngineError::BadActiveSet(epoch))?
        .checked_mul_units(ballot.eligibilities as u64)
        .ok_or_else(|| EngineError::Internal(format!("weight overflow for {}", ballot.id)))?;

    let recorded = state
        .beacons
        .get(&epoch)
        .copied()
        .ok_or(EngineError::MissingBeacon(epoch))?;
    let bad_beacon = recorded != reference.beacon;

    let mut votes: BTreeMap<LayerId, LayerVote> = match ballot.votes.base {
        Some(base_id) => {
            let base = state
                .ballots
                .get(&base_id)
                .ok_or(EngineError::MissingBase(base_id))?;
            let mut inherited = base.votes.clone();
            inherited.split_off(&ballot.layer);
            inherited
        }
        None => BTreeMap::new(),
    };

    // Materialize an entry for every votable layer; layers the base does
    // not cover and the diffs do not mention support nothing.
    if let Some(end) = ballot.layer.prev() {
        for lid in state.evicted.next().range_to(end) {
            votes
                .entry(lid)
                .or_insert_with(|| LayerVote::Support(Vec::new()));
        }
    }

    for &lid in &ballot.votes.abstain {
        if lid <= state.evicted {
            continue;
        }
        votes.insert(lid, LayerVote::Abstain);
    }

    let mut interned = Vec::new();

    for vote in &ballot.votes.support {
        if vote.layer <= state.evicted {
            continue;
        }
        if state.intern_block(vote.layer, vote.id, vote.height, config.layers_per_epoch)? {
            interned.push((vote.layer, vote.id));
        }
        let entry = votes
            .entry(vote.layer)
            .or_insert_with(|| LayerVote::Support(Vec::new()));
        if matches!(entry, LayerVote::Abstain) {
            // an explicit diff overrides an inherited abstain
            *entry = LayerVote::Support(Vec::new());
        }
        if let LayerVote::Support(ids) = entry {
            ids.push(vote.id);
        }
    }

    for vote in &ballot.votes.against {
        if vote.layer <= state.evicted {
            continue;
        }
        if state.intern_block(vote.layer, vote.id, vote.height, config.layers_per_epoch)? {
            interned.push((vote.layer, vote.id));
        }
        let entry = votes
            .entry(vote.layer)
            .or_insert_with(|| LayerVote::Support(Vec::new()));
        if matches!(entry, LayerVote::Abstain) {
            *entry = LayerVote::Support(Vec::new());
        }
        if let LayerVote::Support(ids) = entry {
            ids.retain(|id| id != &vote.id);
        }
    }

    for vote in votes.values_mut() {
        if let LayerVote::Support(ids) = vote {
            ids.sort_unstable();
            ids.dedup();
        }
    }

    let opinion = fold_votes(&votes, state.evicted, ballot.layer);

    Ok((
        BallotInfo {
            id: ballot.id,
            layer: ballot.layer,
            weight,
            reference,
            bad_beacon,
            opinion,
            votes,
        },
        interned,
    ))
}
