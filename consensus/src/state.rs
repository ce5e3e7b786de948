//! In-memory opinion state indexed by layer.
//!
//! The engine owns every struct here. Ballots and blocks are interned by id
//! and referenced through lookup handles (ids), never through pointers, so
//! the base graph stays acyclic by construction. Pruning below the eviction
//! boundary removes entries wholesale and refolds the opinion chains.

use std::collections::{BTreeMap, HashMap};

use weft_types::{AtxHeader, AtxId, BallotId, Beacon, BlockId, EpochId, LayerId, Sign, Weight};

use crate::opinion::{self, LayerEntry, OpinionHash};

/// One candidate block of a layer. Created on first mention (block arrival
/// or ballot vote), pruned with its layer.
#[derive(Clone, Debug)]
pub(crate) struct BlockInfo {
    pub id: BlockId,
    pub layer: LayerId,
    /// Tick height of the creator's activation proof.
    pub height: u64,
    /// Running signed vote sum from the full tallier.
    pub margin: Weight,
    /// The engine's decision for this block.
    pub validity: Sign,
    /// Hare-derived local vote: support iff this block is the layer's hare
    /// output.
    pub hare: Sign,
}

/// A ballot's effective opinion on one layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum LayerVote {
    /// No opinion on the layer's blocks.
    Abstain,
    /// Supported block ids, sorted ascending; unlisted blocks are against
    /// and an empty set is a vote for the empty layer.
    Support(Vec<BlockId>),
}

impl LayerVote {
    pub fn entry(&self) -> LayerEntry<'_> {
        match self {
            LayerVote::Abstain => LayerEntry::Abstain,
            LayerVote::Support(ids) => LayerEntry::Votes(ids),
        }
    }
}

/// Data resolved from a ballot's epoch reference ballot.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RefInfo {
    /// The reference ballot (self, for a reference ballot).
    pub ballot: BallotId,
    /// Tick height of the creator's activation proof.
    pub height: u64,
    /// Beacon the reference declared for the epoch.
    pub beacon: Beacon,
    /// The creator's total eligibility count for the epoch; divisor of the
    /// ballot weight.
    pub eligibility_slots: u32,
}

/// A fully resolved, ingested ballot.
#[derive(Clone, Debug)]
pub(crate) struct BallotInfo {
    pub id: BallotId,
    pub layer: LayerId,
    pub weight: Weight,
    pub reference: RefInfo,
    /// Reference beacon disagreed with the recorded epoch beacon.
    pub bad_beacon: bool,
    /// Digest of the materialized opinion, folded through `layer - 1`.
    pub opinion: OpinionHash,
    /// Materialized opinion: one entry per layer in
    /// `evicted + 1 ..= layer - 1`.
    pub votes: BTreeMap<LayerId, LayerVote>,
}

/// Aggregate activation data for one epoch.
#[derive(Clone, Debug, Default)]
pub(crate) struct EpochInfo {
    /// Sum of activation weight units of all known identities.
    pub weight: u64,
    /// Weighted p99 of activation heights; blocks above it are ineligible.
    pub height: u64,
    /// (height, weight) per activation, kept for recomputing the p99.
    atxs: Vec<(u64, u64)>,
}

impl EpochInfo {
    pub fn add_atx(&mut self, height: u64, weight: u64) {
        self.weight = self.weight.saturating_add(weight);
        self.atxs.push((height, weight));
        self.height = self.reference_height();
    }

    /// Smallest height at which the cumulative activation weight reaches
    /// 99% of the epoch total; extreme-height outliers below 1% of weight
    /// do not raise the cutoff.
    fn reference_height(&self) -> u64 {
        let mut sorted = self.atxs.clone();
        sorted.sort_unstable();
        let target = self.weight - self.weight / 100;
        let mut cumulative = 0u64;
        for (height, weight) in sorted {
            cumulative = cumulative.saturating_add(weight);
            if cumulative >= target {
                return height;
            }
        }
        0
    }
}

/// Per-layer opinion state.
#[derive(Clone, Debug)]
pub(crate) struct LayerInfo {
    /// Candidate blocks, ordered by (height, id) ascending.
    pub blocks: Vec<BlockInfo>,
    /// Ballots of this layer in insertion order.
    pub ballots: Vec<BallotId>,
    /// Set when a hare output (possibly empty) was received.
    pub hare_terminated: bool,
    /// `Some(None)` is an explicit empty-layer output.
    pub hare_output: Option<Option<BlockId>>,
    /// Canonical decision once the layer verified or healed.
    pub result: Option<Option<BlockId>>,
    /// Cumulative digest of the local opinion through this layer.
    pub opinion: OpinionHash,
    /// Weight of ballots that neither support nor abstain on this layer.
    pub empty: Weight,
    /// Good weight of ballots at or before this layer; the verifying margin
    /// for a candidate layer is the total good weight minus this.
    pub good_uncounted: Weight,
    /// Height cutoff for vote accounting, from the epoch's activations.
    pub reference_height: u64,
}

impl LayerInfo {
    /// The local opinion entry for the digest chain: the recorded result if
    /// decided, else the hare output if terminated, else abstain.
    pub fn local_support(&self) -> Option<Vec<BlockId>> {
        if let Some(result) = &self.result {
            Some(result.iter().copied().collect())
        } else if self.hare_terminated {
            Some(self.hare_output.iter().flatten().copied().collect())
        } else {
            None
        }
    }

    pub fn block(&self, id: &BlockId) -> Option<&BlockInfo> {
        self.blocks.iter().find(|b| b.id == *id)
    }

    pub fn block_mut(&mut self, id: &BlockId) -> Option<&mut BlockInfo> {
        self.blocks.iter_mut().find(|b| b.id == *id)
    }
}

fn empty_layer(good_uncounted: Weight, reference_height: u64, opinion: OpinionHash) -> LayerInfo {
    LayerInfo {
        blocks: Vec::new(),
        ballots: Vec::new(),
        hare_terminated: false,
        hare_output: None,
        result: None,
        opinion,
        empty: Weight::ZERO,
        good_uncounted,
        reference_height,
    }
}

/// The engine's entire mutable state.
#[derive(Clone, Debug)]
pub(crate) struct State {
    /// Highest layer whose canonical block (or emptiness) is decided.
    pub verified: LayerId,
    /// Highest layer fully ingested into the talliers.
    pub processed: LayerId,
    /// Highest layer from which any input has been seen.
    pub last: LayerId,
    /// Pruning boundary; no state at or below it.
    pub evicted: LayerId,

    pub layers: BTreeMap<LayerId, LayerInfo>,
    pub ballots: HashMap<BallotId, BallotInfo>,
    /// Block id to owning layer.
    pub block_index: HashMap<BlockId, LayerId>,
    pub epochs: BTreeMap<EpochId, EpochInfo>,
    pub beacons: HashMap<EpochId, Beacon>,
    pub atxs: HashMap<AtxId, AtxHeader>,
}

impl State {
    pub fn new() -> Self {
        Self {
            verified: LayerId::GENESIS,
            processed: LayerId::GENESIS,
            last: LayerId::GENESIS,
            evicted: LayerId::GENESIS,
            layers: BTreeMap::new(),
            ballots: HashMap::new(),
            block_index: HashMap::new(),
            epochs: BTreeMap::new(),
            beacons: HashMap::new(),
            atxs: HashMap::new(),
        }
    }

    /// Create all missing layers up to and including `lid`. Layers are
    /// always created contiguously from the eviction boundary so the
    /// opinion chain and good-weight sums stay well defined; a new layer
    /// inherits the previous layer's uncounted good weight.
    pub fn ensure_layer(&mut self, lid: LayerId, layers_per_epoch: u32) {
        if lid <= self.evicted {
            return;
        }
        let start = match self.layers.last_key_value() {
            Some((&max, _)) if max >= lid => return,
            Some((&max, _)) => max.next(),
            None => self.evicted.next(),
        };
        let mut prev_gu = start
            .prev()
            .and_then(|p| self.layers.get(&p))
            .map(|l| l.good_uncounted)
            .unwrap_or(Weight::ZERO);
        let mut prev_opinion = self.opinion_before(start);
        for layer in start.range_to(lid) {
            let epoch = layer.epoch(layers_per_epoch);
            let reference_height = self.epochs.get(&epoch).map(|e| e.height).unwrap_or(0);
            let opinion = opinion::fold(&prev_opinion, LayerEntry::Abstain);
            let info = empty_layer(prev_gu, reference_height, opinion);
            prev_gu = info.good_uncounted;
            prev_opinion = info.opinion;
            self.layers.insert(layer, info);
        }
    }

    /// Highest layer with any state; the eviction boundary when none.
    pub fn top_layer(&self) -> LayerId {
        self.layers
            .last_key_value()
            .map(|(&lid, _)| lid)
            .unwrap_or(self.evicted)
    }

    pub fn layer(&self, lid: LayerId) -> Option<&LayerInfo> {
        self.layers.get(&lid)
    }

    pub fn layer_mut(&mut self, lid: LayerId) -> Option<&mut LayerInfo> {
        self.layers.get_mut(&lid)
    }

    /// Cumulative local opinion digest for the layers strictly before `lid`.
    pub fn opinion_before(&self, lid: LayerId) -> OpinionHash {
        match lid.prev() {
            Some(prev) if prev > self.evicted => self
                .layers
                .get(&prev)
                .map(|l| l.opinion)
                .unwrap_or(OpinionHash::SEED),
            _ => OpinionHash::SEED,
        }
    }

    /// Recompute the cumulative local opinion digests from `from` upward.
    pub fn rebuild_opinions(&mut self, from: LayerId) {
        let start = from.max(self.evicted.next());
        let end = match self.layers.last_key_value() {
            Some((&max, _)) if max >= start => max,
            _ => return,
        };
        let mut prev = self.opinion_before(start);
        for lid in start.range_to(end) {
            if let Some(layer) = self.layers.get_mut(&lid) {
                layer.opinion = match layer.local_support() {
                    Some(ids) => opinion::fold(&prev, LayerEntry::Votes(&ids)),
                    None => opinion::fold(&prev, LayerEntry::Abstain),
                };
                prev = layer.opinion;
            }
        }
    }

    /// Intern a block, keeping the layer's (height, id) order. Idempotent
    /// by id; the first mention's height wins. Returns whether the block is
    /// new, so the full tallier can backfill its margin from ballots that
    /// were counted before the block was known.
    pub fn intern_block(
        &mut self,
        lid: LayerId,
        id: BlockId,
        height: u64,
        layers_per_epoch: u32,
    ) -> Result<bool, crate::EngineError> {
        if let Some(&owner) = self.block_index.get(&id) {
            if owner != lid {
                return Err(crate::EngineError::MalformedBlock {
                    id,
                    reason: format!("already interned in {owner}, mentioned again in {lid}"),
                });
            }
            return Ok(false);
        }
        self.ensure_layer(lid, layers_per_epoch);
        let layer = self.layers.get_mut(&lid).expect("layer just ensured");
        let hare = match layer.hare_output {
            Some(Some(out)) if out == id => Sign::Support,
            Some(_) => Sign::Against,
            None => Sign::Neutral,
        };
        let position = layer
            .blocks
            .binary_search_by(|b| (b.height, b.id).cmp(&(height, id)))
            .unwrap_or_else(|pos| pos);
        layer.blocks.insert(
            position,
            BlockInfo {
                id,
                layer: lid,
                height,
                margin: Weight::ZERO,
                validity: Sign::Neutral,
                hare,
            },
        );
        self.block_index.insert(id, lid);
        Ok(true)
    }

    pub fn block(&self, id: &BlockId) -> Option<&BlockInfo> {
        let lid = self.block_index.get(id)?;
        self.layers.get(lid)?.block(id)
    }

    /// Record one activation header; refreshes the epoch aggregate and the
    /// reference height of any already-created layer in that epoch.
    pub fn add_atx(&mut self, header: AtxHeader, layers_per_epoch: u32) {
        if self.atxs.contains_key(&header.id) {
            return;
        }
        let epoch = self.epochs.entry(header.epoch).or_default();
        epoch.add_atx(header.height, header.weight);
        let reference_height = epoch.height;
        let first = header.epoch.first_layer(layers_per_epoch);
        let next_epoch_first = header.epoch.next().first_layer(layers_per_epoch);
        for (_, layer) in self
            .layers
            .range_mut(first..next_epoch_first)
        {
            layer.reference_height = reference_height;
        }
        self.atxs.insert(header.id, header);
    }

    /// Drop all state strictly below `until` and refold opinion chains and
    /// retained ballots from the new boundary.
    pub fn evict_to(&mut self, until: LayerId, layers_per_epoch: u32) {
        let new_evicted = match until.prev() {
            Some(prev) if prev > self.evicted => prev,
            _ => return,
        };
        for lid in self.evicted.next().range_to(new_evicted) {
            if let Some(layer) = self.layers.remove(&lid) {
                for block in &layer.blocks {
                    self.block_index.remove(&block.id);
                }
                for ballot in &layer.ballots {
                    self.ballots.remove(ballot);
                }
            }
        }
        self.evicted = new_evicted;

        for ballot in self.ballots.values_mut() {
            ballot.votes = ballot.votes.split_off(&until);
            ballot.opinion = fold_votes(&ballot.votes, self.evicted, ballot.layer);
        }

        // Drop aggregates of epochs that ended before the boundary.
        let evicted = self.evicted;
        self.epochs
            .retain(|epoch, _| epoch.next().first_layer(layers_per_epoch) > evicted);
        let live: std::collections::HashSet<EpochId> = self.epochs.keys().copied().collect();
        self.beacons.retain(|epoch, _| live.contains(epoch));
        self.atxs.retain(|_, header| live.contains(&header.epoch));

        self.rebuild_opinions(until);
    }
}

/// Fold a ballot's materialized opinion from the layer after `evicted` up
/// to (excluding) the ballot's own layer. Layers without an entry count as
/// supporting nothing.
pub(crate) fn fold_votes(
    votes: &BTreeMap<LayerId, LayerVote>,
    evicted: LayerId,
    ballot_layer: LayerId,
) -> OpinionHash {
    let mut digest = OpinionHash::SEED;
    let Some(end) = ballot_layer.prev() else {
        return digest;
    };
    for lid in evicted.next().range_to(end) {
        digest = match votes.get(&lid) {
            Some(vote) => opinion::fold(&digest, vote.entry()),
            None => opinion::fold(&digest, LayerEntry::Votes(&[])),
        };
    }
    digest
}
