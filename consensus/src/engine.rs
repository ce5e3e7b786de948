//! The voting engine: public interface and mode controller.
//!
//! The engine is single-threaded and cooperative. The embedding node owns
//! one instance, feeds it inputs through the `on_*` methods and calls
//! [`Engine::advance`] after every input or on a timer; concurrent access
//! must be serialized externally. No method suspends and no I/O happens
//! here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};
use weft_types::{
    AtxHeader, BallotId, Beacon, BlockId, EpochId, LayerId, Sign, Validity, Weight,
};

use crate::ballots::{self, Ballot, Block, Votes};
use crate::config::Config;
use crate::encode;
use crate::error::EngineError;
use crate::full::Full;
use crate::opinion::OpinionHash;
use crate::snapshot::{self, Snapshot};
use crate::state::State;
use crate::tally::LayerVerdict;
use crate::verifying::{BallotView, Verifying};

/// Which tally decided the most recent layers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Verifying,
    Full,
    Healing,
}

/// Result of one [`Engine::advance`] call. Never an error: a stall shows
/// up as undecided layers and, eventually, a mode change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdvanceReport {
    /// Layers decided by this call in ascending order, each with its
    /// canonical block (`None` for an empty layer).
    pub newly_verified: Vec<(LayerId, Option<BlockId>)>,
    /// The first layer examined but left undecided, if any.
    pub undecided: Vec<LayerId>,
    pub mode: Mode,
}

/// Cooperative cancellation flag, polled between layers in `advance`.
/// Progress made before cancellation is kept.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The two-mode layered voting engine.
pub struct Engine {
    config: Config,
    state: State,
    verifying: Verifying,
    full: Full,
    mode: Mode,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: State::new(),
            verifying: Verifying::new(),
            full: Full::new(),
            mode: Mode::Verifying,
        }
    }

    /// Rebuild an engine from a decision checkpoint. Tallies restart empty;
    /// ballots arriving after the restore re-accumulate them.
    pub fn restore(config: Config, snapshot: &Snapshot) -> Self {
        let state = snapshot::rebuild(snapshot, &config);
        Self {
            config,
            state,
            verifying: Verifying::new(),
            full: Full::new(),
            mode: Mode::Verifying,
        }
    }

    /// Capture the current decisions as an opaque checkpoint.
    pub fn snapshot(&self) -> Snapshot {
        snapshot::capture(&self.state)
    }

    /// Ingest a decoded ballot. Idempotent by id; any order. A `Missing*`
    /// refusal stores nothing and the caller should fetch and retry.
    pub fn on_ballot(&mut self, ballot: &Ballot) -> Result<(), EngineError> {
        if self.state.ballots.contains_key(&ballot.id) {
            return Ok(());
        }
        if ballot.layer <= self.state.evicted {
            return Err(EngineError::Stale {
                layer: ballot.layer,
                evicted: self.state.evicted,
            });
        }
        let (info, interned) = ballots::resolve(&mut self.state, &self.config, ballot)?;

        self.state
            .ensure_layer(ballot.layer, self.config.layers_per_epoch);
        self.state.last = self.state.last.max(ballot.layer);
        self.state.processed = self.state.processed.max(ballot.layer);

        for (lid, id) in interned {
            self.full.on_new_block(&mut self.state, lid, id);
        }

        let view = BallotView::from(&info);
        if let Some(layer) = self.state.layer_mut(ballot.layer) {
            layer.ballots.push(ballot.id);
        }
        self.state.ballots.insert(info.id, info);

        self.verifying.count_ballot(&mut self.state, &view);
        self.full.on_ballot(&mut self.state, &self.config, ballot.id);
        Ok(())
    }

    /// Ingest a block. Idempotent by id; votes for it may already have
    /// arrived, in which case its margin is backfilled.
    pub fn on_block(&mut self, block: &Block) -> Result<(), EngineError> {
        if block.layer <= self.state.evicted {
            return Err(EngineError::Stale {
                layer: block.layer,
                evicted: self.state.evicted,
            });
        }
        let new = self.state.intern_block(
            block.layer,
            block.id,
            block.height,
            self.config.layers_per_epoch,
        )?;
        self.state.last = self.state.last.max(block.layer);
        if new {
            self.full.on_new_block(&mut self.state, block.layer, block.id);
        }
        Ok(())
    }

    /// Record a hare decision (or explicit emptiness) for a layer and seed
    /// the local opinion with it.
    pub fn on_hare_output(&mut self, lid: LayerId, output: Option<BlockId>) {
        if lid <= self.state.evicted {
            debug!(%lid, "hare output below the eviction boundary");
            return;
        }
        self.state.ensure_layer(lid, self.config.layers_per_epoch);
        self.state.last = self.state.last.max(lid);
        let Some(layer) = self.state.layer_mut(lid) else {
            return;
        };
        if layer.hare_terminated && layer.hare_output == Some(output) {
            return;
        }
        layer.hare_terminated = true;
        layer.hare_output = Some(output);
        for block in &mut layer.blocks {
            block.hare = if Some(block.id) == output {
                Sign::Support
            } else {
                Sign::Against
            };
        }
        info!(%lid, ?output, "hare terminated");
        self.opinion_changed(lid);
    }

    /// Record the authoritative beacon for an epoch. The first recording
    /// wins; a conflicting one is ignored with a warning.
    pub fn on_beacon(&mut self, epoch: EpochId, beacon: Beacon) {
        if let Some(existing) = self.state.beacons.get(&epoch) {
            if *existing != beacon {
                warn!(%epoch, %existing, %beacon, "conflicting beacon ignored");
            }
            return;
        }
        debug!(%epoch, %beacon, "beacon recorded");
        self.state.beacons.insert(epoch, beacon);
    }

    /// Supply one activation header; updates the epoch's weight and
    /// reference height.
    pub fn on_atx(&mut self, header: AtxHeader) {
        self.state.add_atx(header, self.config.layers_per_epoch);
    }

    /// Try to move the verified frontier. Equivalent to
    /// [`Engine::advance_cancellable`] with a token that never fires.
    pub fn advance(&mut self) -> AdvanceReport {
        self.advance_cancellable(&CancelToken::new())
    }

    /// Try to move the verified frontier, polling `cancel` between layers.
    pub fn advance_cancellable(&mut self, cancel: &CancelToken) -> AdvanceReport {
        let mut report = AdvanceReport::default();
        self.full.drain_delayed(&mut self.state);

        let from = self.state.verified.next();
        let upto = self.state.processed;
        for lid in from.range_to(upto) {
            if cancel.is_cancelled() {
                debug!(%lid, "advance cancelled");
                break;
            }
            match self.try_layer(lid) {
                Some(decision) => report.newly_verified.push((lid, decision)),
                None => {
                    report.undecided.push(lid);
                    break;
                }
            }
        }

        // switch-back: once caught up, the fast path takes over again
        if self.state.last.since(self.state.verified) <= self.config.hdist {
            self.mode = Mode::Verifying;
        }
        self.auto_evict();
        report.mode = self.mode;
        report
    }

    /// Attempt one layer through the mode ladder:
    /// verifying -> full (past hdist) -> healing (past zdist).
    fn try_layer(&mut self, lid: LayerId) -> Option<Option<BlockId>> {
        let mut verdict = self.verifying.verify(&mut self.state, &self.config, lid);
        let mut used = Mode::Verifying;
        if verdict == LayerVerdict::Undecided && self.state.last.since(lid) > self.config.hdist {
            debug!(%lid, "verifying stalled, consulting the full tally");
            verdict = self.full.verify(&mut self.state, &self.config, lid);
            used = Mode::Full;
        }
        match verdict {
            LayerVerdict::Verified(decision) => {
                self.mode = used;
                self.commit(lid, decision, used);
                Some(decision)
            }
            LayerVerdict::Undecided => {
                if self.state.last.since(lid) > self.config.zdist {
                    let decision = self.heal(lid);
                    self.mode = Mode::Healing;
                    self.commit(lid, decision, Mode::Healing);
                    Some(decision)
                } else {
                    None
                }
            }
        }
    }

    /// Forced decision: adopt the full tally's current leader, threshold
    /// or not. Ties break to the lower block id; the empty layer wins only
    /// when its weight strictly exceeds the best margin (or there are no
    /// blocks at all).
    fn heal(&mut self, lid: LayerId) -> Option<BlockId> {
        let Some(layer) = self.state.layer_mut(lid) else {
            return None;
        };
        let best = layer
            .blocks
            .iter()
            .max_by(|a, b| a.margin.cmp(&b.margin).then_with(|| b.id.cmp(&a.id)))
            .map(|block| (block.id, block.margin));
        let decision = match best {
            Some((id, margin)) if layer.empty <= margin => Some(id),
            _ => None,
        };
        for block in &mut layer.blocks {
            block.validity = if Some(block.id) == decision {
                Sign::Support
            } else {
                Sign::Against
            };
        }
        warn!(%lid, ?decision, "self-healing forced a decision");
        decision
    }

    fn commit(&mut self, lid: LayerId, decision: Option<BlockId>, mode: Mode) {
        if let Some(layer) = self.state.layer_mut(lid) {
            layer.result = Some(decision);
        }
        self.opinion_changed(lid);
        self.state.verified = lid;
        info!(%lid, ?decision, ?mode, "layer verified");
    }

    /// After the local opinion of `lid` may have changed, refold the digest
    /// chain; if it did change, the goodness of every later ballot is stale
    /// and the verifying tally is rebuilt from the changed layer.
    fn opinion_changed(&mut self, lid: LayerId) {
        let before = self.state.layer(lid).map(|layer| layer.opinion);
        self.state.rebuild_opinions(lid);
        let after = self.state.layer(lid).map(|layer| layer.opinion);
        if before == after {
            return;
        }
        if lid < self.state.processed {
            self.verifying.reset(&mut self.state, lid);
            self.verifying.recount(&mut self.state, lid.next());
        }
    }

    fn auto_evict(&mut self) {
        let bound = self.state.last.sub(self.config.window_size);
        let until = bound.min(self.state.verified);
        if until > self.state.evicted.next() {
            debug!(%until, "window eviction");
            self.state
                .evict_to(until, self.config.layers_per_epoch);
        }
    }

    /// Drop all state strictly below `until`. Only decided history may go:
    /// `until` must not exceed the verified frontier.
    pub fn evict(&mut self, until: LayerId) -> Result<(), EngineError> {
        if until > self.state.verified {
            return Err(EngineError::EvictBeyondVerified {
                requested: until,
                verified: self.state.verified,
            });
        }
        self.state.evict_to(until, self.config.layers_per_epoch);
        Ok(())
    }

    /// Encode the local opinion as a minimal diff against a base ballot.
    /// `prefer` nominates a base; it is used only if it agrees with the
    /// local opinion on everything before its layer.
    pub fn encode_votes(&self, prefer: Option<BallotId>) -> Votes {
        encode::encode_votes(&self.state, &self.config, prefer)
    }

    // ── Infallible reads ─────────────────────────────────────────────────

    pub fn verified(&self) -> LayerId {
        self.state.verified
    }

    pub fn last(&self) -> LayerId {
        self.state.last
    }

    pub fn processed(&self) -> LayerId {
        self.state.processed
    }

    pub fn evicted(&self) -> LayerId {
        self.state.evicted
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The engine's decision for a block; `Neutral` for an unknown id.
    pub fn validity(&self, id: &BlockId) -> Validity {
        self.state
            .block(id)
            .map(|block| block.validity)
            .unwrap_or(Sign::Neutral)
    }

    /// The full tally's running margin for a block.
    pub fn block_margin(&self, id: &BlockId) -> Option<Weight> {
        self.state.block(id).map(|block| block.margin)
    }

    /// The full tally's running empty weight for a layer.
    pub fn empty_weight(&self, lid: LayerId) -> Option<Weight> {
        self.state.layer(lid).map(|layer| layer.empty)
    }

    /// Cumulative local opinion digest through `lid`.
    pub fn opinion(&self, lid: LayerId) -> Option<OpinionHash> {
        self.state.layer(lid).map(|layer| layer.opinion)
    }

    /// An ingested ballot's opinion digest (folded through its layer - 1).
    pub fn ballot_opinion(&self, id: &BallotId) -> Option<OpinionHash> {
        self.state.ballots.get(id).map(|ballot| ballot.opinion)
    }
}
