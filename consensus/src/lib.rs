//! Consensus — layered block voting for the WEFT mesh.
//!
//! Every layer of the mesh may contain competing candidate blocks. Ballots
//! (signed opinion statements weighted by activation proofs) vote over them,
//! and this crate decides, layer by layer, which block (if any) is
//! canonical. Two cooperating tally modes drive a monotonic verified
//! frontier:
//!
//! - **verifying** — the fast path: when nearly every ballot agrees with the
//!   local opinion, verification reduces to comparing the total "good"
//!   weight above a layer against a global threshold;
//! - **full** — the catch-up path: every ballot's support/against/abstain
//!   vote is counted individually into per-block margins;
//! - **self-healing** — after a prolonged stall the engine adopts whatever
//!   the full tally currently says, threshold or not.
//!
//! ## Module overview
//!
//! - [`engine`] — The [`Engine`]: public interface and mode controller.
//! - `state` — Per-layer, per-ballot and per-block opinion state.
//! - [`ballots`] — Ballot decoding: base + diff into an explicit opinion.
//! - `verifying` — Good-weight tallier for the healthy case.
//! - `full` — Per-block margin tallier counting every ballot.
//! - `tally` — Expected-weight and threshold math, layer decisions.
//! - [`opinion`] — Chained opinion digests.
//! - `encode` — Producing a minimal vote diff against a base ballot.
//! - [`snapshot`] — Decision checkpointing.
//! - [`config`] — Engine tuning parameters.
//! - [`error`] — Typed ingestion errors.
//!
//! The engine is single-threaded and owns no I/O; the embedding node feeds
//! it ballots, blocks, beacons, activation headers and hare outputs, and
//! periodically calls [`Engine::advance`].

pub mod ballots;
pub mod config;
mod encode;
pub mod engine;
pub mod error;
mod full;
pub mod opinion;
pub mod snapshot;
mod state;
mod tally;
mod verifying;

pub use ballots::{Ballot, BallotRef, Block, BlockVote, EpochData, Votes};
pub use config::{Config, MultiSupport};
pub use engine::{AdvanceReport, CancelToken, Engine, Mode};
pub use error::EngineError;
pub use opinion::OpinionHash;
pub use snapshot::Snapshot;
