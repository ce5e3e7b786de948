//! Fundamental types for the WEFT mesh consensus engine.
//!
//! This crate defines the core types shared by the consensus crate and by
//! embedding code: layer and epoch identifiers, 32-byte object ids, the
//! epoch beacon, activation headers, the signed fixed-point voting weight,
//! and the three-valued vote sign.

pub mod atx;
pub mod beacon;
pub mod ids;
pub mod layer;
pub mod weight;

pub use atx::AtxHeader;
pub use beacon::Beacon;
pub use ids::{AtxId, BallotId, BlockId, TxId};
pub use layer::{EpochId, LayerId};
pub use weight::{Sign, Weight};

/// Per-block decision of the voting engine. Same three values as [`Sign`].
pub type Validity = Sign;
