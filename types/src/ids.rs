//! 32-byte identifiers for mesh objects.
//!
//! Blocks, ballots and activation proofs are all identified by 32-byte
//! digests computed by the caller; the engine treats them as opaque.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! digest_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name([u8; 32]);

        impl $name {
            pub const ZERO: Self = Self([0u8; 32]);

            pub fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "("))?;
                for b in &self.0[..4] {
                    write!(f, "{:02x}", b)?;
                }
                write!(f, "\u{2026})")
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for b in &self.0 {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    };
}

digest_id!(
    /// Identifies one candidate block within a layer.
    BlockId
);

digest_id!(
    /// Identifies a ballot (a signed opinion statement).
    BallotId
);

digest_id!(
    /// Identifies an activation proof (ATX) of one identity for one epoch.
    AtxId
);

digest_id!(
    /// Identifies a transaction; opaque to the voting engine.
    TxId
);
