//! The per-epoch beacon.
//!
//! Every epoch the network agrees on a small random value (the beacon) that
//! ballots must echo. A ballot whose reference declares a different beacon
//! than the locally recorded one is counted late, if at all.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 4-byte epoch beacon.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Beacon([u8; 4]);

impl Beacon {
    pub const ZERO: Self = Self([0u8; 4]);

    pub fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Debug for Beacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Beacon(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Beacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_and_display() {
        let a = Beacon::new([1, 2, 3, 4]);
        let b = Beacon::new([1, 2, 3, 4]);
        assert_eq!(a, b);
        assert_ne!(a, Beacon::ZERO);
        assert_eq!(format!("{}", a), "01020304");
    }
}
