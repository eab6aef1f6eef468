//! Request-scoped value objects shared by the codec and the authenticator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// Service name that authorizes access to any backend service.
pub const WILDCARD_SERVICE: &str = "*";

#[derive(Debug, Error)]
pub enum PreimageError {
    #[error("hex decode of preimage failed: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("preimage must be 32 bytes, got {0}")]
    BadLength(usize),
}

/// A 32-byte payment secret. `sha256(preimage)` must equal the payment hash
/// committed into the paired macaroon; the preimage alone proves nothing.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Preimage([u8; 32]);

impl Preimage {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, PreimageError> {
        let raw = hex::decode(s)?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|v: Vec<u8>| PreimageError::BadLength(v.len()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The payment hash this preimage settles.
    pub fn payment_hash(&self) -> [u8; 32] {
        Sha256::digest(self.0).into()
    }
}

impl fmt::Display for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

// Keep the secret out of debug output; logs carry the payment hash instead.
impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Preimage(<redacted>)")
    }
}

impl FromStr for Preimage {
    type Err = PreimageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Ordinal capability level a macaroon authorizes for a service. Higher
/// tiers subsume lower ones; freshly minted challenges start at the base.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Tier(pub u8);

impl Tier {
    pub const BASE: Tier = Tier(0);
}

/// A named backend capability being requested or minted for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub tier: Tier,
}

impl Service {
    pub fn new(name: impl Into<String>, tier: Tier) -> Self {
        Self {
            name: name.into(),
            tier,
        }
    }

    /// Base-tier descriptor, the scope new challenges are minted at.
    pub fn base(name: impl Into<String>) -> Self {
        Self::new(name, Tier::BASE)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tier.0)
    }
}

/// Everything the minter needs for a single verification call. Constructed
/// fresh per request, never persisted.
#[derive(Debug, Clone)]
pub struct VerificationParams {
    pub macaroon: crate::macaroon::Macaroon,
    pub preimage: Preimage,
    pub target_service: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preimage_hex_round_trip() {
        let p = Preimage::new([0xab; 32]);
        let parsed = Preimage::from_hex(&p.to_string()).unwrap();
        assert_eq!(parsed, p);
    }

    #[test]
    fn preimage_rejects_short_hex() {
        assert!(matches!(
            Preimage::from_hex("abcd"),
            Err(PreimageError::BadLength(2))
        ));
        assert!(matches!(
            Preimage::from_hex("zz"),
            Err(PreimageError::Hex(_))
        ));
    }

    #[test]
    fn payment_hash_is_sha256() {
        use sha2::{Digest as _, Sha256};
        let p = Preimage::new([7; 32]);
        let expected: [u8; 32] = Sha256::digest([7u8; 32]).into();
        assert_eq!(p.payment_hash(), expected);
    }

    #[test]
    fn debug_output_is_redacted() {
        let p = Preimage::new([1; 32]);
        assert_eq!(format!("{p:?}"), "Preimage(<redacted>)");
    }

    #[test]
    fn tiers_are_ordered() {
        assert!(Tier::BASE < Tier(1));
        assert_eq!(Service::base("photos").tier, Tier::BASE);
    }
}
