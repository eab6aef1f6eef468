//! Named caveat conditions and the extraction capability the codec leans on.
//!
//! Conditions are sealed into a macaroon as `name=value` first-party caveat
//! identifiers. The codec never interprets condition semantics itself; it
//! asks a [`CaveatExtractor`] for the raw value and decodes only the shapes
//! it owns (the preimage).

use thiserror::Error;

use crate::macaroon::Macaroon;
use crate::types::{Preimage, PreimageError};

/// Condition listing the services (and tiers) a macaroon authorizes,
/// encoded as `services=name1:tier1,name2:tier2`.
pub const COND_SERVICES: &str = "services";

/// Condition committing the payment hash the settlement preimage must match.
pub const COND_PAYMENT_HASH: &str = "payment_hash";

/// Condition carrying the hex settlement preimage itself, for client stacks
/// that cannot send the preimage in a separate header field.
pub const COND_PREIMAGE: &str = "preimage";

#[derive(Debug, Error)]
pub enum CaveatError {
    #[error("macaroon has no caveat for condition {0:?}")]
    NotFound(String),
    #[error("caveat value for {condition:?} is malformed: {source}")]
    BadValue {
        condition: String,
        #[source]
        source: PreimageError,
    },
}

/// Capability for locating a named condition inside a macaroon's caveat
/// list. Owned by the minting side; the codec only consumes it.
pub trait CaveatExtractor: Send + Sync {
    fn extract_caveat(&self, mac: &Macaroon, condition: &str) -> Result<String, CaveatError>;
}

/// Standard first-party extractor: scans the caveat list for a
/// `condition=value` identifier. The *last* match wins, since a later caveat
/// restricts (and therefore supersedes) an earlier one.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdCaveatExtractor;

impl CaveatExtractor for StdCaveatExtractor {
    fn extract_caveat(&self, mac: &Macaroon, condition: &str) -> Result<String, CaveatError> {
        let prefix = format!("{condition}=");
        mac.caveats
            .iter()
            .filter(|c| c.is_first_party())
            .filter_map(|c| std::str::from_utf8(&c.identifier).ok())
            .filter_map(|id| id.strip_prefix(&prefix))
            .last()
            .map(str::to_owned)
            .ok_or_else(|| CaveatError::NotFound(condition.to_string()))
    }
}

/// Recover the preimage from a macaroon that was sent without a companion
/// preimage field: extract the `preimage` condition and hex-decode it into
/// the fixed 32-byte secret.
pub fn resolve_preimage(
    mac: &Macaroon,
    extractor: &dyn CaveatExtractor,
) -> Result<Preimage, CaveatError> {
    let value = extractor.extract_caveat(mac, COND_PREIMAGE)?;
    Preimage::from_hex(&value).map_err(|source| CaveatError::BadValue {
        condition: COND_PREIMAGE.to_string(),
        source,
    })
}
