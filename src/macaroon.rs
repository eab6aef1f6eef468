//! Macaroon credential structure and its canonical binary codec.
//!
//! The macaroon is an opaque, HMAC-chained bearer credential: its authority
//! is the intersection of all caveats sealed into it. This module owns the
//! structure and the wire form; *whether* a macaroon's caveats are satisfied
//! is the minter's business, not ours.
//!
//! Wire layout (version 2, tag-length-value):
//!
//! ```text
//! 0x02
//! [ location:   tag 1, varint len, bytes ]      (optional)
//!   identifier: tag 2, varint len, bytes
//! 0x00                                          (end of header section)
//! per caveat:
//!   [ location ] identifier [ vid: tag 4 ] 0x00
//! 0x00                                          (end of caveat section)
//!   signature:  tag 6, varint len, 32 bytes
//! ```

use hmac::{Hmac, Mac as _};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const VERSION: u8 = 0x02;
const EOS: u8 = 0x00;
const FIELD_LOCATION: u8 = 0x01;
const FIELD_IDENTIFIER: u8 = 0x02;
const FIELD_VID: u8 = 0x04;
const FIELD_SIGNATURE: u8 = 0x06;

/// Length of the HMAC-SHA256 signature carried by a sealed macaroon.
pub const SIGNATURE_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum MacaroonError {
    #[error("unexpected end of macaroon data")]
    UnexpectedEof,
    #[error("unsupported macaroon version: {0}")]
    UnsupportedVersion(u8),
    #[error("unexpected field tag: {0}")]
    UnexpectedField(u8),
    #[error("trailing bytes after macaroon signature")]
    TrailingData,
    #[error("macaroon has an empty identifier")]
    EmptyIdentifier,
    #[error("macaroon signature must be {SIGNATURE_LEN} bytes, got {0}")]
    BadSignatureLength(usize),
}

/// A restriction on the authority granted by a macaroon. First-party caveats
/// carry only a condition; third-party caveats additionally carry the
/// verification-key id and the verifier's location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caveat {
    pub identifier: Vec<u8>,
    pub verification_id: Option<Vec<u8>>,
    pub location: Option<String>,
}

impl Caveat {
    pub fn first_party(condition: impl Into<Vec<u8>>) -> Self {
        Self {
            identifier: condition.into(),
            verification_id: None,
            location: None,
        }
    }

    pub fn is_first_party(&self) -> bool {
        self.verification_id.is_none()
    }
}

/// A sealed bearer credential. Fields are public because the minting side
/// of the gateway constructs these directly; everything downstream treats a
/// deserialized macaroon as immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Macaroon {
    pub location: Option<String>,
    pub identifier: Vec<u8>,
    pub caveats: Vec<Caveat>,
    pub signature: Vec<u8>,
}

impl Macaroon {
    /// Start a macaroon chain: the initial signature is HMAC(root_key, id).
    pub fn new(root_key: &[u8], identifier: impl Into<Vec<u8>>, location: Option<String>) -> Self {
        let identifier = identifier.into();
        let signature = hmac_sha256(root_key, &identifier);
        Self {
            location,
            identifier,
            caveats: Vec::new(),
            signature,
        }
    }

    /// Seal a first-party condition into the macaroon, extending the
    /// signature chain: sig' = HMAC(sig, condition).
    pub fn add_first_party_caveat(&mut self, condition: impl Into<Vec<u8>>) {
        let caveat = Caveat::first_party(condition);
        self.signature = hmac_sha256(&self.signature, &caveat.identifier);
        self.caveats.push(caveat);
    }

    /// Serialize to the canonical binary form.
    ///
    /// Fails only when a sealed-macaroon invariant does not hold (empty
    /// identifier, wrong signature length). An already-minted macaroon never
    /// trips these, but the violation must surface rather than produce a
    /// silently unusable credential.
    pub fn serialize(&self) -> Result<Vec<u8>, MacaroonError> {
        if self.identifier.is_empty() {
            return Err(MacaroonError::EmptyIdentifier);
        }
        if self.signature.len() != SIGNATURE_LEN {
            return Err(MacaroonError::BadSignatureLength(self.signature.len()));
        }

        let mut buf = vec![VERSION];
        if let Some(loc) = &self.location {
            put_field(&mut buf, FIELD_LOCATION, loc.as_bytes());
        }
        put_field(&mut buf, FIELD_IDENTIFIER, &self.identifier);
        buf.push(EOS);

        for caveat in &self.caveats {
            if let Some(loc) = &caveat.location {
                put_field(&mut buf, FIELD_LOCATION, loc.as_bytes());
            }
            put_field(&mut buf, FIELD_IDENTIFIER, &caveat.identifier);
            if let Some(vid) = &caveat.verification_id {
                put_field(&mut buf, FIELD_VID, vid);
            }
            buf.push(EOS);
        }
        buf.push(EOS);

        put_field(&mut buf, FIELD_SIGNATURE, &self.signature);
        Ok(buf)
    }

    /// Parse the canonical binary form. Strict: truncated input, unknown
    /// field tags, and trailing bytes are all errors.
    pub fn deserialize(data: &[u8]) -> Result<Self, MacaroonError> {
        let mut r = Reader::new(data);

        let version = r.take_u8()?;
        if version != VERSION {
            return Err(MacaroonError::UnsupportedVersion(version));
        }

        let location = r.maybe_field(FIELD_LOCATION)?;
        let location = match location {
            Some(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            None => None,
        };
        let identifier = r.expect_field(FIELD_IDENTIFIER)?;
        if identifier.is_empty() {
            return Err(MacaroonError::EmptyIdentifier);
        }
        r.expect_eos()?;

        let mut caveats = Vec::new();
        while r.peek()? != EOS {
            let loc = r.maybe_field(FIELD_LOCATION)?;
            let loc = loc.map(|b| String::from_utf8_lossy(&b).into_owned());
            let identifier = r.expect_field(FIELD_IDENTIFIER)?;
            let verification_id = r.maybe_field(FIELD_VID)?;
            r.expect_eos()?;
            caveats.push(Caveat {
                identifier,
                verification_id,
                location: loc,
            });
        }
        r.expect_eos()?;

        let signature = r.expect_field(FIELD_SIGNATURE)?;
        if signature.len() != SIGNATURE_LEN {
            return Err(MacaroonError::BadSignatureLength(signature.len()));
        }
        if !r.is_empty() {
            return Err(MacaroonError::TrailingData);
        }

        Ok(Self {
            location,
            identifier,
            caveats,
            signature,
        })
    }
}

pub(crate) fn hmac_sha256(key: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(msg);
    mac.finalize().into_bytes().to_vec()
}

fn put_field(buf: &mut Vec<u8>, tag: u8, data: &[u8]) {
    buf.push(tag);
    put_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

fn put_varint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn peek(&self) -> Result<u8, MacaroonError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(MacaroonError::UnexpectedEof)
    }

    fn take_u8(&mut self) -> Result<u8, MacaroonError> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn take_varint(&mut self) -> Result<u64, MacaroonError> {
        let mut v = 0u64;
        let mut shift = 0u32;
        loop {
            let b = self.take_u8()?;
            v |= u64::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return Ok(v);
            }
            shift += 7;
            if shift >= 64 {
                return Err(MacaroonError::UnexpectedEof);
            }
        }
    }

    fn take_bytes(&mut self, n: usize) -> Result<Vec<u8>, MacaroonError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.data.len())
            .ok_or(MacaroonError::UnexpectedEof)?;
        let out = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(out)
    }

    /// Consume `tag, len, data` if the next field carries `tag`.
    fn maybe_field(&mut self, tag: u8) -> Result<Option<Vec<u8>>, MacaroonError> {
        if self.peek()? != tag {
            return Ok(None);
        }
        self.pos += 1;
        let len = self.take_varint()?;
        Ok(Some(self.take_bytes(len as usize)?))
    }

    fn expect_field(&mut self, tag: u8) -> Result<Vec<u8>, MacaroonError> {
        match self.maybe_field(tag)? {
            Some(data) => Ok(data),
            None => Err(MacaroonError::UnexpectedField(self.peek()?)),
        }
    }

    fn expect_eos(&mut self) -> Result<(), MacaroonError> {
        let b = self.take_u8()?;
        if b != EOS {
            return Err(MacaroonError::UnexpectedField(b));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Macaroon {
        let mut mac = Macaroon::new(b"root-key", *b"token-id", Some("lsat".to_string()));
        mac.add_first_party_caveat(b"services=photos:0".to_vec());
        mac.add_first_party_caveat(b"payment_hash=aa".to_vec());
        mac
    }

    #[test]
    fn binary_round_trip() {
        let mac = sample();
        let bytes = mac.serialize().unwrap();
        let parsed = Macaroon::deserialize(&bytes).unwrap();
        assert_eq!(parsed, mac);
    }

    #[test]
    fn round_trip_without_location_or_caveats() {
        let mac = Macaroon::new(b"k", *b"id000000", None);
        let parsed = Macaroon::deserialize(&mac.serialize().unwrap()).unwrap();
        assert_eq!(parsed, mac);
    }

    #[test]
    fn caveat_chain_changes_signature() {
        let mut a = Macaroon::new(b"k", *b"id000000", None);
        let before = a.signature.clone();
        a.add_first_party_caveat(b"services=*:0".to_vec());
        assert_ne!(a.signature, before);
    }

    #[test]
    fn truncated_input_is_eof() {
        let bytes = sample().serialize().unwrap();
        for cut in [0, 1, bytes.len() / 2, bytes.len() - 1] {
            assert!(matches!(
                Macaroon::deserialize(&bytes[..cut]),
                Err(MacaroonError::UnexpectedEof | MacaroonError::UnexpectedField(_))
            ));
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = sample().serialize().unwrap();
        bytes.push(0xff);
        assert!(matches!(
            Macaroon::deserialize(&bytes),
            Err(MacaroonError::TrailingData)
        ));
    }

    #[test]
    fn wrong_version_rejected() {
        let mut bytes = sample().serialize().unwrap();
        bytes[0] = 0x03;
        assert!(matches!(
            Macaroon::deserialize(&bytes),
            Err(MacaroonError::UnsupportedVersion(0x03))
        ));
    }

    #[test]
    fn unsealed_macaroon_refuses_to_serialize() {
        let mut mac = sample();
        mac.signature = vec![0u8; 16];
        assert!(matches!(
            mac.serialize(),
            Err(MacaroonError::BadSignatureLength(16))
        ));

        let mut mac = sample();
        mac.identifier.clear();
        assert!(matches!(
            mac.serialize(),
            Err(MacaroonError::EmptyIdentifier)
        ));
    }

    #[test]
    fn varint_framing_survives_large_fields() {
        let mut mac = Macaroon::new(b"k", vec![0x41u8; 300], None);
        mac.add_first_party_caveat(vec![0x42u8; 200]);
        let parsed = Macaroon::deserialize(&mac.serialize().unwrap()).unwrap();
        assert_eq!(parsed, mac);
    }
}
