//! Wire codec for the LSAT header contract.
//!
//! Three inbound layouts are recognized, in fixed priority order:
//!
//! 1. `Authorization: LSAT <macBase64>:<preimageHex>`
//! 2. `Grpc-Metadata-Macaroon: <macHex>`
//! 3. `Macaroon: <macHex>`
//!
//! Layouts 2 and 3 carry only the macaroon; the preimage is then recovered
//! from a caveat sealed into the macaroon itself, because those client
//! stacks cannot send two independent header values.

use std::sync::LazyLock;

use anyhow::Context as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http::header::HeaderMap;
use http::HeaderValue;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::caveats::{resolve_preimage, CaveatError, CaveatExtractor};
use crate::macaroon::{Macaroon, MacaroonError};
use crate::types::{Preimage, PreimageError};

/// Header used by REST clients; carries both halves of the token.
pub const HEADER_AUTHORIZATION: &str = "authorization";

/// Header used by certain REST and gRPC client stacks; macaroon only.
pub const HEADER_MACAROON_MD: &str = "grpc-metadata-macaroon";

/// Header used by first-party gRPC clients; macaroon only.
pub const HEADER_MACAROON: &str = "macaroon";

// Anchored: a present Authorization value must match in full. Lower-case
// hex only, exactly 64 characters.
static AUTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^LSAT (.*?):([a-f0-9]{64})$").expect("static regex"));

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no auth header provided")]
    NoCredential,
    #[error("invalid auth header format: {0}")]
    InvalidAuthHeader(String),
    #[error("base64 decode of macaroon failed: {0}")]
    MacaroonBase64(#[from] base64::DecodeError),
    #[error("hex decode of macaroon failed: {0}")]
    MacaroonHex(#[from] hex::FromHexError),
    #[error("unable to unmarshal macaroon: {0}")]
    MacaroonFormat(#[from] MacaroonError),
    #[error("hex decode of preimage failed: {0}")]
    PreimageHex(#[from] PreimageError),
    #[error("unable to extract preimage from macaroon: {0}")]
    MissingCaveat(#[from] CaveatError),
}

/// How a given header field carries the credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// `LSAT <base64 macaroon>:<hex preimage>` in one value.
    CombinedToken,
    /// Hex macaroon only; preimage recovered from its caveats.
    MacaroonOnly,
}

// Priority order is part of the contract: the first *present* field decides
// the layout, and a malformed value in it never falls through to the next.
const LAYOUTS: &[(&str, Layout)] = &[
    (HEADER_AUTHORIZATION, Layout::CombinedToken),
    (HEADER_MACAROON_MD, Layout::MacaroonOnly),
    (HEADER_MACAROON, Layout::MacaroonOnly),
];

/// Extract the (macaroon, preimage) pair from request headers.
pub fn from_header(
    headers: &HeaderMap,
    extractor: &dyn CaveatExtractor,
) -> Result<(Macaroon, Preimage), DecodeError> {
    let (raw, layout) = LAYOUTS
        .iter()
        .find_map(|&(name, layout)| {
            let v = headers.get(name)?;
            (!v.is_empty()).then_some((v, layout))
        })
        .ok_or(DecodeError::NoCredential)?;

    // The first present field decides the layout. A value that is not even
    // readable as UTF-8 is malformed, not absent; it must fail here rather
    // than fall through to the next field.
    let value = raw.to_str().map_err(|_| {
        DecodeError::InvalidAuthHeader(redacted(&String::from_utf8_lossy(raw.as_bytes())))
    })?;

    match layout {
        Layout::CombinedToken => decode_combined(value),
        Layout::MacaroonOnly => decode_macaroon_only(value, extractor),
    }
}

// Everything after the first colon of a combined value may be a payment
// secret; only the macaroon segment is safe for logs and error messages.
fn redacted(value: &str) -> String {
    value.split_once(':').map_or(value, |(m, _)| m).to_string()
}

fn decode_combined(value: &str) -> Result<(Macaroon, Preimage), DecodeError> {
    debug!(header = %redacted(value), "trying to authorize with combined token header");
    let caps = AUTH_RE
        .captures(value)
        .ok_or_else(|| DecodeError::InvalidAuthHeader(redacted(value)))?;
    let (mac_base64, preimage_hex) = (&caps[1], &caps[2]);

    let mac_bytes = BASE64.decode(mac_base64)?;
    let mac = Macaroon::deserialize(&mac_bytes)?;
    let preimage = Preimage::from_hex(preimage_hex)?;
    Ok((mac, preimage))
}

fn decode_macaroon_only(
    value: &str,
    extractor: &dyn CaveatExtractor,
) -> Result<(Macaroon, Preimage), DecodeError> {
    let mac_bytes = hex::decode(value)?;
    let mac = Macaroon::deserialize(&mac_bytes)?;
    let preimage = resolve_preimage(&mac, extractor).map_err(|err| match err {
        CaveatError::BadValue { source, .. } => DecodeError::PreimageHex(source),
        err @ CaveatError::NotFound(_) => DecodeError::MissingCaveat(err),
    })?;
    Ok((mac, preimage))
}

/// Write the standard-form credential (`Authorization: LSAT <b64>:<hex>`)
/// into `headers`. Fails only if the macaroon refuses to serialize, which
/// signals an invariant violation of an already-minted macaroon.
pub fn set_header(
    headers: &mut HeaderMap,
    mac: &Macaroon,
    preimage: &Preimage,
) -> anyhow::Result<()> {
    let mac_bytes = mac.serialize().context("serialize macaroon")?;
    let value = format!("LSAT {}:{preimage}", BASE64.encode(mac_bytes));
    headers.insert(
        HEADER_AUTHORIZATION,
        HeaderValue::from_str(&value).context("encode authorization header")?,
    );
    Ok(())
}

/// Format the `WWW-Authenticate` challenge value.
pub fn challenge_header_value(mac_base64: &str, invoice: &str) -> String {
    format!("LSAT macaroon='{mac_base64}' invoice='{invoice}'")
}

/// Parse a challenge value back into (base64 macaroon, invoice). The
/// client-side inverse of [`challenge_header_value`]; servers only emit.
pub fn parse_challenge(value: &str) -> anyhow::Result<(String, String)> {
    let rest = value
        .strip_prefix("LSAT ")
        .context("missing LSAT challenge scheme")?;
    let mut macaroon = None;
    let mut invoice = None;
    for part in rest.split_whitespace() {
        let (key, val) = part.split_once('=').context("malformed challenge param")?;
        let val = val
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .context("challenge param not quoted")?;
        match key {
            "macaroon" => macaroon = Some(val.to_string()),
            "invoice" => invoice = Some(val.to_string()),
            _ => {}
        }
    }
    Ok((
        macaroon.context("challenge missing macaroon")?,
        invoice.context("challenge missing invoice")?,
    ))
}
