//! The authenticator the reverse proxy plugs into: decode and verify on
//! the request path, mint and challenge for unauthenticated clients.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http::header::{HeaderMap, WWW_AUTHENTICATE};
use http::HeaderValue;
use tracing::{debug, error};

use crate::caveats::CaveatExtractor;
use crate::minter::Minter;
use crate::token;
use crate::types::{Service, VerificationParams};

/// Gate for a named backend service.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Whether the request headers authenticate the caller to
    /// `service_name`. Never errors: every failure is a deny.
    async fn accept(&self, headers: &HeaderMap, service_name: &str) -> bool;

    /// Headers containing a fresh challenge for the caller to complete.
    async fn fresh_challenge_header(&self, service_name: &str) -> anyhow::Result<HeaderMap>;
}

/// LSAT-protocol authenticator: stateless per request, safe to share across
/// request handlers.
pub struct LsatAuthenticator {
    minter: Arc<dyn Minter>,
    extractor: Arc<dyn CaveatExtractor>,
}

impl LsatAuthenticator {
    pub fn new(minter: Arc<dyn Minter>, extractor: Arc<dyn CaveatExtractor>) -> Self {
        Self { minter, extractor }
    }
}

#[async_trait]
impl Authenticator for LsatAuthenticator {
    // Failures deliberately collapse into a uniform deny: callers (and
    // therefore clients) cannot distinguish a malformed token from an
    // unpaid one. Detail goes to the debug log only.
    async fn accept(&self, headers: &HeaderMap, service_name: &str) -> bool {
        let (macaroon, preimage) = match token::from_header(headers, self.extractor.as_ref()) {
            Ok(pair) => pair,
            Err(err) => {
                debug!(%err, "deny");
                return false;
            }
        };

        let params = VerificationParams {
            macaroon,
            preimage,
            target_service: service_name.to_string(),
        };
        if let Err(err) = self.minter.verify_lsat(&params).await {
            debug!(%err, "deny: LSAT validation failed");
            return false;
        }

        true
    }

    async fn fresh_challenge_header(&self, service_name: &str) -> anyhow::Result<HeaderMap> {
        let service = Service::base(service_name);
        let (macaroon, payment_request) = self
            .minter
            .mint_lsat(&service)
            .await
            .inspect_err(|err| error!(%err, "error minting LSAT"))
            .context("mint LSAT")?;

        // A challenge with a readable invoice is still actionable, so a
        // serialization failure degrades the macaroon field instead of
        // failing the whole challenge.
        let mac_base64 = match macaroon.serialize() {
            Ok(bytes) => BASE64.encode(bytes),
            Err(err) => {
                error!(%err, "error serializing LSAT");
                String::new()
            }
        };

        let value = token::challenge_header_value(&mac_base64, &payment_request);
        let mut headers = HeaderMap::new();
        headers.insert(
            WWW_AUTHENTICATE,
            HeaderValue::from_str(&value).context("encode challenge header")?,
        );

        debug!(challenge = %value, "created new challenge header");
        Ok(headers)
    }
}
