//! In-process reference [`Minter`]: deterministic minting and verification
//! with no Lightning node behind it. Demo deployments and the test suite
//! use this the way production uses a node-backed minter.

use std::collections::HashMap;

use anyhow::Context as _;
use rand::RngCore as _;
use subtle::ConstantTimeEq as _;
use tokio::sync::Mutex;
use tracing::debug;

use crate::caveats::{
    CaveatExtractor, StdCaveatExtractor, COND_PAYMENT_HASH, COND_PREIMAGE, COND_SERVICES,
};
use crate::macaroon::{hmac_sha256, Macaroon};
use crate::minter::Minter;
use crate::types::{Preimage, Service, VerificationParams, WILDCARD_SERVICE};

/// Mints and verifies LSATs against a random in-memory root key. Settlement
/// preimages are held in a pending map until [`MemoryMinter::settle_invoice`]
/// releases them, standing in for a node settling the payment.
pub struct MemoryMinter {
    root_key: [u8; 32],
    extractor: StdCaveatExtractor,
    pending: Mutex<HashMap<String, Preimage>>,
}

impl MemoryMinter {
    pub fn new() -> Self {
        let mut root_key = [0u8; 32];
        rand::rng().fill_bytes(&mut root_key);
        Self {
            root_key,
            extractor: StdCaveatExtractor,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// "Pay" the invoice: returns the settlement preimage a real client
    /// would learn from its Lightning node.
    pub async fn settle_invoice(&self, payment_request: &str) -> anyhow::Result<Preimage> {
        let payment_hash = payment_request
            .strip_prefix("lnbc_demo_")
            .context("unknown invoice format")?;
        self.pending
            .lock()
            .await
            .remove(payment_hash)
            .context("no pending invoice for payment hash")
    }

    /// Re-seal a paid macaroon with its preimage as a caveat, for client
    /// stacks restricted to the single-header layouts.
    pub fn attach_preimage(&self, mac: &mut Macaroon, preimage: &Preimage) {
        mac.add_first_party_caveat(format!("{COND_PREIMAGE}={preimage}"));
    }

    fn recompute_signature(&self, mac: &Macaroon) -> Vec<u8> {
        let mut sig = hmac_sha256(&self.root_key, &mac.identifier);
        for caveat in &mac.caveats {
            sig = hmac_sha256(&sig, &caveat.identifier);
        }
        sig
    }

    fn service_covered(&self, mac: &Macaroon, target: &str) -> anyhow::Result<()> {
        let services = self
            .extractor
            .extract_caveat(mac, COND_SERVICES)
            .context("macaroon carries no services caveat")?;
        let authorized = services.split(',').any(|entry| {
            let name = entry.split(':').next().unwrap_or(entry).trim();
            name == target || name == WILDCARD_SERVICE
        });
        if !authorized {
            anyhow::bail!("macaroon does not authorize service {target:?}");
        }
        Ok(())
    }
}

impl Default for MemoryMinter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Minter for MemoryMinter {
    async fn mint_lsat(&self, service: &Service) -> anyhow::Result<(Macaroon, String)> {
        let preimage = {
            let mut bytes = [0u8; 32];
            rand::rng().fill_bytes(&mut bytes);
            Preimage::new(bytes)
        };
        let payment_hash = hex::encode(preimage.payment_hash());

        let mut token_id = [0u8; 32];
        rand::rng().fill_bytes(&mut token_id);

        let mut mac = Macaroon::new(&self.root_key, token_id, Some("lsat".to_string()));
        mac.add_first_party_caveat(format!("{COND_SERVICES}={}:{}", service.name, service.tier.0));
        mac.add_first_party_caveat(format!("{COND_PAYMENT_HASH}={payment_hash}"));

        let payment_request = format!("lnbc_demo_{payment_hash}");
        self.pending
            .lock()
            .await
            .insert(payment_hash.clone(), preimage);

        debug!(service = %service, payment_hash = %payment_hash, "minted LSAT");
        Ok((mac, payment_request))
    }

    async fn verify_lsat(&self, params: &VerificationParams) -> anyhow::Result<()> {
        let mac = &params.macaroon;

        let expected = self.recompute_signature(mac);
        if !bool::from(expected.as_slice().ct_eq(&mac.signature)) {
            anyhow::bail!("invalid macaroon signature");
        }

        self.service_covered(mac, &params.target_service)?;

        let committed = self
            .extractor
            .extract_caveat(mac, COND_PAYMENT_HASH)
            .context("macaroon carries no payment hash caveat")?;
        let presented = hex::encode(params.preimage.payment_hash());
        if !bool::from(presented.as_bytes().ct_eq(committed.as_bytes())) {
            anyhow::bail!("preimage does not settle the committed payment hash");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tier;

    async fn minted(service: &str) -> (MemoryMinter, Macaroon, Preimage) {
        let minter = MemoryMinter::new();
        let (mac, invoice) = minter.mint_lsat(&Service::base(service)).await.unwrap();
        let preimage = minter.settle_invoice(&invoice).await.unwrap();
        (minter, mac, preimage)
    }

    fn params(mac: &Macaroon, preimage: Preimage, target: &str) -> VerificationParams {
        VerificationParams {
            macaroon: mac.clone(),
            preimage,
            target_service: target.to_string(),
        }
    }

    #[tokio::test]
    async fn mint_settle_verify() {
        let (minter, mac, preimage) = minted("photos").await;
        minter
            .verify_lsat(&params(&mac, preimage, "photos"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wrong_service_is_rejected() {
        let (minter, mac, preimage) = minted("photos").await;
        assert!(minter
            .verify_lsat(&params(&mac, preimage, "billing"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn wildcard_macaroon_covers_any_service() {
        let (minter, mac, preimage) = minted(WILDCARD_SERVICE).await;
        minter
            .verify_lsat(&params(&mac, preimage, "anything"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn flipped_preimage_bit_fails_verification() {
        let (minter, mac, preimage) = minted("photos").await;
        for bit in [0, 7, 255] {
            let mut bytes = *preimage.as_bytes();
            bytes[bit / 8] ^= 1 << (bit % 8);
            assert!(
                minter
                    .verify_lsat(&params(&mac, Preimage::new(bytes), "photos"))
                    .await
                    .is_err(),
                "flipping bit {bit} must break verification"
            );
        }
    }

    #[tokio::test]
    async fn tampered_caveat_breaks_signature() {
        let (minter, mut mac, preimage) = minted("photos").await;
        // Upgrade attempt: rewrite the services caveat without the key.
        mac.caveats[0].identifier = b"services=billing:9".to_vec();
        assert!(minter
            .verify_lsat(&params(&mac, preimage, "billing"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn caveats_added_through_the_chain_still_verify() {
        let (minter, mut mac, preimage) = minted("photos").await;
        minter.attach_preimage(&mut mac, &preimage);
        minter
            .verify_lsat(&params(&mac, preimage, "photos"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn invoice_settles_only_once() {
        let minter = MemoryMinter::new();
        let (_, invoice) = minter
            .mint_lsat(&Service::new("photos", Tier::BASE))
            .await
            .unwrap();
        minter.settle_invoice(&invoice).await.unwrap();
        assert!(minter.settle_invoice(&invoice).await.is_err());
    }
}
