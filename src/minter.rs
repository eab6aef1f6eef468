//! The external minting/verification capability the authenticator delegates
//! to. Implementations typically talk to a Lightning node and a macaroon
//! secret store; [`crate::memory::MemoryMinter`] is the in-process reference
//! used by tests and demos.

use async_trait::async_trait;

use crate::macaroon::Macaroon;
use crate::types::{Service, VerificationParams};

/// Mints new LSATs and verifies presented ones.
///
/// Both calls may perform network or disk I/O; this layer imposes no timeout
/// and no retry. Dropping the returned future (caller cancellation) must
/// abort the in-flight call.
#[async_trait]
pub trait Minter: Send + Sync {
    /// Mint a macaroon scoped to `service` together with an unpaid invoice
    /// whose settlement preimage satisfies the macaroon's payment caveat.
    async fn mint_lsat(&self, service: &Service) -> anyhow::Result<(Macaroon, String)>;

    /// Ok iff the macaroon's signature is valid, all caveats are satisfied
    /// (including the payment hash against `sha256(preimage)`), and the
    /// macaroon authorizes the target service or carries the wildcard.
    async fn verify_lsat(&self, params: &VerificationParams) -> anyhow::Result<()>;
}
