//! LSAT authentication for a pay-per-use reverse-proxy gateway.
//!
//! An LSAT (Lightning Service Authentication Token) pairs a
//! capability-scoped macaroon with the preimage of a Lightning payment.
//! Clients present the pair in an HTTP header; unauthenticated clients get
//! a `WWW-Authenticate` challenge carrying a freshly minted macaroon and an
//! unpaid invoice, and complete the token by paying it.
//!
//! This crate is the verification and challenge core only:
//!
//! - [`token`] decodes/encodes the three header layouts of the wire
//!   contract,
//! - [`caveats`] recovers a preimage embedded as a macaroon caveat when no
//!   separate preimage field was sent,
//! - [`auth::LsatAuthenticator`] orchestrates decoding and verification,
//!   and mints fresh challenges, against an external [`minter::Minter`].
//!
//! Everything is request-scoped and stateless; invoice settlement, macaroon
//! authorization policy, and proxy routing live elsewhere. The library
//! installs no tracing subscriber; binaries own that.

pub mod auth;
pub mod caveats;
pub mod macaroon;
pub mod memory;
pub mod minter;
pub mod token;
pub mod types;

pub use auth::{Authenticator, LsatAuthenticator};
pub use caveats::{CaveatError, CaveatExtractor, StdCaveatExtractor};
pub use macaroon::{Caveat, Macaroon, MacaroonError};
pub use memory::MemoryMinter;
pub use minter::Minter;
pub use token::DecodeError;
pub use types::{Preimage, Service, Tier, VerificationParams, WILDCARD_SERVICE};
