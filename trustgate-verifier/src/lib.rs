//! # trustgate-verifier: credential and delegation-chain verification
//!
//! Verifies a presented credential together with the chain of delegation
//! grants an agent acts under, and returns a signed Verification Result
//! Object (VRO) describing exactly which checks passed.
//!
//! ## Features
//!
//! - **Format adapters**: VC-JWT, VC-LD, DG-SD-JWT, DG-LD and OIDC4VP `vp_token`
//!   input normalized into one internal shape
//! - **Delegation chains**: signature, validity window, revocation, authority
//!   attenuation and key binding checked per link
//! - **Status lists**: bitstring status documents, fetched with retry and cached
//! - **Anchoring**: chain fingerprints recorded in an append-only hash chain
//! - **Signed results**: deterministic VROs signed with Ed25519 as compact JWS
//!
//! ## Pipeline
//!
//! ```text
//!   request ──▶ AdapterRegistry ──▶ CvcBuilder ──▶ DelegationChainVerifier
//!                (normalize)        (request id,     1 structural
//!                                    fingerprint)    2 crypto
//!                                                    3 temporal
//!                                                    4 authority scope
//!                                                    5 revocation
//!                                                    6 key binding
//!                                         │
//!                                         ▼
//!                                  PolicyEvaluator ──▶ 7 anchor integrity
//!                                                             │
//!                                                             ▼
//!                                                   VroBuilder ──▶ signed VRO
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use trustgate_verifier::{Ed25519Signer, Policy, VerificationRequest, Verifier};
//! use serde_json::json;
//!
//! # async fn run() -> trustgate_verifier::Result<()> {
//! let verifier = Verifier::builder(Ed25519Signer::generate("verifier-key-1"))
//!     .policy(Policy::new("default"))
//!     .build()?;
//!
//! let request = VerificationRequest::new(json!("eyJ..."), "default");
//! let signed = verifier.verify(&request).await?;
//! println!("{} {}", signed.vro.decision, signed.token);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod anchor;
pub mod chain;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod cvc;
pub mod error;
pub mod formats;
pub mod mint;
pub mod policy;
pub mod result;
pub mod scope;
pub mod status;
pub mod verifier;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use anchor::{AnchorLedger, AnchorRecord, ChainIntegrity, FileLedger, InMemoryLedger, ProofMetadata};
pub use chain::{chain_fingerprint, DelegationChainVerifier};
pub use clock::{Clock, FixedClock, SystemClock, DETERMINISTIC_TIMESTAMP};
pub use config::VerifierConfig;
pub use crypto::{Ed25519Signer, Jwk, JwkSet, KeySetSource, StaticKeySets};
pub use cvc::{Cvc, CvcBuilder, HolderBinding};
pub use error::{ErrorClass, Result, TrustError};
pub use formats::{AdapterRegistry, DelegationGrant, NormalizedCredential, ParsedLink, ProfileTag};
pub use policy::{Policy, PolicyEvaluator, PolicyStore};
pub use result::{decode_signed_vro, Outcome, SignedVro, Stage, Step, Vro, VroBuilder};
pub use scope::Scope;
pub use status::{HttpStatusSource, InMemoryStatusSource, StatusList, StatusRef, StatusSource};
pub use verifier::{Presentation, VerificationRequest, Verifier, VerifierBuilder, VerifierSettings};

/// Version of the VRO document layout
pub const VRO_VERSION: &str = "1.0";

/// Seconds a signed VRO remains valid after issuance
pub const VRO_LIFETIME_SECONDS: i64 = 3600;

/// Delegation depth allowed when a policy does not set one
pub const DEFAULT_MAX_DELEGATION_DEPTH: usize = 3;
