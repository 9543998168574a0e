//! Canonical Verification Context
//!
//! The CVC is the single format-neutral object every downstream step
//! consumes. It is assembled once per request by [`CvcBuilder`] and never
//! mutated afterwards; all fields are exposed through accessors.

use crate::chain::chain_fingerprint;
use crate::crypto::{canonical_json, sha256_hex};
use crate::error::{Result, TrustError};
use crate::formats::{NormalizedCredential, ParsedLink, ProfileTag, ProofDescriptor};
use crate::policy::Policy;
use crate::status::StatusRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_binding_type() -> String {
    "jws".to_string()
}

/// Holder's proof of possession accompanying a presentation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderBinding {
    /// Binding mechanism (`jws`, `dpop`, a linked-data proof type, ...)
    #[serde(rename = "type", default = "default_binding_type")]
    pub binding_type: String,
    /// Proof value
    pub proof: String,
    /// Key id the holder proved possession of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl HolderBinding {
    /// Create a binding
    pub fn new(binding_type: impl Into<String>, proof: impl Into<String>, kid: Option<String>) -> Self {
        Self {
            binding_type: binding_type.into(),
            proof: proof.into(),
            kid,
        }
    }
}

/// Request-level metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CvcMetadata {
    /// Encoding of the presented credential
    pub profile: ProfileTag,
    /// Request id (caller supplied or derived from the request)
    pub request_id: String,
    /// Clock reading when the request was normalized
    pub received_at: i64,
    /// Fingerprint over the delegation chain; absent for an empty chain
    pub chain_fingerprint: Option<String>,
    /// Canonical size of the request
    pub request_bytes: usize,
}

/// Canonical Verification Context
#[derive(Debug, Clone, PartialEq)]
pub struct Cvc {
    credential: NormalizedCredential,
    proofs: Vec<ProofDescriptor>,
    chain: Vec<ParsedLink>,
    policy: Policy,
    status_refs: Vec<StatusRef>,
    holder_binding: Option<HolderBinding>,
    metadata: CvcMetadata,
}

impl Cvc {
    /// Presented credential in normalized form
    pub fn credential(&self) -> &NormalizedCredential {
        &self.credential
    }

    /// Credential issuer
    pub fn issuer(&self) -> &str {
        &self.credential.issuer
    }

    /// Credential subject; the root delegator
    pub fn subject(&self) -> &str {
        &self.credential.subject
    }

    /// Normalized claims
    pub fn claims(&self) -> &Value {
        &self.credential.claims
    }

    /// Credential types
    pub fn credential_types(&self) -> &[String] {
        &self.credential.credential_types
    }

    /// Every proof descriptor: the credential first, then each parsed link
    pub fn proofs(&self) -> &[ProofDescriptor] {
        &self.proofs
    }

    /// Delegation chain, root first
    pub fn chain(&self) -> &[ParsedLink] {
        &self.chain
    }

    /// Number of links
    pub fn depth(&self) -> usize {
        self.chain.len()
    }

    /// Applicable policy
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Status references in pipeline order
    pub fn status_refs(&self) -> &[StatusRef] {
        &self.status_refs
    }

    /// Holder binding proof
    pub fn holder_binding(&self) -> Option<&HolderBinding> {
        self.holder_binding.as_ref()
    }

    /// Request metadata
    pub fn metadata(&self) -> &CvcMetadata {
        &self.metadata
    }
}

/// Assembles a [`Cvc`]
#[derive(Debug, Default)]
pub struct CvcBuilder {
    request_id: String,
    credential: Option<NormalizedCredential>,
    chain: Vec<ParsedLink>,
    policy: Option<Policy>,
    holder_binding: Option<HolderBinding>,
    received_at: i64,
    request_bytes: usize,
}

impl CvcBuilder {
    /// Start a context for `request_id`
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Default::default()
        }
    }

    /// Presented credential
    pub fn credential(mut self, credential: NormalizedCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Delegation chain, root first
    pub fn chain(mut self, chain: Vec<ParsedLink>) -> Self {
        self.chain = chain;
        self
    }

    /// Applicable policy
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Holder binding proof
    pub fn holder_binding(mut self, holder_binding: Option<HolderBinding>) -> Self {
        self.holder_binding = holder_binding;
        self
    }

    /// Clock reading at normalization
    pub fn received_at(mut self, received_at: i64) -> Self {
        self.received_at = received_at;
        self
    }

    /// Canonical request size
    pub fn request_bytes(mut self, request_bytes: usize) -> Self {
        self.request_bytes = request_bytes;
        self
    }

    /// Finish the context
    pub fn build(self) -> Result<Cvc> {
        let credential = self
            .credential
            .ok_or_else(|| TrustError::Internal("verification context without credential".into()))?;
        let policy = self
            .policy
            .ok_or_else(|| TrustError::Internal("verification context without policy".into()))?;

        let mut proofs = vec![credential.proof.clone()];
        let mut status_refs: Vec<StatusRef> = credential.status.iter().cloned().collect();
        for grant in self.chain.iter().filter_map(ParsedLink::grant) {
            proofs.push(grant.proof.clone());
            status_refs.extend(grant.status.iter().cloned());
        }

        let metadata = CvcMetadata {
            profile: credential.profile,
            request_id: self.request_id,
            received_at: self.received_at,
            chain_fingerprint: chain_fingerprint(&self.chain),
            request_bytes: self.request_bytes,
        };

        Ok(Cvc {
            credential,
            proofs,
            chain: self.chain,
            policy,
            status_refs,
            holder_binding: self.holder_binding,
            metadata,
        })
    }
}

/// Deterministic request id: digest of the canonical request
pub fn derive_request_id<T: Serialize>(request: &T) -> Result<String> {
    let digest = sha256_hex(canonical_json(request)?);
    Ok(format!("req-{}", &digest[..32]))
}
