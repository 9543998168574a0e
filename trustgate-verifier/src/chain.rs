//! Delegation chain verification
//!
//! The presented credential is checked first, then every link root first:
//!
//! ```text
//!   link i:  1 structural ─► 2 cryptographic ─► 3 temporal
//!            ─► 4 authority/scope ─► 5 revocation ─► 6 key binding
//!
//!   chain:   7 integrity (fingerprint, anchor)  after policy accepts
//! ```
//!
//! Steps 1, 2, 3 and 6 only depend on a link and its neighbour, so they are
//! computed for all links concurrently. Results are then recorded in link
//! order and the first failure stops the walk unless diagnostics are on.
//! Step 4 depends on the previous link and step 5 on the status source, so
//! both run during the ordered walk.

use crate::anchor::{AnchorLedger, AnchorProof, ChainIntegrity, ProofMetadata};
use crate::clock::Clock;
use crate::crypto::{check_algorithm, verify_signature, KeyLookup, KeyRef, KeyResolver, KeySource, SignatureCheck};
use crate::cvc::{Cvc, HolderBinding};
use crate::error::{ChainFault, ProofFault, Result, TrustError};
use crate::formats::{digest_id, DelegationGrant, NormalizedCredential, ParsedLink, ProofDescriptor, ProofFormat};
use crate::policy::{DependencyMode, Policy, PolicyEvaluator};
use crate::result::{AnchorSummary, Outcome, Step, Target, Verdict};
use crate::status::{StatusRef, StatusResolver, StatusState};
use futures::future::join_all;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info, warn};

const FINGERPRINT_DOMAIN: &[u8] = b"trustgate/chain-fingerprint/v1";

/// Fingerprint over the ordered chain; `None` for an empty chain
///
/// Each link contributes its id and signature bytes, length prefixed.
/// Malformed links contribute a digest of their raw encoding.
pub fn chain_fingerprint(chain: &[ParsedLink]) -> Option<String> {
    if chain.is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_DOMAIN);
    for link in chain {
        let (id, signature): (String, &[u8]) = match link {
            ParsedLink::Grant(grant) => (grant.id.clone(), &grant.proof.signature),
            ParsedLink::Malformed { raw, .. } => (digest_id(raw), &[]),
        };
        hasher.update((id.len() as u64).to_be_bytes());
        hasher.update(id.as_bytes());
        hasher.update((signature.len() as u64).to_be_bytes());
        hasher.update(signature);
    }
    Some(hex::encode(hasher.finalize()))
}

/// Result of one check before it is recorded
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    /// Passed
    Passed,
    /// Not checked because a dependency was unavailable, or the proof is
    /// structural only; carries the warning
    Skipped(String),
    /// Nothing to check
    NotApplicable,
    /// Failed
    Failed(TrustError),
}

/// Outcome of checking one proof descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum ProofCheck {
    /// Signature verified under a key from `KeySource`
    Verified(KeySource),
    /// Linked-data proof, described but not verified
    StructuralOnly,
    /// Signature did not verify
    Invalid(String),
    /// Declared algorithm rejected
    Algorithm(String),
    /// No key for the reference
    KeyNotFound(String),
    /// Key source could not be consulted
    KeyUnavailable(String),
}

/// Verify one proof against `raw`
pub async fn verify_proof(keys: &KeyResolver, raw: &str, proof: &ProofDescriptor, alg_allowlist: &[String]) -> ProofCheck {
    if proof.format == ProofFormat::LinkedData {
        return ProofCheck::StructuralOnly;
    }
    if !alg_allowlist.iter().any(|a| *a == proof.alg) {
        return ProofCheck::Algorithm(format!(
            "algorithm {} not in allow-list {:?}",
            proof.alg, alg_allowlist
        ));
    }

    let key = match keys.resolve_key(&proof.key_ref).await {
        KeyLookup::Found(key) => key,
        KeyLookup::NotFound(detail) => return ProofCheck::KeyNotFound(detail),
        KeyLookup::Unavailable(detail) => return ProofCheck::KeyUnavailable(detail),
    };
    if let Err(detail) = check_algorithm(&proof.alg, &key, alg_allowlist) {
        return ProofCheck::Algorithm(detail);
    }

    let payload = match proof.signed_bytes(raw) {
        Some(payload) => payload,
        None => return ProofCheck::Invalid("signed range lies outside the token".into()),
    };
    match verify_signature(payload, &proof.signature, Some(&key)) {
        SignatureCheck::Valid => ProofCheck::Verified(key.source),
        SignatureCheck::Invalid => ProofCheck::Invalid(format!(
            "signature does not verify under key '{}'",
            key.kid
        )),
        SignatureCheck::KeyNotFound => ProofCheck::KeyNotFound(key.kid),
    }
}

enum Precheck<'c> {
    Malformed(TrustError),
    Parsed {
        grant: &'c DelegationGrant,
        signature: Check,
        temporal: Check,
        key_binding: Check,
        work: u64,
    },
}

/// Runs steps 1 to 7 over a [`Cvc`]
pub struct DelegationChainVerifier<'a> {
    keys: &'a KeyResolver,
    status: &'a StatusResolver,
    clock: &'a dyn Clock,
    policy: &'a Policy,
    evaluator: PolicyEvaluator,
    diagnostics: bool,
}

impl<'a> DelegationChainVerifier<'a> {
    /// Verifier for one request
    pub fn new(keys: &'a KeyResolver, status: &'a StatusResolver, clock: &'a dyn Clock, policy: &'a Policy) -> Self {
        Self {
            keys,
            status,
            clock,
            policy,
            evaluator: PolicyEvaluator,
            diagnostics: false,
        }
    }

    /// Keep evaluating after the first failure
    pub fn with_diagnostics(mut self, diagnostics: bool) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Record `check`; returns true when the walk must stop
    fn apply(&self, verdict: &mut Verdict, target: Target, step: Step, check: Check) -> bool {
        match check {
            Check::Passed => verdict.record(target, step, Outcome::Passed, None),
            Check::NotApplicable => verdict.record(target, step, Outcome::NotApplicable, None),
            Check::Skipped(warning) => verdict.skip(target, step, warning),
            Check::Failed(err) => {
                debug!(?target, ?step, error = %err, "step failed");
                verdict.fail(target, step, &err);
                return !self.diagnostics;
            }
        }
        false
    }

    fn dependency_check(&self, dependency: &str, detail: &str, closed: TrustError) -> Check {
        match self.evaluator.on_dependency_failure(self.policy, dependency, detail) {
            DependencyMode::FailClosed => Check::Failed(closed),
            DependencyMode::FailOpen => Check::Skipped(format!("{} unavailable: {}", dependency, detail)),
        }
    }

    /// Step 3 for any validity window, with policy skew on both ends
    pub fn check_temporal(&self, not_before: Option<i64>, expires_at: Option<i64>) -> std::result::Result<(), String> {
        let now = self.clock.now();
        let skew = self.policy.clock_skew_seconds;
        if let Some(nbf) = not_before {
            if now < nbf.saturating_sub(skew) {
                return Err(format!("not valid before {} (now {})", nbf, now));
            }
        }
        if let Some(exp) = expires_at {
            if now > exp.saturating_add(skew) {
                return Err(format!("expired at {} (now {})", exp, now));
            }
        }
        Ok(())
    }

    /// Step 5 for any status reference; returns the check and the lookups made
    pub async fn check_status<F>(&self, status: Option<&StatusRef>, revoked: F) -> (Check, u64)
    where
        F: Fn(String) -> TrustError,
    {
        let status = match status {
            Some(status) => status,
            None => return (Check::NotApplicable, 0),
        };
        let resolution = self.status.resolve_status(status).await;
        let check = match resolution.state {
            StatusState::Active => Check::Passed,
            StatusState::Revoked => Check::Failed(revoked(format!(
                "revoked in {} at index {}",
                status.url, status.index
            ))),
            StatusState::Unknown => {
                let reason = resolution.reason.unwrap_or_else(|| "unknown".into());
                let detail = format!("status of {}#{}: {}", status.url, status.index, reason);
                self.dependency_check("status", &detail, revoked(format!("status unresolvable: {}", reason)))
            }
        };
        (check, 1)
    }

    fn credential_signature(&self, credential: &NormalizedCredential, result: ProofCheck) -> Check {
        let fault = |kind: ProofFault, detail: String| Check::Failed(TrustError::proof(kind, detail));
        match result {
            ProofCheck::Verified(KeySource::Own) => Check::Passed,
            ProofCheck::Verified(KeySource::IssuerFallback) => Check::Skipped(format!(
                "credential key for {} resolved through issuer fallback",
                credential.issuer
            )),
            ProofCheck::StructuralOnly => Check::Skipped(format!(
                "{} proof normalized structurally, not cryptographically verified",
                credential.profile
            )),
            ProofCheck::Invalid(detail) => fault(ProofFault::Signature, detail),
            ProofCheck::Algorithm(detail) => fault(ProofFault::Algorithm, detail),
            ProofCheck::KeyNotFound(detail) => fault(ProofFault::KeyNotFound, detail),
            ProofCheck::KeyUnavailable(detail) => self.dependency_check(
                "key source",
                &detail,
                TrustError::proof(ProofFault::KeyNotFound, format!("key source unavailable: {}", detail)),
            ),
        }
    }

    /// Steps 1, 2, 3 and 5 for the presented credential
    pub async fn verify_credential(&self, cvc: &Cvc, verdict: &mut Verdict) {
        let credential = cvc.credential();
        let target = Target::Credential;
        verdict.record(target, Step::Structural, Outcome::Passed, None);

        let proof = verify_proof(self.keys, &credential.raw, &credential.proof, &self.policy.alg_allowlist).await;
        if credential.proof.format == ProofFormat::Jws {
            verdict.add_work(1);
        }
        let signature = self.credential_signature(credential, proof);
        if self.apply(verdict, target, Step::Cryptographic, signature) {
            return;
        }

        let temporal = match self.check_temporal(credential.not_before, credential.expires_at) {
            Ok(()) => Check::Passed,
            Err(detail) => Check::Failed(TrustError::proof(ProofFault::Expired, detail)),
        };
        if self.apply(verdict, target, Step::Temporal, temporal) {
            return;
        }

        let (revocation, work) = self
            .check_status(credential.status.as_ref(), |detail| {
                TrustError::proof(ProofFault::Revoked, detail)
            })
            .await;
        verdict.add_work(work);
        self.apply(verdict, target, Step::Revocation, revocation);
    }

    fn link_signature(&self, grant: &DelegationGrant, position: usize, result: ProofCheck) -> Check {
        let fault = |detail: String| Check::Failed(TrustError::chain(ChainFault::Signature, position, detail));
        match result {
            ProofCheck::Verified(KeySource::Own) => Check::Passed,
            ProofCheck::Verified(KeySource::IssuerFallback) => Check::Skipped(format!(
                "link {} key for {} resolved through issuer fallback",
                position, grant.delegator
            )),
            ProofCheck::StructuralOnly => Check::Skipped(format!(
                "link {} {} proof normalized structurally, not cryptographically verified",
                position, grant.profile
            )),
            ProofCheck::Invalid(detail) | ProofCheck::Algorithm(detail) | ProofCheck::KeyNotFound(detail) => {
                fault(detail)
            }
            ProofCheck::KeyUnavailable(detail) => self.dependency_check(
                "key source",
                &detail,
                TrustError::chain(ChainFault::Signature, position, format!("key source unavailable: {}", detail)),
            ),
        }
    }

    /// Step 4: delegator continuity and scope containment
    pub fn check_authority(&self, cvc: &Cvc, index: usize, grant: &DelegationGrant) -> Check {
        let position = index + 1;
        let (expected, parent_scope) = if index == 0 {
            (cvc.subject(), cvc.credential().scope.as_ref())
        } else {
            match cvc.chain().get(index - 1).and_then(ParsedLink::grant) {
                Some(parent) => (parent.delegate.as_str(), Some(&parent.scope)),
                None => return Check::NotApplicable,
            }
        };

        if grant.delegator != expected {
            return Check::Failed(TrustError::ScopeViolation {
                link: position,
                detail: format!(
                    "delegator {} does not hold the authority of {}",
                    grant.delegator, expected
                ),
            });
        }
        match parent_scope.map(|parent| parent.contains(&grant.scope)) {
            Some(Err(detail)) => Check::Failed(TrustError::ScopeViolation { link: position, detail }),
            _ => Check::Passed,
        }
    }

    /// Step 6: the key bound by a link must be the key the next presenter uses
    ///
    /// For intermediate links the next presenter is the signer of the next
    /// link; for the leaf it is the holder. Without a holder key id the
    /// bound key must at least be published by the delegate.
    pub async fn check_key_binding(
        &self,
        cvc: &Cvc,
        index: usize,
        grant: &DelegationGrant,
        holder: Option<&HolderBinding>,
    ) -> (Check, u64) {
        let position = index + 1;
        let bound = match grant.key_binding.as_deref() {
            Some(bound) => bound,
            None => return (Check::NotApplicable, 0),
        };
        let mismatch = |detail: String| Check::Failed(TrustError::chain(ChainFault::KeyBinding, position, detail));

        if let Some(next) = cvc.chain().get(index + 1) {
            let next = match next.grant() {
                Some(next) => next,
                None => return (Check::NotApplicable, 0),
            };
            let check = match next.proof.key_ref.kid.as_deref() {
                Some(kid) if kid == bound => Check::Passed,
                Some(kid) => mismatch(format!(
                    "bound to key '{}' but link {} is signed with '{}'",
                    bound,
                    position + 1,
                    kid
                )),
                None => mismatch(format!("bound to key '{}' but link {} has no key id", bound, position + 1)),
            };
            return (check, 0);
        }

        if let Some(kid) = holder.and_then(|h| h.kid.as_deref()) {
            let check = if kid == bound {
                Check::Passed
            } else {
                mismatch(format!("bound to key '{}' but holder presented '{}'", bound, kid))
            };
            return (check, 0);
        }

        let key_ref = KeyRef {
            owner: grant.delegate.clone(),
            kid: Some(bound.to_string()),
        };
        let check = match self.keys.resolve_key(&key_ref).await {
            KeyLookup::Found(key) if key.source == KeySource::Own => Check::Passed,
            KeyLookup::Found(_) => Check::Skipped(format!(
                "link {} bound key '{}' found only through issuer fallback",
                position, bound
            )),
            KeyLookup::NotFound(detail) => mismatch(format!("bound key not published by delegate: {}", detail)),
            KeyLookup::Unavailable(detail) => self.dependency_check(
                "key source",
                &detail,
                TrustError::chain(ChainFault::KeyBinding, position, format!("key source unavailable: {}", detail)),
            ),
        };
        (check, 1)
    }

    async fn precheck<'c>(&self, cvc: &'c Cvc, index: usize) -> Precheck<'c> {
        let position = index + 1;
        let link = &cvc.chain()[index];
        let grant = match link {
            ParsedLink::Grant(grant) => grant.as_ref(),
            ParsedLink::Malformed { reason, .. } => {
                return Precheck::Malformed(TrustError::chain(ChainFault::Structural, position, reason.clone()))
            }
        };

        let mut work = 0;
        let proof = verify_proof(self.keys, &grant.raw, &grant.proof, &self.policy.alg_allowlist).await;
        if grant.proof.format == ProofFormat::Jws {
            work += 1;
        }
        let signature = self.link_signature(grant, position, proof);

        let temporal = match self.check_temporal(Some(grant.not_before), Some(grant.expires_at)) {
            Ok(()) => Check::Passed,
            Err(detail) => Check::Failed(TrustError::chain(ChainFault::Expired, position, detail)),
        };

        let (key_binding, lookups) = self
            .check_key_binding(cvc, index, grant, cvc.holder_binding())
            .await;
        work += lookups;

        Precheck::Parsed {
            grant,
            signature,
            temporal,
            key_binding,
            work,
        }
    }

    /// Steps 1 to 6 over every link
    pub async fn verify_links(&self, cvc: &Cvc, verdict: &mut Verdict) {
        let chain = cvc.chain();
        if chain.is_empty() {
            verdict.record(Target::Request, Step::AuthorityScope, Outcome::NotApplicable, None);
            verdict.record(Target::Request, Step::KeyBinding, Outcome::NotApplicable, None);
            return;
        }
        if chain.len() > self.policy.max_delegation_depth {
            let err = TrustError::Chain {
                kind: ChainFault::Depth,
                link: None,
                detail: format!(
                    "chain depth {} exceeds maximum {}",
                    chain.len(),
                    self.policy.max_delegation_depth
                ),
            };
            verdict.fail(Target::Request, Step::Structural, &err);
            return;
        }

        let prechecks = join_all((0..chain.len()).map(|index| self.precheck(cvc, index))).await;

        for (index, precheck) in prechecks.into_iter().enumerate() {
            let position = index + 1;
            let target = Target::Link(position);

            let (grant, signature, temporal, key_binding) = match precheck {
                Precheck::Malformed(err) => {
                    if self.apply(verdict, target, Step::Structural, Check::Failed(err)) {
                        return;
                    }
                    continue;
                }
                Precheck::Parsed {
                    grant,
                    signature,
                    temporal,
                    key_binding,
                    work,
                } => {
                    verdict.add_work(work);
                    (grant, signature, temporal, key_binding)
                }
            };

            verdict.record(target, Step::Structural, Outcome::Passed, None);
            if !grant.proof_fully_verified {
                verdict.proof_fully_verified = false;
            }
            if self.apply(verdict, target, Step::Cryptographic, signature) {
                return;
            }
            if self.apply(verdict, target, Step::Temporal, temporal) {
                return;
            }
            let authority = self.check_authority(cvc, index, grant);
            if self.apply(verdict, target, Step::AuthorityScope, authority) {
                return;
            }
            let (revocation, lookups) = self
                .check_status(grant.status.as_ref(), |detail| {
                    TrustError::chain(ChainFault::Revoked, position, detail)
                })
                .await;
            verdict.add_work(lookups);
            if self.apply(verdict, target, Step::Revocation, revocation) {
                return;
            }
            if self.apply(verdict, target, Step::KeyBinding, key_binding) {
                return;
            }
        }
    }

    async fn anchor(
        &self,
        ledger: &dyn AnchorLedger,
        fingerprint: &str,
        depth: usize,
        timeout: Duration,
        verdict: &mut Verdict,
    ) -> Result<(AnchorProof, ChainIntegrity)> {
        verdict.add_work(1);
        let proof = match tokio::time::timeout(timeout, ledger.get(fingerprint)).await?? {
            Some(proof) => proof,
            None => {
                verdict.add_work(1);
                let metadata = ProofMetadata::hash_chain(self.policy.id.clone(), depth);
                tokio::time::timeout(timeout, ledger.put(fingerprint, metadata, self.clock.now())).await??
            }
        };
        verdict.add_work(1);
        let integrity = tokio::time::timeout(timeout, ledger.verify_chain(&proof)).await??;
        Ok((proof, integrity))
    }

    /// Step 7: fingerprint stability and, when required, anchoring
    ///
    /// Only called once every other step and the policy have accepted.
    pub async fn check_integrity(
        &self,
        cvc: &Cvc,
        ledger: Option<&dyn AnchorLedger>,
        timeout: Duration,
        verdict: &mut Verdict,
    ) {
        let target = Target::Request;
        let expected = match cvc.metadata().chain_fingerprint.as_deref() {
            Some(fingerprint) => fingerprint,
            None => {
                verdict.record(target, Step::ChainIntegrity, Outcome::NotApplicable, None);
                return;
            }
        };
        if chain_fingerprint(cvc.chain()).as_deref() != Some(expected) {
            let err = TrustError::Chain {
                kind: ChainFault::Anchor,
                link: None,
                detail: "chain fingerprint is not reproducible".into(),
            };
            verdict.fail(target, Step::ChainIntegrity, &err);
            return;
        }
        if !self.policy.require_anchor {
            verdict.record(target, Step::ChainIntegrity, Outcome::Passed, None);
            return;
        }

        let ledger = match ledger {
            Some(ledger) => ledger,
            None => {
                let err = self.evaluator.anchor_unavailable(self.policy, "no ledger configured");
                verdict.fail(target, Step::ChainIntegrity, &err);
                return;
            }
        };

        match self.anchor(ledger, expected, cvc.depth(), timeout, verdict).await {
            Ok((proof, ChainIntegrity::Valid)) => {
                info!(
                    fingerprint = %expected,
                    sequence = proof.sequence,
                    "delegation chain anchored"
                );
                verdict.anchor = Some(AnchorSummary {
                    sequence: proof.sequence,
                    record_hash: proof.record_hash,
                    previous_hash: proof.previous_hash,
                    anchored_at: proof.timestamp,
                });
                verdict.record(target, Step::ChainIntegrity, Outcome::Passed, None);
            }
            Ok((_, ChainIntegrity::Broken { sequence, reason })) => {
                let err = TrustError::Chain {
                    kind: ChainFault::Anchor,
                    link: None,
                    detail: format!("ledger integrity broken at record {}: {}", sequence, reason),
                };
                verdict.fail(target, Step::ChainIntegrity, &err);
            }
            Err(e) => {
                warn!(fingerprint = %expected, error = %e, "anchor ledger unavailable");
                let err = self.evaluator.anchor_unavailable(self.policy, e.to_string());
                verdict.fail(target, Step::ChainIntegrity, &err);
            }
        }
    }
}
