//! Verification pipeline orchestration
//!
//! [`Verifier::verify`] runs: policy lookup, normalization into a
//! [`Cvc`](crate::cvc::Cvc), credential checks, chain steps 1 to 6, policy evaluation,
//! step 7 and finally result signing. Every rejection still produces a
//! signed [`Vro`]; the only `Err` is a failure to sign.

use crate::anchor::AnchorLedger;
use crate::chain::DelegationChainVerifier;
use crate::clock::{Clock, SystemClock};
use crate::crypto::{canonical_json, Ed25519Signer, JwkSet, KeyResolver, KeySetSource, StaticKeySets};
use crate::cvc::{derive_request_id, CvcBuilder, HolderBinding};
use crate::error::{Result, TrustError};
use crate::formats::{unwrap_vp_token, AdapterRegistry, ProfileTag};
use crate::policy::{Decision, Policy, PolicyEvaluator, PolicyStore};
use crate::result::{Failure, SignedVro, Stage, Telemetry, Verdict, Vro, VroBuilder};
use crate::status::{InMemoryStatusSource, StatusResolver, StatusSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Presented credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presentation {
    /// Declared encoding; detected when absent
    #[serde(default, alias = "format", skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileTag>,
    /// VC-JWT string or VC-LD document
    pub payload: Value,
}

/// One verification request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    /// Presented credential
    pub presentation: Presentation,
    /// Delegation grants, root first
    #[serde(default)]
    pub delegation_chain: Vec<Value>,
    /// Policy to apply
    pub policy_id: String,
    /// Holder's proof of possession
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_binding: Option<HolderBinding>,
    /// Caller supplied id; derived from the request when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl VerificationRequest {
    /// Request for `payload` under `policy_id`
    pub fn new(payload: Value, policy_id: impl Into<String>) -> Self {
        Self {
            presentation: Presentation {
                profile: None,
                payload,
            },
            delegation_chain: Vec::new(),
            policy_id: policy_id.into(),
            holder_binding: None,
            request_id: None,
        }
    }

    /// Declare the credential encoding
    pub fn with_profile(mut self, profile: ProfileTag) -> Self {
        self.presentation.profile = Some(profile);
        self
    }

    /// Attach a delegation chain
    pub fn with_chain(mut self, chain: Vec<Value>) -> Self {
        self.delegation_chain = chain;
        self
    }

    /// Attach a holder binding
    pub fn with_holder_binding(mut self, holder_binding: HolderBinding) -> Self {
        self.holder_binding = Some(holder_binding);
        self
    }

    /// Set the request id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Request from an OIDC4VP `vp_token` (or authorization response)
    pub fn from_vp_token(vp_token: &Value, policy_id: impl Into<String>) -> Result<Self> {
        let envelope = unwrap_vp_token(vp_token)?;
        Ok(Self {
            presentation: Presentation {
                profile: None,
                payload: envelope.presentation,
            },
            delegation_chain: envelope.delegation_chain,
            policy_id: policy_id.into(),
            holder_binding: envelope.holder_binding,
            request_id: None,
        })
    }
}

/// Runtime switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierSettings {
    /// Keep evaluating after the first failure
    pub diagnostics: bool,
    /// Deadline for one status document fetch
    pub status_timeout: Duration,
    /// Deadline for one ledger operation
    pub ledger_timeout: Duration,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            diagnostics: false,
            status_timeout: Duration::from_secs(2),
            ledger_timeout: Duration::from_secs(2),
        }
    }
}

/// The verification pipeline
pub struct Verifier {
    adapters: AdapterRegistry,
    policies: PolicyStore,
    key_sets: Arc<dyn KeySetSource>,
    status_source: Arc<dyn StatusSource>,
    ledger: Option<Arc<dyn AnchorLedger>>,
    signer: Ed25519Signer,
    clock: Arc<dyn Clock>,
    settings: VerifierSettings,
}

impl Verifier {
    /// Start building a verifier that signs results with `signer`
    pub fn builder(signer: Ed25519Signer) -> VerifierBuilder {
        VerifierBuilder::new(signer)
    }

    /// Keys relying parties use to check signed results
    pub fn result_keys(&self) -> JwkSet {
        self.signer.jwks()
    }

    /// Configured policies
    pub fn policies(&self) -> &PolicyStore {
        &self.policies
    }

    /// Verify and sign
    pub async fn verify(&self, request: &VerificationRequest) -> Result<SignedVro> {
        self.evaluate(request).await.sign(&self.signer)
    }

    /// Verify an OIDC4VP `vp_token` and sign
    pub async fn verify_vp_token(&self, vp_token: &Value, policy_id: &str) -> Result<SignedVro> {
        match VerificationRequest::from_vp_token(vp_token, policy_id) {
            Ok(request) => self.verify(&request).await,
            Err(e) => {
                let request_id = derive_request_id(vp_token)?;
                let telemetry = Telemetry {
                    request_bytes: canonical_json(vp_token).map(|b| b.len()).unwrap_or_default(),
                    ..Telemetry::default()
                };
                self.reject(request_id, Some(policy_id.to_string()), &e, telemetry, self.clock.monotonic_micros())
                    .sign(&self.signer)
            }
        }
    }

    fn reject(&self, request_id: String, policy_id: Option<String>, err: &TrustError, mut telemetry: Telemetry, started: u64) -> Vro {
        telemetry.total_micros = self.clock.monotonic_micros().saturating_sub(started);
        info!(
            request_id = %request_id,
            class = %err.class(),
            error = %err,
            "request rejected before verification"
        );
        VroBuilder.rejected(request_id, policy_id, err, self.clock.as_ref(), telemetry)
    }

    fn key_resolver(&self, policy: &Policy, issuer: &str) -> KeyResolver {
        let resolver = KeyResolver::new(self.key_sets.clone());
        if policy.allow_issuer_key_fallback {
            resolver.with_issuer_fallback(issuer)
        } else {
            resolver
        }
    }

    /// Run the pipeline without signing
    pub async fn evaluate(&self, request: &VerificationRequest) -> Vro {
        let started = self.clock.monotonic_micros();
        let request_id = match &request.request_id {
            Some(id) => id.clone(),
            None => derive_request_id(request).unwrap_or_else(|_| "req-unidentified".to_string()),
        };
        let mut telemetry = Telemetry {
            request_bytes: canonical_json(request).map(|b| b.len()).unwrap_or_default(),
            chain_depth: request.delegation_chain.len(),
            ..Telemetry::default()
        };
        debug!(
            request_id = %request_id,
            policy = %request.policy_id,
            depth = telemetry.chain_depth,
            "verification request received"
        );

        let policy = match self.policies.get(&request.policy_id) {
            Ok(policy) => policy.clone(),
            Err(e) => return self.reject(request_id, Some(request.policy_id.clone()), &e, telemetry, started),
        };
        let credential = match self
            .adapters
            .normalize_credential(&request.presentation.payload, request.presentation.profile)
        {
            Ok(credential) => credential,
            Err(e) => return self.reject(request_id, Some(policy.id.clone()), &e, telemetry, started),
        };
        let chain = request
            .delegation_chain
            .iter()
            .map(|raw| self.adapters.parse_link(raw))
            .collect();
        let cvc = match CvcBuilder::new(request_id.clone())
            .credential(credential)
            .chain(chain)
            .policy(policy)
            .holder_binding(request.holder_binding.clone())
            .received_at(self.clock.now())
            .request_bytes(telemetry.request_bytes)
            .build()
        {
            Ok(cvc) => cvc,
            Err(e) => return self.reject(request_id, Some(request.policy_id.clone()), &e, telemetry, started),
        };
        let normalized = self.clock.monotonic_micros();
        telemetry.normalize_micros = normalized.saturating_sub(started);

        let policy = cvc.policy();
        let keys = self.key_resolver(policy, cvc.issuer());
        let status = StatusResolver::new(self.status_source.clone(), self.settings.status_timeout);
        let chain_verifier = DelegationChainVerifier::new(&keys, &status, self.clock.as_ref(), policy)
            .with_diagnostics(self.settings.diagnostics);

        let mut verdict = Verdict::new(cvc.credential().proof_fully_verified);
        chain_verifier.verify_credential(&cvc, &mut verdict).await;
        if !verdict.is_failed() || self.settings.diagnostics {
            chain_verifier.verify_links(&cvc, &mut verdict).await;
        }
        telemetry.verify_micros = self.clock.monotonic_micros().saturating_sub(normalized);

        let evaluator = PolicyEvaluator;
        if verdict.is_failed() {
            if self.settings.diagnostics {
                if let Err(e) = evaluator.check_rules(&cvc, &verdict, policy) {
                    verdict.reject(Failure::from_error(&e, Stage::Policy, None));
                }
            }
        } else if let Decision::Reject(failure) = evaluator.evaluate(&cvc, &verdict, policy) {
            verdict.reject(failure);
        }

        if !verdict.is_failed() {
            chain_verifier
                .check_integrity(&cvc, self.ledger.as_deref(), self.settings.ledger_timeout, &mut verdict)
                .await;
        }

        for warning in &verdict.warnings {
            warn!(request_id = %request_id, "{}", warning);
        }
        telemetry.work_units = verdict.work_units;
        telemetry.total_micros = self.clock.monotonic_micros().saturating_sub(started);

        let vro = VroBuilder.build(&cvc, &verdict, self.clock.as_ref(), telemetry);
        info!(
            request_id = %vro.request_id,
            decision = %vro.decision,
            depth = vro.chain_depth,
            work_units = vro.telemetry.work_units,
            failure = ?vro.failure.as_ref().map(|f| f.code.as_str()),
            "verification complete"
        );
        vro
    }
}

/// Builder for [`Verifier`]
pub struct VerifierBuilder {
    adapters: AdapterRegistry,
    policies: Vec<Policy>,
    key_sets: Arc<dyn KeySetSource>,
    status_source: Arc<dyn StatusSource>,
    ledger: Option<Arc<dyn AnchorLedger>>,
    signer: Ed25519Signer,
    clock: Arc<dyn Clock>,
    settings: VerifierSettings,
}

impl VerifierBuilder {
    /// Builder with standard adapters, no keys, no status documents, no
    /// ledger and the system clock
    pub fn new(signer: Ed25519Signer) -> Self {
        Self {
            adapters: AdapterRegistry::standard(),
            policies: Vec::new(),
            key_sets: Arc::new(StaticKeySets::new()),
            status_source: Arc::new(InMemoryStatusSource::new()),
            ledger: None,
            signer,
            clock: Arc::new(SystemClock::new()),
            settings: VerifierSettings::default(),
        }
    }

    /// Replace the adapter registry
    pub fn adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    /// Add a policy
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Published key sets
    pub fn key_sets(mut self, key_sets: Arc<dyn KeySetSource>) -> Self {
        self.key_sets = key_sets;
        self
    }

    /// Status documents
    pub fn status_source(mut self, status_source: Arc<dyn StatusSource>) -> Self {
        self.status_source = status_source;
        self
    }

    /// Anchor ledger
    pub fn ledger(mut self, ledger: Arc<dyn AnchorLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Time source
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Runtime switches
    pub fn settings(mut self, settings: VerifierSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Validate policies and finish
    pub fn build(self) -> Result<Verifier> {
        let mut policies = PolicyStore::new();
        for policy in self.policies {
            policies.insert(policy)?;
        }
        if policies.ids().next().is_none() {
            return Err(TrustError::Config("verifier has no policies".into()));
        }
        Ok(Verifier {
            adapters: self.adapters,
            policies,
            key_sets: self.key_sets,
            status_source: self.status_source,
            ledger: self.ledger,
            signer: self.signer,
            clock: self.clock,
            settings: self.settings,
        })
    }
}
