//! Verification policy and evaluator
//!
//! Every policy-governed branch of the pipeline reads one explicit field of
//! [`Policy`]. The evaluator is also the single place that decides whether an
//! unavailable dependency (status source, key source, ledger) fails the
//! request or degrades to a logged warning.

use crate::cvc::Cvc;
use crate::error::{ErrorClass, Result, TrustError};
use crate::result::{Failure, Stage, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;
use validator::Validate;

fn default_true() -> bool {
    true
}

fn default_max_delegation_depth() -> usize {
    crate::DEFAULT_MAX_DELEGATION_DEPTH
}

fn default_clock_skew_seconds() -> i64 {
    5
}

fn default_alg_allowlist() -> Vec<String> {
    vec!["EdDSA".to_string()]
}

/// How to classify a required anchor that cannot be written or read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorUnavailable {
    /// Reject as a policy failure
    #[default]
    PolicyError,
    /// Reject as an internal failure
    InternalError,
}

/// Verification policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Policy {
    /// Policy identifier referenced by requests
    #[validate(length(min = 1))]
    pub id: String,

    /// Unresolvable status (or keys) fail the request when true
    #[serde(default = "default_true")]
    pub status_required: bool,

    /// Chain fingerprint must be anchored
    #[serde(default)]
    pub require_anchor: bool,

    /// Classification when anchoring is required but the ledger fails
    #[serde(default)]
    pub anchor_unavailable: AnchorUnavailable,

    /// Longest accepted delegation chain
    #[serde(default = "default_max_delegation_depth")]
    #[validate(range(max = 10))]
    pub max_delegation_depth: usize,

    /// Tolerance applied to both ends of every validity window
    #[serde(default = "default_clock_skew_seconds")]
    #[validate(range(min = 0, max = 300))]
    pub clock_skew_seconds: i64,

    /// Accepted JWS algorithms
    #[serde(default = "default_alg_allowlist")]
    #[validate(length(min = 1))]
    pub alg_allowlist: Vec<String>,

    /// Accepted credential issuers; empty accepts any
    #[serde(default)]
    pub issuer_allowlist: Vec<String>,

    /// Credential types that must all be present
    #[serde(default)]
    pub required_credential_types: Vec<String>,

    /// `credentialSubject` claims that must be present
    #[serde(default)]
    pub required_claims: Vec<String>,

    /// Reject credentials and grants whose proofs are only structurally checked
    #[serde(default)]
    pub require_full_proof: bool,

    /// Resolve grant keys through the issuer key set when the signer
    /// publishes none
    #[serde(default)]
    pub allow_issuer_key_fallback: bool,

    /// A holder binding proof must accompany the presentation
    #[serde(default = "default_true")]
    pub holder_binding_required: bool,
}

impl Policy {
    /// Policy with every default
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status_required: default_true(),
            require_anchor: false,
            anchor_unavailable: AnchorUnavailable::default(),
            max_delegation_depth: default_max_delegation_depth(),
            clock_skew_seconds: default_clock_skew_seconds(),
            alg_allowlist: default_alg_allowlist(),
            issuer_allowlist: Vec::new(),
            required_credential_types: Vec::new(),
            required_claims: Vec::new(),
            require_full_proof: false,
            allow_issuer_key_fallback: false,
            holder_binding_required: default_true(),
        }
    }

    /// Validate field ranges
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| TrustError::Config(format!("policy '{}' invalid: {}", self.id, e)))
    }
}

/// Policies addressable by id
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    policies: BTreeMap<String, Policy>,
}

impl PolicyStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a policy
    pub fn insert(&mut self, policy: Policy) -> Result<()> {
        policy.check()?;
        self.policies.insert(policy.id.clone(), policy);
        Ok(())
    }

    /// Look up a policy; unknown ids are a policy error
    pub fn get(&self, id: &str) -> Result<&Policy> {
        self.policies
            .get(id)
            .ok_or_else(|| TrustError::Policy(format!("unknown policy '{}'", id)))
    }

    /// Policy ids
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }
}

/// What to do when a dependency cannot answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyMode {
    /// Treat as a verification failure
    FailClosed,
    /// Record a warning and continue
    FailOpen,
}

/// Outcome of policy evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Request satisfies the policy
    Accept,
    /// Request rejected
    Reject(Failure),
}

/// Applies a [`Policy`] to a verdict
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    /// Decide whether an unavailable dependency is fatal
    pub fn on_dependency_failure(&self, policy: &Policy, dependency: &str, detail: &str) -> DependencyMode {
        if policy.status_required {
            DependencyMode::FailClosed
        } else {
            warn!(
                policy = %policy.id,
                dependency,
                detail,
                "dependency unavailable, continuing fail-open"
            );
            DependencyMode::FailOpen
        }
    }

    /// Error for a required anchor that could not be produced
    pub fn anchor_unavailable(&self, policy: &Policy, detail: impl Into<String>) -> TrustError {
        let detail = format!("anchoring required but ledger unavailable: {}", detail.into());
        match policy.anchor_unavailable {
            AnchorUnavailable::PolicyError => TrustError::Policy(detail),
            AnchorUnavailable::InternalError => TrustError::Ledger(detail),
        }
    }

    /// Apply issuer, claim, proof-strength and holder-binding rules
    pub fn check_rules(&self, cvc: &Cvc, verdict: &Verdict, policy: &Policy) -> Result<()> {
        if !policy.issuer_allowlist.is_empty()
            && !policy.issuer_allowlist.iter().any(|i| i == cvc.issuer())
        {
            return Err(TrustError::Policy(format!(
                "issuer '{}' not in allow-list",
                cvc.issuer()
            )));
        }

        for required in &policy.required_credential_types {
            if !cvc.credential_types().iter().any(|t| t == required) {
                return Err(TrustError::Policy(format!(
                    "credential type '{}' required",
                    required
                )));
            }
        }

        let subject_claims = cvc.claims().get("credentialSubject");
        for claim in &policy.required_claims {
            if subject_claims.and_then(|c| c.get(claim)).is_none() {
                return Err(TrustError::Policy(format!("claim '{}' required", claim)));
            }
        }

        if policy.require_full_proof && !verdict.proof_fully_verified {
            return Err(TrustError::Policy(
                "policy requires fully verified proofs".into(),
            ));
        }

        if policy.holder_binding_required {
            let bound = cvc
                .holder_binding()
                .map_or(false, |hb| !hb.proof.trim().is_empty());
            if !bound {
                return Err(TrustError::Policy(
                    "holder binding proof required".into(),
                ));
            }
        }

        Ok(())
    }

    /// Combine the verdict so far with the policy rules
    pub fn evaluate(&self, cvc: &Cvc, verdict: &Verdict, policy: &Policy) -> Decision {
        if let Some(failure) = verdict.first_failure() {
            return Decision::Reject(failure.clone());
        }
        match self.check_rules(cvc, verdict, policy) {
            Ok(()) => Decision::Accept,
            Err(e) => Decision::Reject(Failure::from_error(&e, Stage::Policy, None)),
        }
    }
}
