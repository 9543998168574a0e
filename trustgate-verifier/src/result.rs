//! Verdicts and Verification Result Objects
//!
//! A [`Verdict`] accumulates step outcomes while the pipeline runs. Once the
//! pipeline finishes, [`VroBuilder`] folds the verdict and the CVC into a
//! [`Vro`]; signing it yields a compact JWS with `typ: vro+jwt`.

use crate::clock::Clock;
use crate::crypto::{
    canonical_json, check_algorithm, verify_signature, CompactJws, Ed25519Signer, JwkSet, KeySource,
    ResolvedKey, SignatureCheck, EDDSA,
};
use crate::cvc::Cvc;
use crate::error::{ErrorClass, ProofFault, Result, TrustError};
use crate::formats::ProfileTag;
use crate::{VRO_LIFETIME_SECONDS, VRO_VERSION};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// JWS `typ` of a signed VRO
pub const VRO_TYP: &str = "vro+jwt";

/// Pipeline step, numbered 1 to 7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// 1: well-formed, required fields present
    Structural,
    /// 2: proof verifies under the resolved key
    Cryptographic,
    /// 3: within the validity window
    Temporal,
    /// 4: delegator continuity and scope containment
    AuthorityScope,
    /// 5: not revoked
    Revocation,
    /// 6: key binding matches the next presenter
    KeyBinding,
    /// 7: fingerprint stable and anchored when required
    ChainIntegrity,
}

impl Step {
    /// All steps in order
    pub const ALL: [Step; 7] = [
        Step::Structural,
        Step::Cryptographic,
        Step::Temporal,
        Step::AuthorityScope,
        Step::Revocation,
        Step::KeyBinding,
        Step::ChainIntegrity,
    ];

    /// Step number
    pub fn number(&self) -> u8 {
        match self {
            Step::Structural => 1,
            Step::Cryptographic => 2,
            Step::Temporal => 3,
            Step::AuthorityScope => 4,
            Step::Revocation => 5,
            Step::KeyBinding => 6,
            Step::ChainIntegrity => 7,
        }
    }
}

/// Outcome of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Check ran and passed
    Passed,
    /// Check ran and failed
    Failed,
    /// Dependency unavailable and policy allowed continuing
    Skipped,
    /// Nothing to check
    NotApplicable,
    /// Pipeline stopped before this check
    NotEvaluated,
}

impl Outcome {
    fn severity(&self) -> u8 {
        match self {
            Outcome::NotEvaluated => 0,
            Outcome::NotApplicable => 1,
            Outcome::Passed => 2,
            Outcome::Skipped => 3,
            Outcome::Failed => 4,
        }
    }

    /// Aggregate two outcomes for the same invariant
    pub fn merge(self, other: Outcome) -> Outcome {
        match self.severity().cmp(&other.severity()) {
            Ordering::Less => other,
            _ => self,
        }
    }
}

/// What a step record is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// The presented credential
    Credential,
    /// A delegation link (1-based, root first)
    Link(usize),
    /// The request as a whole
    Request,
}

/// One recorded step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Subject of the check
    pub target: Target,
    /// Step
    pub step: Step,
    /// Outcome
    pub outcome: Outcome,
    /// Detail for failed or skipped steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Pipeline stage at which a request was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Before a CVC existed: format detection, policy lookup, CVC assembly
    Intake,
    /// One of the seven verification steps; see [`Failure::step`]
    Verification,
    /// Policy rules applied after the steps
    Policy,
}

/// Rejection detail carried in the result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Error class
    pub class: ErrorClass,
    /// Stable code
    pub code: String,
    /// Sub-kind (`expired`, `keyBinding`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Stage that rejected
    pub stage: Stage,
    /// Step that failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
    /// Failing link (1-based)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<usize>,
    /// Human readable detail
    pub detail: String,
}

impl Failure {
    /// Failure for `err` raised during `stage`, at `step` when one applies
    pub fn from_error(err: &TrustError, stage: Stage, step: Option<Step>) -> Self {
        let link = match err {
            TrustError::Chain { link, .. } => *link,
            TrustError::ScopeViolation { link, .. } => Some(*link),
            _ => None,
        };
        let class = err.class();
        Self {
            class,
            code: class.code().to_string(),
            kind: err.kind().map(str::to_string),
            stage,
            step,
            link,
            detail: err.to_string(),
        }
    }
}

/// Aggregated outcome per invariant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantOutcomes {
    /// Step 1
    pub structural: Outcome,
    /// Step 2
    pub cryptographic: Outcome,
    /// Step 3
    pub temporal: Outcome,
    /// Step 4
    pub authority_scope: Outcome,
    /// Step 5
    pub revocation: Outcome,
    /// Step 6
    pub key_binding: Outcome,
    /// Step 7
    pub chain_integrity: Outcome,
}

impl Default for InvariantOutcomes {
    fn default() -> Self {
        Self {
            structural: Outcome::NotEvaluated,
            cryptographic: Outcome::NotEvaluated,
            temporal: Outcome::NotEvaluated,
            authority_scope: Outcome::NotEvaluated,
            revocation: Outcome::NotEvaluated,
            key_binding: Outcome::NotEvaluated,
            chain_integrity: Outcome::NotEvaluated,
        }
    }
}

impl InvariantOutcomes {
    /// Aggregate outcome of `step`
    pub fn get(&self, step: Step) -> Outcome {
        match step {
            Step::Structural => self.structural,
            Step::Cryptographic => self.cryptographic,
            Step::Temporal => self.temporal,
            Step::AuthorityScope => self.authority_scope,
            Step::Revocation => self.revocation,
            Step::KeyBinding => self.key_binding,
            Step::ChainIntegrity => self.chain_integrity,
        }
    }

    fn slot(&mut self, step: Step) -> &mut Outcome {
        match step {
            Step::Structural => &mut self.structural,
            Step::Cryptographic => &mut self.cryptographic,
            Step::Temporal => &mut self.temporal,
            Step::AuthorityScope => &mut self.authority_scope,
            Step::Revocation => &mut self.revocation,
            Step::KeyBinding => &mut self.key_binding,
            Step::ChainIntegrity => &mut self.chain_integrity,
        }
    }

    /// Fold a new outcome into `step`
    pub fn record(&mut self, step: Step, outcome: Outcome) {
        let slot = self.slot(step);
        *slot = slot.merge(outcome);
    }
}

/// Anchor evidence carried in the result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorSummary {
    /// Ledger sequence number
    pub sequence: u64,
    /// Record hash
    pub record_hash: String,
    /// Hash of the preceding record
    pub previous_hash: String,
    /// Timestamp written with the record
    pub anchored_at: i64,
}

/// Working state of one verification
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Per-invariant aggregate
    pub invariants: InvariantOutcomes,
    /// Every recorded step, in pipeline order
    pub steps: Vec<StepRecord>,
    /// Failures; the first is the rejection reason
    pub failures: Vec<Failure>,
    /// Fail-open and fallback notices
    pub warnings: Vec<String>,
    /// Signature verifications, status lookups and ledger operations
    pub work_units: u64,
    /// False once any proof was only structurally checked
    pub proof_fully_verified: bool,
    /// Anchor evidence
    pub anchor: Option<AnchorSummary>,
}

impl Verdict {
    /// Fresh verdict
    pub fn new(proof_fully_verified: bool) -> Self {
        Self {
            invariants: InvariantOutcomes::default(),
            steps: Vec::new(),
            failures: Vec::new(),
            warnings: Vec::new(),
            work_units: 0,
            proof_fully_verified,
            anchor: None,
        }
    }

    /// Record a step outcome
    pub fn record(&mut self, target: Target, step: Step, outcome: Outcome, detail: Option<String>) {
        self.invariants.record(step, outcome);
        self.steps.push(StepRecord {
            target,
            step,
            outcome,
            detail,
        });
    }

    /// Record a failed step
    pub fn fail(&mut self, target: Target, step: Step, err: &TrustError) {
        self.record(target, step, Outcome::Failed, Some(err.to_string()));
        self.failures.push(Failure::from_error(err, Stage::Verification, Some(step)));
    }

    /// Record a failure not tied to a step
    pub fn reject(&mut self, failure: Failure) {
        self.failures.push(failure);
    }

    /// Record a skipped step together with its warning
    pub fn skip(&mut self, target: Target, step: Step, warning: impl Into<String>) {
        let warning = warning.into();
        self.record(target, step, Outcome::Skipped, Some(warning.clone()));
        self.warnings.push(warning);
    }

    /// Count work
    pub fn add_work(&mut self, units: u64) {
        self.work_units += units;
    }

    /// Whether anything failed
    pub fn is_failed(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Rejection reason
    pub fn first_failure(&self) -> Option<&Failure> {
        self.failures.first()
    }
}

/// Verification status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Every check passed
    Valid,
    /// Rejected
    Invalid,
}

/// Resource figures for one verification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Canonical request size
    pub request_bytes: usize,
    /// Delegation chain length
    pub chain_depth: usize,
    /// Signature verifications, status lookups and ledger operations
    pub work_units: u64,
    /// Time spent normalizing
    pub normalize_micros: u64,
    /// Time spent in steps 1 to 6
    pub verify_micros: u64,
    /// End-to-end time
    pub total_micros: u64,
}

/// Verification Result Object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vro {
    /// Result format version
    pub version: String,
    /// Request id
    pub request_id: String,
    /// Issued at (Unix seconds)
    #[serde(rename = "iat")]
    pub issued_at: i64,
    /// Expires at (Unix seconds)
    #[serde(rename = "exp")]
    pub expires_at: i64,
    /// Policy applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    /// Encoding of the presented credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileTag>,
    /// Credential issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Credential subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Delegation chain length
    pub chain_depth: usize,
    /// Valid or invalid
    pub status: VerificationStatus,
    /// `VERIFIED` or `REJECTED`
    pub decision: String,
    /// Per-invariant outcome
    pub invariants: InvariantOutcomes,
    /// Recorded steps
    pub steps: Vec<StepRecord>,
    /// Rejection reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    /// Further failures collected in diagnostics mode
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Failure>,
    /// False when any proof was only structurally normalized
    pub proof_fully_verified: bool,
    /// Delegation chain fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_fingerprint: Option<String>,
    /// Anchor evidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<AnchorSummary>,
    /// Fail-open and fallback notices
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Resource figures
    pub telemetry: Telemetry,
}

fn decision_for(status: VerificationStatus) -> String {
    match status {
        VerificationStatus::Valid => "VERIFIED".to_string(),
        VerificationStatus::Invalid => "REJECTED".to_string(),
    }
}

/// Assembles a [`Vro`]
#[derive(Debug, Clone, Copy, Default)]
pub struct VroBuilder;

impl VroBuilder {
    /// Result for a request that reached the verification pipeline
    pub fn build(&self, cvc: &Cvc, verdict: &Verdict, clock: &dyn Clock, telemetry: Telemetry) -> Vro {
        let issued_at = clock.now();
        let status = if verdict.is_failed() {
            VerificationStatus::Invalid
        } else {
            VerificationStatus::Valid
        };
        let credential = cvc.credential();

        Vro {
            version: VRO_VERSION.to_string(),
            request_id: cvc.metadata().request_id.clone(),
            issued_at,
            expires_at: issued_at + VRO_LIFETIME_SECONDS,
            policy_id: Some(cvc.policy().id.clone()),
            profile: Some(credential.profile),
            issuer: Some(credential.issuer.clone()),
            subject: Some(credential.subject.clone()),
            chain_depth: cvc.depth(),
            status,
            decision: decision_for(status),
            invariants: verdict.invariants.clone(),
            steps: verdict.steps.clone(),
            failure: verdict.failures.first().cloned(),
            diagnostics: verdict.failures.iter().skip(1).cloned().collect(),
            proof_fully_verified: verdict.proof_fully_verified,
            chain_fingerprint: cvc.metadata().chain_fingerprint.clone(),
            anchor: verdict.anchor.clone(),
            warnings: verdict.warnings.clone(),
            telemetry,
        }
    }

    /// Result for a request rejected before a CVC existed
    pub fn rejected(
        &self,
        request_id: impl Into<String>,
        policy_id: Option<String>,
        err: &TrustError,
        clock: &dyn Clock,
        telemetry: Telemetry,
    ) -> Vro {
        let issued_at = clock.now();
        let step = match err.class() {
            ErrorClass::FormatError => Some(Step::Structural),
            _ => None,
        };
        let mut invariants = InvariantOutcomes::default();
        if let Some(step) = step {
            invariants.record(step, Outcome::Failed);
        }
        let steps = step
            .map(|step| StepRecord {
                target: Target::Credential,
                step,
                outcome: Outcome::Failed,
                detail: Some(err.to_string()),
            })
            .into_iter()
            .collect();

        Vro {
            version: VRO_VERSION.to_string(),
            request_id: request_id.into(),
            issued_at,
            expires_at: issued_at + VRO_LIFETIME_SECONDS,
            policy_id,
            profile: None,
            issuer: None,
            subject: None,
            chain_depth: telemetry.chain_depth,
            status: VerificationStatus::Invalid,
            decision: decision_for(VerificationStatus::Invalid),
            invariants,
            steps,
            failure: Some(Failure::from_error(err, Stage::Intake, step)),
            diagnostics: Vec::new(),
            proof_fully_verified: false,
            chain_fingerprint: None,
            anchor: None,
            warnings: Vec::new(),
            telemetry,
        }
    }
}

impl Vro {
    /// Whether the request verified
    pub fn is_valid(&self) -> bool {
        self.status == VerificationStatus::Valid
    }

    /// Canonical serialization (sorted keys, no insignificant whitespace)
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical_json(self)
    }

    /// Sign as a compact JWS
    pub fn sign(self, signer: &Ed25519Signer) -> Result<SignedVro> {
        let payload = serde_json::to_value(&self)?;
        let token = signer.sign_compact(VRO_TYP, &payload)?;
        Ok(SignedVro { vro: self, token })
    }
}

/// A VRO and its compact JWS
#[derive(Debug, Clone, PartialEq)]
pub struct SignedVro {
    /// Decoded result
    pub vro: Vro,
    /// `header.payload.signature`
    pub token: String,
}

/// Verify a signed VRO against the verifier's published keys and decode it
pub fn decode_signed_vro(token: &str, keys: &JwkSet) -> Result<Vro> {
    let jws = CompactJws::parse(token)?;
    if jws.header().typ.as_deref() != Some(VRO_TYP) {
        return Err(TrustError::Format(format!(
            "token typ is {:?}, expected {}",
            jws.header().typ,
            VRO_TYP
        )));
    }

    let kid = jws
        .kid()
        .ok_or_else(|| TrustError::proof(ProofFault::KeyNotFound, "VRO header carries no kid"))?;
    let jwk = keys
        .find(kid)
        .ok_or_else(|| TrustError::proof(ProofFault::KeyNotFound, format!("no published key '{}'", kid)))?;
    let key = ResolvedKey {
        kid: kid.to_string(),
        alg: jwk.algorithm().unwrap_or_default(),
        public_key: jwk.ed25519_key()?,
        source: KeySource::Own,
    };
    check_algorithm(&jws.alg_name(), &key, &[EDDSA.to_string()])
        .map_err(|detail| TrustError::proof(ProofFault::Algorithm, detail))?;

    match verify_signature(jws.signing_input(), jws.signature(), Some(&key)) {
        SignatureCheck::Valid => {}
        _ => {
            return Err(TrustError::proof(
                ProofFault::Signature,
                "VRO signature does not verify",
            ))
        }
    }

    serde_json::from_value(jws.payload().clone())
        .map_err(|e| TrustError::Format(format!("VRO payload: {}", e)))
}
