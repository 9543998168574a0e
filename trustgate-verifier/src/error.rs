//! Error types for the verification pipeline
//!
//! Every rejection maps to exactly one [`ErrorClass`] with a stable code.
//! Plumbing failures (configuration, I/O, ledger, status transport) are
//! classified as [`ErrorClass::InternalError`] unless policy reroutes them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for verifier operations
pub type Result<T> = std::result::Result<T, TrustError>;

/// Terminal classification carried by every rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Input could not be recognized or normalized
    FormatError,
    /// The presented credential failed a proof, time or status check
    ProofError,
    /// A delegation link failed one of the chain steps
    ChainError,
    /// A delegation link widened its delegator's authority
    ScopeViolation,
    /// A policy rule rejected the request
    PolicyError,
    /// Unexpected failure; always fail-closed
    InternalError,
}

impl ErrorClass {
    /// Stable code for this class
    pub fn code(&self) -> &'static str {
        match self {
            ErrorClass::FormatError => "E100",
            ErrorClass::ProofError => "E200",
            ErrorClass::ChainError => "E300",
            ErrorClass::ScopeViolation => "E400",
            ErrorClass::PolicyError => "E500",
            ErrorClass::InternalError => "E900",
        }
    }

    /// Class name as it appears in result objects
    pub fn name(&self) -> &'static str {
        match self {
            ErrorClass::FormatError => "FormatError",
            ErrorClass::ProofError => "ProofError",
            ErrorClass::ChainError => "ChainError",
            ErrorClass::ScopeViolation => "ScopeViolation",
            ErrorClass::PolicyError => "PolicyError",
            ErrorClass::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

/// Sub-kind of a [`ErrorClass::ChainError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChainFault {
    /// Link could not be parsed
    Structural,
    /// Delegator signature did not verify
    Signature,
    /// Outside the validity window
    Expired,
    /// Status list reports the link revoked (or unresolvable under fail-closed)
    Revoked,
    /// Bound key id does not match the presenter
    KeyBinding,
    /// Chain longer than policy allows
    Depth,
    /// Fingerprint could not be anchored or failed ledger verification
    Anchor,
}

impl ChainFault {
    /// Wire name of the fault
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainFault::Structural => "structural",
            ChainFault::Signature => "signature",
            ChainFault::Expired => "expired",
            ChainFault::Revoked => "revoked",
            ChainFault::KeyBinding => "keyBinding",
            ChainFault::Depth => "depth",
            ChainFault::Anchor => "anchor",
        }
    }
}

impl fmt::Display for ChainFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-kind of a [`ErrorClass::ProofError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProofFault {
    /// Signature did not verify
    Signature,
    /// No key matched the key reference
    KeyNotFound,
    /// Algorithm not allowed or not matching the key
    Algorithm,
    /// Outside the validity window
    Expired,
    /// Credential revoked (or unresolvable under fail-closed)
    Revoked,
}

impl ProofFault {
    /// Wire name of the fault
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofFault::Signature => "signature",
            ProofFault::KeyNotFound => "keyNotFound",
            ProofFault::Algorithm => "algorithm",
            ProofFault::Expired => "expired",
            ProofFault::Revoked => "revoked",
        }
    }
}

impl fmt::Display for ProofFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verifier errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrustError {
    /// No adapter recognized the input
    #[error("Unrecognized format: {0}")]
    UnrecognizedFormat(String),

    /// Input recognized but malformed
    #[error("Format error: {0}")]
    Format(String),

    /// Credential proof failure
    #[error("Proof error ({kind}): {detail}")]
    Proof {
        /// Failure kind
        kind: ProofFault,
        /// Human readable detail
        detail: String,
    },

    /// Delegation chain failure at a link (1-based, root first)
    #[error("Chain error ({kind}) at link {link:?}: {detail}")]
    Chain {
        /// Failure kind
        kind: ChainFault,
        /// Failing link, if the failure is tied to one
        link: Option<usize>,
        /// Human readable detail
        detail: String,
    },

    /// Delegated scope exceeds the delegator's scope
    #[error("Scope violation at link {link}: {detail}")]
    ScopeViolation {
        /// Failing link
        link: usize,
        /// Human readable detail
        detail: String,
    },

    /// Policy rejected the request
    #[error("Policy error: {0}")]
    Policy(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anchor ledger operation failed
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Status source failure
    #[error("Status error: {0}")]
    Status(String),

    /// Dependency did not answer in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrustError {
    /// Taxonomy class of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            TrustError::UnrecognizedFormat(_) | TrustError::Format(_) => ErrorClass::FormatError,
            TrustError::Proof { .. } => ErrorClass::ProofError,
            TrustError::Chain { .. } => ErrorClass::ChainError,
            TrustError::ScopeViolation { .. } => ErrorClass::ScopeViolation,
            TrustError::Policy(_) => ErrorClass::PolicyError,
            TrustError::Config(_)
            | TrustError::Ledger(_)
            | TrustError::Status(_)
            | TrustError::Timeout(_)
            | TrustError::Io(_)
            | TrustError::Internal(_) => ErrorClass::InternalError,
        }
    }

    /// Sub-kind name, when the class has one
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            TrustError::Proof { kind, .. } => Some(kind.as_str()),
            TrustError::Chain { kind, .. } => Some(kind.as_str()),
            TrustError::UnrecognizedFormat(_) => Some("unrecognized"),
            _ => None,
        }
    }

    /// Check if error is retryable at the collaborator boundary
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrustError::Ledger(_) | TrustError::Status(_) | TrustError::Timeout(_)
        )
    }

    /// Shorthand for a chain error tied to a link
    pub fn chain(kind: ChainFault, link: usize, detail: impl Into<String>) -> Self {
        TrustError::Chain {
            kind,
            link: Some(link),
            detail: detail.into(),
        }
    }

    /// Shorthand for a credential proof error
    pub fn proof(kind: ProofFault, detail: impl Into<String>) -> Self {
        TrustError::Proof {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<serde_json::Error> for TrustError {
    fn from(err: serde_json::Error) -> Self {
        TrustError::Internal(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for TrustError {
    fn from(err: std::io::Error) -> Self {
        TrustError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for TrustError {
    fn from(err: reqwest::Error) -> Self {
        TrustError::Status(err.to_string())
    }
}

impl From<toml::de::Error> for TrustError {
    fn from(err: toml::de::Error) -> Self {
        TrustError::Config(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for TrustError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        TrustError::Timeout(err.to_string())
    }
}
