//! Format adapters
//!
//! Each adapter recognizes one encoding and turns it into the common
//! intermediate form: a [`NormalizedCredential`] for presented credentials or
//! a [`DelegationGrant`] for chain links. Adapters are pure: they never fetch
//! keys or status, and malformed input is always a
//! [`TrustError::Format`], never a panic.
//!
//! ```text
//!   raw JSON value ──► AdapterRegistry::detect ──► ProfileTag
//!                                │
//!                                ▼
//!                    FormatAdapter::normalize ──► Normalized::{Credential, Grant}
//! ```

pub mod dg_ld;
pub mod dg_sd_jwt;
pub mod oidc4vp;
pub mod vc_jwt;
pub mod vc_ld;

use crate::crypto::{canonical_json, sha256_hex, KeyRef};
use crate::error::{Result, TrustError};
use crate::scope::Scope;
use crate::status::StatusRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub use dg_ld::DgLdAdapter;
pub use dg_sd_jwt::DgSdJwtAdapter;
pub use oidc4vp::{unwrap_vp_token, PresentationEnvelope};
pub use vc_jwt::VcJwtAdapter;
pub use vc_ld::VcLdAdapter;

/// Closed set of supported encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProfileTag {
    /// W3C credential as a compact JWS
    #[serde(rename = "VC-JWT")]
    VcJwt,
    /// W3C credential as JSON-LD
    #[serde(rename = "VC-LD")]
    VcLd,
    /// Delegation grant as an SD-JWT
    #[serde(rename = "DG-SD-JWT")]
    DgSdJwt,
    /// Delegation grant as JSON-LD
    #[serde(rename = "DG-LD")]
    DgLd,
}

impl ProfileTag {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileTag::VcJwt => "VC-JWT",
            ProfileTag::VcLd => "VC-LD",
            ProfileTag::DgSdJwt => "DG-SD-JWT",
            ProfileTag::DgLd => "DG-LD",
        }
    }

    /// Whether the encoding carries a delegation grant
    pub fn is_grant(&self) -> bool {
        matches!(self, ProfileTag::DgSdJwt | ProfileTag::DgLd)
    }
}

impl fmt::Display for ProfileTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofFormat {
    /// Compact JWS signature
    Jws,
    /// Embedded linked-data proof
    LinkedData,
}

/// Half-open byte range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte
    pub start: usize,
    /// One past the last byte
    pub end: usize,
}

/// Proof attached to a credential or grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofDescriptor {
    /// Container format
    pub format: ProofFormat,
    /// Declared algorithm (JWS `alg` or linked-data proof type)
    pub alg: String,
    /// Key reference
    pub key_ref: KeyRef,
    /// Raw signature bytes
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
    /// Signed bytes within the raw token, when the proof signs raw bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_range: Option<ByteRange>,
}

impl ProofDescriptor {
    /// Signed bytes within `raw`, if the range is valid
    pub fn signed_bytes<'a>(&self, raw: &'a str) -> Option<&'a [u8]> {
        let range = self.signed_range?;
        raw.as_bytes().get(range.start..range.end)
    }
}

/// Presented credential in common form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCredential {
    /// Encoding it arrived in
    pub profile: ProfileTag,
    /// Credential id (`jti` or `id`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Issuer identifier
    pub issuer: String,
    /// Subject identifier
    pub subject: String,
    /// Credential types
    pub credential_types: Vec<String>,
    /// Normalized claims: `type` and `credentialSubject`
    pub claims: Value,
    /// Not valid before (Unix seconds)
    pub not_before: Option<i64>,
    /// Not valid after (Unix seconds)
    pub expires_at: Option<i64>,
    /// Revocation entry
    pub status: Option<StatusRef>,
    /// Authority held by the subject, bounding the root delegation grant
    pub scope: Option<Scope>,
    /// Proof
    pub proof: ProofDescriptor,
    /// True when the proof is cryptographically verified by the pipeline;
    /// false when the adapter stops at structural normalization
    pub proof_fully_verified: bool,
    /// Original encoding
    pub raw: String,
}

/// One link of a delegation chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationGrant {
    /// Encoding it arrived in
    pub profile: ProfileTag,
    /// Grant id (`jti`/`id`, or a digest of the raw grant)
    pub id: String,
    /// Party granting authority; signs the grant
    pub delegator: String,
    /// Party receiving authority
    pub delegate: String,
    /// Granted authority
    pub scope: Scope,
    /// Not valid before (Unix seconds)
    pub not_before: i64,
    /// Not valid after (Unix seconds)
    pub expires_at: i64,
    /// Revocation entry
    pub status: Option<StatusRef>,
    /// Key id the delegate must present with
    pub key_binding: Option<String>,
    /// Free-form constraints carried by the grant
    #[serde(default)]
    pub constraints: Value,
    /// Proof
    pub proof: ProofDescriptor,
    /// See [`NormalizedCredential::proof_fully_verified`]
    pub proof_fully_verified: bool,
    /// Names of selectively disclosed claims that were merged in
    #[serde(default)]
    pub disclosed: Vec<String>,
    /// Original encoding
    pub raw: String,
}

/// Output of an adapter
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// A presented credential
    Credential(NormalizedCredential),
    /// A delegation grant
    Grant(DelegationGrant),
}

/// A chain entry after parsing
///
/// Malformed entries keep their position so the chain verifier can report
/// a structural failure at the right link.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLink {
    /// Parsed grant
    Grant(Box<DelegationGrant>),
    /// Entry that failed detection or normalization
    Malformed {
        /// Original encoding
        raw: String,
        /// Why it failed
        reason: String,
    },
}

impl ParsedLink {
    /// The grant, if parsing succeeded
    pub fn grant(&self) -> Option<&DelegationGrant> {
        match self {
            ParsedLink::Grant(g) => Some(g.as_ref()),
            ParsedLink::Malformed { .. } => None,
        }
    }

    /// Original encoding
    pub fn raw(&self) -> &str {
        match self {
            ParsedLink::Grant(g) => &g.raw,
            ParsedLink::Malformed { raw, .. } => raw,
        }
    }
}

/// Capability set of one encoding
pub trait FormatAdapter: Send + Sync {
    /// Encoding handled
    fn profile(&self) -> ProfileTag;

    /// Whether `raw` carries this encoding's structural markers
    fn detect(&self, raw: &Value) -> bool;

    /// Convert into the common form
    fn normalize(&self, raw: &Value) -> Result<Normalized>;

    /// Embedded proofs, without normalizing the rest
    fn extract_proofs(&self, raw: &Value) -> Result<Vec<ProofDescriptor>>;

    /// Whether proofs of this encoding are cryptographically verified
    fn verifies_proofs(&self) -> bool;
}

/// Ordered set of adapters
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn FormatAdapter>>,
}

impl AdapterRegistry {
    /// Registry with no adapters
    pub fn empty() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Registry with every built-in adapter
    ///
    /// Grant encodings are probed first because a DG-LD document is also a
    /// `VerifiableCredential`.
    pub fn standard() -> Self {
        Self::empty()
            .with(DgSdJwtAdapter)
            .with(DgLdAdapter)
            .with(VcJwtAdapter)
            .with(VcLdAdapter)
    }

    /// Add an adapter; later adapters are probed after earlier ones
    pub fn with(mut self, adapter: impl FormatAdapter + 'static) -> Self {
        self.adapters.push(Box::new(adapter));
        self
    }

    fn adapter(&self, profile: ProfileTag) -> Result<&dyn FormatAdapter> {
        self.adapters
            .iter()
            .find(|a| a.profile() == profile)
            .map(|a| a.as_ref())
            .ok_or_else(|| TrustError::UnrecognizedFormat(format!("no adapter for {}", profile)))
    }

    /// Identify the encoding of `raw`
    pub fn detect(&self, raw: &Value) -> Result<ProfileTag> {
        self.adapters
            .iter()
            .find(|a| a.detect(raw))
            .map(|a| a.profile())
            .ok_or_else(|| TrustError::UnrecognizedFormat(describe(raw)))
    }

    /// Normalize `raw` as `profile`
    pub fn normalize(&self, raw: &Value, profile: ProfileTag) -> Result<Normalized> {
        self.adapter(profile)?.normalize(raw)
    }

    /// Embedded proofs of `raw` as `profile`
    pub fn extract_proofs(&self, raw: &Value, profile: ProfileTag) -> Result<Vec<ProofDescriptor>> {
        self.adapter(profile)?.extract_proofs(raw)
    }

    /// Normalize a presented credential, honoring a declared profile
    pub fn normalize_credential(&self, raw: &Value, declared: Option<ProfileTag>) -> Result<NormalizedCredential> {
        let detected = self.detect(raw)?;
        if let Some(declared) = declared {
            if declared != detected {
                return Err(TrustError::Format(format!(
                    "declared profile {} but payload is {}",
                    declared, detected
                )));
            }
        }
        match self.normalize(raw, detected)? {
            Normalized::Credential(c) => Ok(c),
            Normalized::Grant(_) => Err(TrustError::Format(format!(
                "{} is a delegation grant, not a credential",
                detected
            ))),
        }
    }

    /// Parse one chain entry, keeping failures in place
    pub fn parse_link(&self, raw: &Value) -> ParsedLink {
        let parsed = self.detect(raw).and_then(|profile| match self.normalize(raw, profile)? {
            Normalized::Grant(g) => Ok(g),
            Normalized::Credential(_) => Err(TrustError::Format(format!(
                "{} is a credential, not a delegation grant",
                profile
            ))),
        });
        match parsed {
            Ok(grant) => ParsedLink::Grant(Box::new(grant)),
            Err(e) => ParsedLink::Malformed {
                raw: raw_text(raw),
                reason: e.to_string(),
            },
        }
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn describe(raw: &Value) -> String {
    match raw {
        Value::String(s) => format!("string of {} bytes", s.len()),
        Value::Object(_) => "JSON object without known markers".to_string(),
        other => format!("unsupported JSON {}", json_kind(other)),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Text form of a raw input: the token itself, or canonical JSON
pub fn raw_text(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => canonical_json(other)
            .ok()
            .and_then(|b| String::from_utf8(b).ok())
            .unwrap_or_default(),
    }
}

/// Digest used as an id when a grant carries none
pub(crate) fn digest_id(raw: &str) -> String {
    format!("sha256:{}", sha256_hex(raw.as_bytes()))
}

/// Required string field
pub(crate) fn require_str(obj: &Value, field: &str, what: &str) -> Result<String> {
    obj.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TrustError::Format(format!("{} missing '{}'", what, field)))
}

/// Identifier given either as a string or as an object with `id`/`@id`
pub(crate) fn identifier(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("id")
            .or_else(|| map.get("@id"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// `type` given as a string or an array of strings
pub(crate) fn type_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Timestamp given as Unix seconds or an RFC 3339 string
pub(crate) fn timestamp(value: Option<&Value>, field: &str) -> Result<Option<i64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| TrustError::Format(format!("'{}' is not an integer timestamp", field))),
        Some(Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.timestamp()))
            .map_err(|e| TrustError::Format(format!("'{}' is not RFC 3339: {}", field, e))),
        Some(_) => Err(TrustError::Format(format!("'{}' has an unsupported type", field))),
    }
}

/// Status reference in any of the accepted shapes
///
/// - `{"statusListCredential": url, "statusListIndex": "7"}`
/// - `{"url": url, "index": 7}`
/// - `{"id": url}`
pub(crate) fn status_ref(value: Option<&Value>) -> Result<Option<StatusRef>> {
    let obj = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(url)) => return Ok(Some(StatusRef::new(url.clone(), 0))),
        Some(obj @ Value::Object(_)) => obj,
        Some(_) => return Err(TrustError::Format("status has an unsupported type".into())),
    };

    let url = ["statusListCredential", "url", "id"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .ok_or_else(|| TrustError::Format("status without list location".into()))?;

    let index = match obj.get("statusListIndex").or_else(|| obj.get("index")) {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| TrustError::Format("status index must be non-negative".into()))?,
        Some(Value::String(s)) => s
            .parse::<u64>()
            .map_err(|_| TrustError::Format(format!("status index '{}' is not a number", s)))?,
        Some(_) => return Err(TrustError::Format("status index has an unsupported type".into())),
    };

    Ok(Some(StatusRef::new(url, index)))
}

/// Optional scope; present but malformed is an error
pub(crate) fn optional_scope(value: Option<&Value>) -> Result<Option<Scope>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| TrustError::Format(format!("invalid scope: {}", e))),
    }
}

/// Key id from a verification method URL (`did:web:x#key-1` ⇒ `key-1`)
pub(crate) fn kid_from_method(method: &str) -> String {
    method
        .rsplit_once('#')
        .map(|(_, frag)| frag.to_string())
        .unwrap_or_else(|| method.to_string())
}

/// Linked-data proof descriptor (structural only)
pub(crate) fn linked_data_proof(doc: &Value, owner: &str) -> Result<ProofDescriptor> {
    let proof = doc
        .get("proof")
        .filter(|p| p.is_object())
        .ok_or_else(|| TrustError::Format("linked-data document without proof".into()))?;
    let proof_type = require_str(proof, "type", "proof")?;
    let kid = proof
        .get("verificationMethod")
        .and_then(Value::as_str)
        .map(kid_from_method);
    let value = proof
        .get("proofValue")
        .or_else(|| proof.get("jws"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(ProofDescriptor {
        format: ProofFormat::LinkedData,
        alg: proof_type,
        key_ref: KeyRef {
            owner: owner.to_string(),
            kid,
        },
        signature: value.as_bytes().to_vec(),
        signed_range: None,
    })
}
