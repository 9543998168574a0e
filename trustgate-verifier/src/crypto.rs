//! Cryptographic primitives
//!
//! Compact JWS decoding, JWK/JWKS handling, key resolution and Ed25519
//! signing/verification. Only Ed25519 (`EdDSA`) keys are usable; any token
//! whose declared algorithm differs from the algorithm of the resolved key
//! is rejected before a signature check is attempted.

use crate::error::{Result, TrustError};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_compact::{KeyPair, PublicKey, Seed, Signature};
use jsonwebtoken::{Algorithm, Header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, warn};

/// Algorithm name for Ed25519 JWS
pub const EDDSA: &str = "EdDSA";

/// Hex-encoded SHA-256 digest
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(bytes.as_ref()))
}

/// Base64url (no padding) encoding
pub fn b64url_encode(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes.as_ref())
}

/// Base64url (no padding) decoding; malformed input is a format error
pub fn b64url_decode(input: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(input.trim_end_matches('='))
        .map_err(|e| TrustError::Format(format!("invalid base64url: {}", e)))
}

/// Canonical JSON bytes: object keys sorted, no insignificant whitespace
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&value)?)
}

/// JWS algorithm name as written in a protected header
pub fn algorithm_name(alg: Algorithm) -> String {
    format!("{:?}", alg)
}

/// Decoded compact JWS (`header.payload.signature`)
#[derive(Debug, Clone)]
pub struct CompactJws {
    raw: String,
    header: Header,
    payload: Value,
    signed_len: usize,
    signature: Vec<u8>,
}

impl CompactJws {
    /// Parse a compact JWS without verifying it
    pub fn parse(token: &str) -> Result<Self> {
        let token = token.trim();
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(TrustError::Format(format!(
                "compact JWS must have 3 non-empty segments, found {}",
                parts.len()
            )));
        }

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| TrustError::Format(format!("invalid JWS header: {}", e)))?;

        let payload_bytes = b64url_decode(parts[1])?;
        let payload: Value = serde_json::from_slice(&payload_bytes)
            .map_err(|e| TrustError::Format(format!("invalid JWS payload: {}", e)))?;
        if !payload.is_object() {
            return Err(TrustError::Format("JWS payload is not a JSON object".into()));
        }

        let signature = b64url_decode(parts[2])?;

        Ok(Self {
            raw: token.to_string(),
            header,
            payload,
            signed_len: parts[0].len() + 1 + parts[1].len(),
            signature,
        })
    }

    /// Protected header
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Decoded payload object
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Declared algorithm name
    pub fn alg_name(&self) -> String {
        algorithm_name(self.header.alg)
    }

    /// Declared key id
    pub fn kid(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    /// Byte range of the signing input within [`CompactJws::raw`]
    pub fn signed_range(&self) -> Range<usize> {
        0..self.signed_len
    }

    /// Exact bytes covered by the signature
    pub fn signing_input(&self) -> &[u8] {
        &self.raw.as_bytes()[self.signed_range()]
    }

    /// Raw signature bytes
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Original token text
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// JSON Web Key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type
    pub kty: String,
    /// Curve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// Public key bytes, base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// Key id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Declared algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Intended use
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
}

impl Jwk {
    /// Describe an Ed25519 public key
    pub fn from_ed25519(public_key: &PublicKey, kid: impl Into<String>) -> Self {
        Self {
            kty: "OKP".to_string(),
            crv: Some("Ed25519".to_string()),
            x: Some(b64url_encode(public_key.as_ref())),
            kid: Some(kid.into()),
            alg: Some(EDDSA.to_string()),
            key_use: Some("sig".to_string()),
        }
    }

    /// Algorithm this key supports
    pub fn algorithm(&self) -> Option<String> {
        if let Some(alg) = &self.alg {
            return Some(alg.clone());
        }
        match (self.kty.as_str(), self.crv.as_deref()) {
            ("OKP", Some("Ed25519")) => Some(EDDSA.to_string()),
            _ => None,
        }
    }

    /// Decode the Ed25519 public key
    pub fn ed25519_key(&self) -> Result<PublicKey> {
        if self.kty != "OKP" || self.crv.as_deref() != Some("Ed25519") {
            return Err(TrustError::Format(format!(
                "unsupported key type {}/{}",
                self.kty,
                self.crv.as_deref().unwrap_or("-")
            )));
        }
        let x = self
            .x
            .as_deref()
            .ok_or_else(|| TrustError::Format("OKP key without x".into()))?;
        let bytes = b64url_decode(x)?;
        PublicKey::from_slice(&bytes)
            .map_err(|e| TrustError::Format(format!("invalid Ed25519 key: {}", e)))
    }
}

/// JSON Web Key Set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    /// Keys
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Find a key by id
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }

    /// Whether a key with this id exists
    pub fn contains(&self, kid: &str) -> bool {
        self.find(kid).is_some()
    }
}

/// Where published key sets come from
#[async_trait]
pub trait KeySetSource: Send + Sync {
    /// Key set published by `owner`, `None` if the owner publishes nothing
    async fn key_set(&self, owner: &str) -> Result<Option<JwkSet>>;
}

/// Key sets provisioned up front, keyed by owner identifier
#[derive(Debug, Clone, Default)]
pub struct StaticKeySets {
    sets: HashMap<String, JwkSet>,
}

impl StaticKeySets {
    /// Empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the key set of `owner`
    pub fn insert(&mut self, owner: impl Into<String>, set: JwkSet) {
        self.sets.insert(owner.into(), set);
    }

    /// Builder-style [`StaticKeySets::insert`]
    pub fn with(mut self, owner: impl Into<String>, set: JwkSet) -> Self {
        self.insert(owner, set);
        self
    }
}

#[async_trait]
impl KeySetSource for StaticKeySets {
    async fn key_set(&self, owner: &str) -> Result<Option<JwkSet>> {
        Ok(self.sets.get(owner).cloned())
    }
}

/// Reference to a verification key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRef {
    /// Identifier of the party expected to publish the key
    pub owner: String,
    /// Key id from the token header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

/// How a key was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// Published by the key reference owner
    Own,
    /// Found in the root issuer's key set
    IssuerFallback,
}

/// Resolved verification key
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    /// Key id
    pub kid: String,
    /// Algorithm the key supports
    pub alg: String,
    /// Ed25519 public key
    pub public_key: PublicKey,
    /// Where the key came from
    pub source: KeySource,
}

/// Outcome of a key lookup
#[derive(Debug, Clone)]
pub enum KeyLookup {
    /// Key found
    Found(ResolvedKey),
    /// No usable key for this reference
    NotFound(String),
    /// The key source could not be consulted
    Unavailable(String),
}

/// Resolves key references against published key sets
///
/// Own key material is consulted first. The issuer fallback is only used
/// when configured, and every use is logged.
pub struct KeyResolver {
    source: Arc<dyn KeySetSource>,
    fallback_owner: Option<String>,
}

impl KeyResolver {
    /// Resolver without fallback
    pub fn new(source: Arc<dyn KeySetSource>) -> Self {
        Self {
            source,
            fallback_owner: None,
        }
    }

    /// Allow falling back to `issuer`'s key set
    pub fn with_issuer_fallback(mut self, issuer: impl Into<String>) -> Self {
        self.fallback_owner = Some(issuer.into());
        self
    }

    /// Resolve a key reference
    pub async fn resolve_key(&self, key_ref: &KeyRef) -> KeyLookup {
        let kid = match key_ref.kid.as_deref() {
            Some(kid) => kid,
            None => return KeyLookup::NotFound("token header carries no kid".into()),
        };

        match self.lookup(&key_ref.owner, kid, KeySource::Own).await {
            Ok(Some(key)) => return KeyLookup::Found(key),
            Ok(None) => {}
            Err(e) => return KeyLookup::Unavailable(e.to_string()),
        }

        if let Some(issuer) = self.fallback_owner.as_deref() {
            if issuer != key_ref.owner {
                match self.lookup(issuer, kid, KeySource::IssuerFallback).await {
                    Ok(Some(key)) => {
                        warn!(
                            owner = %key_ref.owner,
                            kid = %kid,
                            issuer = %issuer,
                            "key resolved through issuer key set fallback"
                        );
                        return KeyLookup::Found(key);
                    }
                    Ok(None) => {}
                    Err(e) => return KeyLookup::Unavailable(e.to_string()),
                }
            }
        }

        KeyLookup::NotFound(format!("no key '{}' published by {}", kid, key_ref.owner))
    }

    async fn lookup(&self, owner: &str, kid: &str, source: KeySource) -> Result<Option<ResolvedKey>> {
        let set = match self.source.key_set(owner).await? {
            Some(set) => set,
            None => return Ok(None),
        };
        let jwk = match set.find(kid) {
            Some(jwk) => jwk,
            None => return Ok(None),
        };
        let alg = match jwk.algorithm() {
            Some(alg) => alg,
            None => {
                debug!(owner, kid, "key has no usable algorithm");
                return Ok(None);
            }
        };
        match jwk.ed25519_key() {
            Ok(public_key) => Ok(Some(ResolvedKey {
                kid: kid.to_string(),
                alg,
                public_key,
                source,
            })),
            Err(e) => {
                debug!(owner, kid, error = %e, "unusable key material");
                Ok(None)
            }
        }
    }
}

/// Outcome of a signature check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignatureCheck {
    /// Signature verified
    Valid,
    /// Signature did not verify
    Invalid,
    /// No key to verify against
    KeyNotFound,
}

/// Verify `signature` over `payload` with an optional resolved key
pub fn verify_signature(payload: &[u8], signature: &[u8], key: Option<&ResolvedKey>) -> SignatureCheck {
    let key = match key {
        Some(key) => key,
        None => return SignatureCheck::KeyNotFound,
    };
    let signature = match Signature::from_slice(signature) {
        Ok(sig) => sig,
        Err(_) => return SignatureCheck::Invalid,
    };
    match key.public_key.verify(payload, &signature) {
        Ok(()) => SignatureCheck::Valid,
        Err(_) => SignatureCheck::Invalid,
    }
}

/// Reject algorithm confusion and disallowed algorithms
///
/// The declared algorithm must equal the algorithm the key supports and
/// must appear in `allowlist`.
pub fn check_algorithm(declared: &str, key: &ResolvedKey, allowlist: &[String]) -> std::result::Result<(), String> {
    if !allowlist.iter().any(|a| a == declared) {
        return Err(format!("algorithm {} not in allow-list {:?}", declared, allowlist));
    }
    if declared != key.alg {
        return Err(format!(
            "declared algorithm {} does not match key '{}' algorithm {}",
            declared, key.kid, key.alg
        ));
    }
    Ok(())
}

/// Ed25519 signing key with a key id
pub struct Ed25519Signer {
    kid: String,
    seed: [u8; 32],
    keypair: KeyPair,
}

impl Ed25519Signer {
    /// Fresh random key
    pub fn generate(kid: impl Into<String>) -> Self {
        let seed: [u8; 32] = rand::random();
        Self::from_seed_bytes(kid, seed)
    }

    /// Key derived from a 32 byte seed
    pub fn from_seed(kid: impl Into<String>, seed: &[u8]) -> Result<Self> {
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| TrustError::Config(format!("Ed25519 seed must be 32 bytes, got {}", seed.len())))?;
        Ok(Self::from_seed_bytes(kid, seed))
    }

    fn from_seed_bytes(kid: impl Into<String>, seed: [u8; 32]) -> Self {
        Self {
            kid: kid.into(),
            seed,
            keypair: KeyPair::from_seed(Seed::new(seed)),
        }
    }

    /// Key id
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Seed bytes, for persisting the key
    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    /// Public key
    pub fn public_key(&self) -> PublicKey {
        self.keypair.pk
    }

    /// Public key as a JWK
    pub fn public_jwk(&self) -> Jwk {
        Jwk::from_ed25519(&self.keypair.pk, self.kid.clone())
    }

    /// Single-key JWKS
    pub fn jwks(&self) -> JwkSet {
        JwkSet {
            keys: vec![self.public_jwk()],
        }
    }

    /// Deterministic Ed25519 signature
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.keypair.sk.sign(message, None).as_ref().to_vec()
    }

    /// Sign `payload` as a compact JWS with canonical header and payload bytes
    pub fn sign_compact(&self, typ: &str, payload: &Value) -> Result<String> {
        let header = serde_json::json!({
            "alg": EDDSA,
            "kid": self.kid,
            "typ": typ,
        });
        let signing_input = format!(
            "{}.{}",
            b64url_encode(canonical_json(&header)?),
            b64url_encode(canonical_json(payload)?)
        );
        let signature = self.sign(signing_input.as_bytes());
        Ok(format!("{}.{}", signing_input, b64url_encode(signature)))
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer").field("kid", &self.kid).finish()
    }
}
