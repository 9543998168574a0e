//! DG-SD-JWT: delegation grant as a selective-disclosure JWT
//!
//! Compact form is `<jws>~<disclosure>~<disclosure>~`. Each disclosure is
//! base64url JSON `[salt, name, value]`; its base64url SHA-256 digest must be
//! listed in the `_sd` array of the `dg` claim (or of the payload). Disclosed
//! values are merged into the `dg` object before normalization. Only the JWS
//! part is signed.

use super::{
    digest_id, require_str, status_ref, timestamp, ByteRange, DelegationGrant, FormatAdapter,
    Normalized, ProfileTag, ProofDescriptor, ProofFormat,
};
use crate::crypto::{b64url_decode, b64url_encode, CompactJws, KeyRef};
use crate::error::{Result, TrustError};
use crate::scope::Scope;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::debug;

/// Adapter for DG-SD-JWT grants
#[derive(Debug, Clone, Copy, Default)]
pub struct DgSdJwtAdapter;

/// One selective disclosure
#[derive(Debug, Clone, PartialEq)]
pub struct Disclosure {
    /// Salt
    pub salt: String,
    /// Claim name
    pub name: String,
    /// Claim value
    pub value: Value,
    /// Encoded form as it appears in the token
    pub encoded: String,
}

impl Disclosure {
    /// Build and encode a disclosure
    pub fn new(salt: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
        let salt = salt.into();
        let name = name.into();
        let array = Value::Array(vec![
            Value::String(salt.clone()),
            Value::String(name.clone()),
            value.clone(),
        ]);
        Self {
            encoded: b64url_encode(array.to_string()),
            salt,
            name,
            value,
        }
    }

    /// Decode an encoded disclosure
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = b64url_decode(encoded)?;
        let array: Vec<Value> = serde_json::from_slice(&bytes)
            .map_err(|e| TrustError::Format(format!("disclosure is not a JSON array: {}", e)))?;
        match array.as_slice() {
            [Value::String(salt), Value::String(name), value] => Ok(Self {
                salt: salt.clone(),
                name: name.clone(),
                value: value.clone(),
                encoded: encoded.to_string(),
            }),
            _ => Err(TrustError::Format(
                "disclosure must be [salt, name, value]".into(),
            )),
        }
    }

    /// Digest listed in `_sd`
    pub fn digest(&self) -> String {
        b64url_encode(Sha256::digest(self.encoded.as_bytes()))
    }
}

struct SdJwt {
    jws: CompactJws,
    disclosures: Vec<Disclosure>,
}

impl SdJwt {
    fn parse(raw: &Value) -> Result<Self> {
        let text = raw
            .as_str()
            .ok_or_else(|| TrustError::Format("DG-SD-JWT must be a string".into()))?
            .trim();
        let mut parts = text.split('~');
        let jws = CompactJws::parse(parts.next().unwrap_or_default())?;

        let mut disclosures = Vec::new();
        for part in parts.filter(|p| !p.is_empty()) {
            if part.contains('.') {
                debug!("ignoring trailing key-binding JWT on delegation grant");
                continue;
            }
            disclosures.push(Disclosure::decode(part)?);
        }
        Ok(Self { jws, disclosures })
    }

    /// `dg` claim with verified disclosures merged in
    fn grant_claims(&self) -> Result<(Map<String, Value>, Vec<String>)> {
        let payload = self.jws.payload();
        let mut dg = payload
            .get("dg")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| TrustError::Format("DG-SD-JWT missing 'dg' claim".into()))?;

        let mut digests: HashSet<String> = HashSet::new();
        for holder in [dg.get("_sd"), payload.get("_sd")].into_iter().flatten() {
            if let Some(items) = holder.as_array() {
                digests.extend(items.iter().filter_map(Value::as_str).map(str::to_string));
            }
        }

        let mut disclosed = Vec::new();
        for disclosure in &self.disclosures {
            if !digests.contains(&disclosure.digest()) {
                return Err(TrustError::Format(format!(
                    "disclosure '{}' is not committed to by the grant",
                    disclosure.name
                )));
            }
            if dg.contains_key(&disclosure.name) {
                return Err(TrustError::Format(format!(
                    "disclosure '{}' conflicts with a signed claim",
                    disclosure.name
                )));
            }
            dg.insert(disclosure.name.clone(), disclosure.value.clone());
            disclosed.push(disclosure.name.clone());
        }
        dg.remove("_sd");
        Ok((dg, disclosed))
    }

    fn proof(&self) -> Result<ProofDescriptor> {
        let delegator = require_str(self.jws.payload(), "iss", "DG-SD-JWT")?;
        let range = self.jws.signed_range();
        Ok(ProofDescriptor {
            format: ProofFormat::Jws,
            alg: self.jws.alg_name(),
            key_ref: KeyRef {
                owner: delegator,
                kid: self.jws.kid().map(str::to_string),
            },
            signature: self.jws.signature().to_vec(),
            signed_range: Some(ByteRange {
                start: range.start,
                end: range.end,
            }),
        })
    }
}

fn key_binding(dg: &Map<String, Value>) -> Option<String> {
    let binding = dg.get("key_binding").or_else(|| dg.get("cnf"))?;
    match binding {
        Value::String(kid) => Some(kid.clone()),
        Value::Object(obj) => obj.get("kid").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

impl FormatAdapter for DgSdJwtAdapter {
    fn profile(&self) -> ProfileTag {
        ProfileTag::DgSdJwt
    }

    fn detect(&self, raw: &Value) -> bool {
        let text = match raw.as_str() {
            Some(t) => t,
            None => return false,
        };
        let jws_part = text.split('~').next().unwrap_or_default();
        CompactJws::parse(jws_part)
            .map(|jws| jws.payload().get("dg").map_or(false, Value::is_object))
            .unwrap_or(false)
    }

    fn normalize(&self, raw: &Value) -> Result<Normalized> {
        let sd = SdJwt::parse(raw)?;
        let payload = sd.jws.payload();
        let (dg, disclosed) = sd.grant_claims()?;
        let dg = Value::Object(dg);

        let delegator = require_str(payload, "iss", "DG-SD-JWT")?;
        let delegate = require_str(payload, "sub", "DG-SD-JWT")?;
        let not_before = timestamp(payload.get("nbf"), "nbf")?
            .ok_or_else(|| TrustError::Format("DG-SD-JWT missing 'nbf'".into()))?;
        let expires_at = timestamp(payload.get("exp"), "exp")?
            .ok_or_else(|| TrustError::Format("DG-SD-JWT missing 'exp'".into()))?;

        let scope: Scope = dg
            .get("scope")
            .cloned()
            .ok_or_else(|| TrustError::Format("grant missing scope".into()))
            .and_then(|v| {
                serde_json::from_value(v)
                    .map_err(|e| TrustError::Format(format!("invalid scope: {}", e)))
            })?;

        let raw_text = raw.as_str().unwrap_or_default().trim().to_string();
        let id = payload
            .get("jti")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| digest_id(sd.jws.raw()));

        Ok(Normalized::Grant(DelegationGrant {
            profile: ProfileTag::DgSdJwt,
            id,
            proof: sd.proof()?,
            delegator,
            delegate,
            scope,
            not_before,
            expires_at,
            status: status_ref(dg.get("status"))?,
            key_binding: dg.as_object().and_then(key_binding),
            constraints: dg.get("constraints").cloned().unwrap_or(Value::Null),
            proof_fully_verified: self.verifies_proofs(),
            disclosed,
            raw: raw_text,
        }))
    }

    fn extract_proofs(&self, raw: &Value) -> Result<Vec<ProofDescriptor>> {
        Ok(vec![SdJwt::parse(raw)?.proof()?])
    }

    fn verifies_proofs(&self) -> bool {
        true
    }
}
