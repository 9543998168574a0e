//! DG-LD: delegation grant as a JSON-LD credential
//!
//! The grant lives under `credentialSubject.delegation`. Like VC-LD this is
//! structural normalization only.

use super::{
    digest_id, identifier, linked_data_proof, raw_text, require_str, status_ref, timestamp,
    DelegationGrant, FormatAdapter, Normalized, ProfileTag, ProofDescriptor,
};
use crate::error::{Result, TrustError};
use crate::scope::Scope;
use serde_json::Value;

/// Adapter for DG-LD grants
#[derive(Debug, Clone, Copy, Default)]
pub struct DgLdAdapter;

fn window_bound(doc: &Value, fields: &[&str], what: &str) -> Result<i64> {
    for field in fields {
        if let Some(t) = timestamp(doc.get(*field), field)? {
            return Ok(t);
        }
    }
    Err(TrustError::Format(format!("DG-LD missing {}", what)))
}

impl FormatAdapter for DgLdAdapter {
    fn profile(&self) -> ProfileTag {
        ProfileTag::DgLd
    }

    fn detect(&self, raw: &Value) -> bool {
        raw.pointer("/credentialSubject/delegation")
            .map_or(false, Value::is_object)
    }

    fn normalize(&self, raw: &Value) -> Result<Normalized> {
        let delegation = raw
            .pointer("/credentialSubject/delegation")
            .filter(|v| v.is_object())
            .ok_or_else(|| TrustError::Format("DG-LD missing credentialSubject.delegation".into()))?;

        let delegator = identifier(raw.get("issuer"))
            .ok_or_else(|| TrustError::Format("DG-LD missing issuer".into()))?;
        let delegate = raw
            .get("credentialSubject")
            .map(|cs| require_str(cs, "id", "credentialSubject"))
            .unwrap_or_else(|| Err(TrustError::Format("DG-LD missing credentialSubject".into())))?;

        let scope: Scope = delegation
            .get("scope")
            .cloned()
            .ok_or_else(|| TrustError::Format("grant missing scope".into()))
            .and_then(|v| {
                serde_json::from_value(v)
                    .map_err(|e| TrustError::Format(format!("invalid scope: {}", e)))
            })?;

        let key_binding = match delegation.get("keyBinding") {
            Some(Value::String(kid)) => Some(kid.clone()),
            Some(Value::Object(obj)) => obj.get("kid").and_then(Value::as_str).map(str::to_string),
            _ => None,
        };

        let status = match status_ref(delegation.get("status"))? {
            Some(s) => Some(s),
            None => status_ref(raw.get("credentialStatus"))?,
        };

        let text = raw_text(raw);
        Ok(Normalized::Grant(DelegationGrant {
            profile: ProfileTag::DgLd,
            id: raw
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| digest_id(&text)),
            proof: linked_data_proof(raw, &delegator)?,
            delegator,
            delegate,
            scope,
            not_before: window_bound(raw, &["validFrom", "issuanceDate"], "validFrom")?,
            expires_at: window_bound(raw, &["validUntil", "expirationDate"], "validUntil")?,
            status,
            key_binding,
            constraints: delegation.get("constraints").cloned().unwrap_or(Value::Null),
            proof_fully_verified: self.verifies_proofs(),
            disclosed: Vec::new(),
            raw: text,
        }))
    }

    fn extract_proofs(&self, raw: &Value) -> Result<Vec<ProofDescriptor>> {
        let delegator = identifier(raw.get("issuer"))
            .ok_or_else(|| TrustError::Format("DG-LD missing issuer".into()))?;
        Ok(vec![linked_data_proof(raw, &delegator)?])
    }

    fn verifies_proofs(&self) -> bool {
        false
    }
}
