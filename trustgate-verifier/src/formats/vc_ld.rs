//! VC-LD: W3C credential as a JSON-LD document
//!
//! Structural normalization only. The embedded linked-data proof is
//! described but not verified, and the result is flagged accordingly.

use super::{
    identifier, linked_data_proof, optional_scope, raw_text, require_str, status_ref, timestamp,
    type_list, FormatAdapter, Normalized, NormalizedCredential, ProfileTag, ProofDescriptor,
};
use crate::error::{Result, TrustError};
use serde_json::{json, Value};

/// Adapter for VC-LD credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct VcLdAdapter;

fn first_timestamp(doc: &Value, fields: &[&str]) -> Result<Option<i64>> {
    for field in fields {
        if let Some(t) = timestamp(doc.get(*field), field)? {
            return Ok(Some(t));
        }
    }
    Ok(None)
}

impl FormatAdapter for VcLdAdapter {
    fn profile(&self) -> ProfileTag {
        ProfileTag::VcLd
    }

    fn detect(&self, raw: &Value) -> bool {
        raw.is_object()
            && type_list(raw.get("type")).iter().any(|t| t == "VerifiableCredential")
            && raw.pointer("/credentialSubject/delegation").is_none()
    }

    fn normalize(&self, raw: &Value) -> Result<Normalized> {
        if !raw.is_object() {
            return Err(TrustError::Format("VC-LD must be a JSON object".into()));
        }

        let issuer = identifier(raw.get("issuer"))
            .ok_or_else(|| TrustError::Format("VC-LD missing issuer".into()))?;
        let subject_claims = raw
            .get("credentialSubject")
            .filter(|v| v.is_object())
            .cloned()
            .ok_or_else(|| TrustError::Format("VC-LD missing credentialSubject".into()))?;
        let subject = require_str(&subject_claims, "id", "credentialSubject")?;

        let credential_types = type_list(raw.get("type"));
        let scope = optional_scope(subject_claims.get("scope"))?;
        let claims = json!({
            "type": credential_types.clone(),
            "credentialSubject": subject_claims,
        });

        Ok(Normalized::Credential(NormalizedCredential {
            profile: ProfileTag::VcLd,
            id: raw.get("id").and_then(Value::as_str).map(str::to_string),
            proof: linked_data_proof(raw, &issuer)?,
            issuer,
            subject,
            credential_types,
            claims,
            not_before: first_timestamp(raw, &["validFrom", "issuanceDate"])?,
            expires_at: first_timestamp(raw, &["validUntil", "expirationDate"])?,
            status: status_ref(raw.get("credentialStatus"))?,
            scope,
            proof_fully_verified: self.verifies_proofs(),
            raw: raw_text(raw),
        }))
    }

    fn extract_proofs(&self, raw: &Value) -> Result<Vec<ProofDescriptor>> {
        let issuer = identifier(raw.get("issuer"))
            .ok_or_else(|| TrustError::Format("VC-LD missing issuer".into()))?;
        Ok(vec![linked_data_proof(raw, &issuer)?])
    }

    fn verifies_proofs(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::ProofFormat;

    fn document() -> Value {
        json!({
            "@context": ["https://www.w3.org/2018/credentials/v1"],
            "id": "urn:vc:ld:1",
            "type": ["VerifiableCredential", "EmployeeCredential"],
            "issuer": {"id": "did:web:issuer.example", "name": "Issuer"},
            "validFrom": "2024-12-29T00:00:00Z",
            "validUntil": "2025-12-29T00:00:00Z",
            "credentialSubject": {"id": "did:example:alice", "role": "engineer"},
            "proof": {
                "type": "Ed25519Signature2020",
                "verificationMethod": "did:web:issuer.example#key-1",
                "proofValue": "z3FXQjecWufY46"
            }
        })
    }

    #[test]
    fn test_structural_normalization() {
        let raw = document();
        assert!(VcLdAdapter.detect(&raw));
        let cred = match VcLdAdapter.normalize(&raw).unwrap() {
            Normalized::Credential(c) => c,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(cred.issuer, "did:web:issuer.example");
        assert_eq!(cred.subject, "did:example:alice");
        assert!(!cred.proof_fully_verified);
        assert_eq!(cred.proof.format, ProofFormat::LinkedData);
        assert_eq!(cred.proof.key_ref.kid.as_deref(), Some("key-1"));
        assert!(cred.not_before.unwrap() < cred.expires_at.unwrap());
    }

    #[test]
    fn test_missing_proof_is_format_error() {
        let mut raw = document();
        raw.as_object_mut().unwrap().remove("proof");
        assert!(matches!(VcLdAdapter.normalize(&raw), Err(TrustError::Format(_))));
    }

    #[test]
    fn test_delegation_document_not_detected() {
        let mut raw = document();
        raw["credentialSubject"]["delegation"] = json!({"scope": {}});
        assert!(!VcLdAdapter.detect(&raw));
    }
}
