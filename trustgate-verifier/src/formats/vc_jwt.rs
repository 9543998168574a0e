//! VC-JWT: W3C credential carried in the `vc` claim of a compact JWS

use super::{
    identifier, optional_scope, require_str, status_ref, timestamp, type_list, ByteRange,
    FormatAdapter, Normalized, NormalizedCredential, ProfileTag, ProofDescriptor, ProofFormat,
};
use crate::crypto::{CompactJws, KeyRef};
use crate::error::{Result, TrustError};
use serde_json::{json, Value};

/// Adapter for VC-JWT credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct VcJwtAdapter;

impl VcJwtAdapter {
    fn parse(raw: &Value) -> Result<CompactJws> {
        let token = raw
            .as_str()
            .ok_or_else(|| TrustError::Format("VC-JWT must be a string".into()))?;
        CompactJws::parse(token)
    }

    fn proof(jws: &CompactJws, issuer: &str) -> ProofDescriptor {
        let range = jws.signed_range();
        ProofDescriptor {
            format: ProofFormat::Jws,
            alg: jws.alg_name(),
            key_ref: KeyRef {
                owner: issuer.to_string(),
                kid: jws.kid().map(str::to_string),
            },
            signature: jws.signature().to_vec(),
            signed_range: Some(ByteRange {
                start: range.start,
                end: range.end,
            }),
        }
    }

    fn issuer(payload: &Value, vc: &Value) -> Result<String> {
        identifier(payload.get("iss"))
            .or_else(|| identifier(vc.get("issuer")))
            .ok_or_else(|| TrustError::Format("VC-JWT missing issuer".into()))
    }
}

impl FormatAdapter for VcJwtAdapter {
    fn profile(&self) -> ProfileTag {
        ProfileTag::VcJwt
    }

    fn detect(&self, raw: &Value) -> bool {
        match raw.as_str() {
            Some(token) if !token.contains('~') => CompactJws::parse(token)
                .map(|jws| jws.payload().get("vc").map_or(false, Value::is_object))
                .unwrap_or(false),
            _ => false,
        }
    }

    fn normalize(&self, raw: &Value) -> Result<Normalized> {
        let jws = Self::parse(raw)?;
        let payload = jws.payload();
        let vc = payload
            .get("vc")
            .filter(|v| v.is_object())
            .ok_or_else(|| TrustError::Format("VC-JWT missing 'vc' claim".into()))?;

        let issuer = Self::issuer(payload, vc)?;
        let subject_claims = vc
            .get("credentialSubject")
            .filter(|v| v.is_object())
            .cloned()
            .ok_or_else(|| TrustError::Format("VC-JWT missing credentialSubject".into()))?;
        let subject = match payload.get("sub").and_then(Value::as_str) {
            Some(sub) => sub.to_string(),
            None => require_str(&subject_claims, "id", "credentialSubject")?,
        };

        let credential_types = type_list(vc.get("type"));
        if credential_types.is_empty() {
            return Err(TrustError::Format("VC-JWT missing credential type".into()));
        }

        let not_before = match timestamp(payload.get("nbf"), "nbf")? {
            Some(t) => Some(t),
            None => timestamp(vc.get("validFrom"), "validFrom")?,
        };
        let expires_at = match timestamp(payload.get("exp"), "exp")? {
            Some(t) => Some(t),
            None => timestamp(vc.get("validUntil"), "validUntil")?,
        };

        let scope = optional_scope(subject_claims.get("scope"))?;
        let claims = json!({
            "type": credential_types.clone(),
            "credentialSubject": subject_claims,
        });

        Ok(Normalized::Credential(NormalizedCredential {
            profile: ProfileTag::VcJwt,
            id: payload
                .get("jti")
                .or_else(|| vc.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string),
            proof: Self::proof(&jws, &issuer),
            issuer,
            subject,
            claims,
            scope,
            credential_types,
            not_before,
            expires_at,
            status: status_ref(vc.get("credentialStatus"))?,
            proof_fully_verified: self.verifies_proofs(),
            raw: jws.raw().to_string(),
        }))
    }

    fn extract_proofs(&self, raw: &Value) -> Result<Vec<ProofDescriptor>> {
        let jws = Self::parse(raw)?;
        let vc = jws.payload().get("vc").cloned().unwrap_or(Value::Null);
        let issuer = Self::issuer(jws.payload(), &vc)?;
        Ok(vec![Self::proof(&jws, &issuer)])
    }

    fn verifies_proofs(&self) -> bool {
        true
    }
}
