//! OIDC4VP envelope unwrapping
//!
//! Accepts what a wallet posts back: an authorization response object with
//! a `vp_token`, a VP-JWT, a bare VC-JWT, or a JSON-LD
//! `VerifiablePresentation`. Transport-level authentication is not checked
//! here; the VP-JWT signature only contributes its key id as the holder
//! binding.

use super::type_list;
use crate::crypto::CompactJws;
use crate::cvc::HolderBinding;
use crate::error::{Result, TrustError};
use serde_json::Value;

/// Credential, chain and holder binding lifted out of a presentation
#[derive(Debug, Clone, PartialEq)]
pub struct PresentationEnvelope {
    /// Presented credential (VC-JWT string or VC-LD object)
    pub presentation: Value,
    /// Delegation chain tokens, root first
    pub delegation_chain: Vec<Value>,
    /// Holder binding proof, if the presentation carried one
    pub holder_binding: Option<HolderBinding>,
}

fn first_credential(vp: &Value) -> Result<Value> {
    match vp.get("verifiableCredential") {
        Some(Value::Array(items)) => items
            .first()
            .cloned()
            .ok_or_else(|| TrustError::Format("presentation has no credentials".into())),
        Some(v @ (Value::String(_) | Value::Object(_))) => Ok(v.clone()),
        _ => Err(TrustError::Format(
            "presentation missing verifiableCredential".into(),
        )),
    }
}

fn chain_of(value: Option<&Value>) -> Vec<Value> {
    value
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn holder_of(value: Option<&Value>) -> Result<Option<HolderBinding>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| TrustError::Format(format!("invalid holder_binding: {}", e))),
    }
}

fn unwrap_jwt(token: &str) -> Result<PresentationEnvelope> {
    let jws = CompactJws::parse(token)?;
    let payload = jws.payload();

    if let Some(vp) = payload.get("vp").filter(|v| v.is_object()) {
        let holder_binding = match holder_of(payload.get("holder_binding"))? {
            Some(hb) => Some(hb),
            None => Some(HolderBinding {
                binding_type: "jws".to_string(),
                proof: token.to_string(),
                kid: jws.kid().map(str::to_string),
            }),
        };
        let mut delegation_chain = chain_of(vp.get("delegation_chain"));
        if delegation_chain.is_empty() {
            delegation_chain = chain_of(payload.get("delegation_chain"));
        }
        return Ok(PresentationEnvelope {
            presentation: first_credential(vp)?,
            delegation_chain,
            holder_binding,
        });
    }

    if payload.get("vc").map_or(false, Value::is_object) {
        return Ok(PresentationEnvelope {
            presentation: Value::String(token.to_string()),
            delegation_chain: Vec::new(),
            holder_binding: None,
        });
    }

    Err(TrustError::Format(
        "vp_token JWT carries neither 'vp' nor 'vc'".into(),
    ))
}

fn unwrap_ld(doc: &Value) -> Result<PresentationEnvelope> {
    let types = type_list(doc.get("type"));
    if types.iter().any(|t| t == "VerifiablePresentation") {
        let holder_binding = match holder_of(doc.get("holder_binding"))? {
            Some(hb) => Some(hb),
            None => doc.get("proof").and_then(|proof| {
                let value = proof
                    .get("proofValue")
                    .or_else(|| proof.get("jws"))
                    .and_then(Value::as_str)?;
                Some(HolderBinding {
                    binding_type: proof
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("ld-proof")
                        .to_string(),
                    proof: value.to_string(),
                    kid: proof
                        .get("verificationMethod")
                        .and_then(Value::as_str)
                        .map(super::kid_from_method),
                })
            }),
        };
        return Ok(PresentationEnvelope {
            presentation: first_credential(doc)?,
            delegation_chain: chain_of(doc.get("delegation_chain")),
            holder_binding,
        });
    }

    if types.iter().any(|t| t == "VerifiableCredential") {
        return Ok(PresentationEnvelope {
            presentation: doc.clone(),
            delegation_chain: Vec::new(),
            holder_binding: None,
        });
    }

    Err(TrustError::Format(
        "vp_token object is neither a presentation nor a credential".into(),
    ))
}

/// Lift the credential, chain and holder binding out of a `vp_token`
pub fn unwrap_vp_token(vp_token: &Value) -> Result<PresentationEnvelope> {
    match vp_token {
        Value::Object(obj) if obj.contains_key("vp_token") => {
            let mut envelope = unwrap_vp_token(&obj["vp_token"])?;
            let outer_chain = chain_of(obj.get("delegation_chain"));
            if !outer_chain.is_empty() {
                envelope.delegation_chain = outer_chain;
            }
            if let Some(hb) = holder_of(obj.get("holder_binding"))? {
                envelope.holder_binding = Some(hb);
            }
            Ok(envelope)
        }
        Value::String(token) => unwrap_jwt(token.trim()),
        doc @ Value::Object(_) => unwrap_ld(doc),
        _ => Err(TrustError::Format(
            "vp_token must be a string or an object".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Ed25519Signer;
    use serde_json::json;

    #[test]
    fn test_vp_jwt_with_embedded_vc() {
        let holder = Ed25519Signer::from_seed("agent-key-1", &[4u8; 32]).unwrap();
        let vp = holder
            .sign_compact(
                "JWT",
                &json!({
                    "iss": "did:example:agent-1",
                    "vp": {
                        "type": ["VerifiablePresentation"],
                        "verifiableCredential": ["eyJ.vc.jwt"],
                        "delegation_chain": ["dg-1", "dg-2"]
                    }
                }),
            )
            .unwrap();

        let env = unwrap_vp_token(&Value::String(vp.clone())).unwrap();
        assert_eq!(env.presentation, json!("eyJ.vc.jwt"));
        assert_eq!(env.delegation_chain.len(), 2);
        let hb = env.holder_binding.unwrap();
        assert_eq!(hb.kid.as_deref(), Some("agent-key-1"));
        assert_eq!(hb.proof, vp);
    }

    #[test]
    fn test_json_ld_presentation() {
        let env = unwrap_vp_token(&json!({
            "type": ["VerifiablePresentation"],
            "verifiableCredential": [{"type": ["VerifiableCredential"], "issuer": "did:x"}],
            "proof": {
                "type": "Ed25519Signature2020",
                "verificationMethod": "did:example:agent-1#agent-key-1",
                "proofValue": "z5Qh"
            }
        }))
        .unwrap();
        assert!(env.presentation.is_object());
        assert_eq!(env.holder_binding.unwrap().kid.as_deref(), Some("agent-key-1"));
    }

    #[test]
    fn test_response_wrapper_overrides_chain() {
        let env = unwrap_vp_token(&json!({
            "vp_token": {"type": ["VerifiableCredential"], "issuer": "did:x"},
            "delegation_chain": ["dg-1"],
            "holder_binding": {"type": "dpop", "proof": "abc", "kid": "k"}
        }))
        .unwrap();
        assert_eq!(env.delegation_chain, vec![json!("dg-1")]);
        assert_eq!(env.holder_binding.unwrap().binding_type, "dpop");
    }

    #[test]
    fn test_rejects_other_shapes() {
        assert!(unwrap_vp_token(&json!(12)).is_err());
        assert!(unwrap_vp_token(&json!({"type": ["Other"]})).is_err());
        assert!(unwrap_vp_token(&json!({"type": ["VerifiablePresentation"]})).is_err());
    }
}
