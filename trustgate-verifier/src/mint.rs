//! Issuance helpers
//!
//! Produce VC-JWT credentials and DG-SD-JWT grants signed with an
//! [`Ed25519Signer`]. Status list documents come from
//! [`StatusList::to_document`](crate::status::StatusList::to_document).

use crate::crypto::{b64url_encode, Ed25519Signer};
use crate::error::Result;
use crate::formats::dg_sd_jwt::Disclosure;
use crate::scope::Scope;
use crate::status::StatusRef;
use serde_json::{json, Map, Value};

/// Contents of a VC-JWT credential
#[derive(Debug, Clone)]
pub struct CredentialClaims {
    /// Credential id (`jti`)
    pub id: Option<String>,
    /// Issuer identifier
    pub issuer: String,
    /// Subject identifier
    pub subject: String,
    /// Types beyond `VerifiableCredential`
    pub types: Vec<String>,
    /// Not valid before
    pub not_before: i64,
    /// Not valid after
    pub expires_at: i64,
    /// Extra `credentialSubject` claims
    pub claims: Map<String, Value>,
    /// Authority held by the subject
    pub scope: Option<Scope>,
    /// Revocation entry
    pub status: Option<StatusRef>,
}

impl CredentialClaims {
    /// Credential valid over `[not_before, expires_at]`
    pub fn new(issuer: impl Into<String>, subject: impl Into<String>, not_before: i64, expires_at: i64) -> Self {
        Self {
            id: None,
            issuer: issuer.into(),
            subject: subject.into(),
            types: Vec::new(),
            not_before,
            expires_at,
            claims: Map::new(),
            scope: None,
            status: None,
        }
    }

    /// Add a credential type
    pub fn with_type(mut self, credential_type: impl Into<String>) -> Self {
        self.types.push(credential_type.into());
        self
    }

    /// Add a subject claim
    pub fn with_claim(mut self, name: impl Into<String>, value: Value) -> Self {
        self.claims.insert(name.into(), value);
        self
    }

    /// Set the subject's authority
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Set the revocation entry
    pub fn with_status(mut self, status: StatusRef) -> Self {
        self.status = Some(status);
        self
    }
}

fn status_entry(status: &StatusRef) -> Value {
    json!({
        "type": "StatusList2021Entry",
        "statusListCredential": status.url,
        "statusListIndex": status.index.to_string(),
    })
}

/// Sign a VC-JWT
pub fn mint_vc_jwt(signer: &Ed25519Signer, claims: &CredentialClaims) -> Result<String> {
    let mut subject = claims.claims.clone();
    subject.insert("id".into(), Value::String(claims.subject.clone()));
    if let Some(scope) = &claims.scope {
        subject.insert("scope".into(), serde_json::to_value(scope)?);
    }

    let mut types = vec!["VerifiableCredential".to_string()];
    types.extend(claims.types.iter().cloned());

    let mut vc = json!({
        "@context": ["https://www.w3.org/ns/credentials/v2"],
        "type": types,
        "issuer": claims.issuer,
        "credentialSubject": subject,
    });
    if let Some(status) = &claims.status {
        vc["credentialStatus"] = status_entry(status);
    }

    let mut payload = json!({
        "iss": claims.issuer,
        "sub": claims.subject,
        "nbf": claims.not_before,
        "exp": claims.expires_at,
        "vc": vc,
    });
    if let Some(id) = &claims.id {
        payload["jti"] = Value::String(id.clone());
    }
    signer.sign_compact("vc+jwt", &payload)
}

/// Contents of a DG-SD-JWT grant
#[derive(Debug, Clone)]
pub struct GrantClaims {
    /// Grant id (`jti`)
    pub id: String,
    /// Party granting authority
    pub delegator: String,
    /// Party receiving authority
    pub delegate: String,
    /// Granted authority
    pub scope: Scope,
    /// Not valid before
    pub not_before: i64,
    /// Not valid after
    pub expires_at: i64,
    /// Key id the delegate must present with
    pub key_binding: Option<String>,
    /// Revocation entry
    pub status: Option<StatusRef>,
    /// Constraints, issued as a selective disclosure
    pub constraints: Option<Value>,
}

impl GrantClaims {
    /// Grant from `delegator` to `delegate`
    pub fn new(
        id: impl Into<String>,
        delegator: impl Into<String>,
        delegate: impl Into<String>,
        scope: Scope,
        not_before: i64,
        expires_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            delegator: delegator.into(),
            delegate: delegate.into(),
            scope,
            not_before,
            expires_at,
            key_binding: None,
            status: None,
            constraints: None,
        }
    }

    /// Bind the delegate to a key id
    pub fn bound_to(mut self, kid: impl Into<String>) -> Self {
        self.key_binding = Some(kid.into());
        self
    }

    /// Set the revocation entry
    pub fn with_status(mut self, status: StatusRef) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach disclosed constraints
    pub fn with_constraints(mut self, constraints: Value) -> Self {
        self.constraints = Some(constraints);
        self
    }
}

/// Sign a DG-SD-JWT; constraints become a salted disclosure
pub fn mint_grant(signer: &Ed25519Signer, grant: &GrantClaims) -> Result<String> {
    let mut dg = json!({ "scope": grant.scope });
    if let Some(kid) = &grant.key_binding {
        dg["key_binding"] = json!({ "kid": kid });
    }
    if let Some(status) = &grant.status {
        dg["status"] = json!({ "url": status.url, "index": status.index });
    }

    let disclosures: Vec<Disclosure> = grant
        .constraints
        .iter()
        .map(|c| Disclosure::new(b64url_encode(rand::random::<[u8; 16]>()), "constraints", c.clone()))
        .collect();
    if !disclosures.is_empty() {
        dg["_sd"] = Value::Array(disclosures.iter().map(|d| Value::String(d.digest())).collect());
    }

    let payload = json!({
        "iss": grant.delegator,
        "sub": grant.delegate,
        "jti": grant.id,
        "nbf": grant.not_before,
        "exp": grant.expires_at,
        "dg": dg,
    });
    let mut token = signer.sign_compact("dg+sd-jwt", &payload)?;
    for disclosure in &disclosures {
        token.push('~');
        token.push_str(&disclosure.encoded);
    }
    token.push('~');
    Ok(token)
}
