//! Common test utilities shared across the scenario suites

use serde_json::Value;
use std::sync::Arc;
use trustgate_verifier::crypto::b64url_encode;
use trustgate_verifier::mint::{mint_grant, mint_vc_jwt, CredentialClaims, GrantClaims};
use trustgate_verifier::{
    AnchorLedger, Ed25519Signer, FixedClock, HolderBinding, InMemoryStatusSource, Policy, Scope, SignedVro,
    StaticKeySets, StatusList, StatusRef, VerificationRequest, Verifier, VerifierSettings, DETERMINISTIC_TIMESTAMP,
};

/// Pinned verification time
pub const NOW: i64 = DETERMINISTIC_TIMESTAMP;

/// Credential issuer
pub const ISSUER: &str = "did:web:issuer.example";

/// Status list shared by the credential (index 0) and link `i` (index `i`)
pub const STATUS_URL: &str = "https://status.example/lists/1";

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("trustgate_verifier=debug")
        .with_test_writer()
        .try_init();
}

/// Party `p` of a chain; party 0 is the credential subject
pub fn party(p: usize) -> String {
    if p == 0 {
        "did:example:alice".to_string()
    } else {
        format!("did:example:agent-{}", p)
    }
}

/// Authority used throughout the scenarios
pub fn payments_scope() -> Scope {
    Scope::new("api://payments", ["read", "write"])
}

/// Replace the protected header of a compact JWS (keeps payload and signature)
pub fn with_header(token: &str, header: Value) -> String {
    let rest = token.split_once('.').map(|(_, rest)| rest).unwrap_or(token);
    format!("{}.{}", b64url_encode(header.to_string()), rest)
}

/// A credential presented with a delegation chain of `depth` links
///
/// Link `i` (0-based) is signed by party `i`, delegates to party `i + 1`
/// and binds party `i + 1`'s key. Every party publishes its key set, and
/// each link's delegator publishes the key that signed the link.
pub struct Scenario {
    pub issuer: Ed25519Signer,
    pub parties: Vec<Ed25519Signer>,
    pub credential: CredentialClaims,
    pub links: Vec<GrantClaims>,
    pub policy: Policy,
    pub status: StatusList,
    pub publish_status: bool,
    pub settings: VerifierSettings,
}

impl Scenario {
    pub fn new(depth: usize) -> Self {
        let issuer = Ed25519Signer::from_seed("issuer-key-1", &[1u8; 32]).unwrap();
        let parties: Vec<Ed25519Signer> = (0..=depth)
            .map(|p| Ed25519Signer::from_seed(format!("party-{}-key", p), &[10 + p as u8; 32]).unwrap())
            .collect();

        let credential = CredentialClaims::new(ISSUER, party(0), NOW - 86_400, NOW + 86_400)
            .with_type("EmployeeCredential")
            .with_claim("role", Value::String("engineer".into()))
            .with_scope(payments_scope())
            .with_status(StatusRef::new(STATUS_URL, 0));

        let links = (0..depth)
            .map(|i| {
                GrantClaims::new(
                    format!("urn:dg:{}", i + 1),
                    party(i),
                    party(i + 1),
                    payments_scope(),
                    NOW - 3_600,
                    NOW + 3_600,
                )
                .bound_to(parties[i + 1].kid())
                .with_status(StatusRef::new(STATUS_URL, i as u64 + 1))
            })
            .collect();

        Self {
            issuer,
            parties,
            credential,
            links,
            policy: Policy::new("default"),
            status: StatusList::new(64),
            publish_status: true,
            settings: VerifierSettings::default(),
        }
    }

    pub fn credential_token(&self) -> String {
        mint_vc_jwt(&self.issuer, &self.credential).unwrap()
    }

    pub fn chain(&self) -> Vec<Value> {
        self.links
            .iter()
            .enumerate()
            .map(|(i, link)| Value::String(mint_grant(&self.parties[i], link).unwrap()))
            .collect()
    }

    /// Binding presented by the last party
    pub fn holder(&self) -> HolderBinding {
        let leaf = &self.parties[self.links.len()];
        HolderBinding::new("jws", "holder-proof", Some(leaf.kid().to_string()))
    }

    pub fn request(&self) -> VerificationRequest {
        VerificationRequest::new(Value::String(self.credential_token()), self.policy.id.clone())
            .with_chain(self.chain())
            .with_holder_binding(self.holder())
    }

    pub fn key_sets(&self) -> StaticKeySets {
        let mut sets = StaticKeySets::new().with(ISSUER, self.issuer.jwks());
        for (p, signer) in self.parties.iter().enumerate() {
            sets.insert(party(p), signer.jwks());
        }
        for (i, link) in self.links.iter().enumerate() {
            sets.insert(link.delegator.clone(), self.parties[i].jwks());
        }
        sets
    }

    pub fn status_source(&self) -> InMemoryStatusSource {
        let mut source = InMemoryStatusSource::new();
        if self.publish_status {
            source.insert(STATUS_URL, self.status.to_document(STATUS_URL));
        }
        source
    }

    fn builder(&self) -> trustgate_verifier::VerifierBuilder {
        Verifier::builder(Ed25519Signer::from_seed("verifier-key-1", &[42u8; 32]).unwrap())
            .policy(self.policy.clone())
            .key_sets(Arc::new(self.key_sets()))
            .status_source(Arc::new(self.status_source()))
            .clock(Arc::new(FixedClock::at(NOW)))
            .settings(self.settings.clone())
    }

    pub fn verifier(&self) -> Verifier {
        self.builder().build().unwrap()
    }

    pub fn verifier_with_ledger(&self, ledger: Arc<dyn AnchorLedger>) -> Verifier {
        self.builder().ledger(ledger).build().unwrap()
    }

    /// Verify [`Scenario::request`] with a fresh verifier
    pub async fn verify(&self) -> SignedVro {
        self.verifier().verify(&self.request()).await.unwrap()
    }
}
