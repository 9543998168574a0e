//! Fixtures shared by unit tests

use crate::clock::DETERMINISTIC_TIMESTAMP;
use crate::crypto::{Ed25519Signer, StaticKeySets};
use crate::cvc::{Cvc, CvcBuilder, HolderBinding};
use crate::formats::{AdapterRegistry, NormalizedCredential, ParsedLink};
use crate::mint::{mint_grant, mint_vc_jwt, CredentialClaims, GrantClaims};
use crate::policy::Policy;
use crate::scope::Scope;
use serde_json::{json, Value};

pub const NOW: i64 = DETERMINISTIC_TIMESTAMP;
pub const ISSUER: &str = "did:web:issuer.example";

fn issuer_signer() -> Ed25519Signer {
    Ed25519Signer::from_seed("issuer-key-1", &[1u8; 32]).unwrap()
}

fn payments_scope() -> Scope {
    Scope::new("api://payments", ["read", "write"])
}

/// VC-JWT credential for `subject`, normalized
pub fn credential(issuer: &str, subject: &str) -> NormalizedCredential {
    let claims = CredentialClaims::new(issuer, subject, NOW - 86_400, NOW + 86_400)
        .with_type("EmployeeCredential")
        .with_claim("role", json!("engineer"))
        .with_scope(payments_scope());
    let token = mint_vc_jwt(&issuer_signer(), &claims).unwrap();
    AdapterRegistry::standard()
        .normalize_credential(&Value::String(token), None)
        .unwrap()
}

/// Single parsed DG-SD-JWT link
pub fn grant_link(delegator: &str, delegate: &str) -> ParsedLink {
    let signer = Ed25519Signer::from_seed("grant-key-1", &[2u8; 32]).unwrap();
    let grant = GrantClaims::new("urn:dg:test", delegator, delegate, payments_scope(), NOW - 60, NOW + 60);
    let token = mint_grant(&signer, &grant).unwrap();
    AdapterRegistry::standard().parse_link(&Value::String(token))
}

/// Principal `alice` delegating through `depth` agents
///
/// Party 0 is the credential subject; link `i` is signed by party `i`,
/// grants to party `i + 1` and binds that party's key.
pub struct ChainFixture {
    pub signers: Vec<Ed25519Signer>,
    pub links: Vec<GrantClaims>,
    pub policy: Policy,
}

fn party(p: usize) -> String {
    if p == 0 {
        "did:example:alice".to_string()
    } else {
        format!("did:example:agent-{}", p)
    }
}

impl ChainFixture {
    pub fn new(depth: usize) -> Self {
        let signers: Vec<Ed25519Signer> = (0..=depth)
            .map(|p| Ed25519Signer::from_seed(format!("party-{}-key", p), &[10 + p as u8; 32]).unwrap())
            .collect();
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
                .bound_to(signers[i + 1].kid())
            })
            .collect();
        Self {
            signers,
            links,
            policy: Policy::new("default"),
        }
    }

    pub fn credential(&self) -> NormalizedCredential {
        credential(ISSUER, &party(0))
    }

    pub fn parsed_chain(&self) -> Vec<ParsedLink> {
        let registry = AdapterRegistry::standard();
        self.links
            .iter()
            .enumerate()
            .map(|(i, link)| {
                let token = mint_grant(&self.signers[i], link).unwrap();
                registry.parse_link(&Value::String(token))
            })
            .collect()
    }

    pub fn key_sets(&self) -> StaticKeySets {
        let mut sets = StaticKeySets::new().with(ISSUER, issuer_signer().jwks());
        for (p, signer) in self.signers.iter().enumerate() {
            sets.insert(party(p), signer.jwks());
        }
        for (i, link) in self.links.iter().enumerate() {
            sets.insert(link.delegator.clone(), self.signers[i].jwks());
        }
        sets
    }

    pub fn holder(&self) -> Option<HolderBinding> {
        let leaf = &self.signers[self.links.len()];
        Some(HolderBinding::new("jws", "holder-proof", Some(leaf.kid().to_string())))
    }

    pub fn cvc(&self) -> Cvc {
        CvcBuilder::new("req-fixture")
            .credential(self.credential())
            .chain(self.parsed_chain())
            .policy(self.policy.clone())
            .holder_binding(self.holder())
            .received_at(NOW)
            .build()
            .unwrap()
    }
}
