//! VC-LD credentials with DG-LD delegation chains

use chrono::DateTime;
use serde_json::{json, Value};
use trustgate_tests::common::*;
use trustgate_verifier::{ErrorClass, HolderBinding, Outcome, ProfileTag, Stage, VerificationRequest};

fn rfc3339(t: i64) -> String {
    DateTime::from_timestamp(t, 0).unwrap().to_rfc3339()
}

fn ld_credential() -> Value {
    json!({
        "@context": ["https://www.w3.org/ns/credentials/v2"],
        "id": "urn:vc:ld:alice",
        "type": ["VerifiableCredential", "EmployeeCredential"],
        "issuer": {"id": ISSUER, "name": "Issuer"},
        "validFrom": rfc3339(NOW - 86_400),
        "validUntil": rfc3339(NOW + 86_400),
        "credentialSubject": {
            "id": party(0),
            "role": "engineer",
            "scope": payments_scope(),
        },
        "credentialStatus": {
            "type": "StatusList2021Entry",
            "statusListCredential": STATUS_URL,
            "statusListIndex": "0"
        },
        "proof": {
            "type": "Ed25519Signature2020",
            "verificationMethod": format!("{}#issuer-key-1", ISSUER),
            "proofValue": "z3FXQjecWufY46"
        }
    })
}

fn ld_grant(index: usize, bound_kid: &str) -> Value {
    json!({
        "@context": ["https://www.w3.org/ns/credentials/v2"],
        "id": format!("urn:dg:ld:{}", index + 1),
        "type": ["VerifiableCredential", "DelegationCredential"],
        "issuer": party(index),
        "validFrom": rfc3339(NOW - 3_600),
        "validUntil": rfc3339(NOW + 3_600),
        "credentialSubject": {
            "id": party(index + 1),
            "delegation": {
                "scope": payments_scope(),
                "keyBinding": bound_kid,
                "status": {"statusListCredential": STATUS_URL, "statusListIndex": index + 1}
            }
        },
        "proof": {
            "type": "Ed25519Signature2020",
            "verificationMethod": format!("{}#party-{}-key", party(index), index),
            "proofValue": "z58DAdFfa9"
        }
    })
}

fn ld_request(depth: usize) -> VerificationRequest {
    let chain = (0..depth)
        .map(|i| ld_grant(i, &format!("party-{}-key", i + 1)))
        .collect();
    VerificationRequest::new(ld_credential(), "default")
        .with_chain(chain)
        .with_holder_binding(HolderBinding::new(
            "jws",
            "holder-proof",
            Some(format!("party-{}-key", depth)),
        ))
}

#[tokio::test]
async fn test_linked_data_chain_is_structurally_valid() {
    setup_test_logging();
    let scenario = Scenario::new(2);
    let vro = scenario.verifier().verify(&ld_request(2)).await.unwrap().vro;

    assert!(vro.is_valid(), "{:?}", vro.failure);
    assert_eq!(vro.profile, Some(ProfileTag::VcLd));
    assert_eq!(vro.chain_depth, 2);
    assert!(!vro.proof_fully_verified);
    assert_eq!(vro.invariants.cryptographic, Outcome::Skipped);
    assert_eq!(vro.invariants.key_binding, Outcome::Passed);
    assert!(!vro.warnings.is_empty());
}

#[tokio::test]
async fn test_full_proof_policy_rejects_linked_data() {
    let mut scenario = Scenario::new(1);
    scenario.policy.require_full_proof = true;
    let vro = scenario.verifier().verify(&ld_request(1)).await.unwrap().vro;

    let failure = vro.failure.unwrap();
    assert_eq!(failure.class, ErrorClass::PolicyError);
    assert_eq!(failure.stage, Stage::Policy);
    assert_eq!(failure.step, None);
}

#[tokio::test]
async fn test_linked_data_grant_revoked() {
    let mut scenario = Scenario::new(1);
    scenario.status.revoke(1);
    let vro = scenario.verifier().verify(&ld_request(1)).await.unwrap().vro;

    let failure = vro.failure.unwrap();
    assert_eq!(failure.class, ErrorClass::ChainError);
    assert_eq!(failure.kind.as_deref(), Some("revoked"));
    assert_eq!(failure.link, Some(1));
}

#[tokio::test]
async fn test_mixed_encodings_in_one_chain() {
    let scenario = Scenario::new(2);
    let mut request = scenario.request();
    request.delegation_chain[1] = ld_grant(1, "party-2-key");

    let vro = scenario.verifier().verify(&request).await.unwrap().vro;
    assert!(vro.is_valid(), "{:?}", vro.failure);
    assert!(!vro.proof_fully_verified);
}
