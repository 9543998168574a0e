//! VC-JWT credentials with DG-SD-JWT delegation chains

use assert_matches::assert_matches;
use serde_json::json;
use trustgate_tests::common::*;
use trustgate_verifier::result::VerificationStatus;
use trustgate_verifier::{decode_signed_vro, ErrorClass, Outcome, Scope, Step};

#[tokio::test]
async fn test_credential_only_is_valid() {
    setup_test_logging();
    let scenario = Scenario::new(0);
    let signed = scenario.verify().await;
    let vro = &signed.vro;

    assert_eq!(vro.status, VerificationStatus::Valid, "{:?}", vro.failure);
    assert_eq!(vro.decision, "VERIFIED");
    assert!(vro.failure.is_none());
    assert_eq!(vro.chain_depth, 0);
    assert!(vro.chain_fingerprint.is_none());
    assert!(vro.proof_fully_verified);
    assert_eq!(vro.invariants.structural, Outcome::Passed);
    assert_eq!(vro.invariants.cryptographic, Outcome::Passed);
    assert_eq!(vro.invariants.temporal, Outcome::Passed);
    assert_eq!(vro.invariants.revocation, Outcome::Passed);
    assert!(vro.steps.iter().all(|s| s.outcome != Outcome::Failed));
    assert_eq!(vro.issuer.as_deref(), Some(ISSUER));
    assert_eq!(vro.subject.as_deref(), Some("did:example:alice"));
}

#[tokio::test]
async fn test_two_link_chain_is_valid() {
    let scenario = Scenario::new(2);
    let vro = scenario.verify().await.vro;

    assert!(vro.is_valid(), "{:?}", vro.failure);
    assert_eq!(vro.chain_depth, 2);
    assert!(vro.chain_fingerprint.is_some());
    assert_eq!(vro.invariants.authority_scope, Outcome::Passed);
    assert_eq!(vro.invariants.key_binding, Outcome::Passed);
    assert_eq!(vro.invariants.chain_integrity, Outcome::Passed);
}

#[tokio::test]
async fn test_second_link_expired() {
    let mut scenario = Scenario::new(2);
    scenario.links[1].not_before = NOW - 7_200;
    scenario.links[1].expires_at = NOW - 600;

    let vro = scenario.verify().await.vro;
    assert_eq!(vro.status, VerificationStatus::Invalid);
    assert_eq!(vro.decision, "REJECTED");
    let failure = vro.failure.unwrap();
    assert_eq!(failure.class, ErrorClass::ChainError);
    assert_eq!(failure.code, "E300");
    assert_eq!(failure.kind.as_deref(), Some("expired"));
    assert_eq!(failure.step, Some(Step::Temporal));
    assert_eq!(failure.link, Some(2));
    assert_eq!(vro.invariants.temporal, Outcome::Failed);
}

#[tokio::test]
async fn test_attenuated_chain_with_constraints() {
    let mut scenario = Scenario::new(3);
    scenario.links[1].scope = Scope::new("api://payments", ["read"]);
    scenario.links[2].scope = Scope::new("api://payments", ["read"]);
    scenario.links[2].constraints = Some(json!({"max_amount": 50}));

    let vro = scenario.verify().await.vro;
    assert!(vro.is_valid(), "{:?}", vro.failure);
    assert_eq!(vro.chain_depth, 3);
}

#[tokio::test]
async fn test_result_token_verifies_against_published_keys() {
    let scenario = Scenario::new(1);
    let verifier = scenario.verifier();
    let signed = verifier.verify(&scenario.request()).await.unwrap();

    let decoded = decode_signed_vro(&signed.token, &verifier.result_keys()).unwrap();
    assert_eq!(decoded, signed.vro);
    assert_eq!(decoded.expires_at - decoded.issued_at, 3_600);

    let stranger = trustgate_verifier::Ed25519Signer::from_seed("verifier-key-1", &[7u8; 32]).unwrap();
    assert_matches!(decode_signed_vro(&signed.token, &stranger.jwks()), Err(_));
}

#[tokio::test]
async fn test_vp_token_presentation() {
    let scenario = Scenario::new(1);
    let vp_token = json!({
        "vp_token": scenario.credential_token(),
        "delegation_chain": scenario.chain(),
        "holder_binding": scenario.holder(),
    });
    let signed = scenario.verifier().verify_vp_token(&vp_token, "default").await.unwrap();
    assert!(signed.vro.is_valid(), "{:?}", signed.vro.failure);
    assert_eq!(signed.vro.chain_depth, 1);
}
