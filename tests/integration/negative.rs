//! Rejections: one terminal classification and the step that produced it

use serde_json::{json, Value};
use trustgate_tests::common::*;
use trustgate_verifier::result::{Failure, VerificationStatus};
use trustgate_verifier::{ErrorClass, HolderBinding, Outcome, Scope, Stage, Step, VerificationRequest};

async fn reject(scenario: &Scenario, request: &VerificationRequest) -> Failure {
    let vro = scenario.verifier().verify(request).await.unwrap().vro;
    assert_eq!(vro.status, VerificationStatus::Invalid);
    vro.failure.expect("rejected result carries a failure")
}

#[tokio::test]
async fn test_revoked_link() {
    let mut scenario = Scenario::new(3);
    scenario.status.revoke(2);
    let failure = reject(&scenario, &scenario.request()).await;
    assert_eq!(failure.class, ErrorClass::ChainError);
    assert_eq!(failure.kind.as_deref(), Some("revoked"));
    assert_eq!(failure.stage, Stage::Verification);
    assert_eq!(failure.step, Some(Step::Revocation));
    assert_eq!(failure.link, Some(2));
}

#[tokio::test]
async fn test_revoked_credential() {
    let mut scenario = Scenario::new(1);
    scenario.status.revoke(0);
    let failure = reject(&scenario, &scenario.request()).await;
    assert_eq!(failure.class, ErrorClass::ProofError);
    assert_eq!(failure.kind.as_deref(), Some("revoked"));
    assert_eq!(failure.link, None);
}

#[tokio::test]
async fn test_credential_not_yet_valid() {
    let mut scenario = Scenario::new(1);
    scenario.credential.not_before = NOW + 600;
    let failure = reject(&scenario, &scenario.request()).await;
    assert_eq!(failure.class, ErrorClass::ProofError);
    assert_eq!(failure.kind.as_deref(), Some("expired"));
    assert_eq!(failure.step, Some(Step::Temporal));
    assert_eq!(failure.link, None);
}

#[tokio::test]
async fn test_link_not_yet_valid() {
    let mut scenario = Scenario::new(3);
    scenario.links[2].not_before = NOW + 600;
    let failure = reject(&scenario, &scenario.request()).await;
    assert_eq!(failure.class, ErrorClass::ChainError);
    assert_eq!(failure.kind.as_deref(), Some("expired"));
    assert_eq!(failure.step, Some(Step::Temporal));
    assert_eq!(failure.link, Some(3));
}

#[tokio::test]
async fn test_scope_escalation() {
    let mut scenario = Scenario::new(2);
    scenario.links[1].scope = Scope::new("api://payments", ["read", "write", "admin"]);
    let failure = reject(&scenario, &scenario.request()).await;
    assert_eq!(failure.class, ErrorClass::ScopeViolation);
    assert_eq!(failure.code, "E400");
    assert_eq!(failure.step, Some(Step::AuthorityScope));
    assert_eq!(failure.link, Some(2));
}

#[tokio::test]
async fn test_root_link_must_come_from_subject() {
    let mut scenario = Scenario::new(1);
    scenario.links[0].delegator = "did:example:mallory".into();
    let failure = reject(&scenario, &scenario.request()).await;
    assert_eq!(failure.class, ErrorClass::ScopeViolation);
    assert_eq!(failure.link, Some(1));
}

#[tokio::test]
async fn test_holder_key_mismatch() {
    let scenario = Scenario::new(2);
    let request = scenario
        .request()
        .with_holder_binding(HolderBinding::new("jws", "holder-proof", Some("someone-else".into())));
    let failure = reject(&scenario, &request).await;
    assert_eq!(failure.class, ErrorClass::ChainError);
    assert_eq!(failure.kind.as_deref(), Some("keyBinding"));
    assert_eq!(failure.step, Some(Step::KeyBinding));
    assert_eq!(failure.link, Some(2));
}

#[tokio::test]
async fn test_intermediate_binding_mismatch() {
    let mut scenario = Scenario::new(2);
    scenario.links[0].key_binding = Some("party-9-key".into());
    let failure = reject(&scenario, &scenario.request()).await;
    assert_eq!(failure.class, ErrorClass::ChainError);
    assert_eq!(failure.kind.as_deref(), Some("keyBinding"));
    assert_eq!(failure.link, Some(1));
}

#[tokio::test]
async fn test_link_algorithm_confusion() {
    let scenario = Scenario::new(2);
    let mut request = scenario.request();
    let original = request.delegation_chain[0].as_str().unwrap().to_string();
    request.delegation_chain[0] = Value::String(with_header(
        &original,
        json!({"alg": "HS256", "typ": "dg+sd-jwt", "kid": "party-0-key"}),
    ));

    let failure = reject(&scenario, &request).await;
    assert_eq!(failure.class, ErrorClass::ChainError);
    assert_eq!(failure.kind.as_deref(), Some("signature"));
    assert_eq!(failure.step, Some(Step::Cryptographic));
    assert_eq!(failure.link, Some(1));
}

#[tokio::test]
async fn test_credential_algorithm_confusion() {
    let scenario = Scenario::new(0);
    let token = with_header(
        &scenario.credential_token(),
        json!({"alg": "HS256", "typ": "vc+jwt", "kid": "issuer-key-1"}),
    );
    let request = VerificationRequest::new(Value::String(token), "default").with_holder_binding(scenario.holder());

    let failure = reject(&scenario, &request).await;
    assert_eq!(failure.class, ErrorClass::ProofError);
    assert_eq!(failure.kind.as_deref(), Some("algorithm"));
}

#[tokio::test]
async fn test_tampered_credential_signature() {
    let scenario = Scenario::new(0);
    let mut chars: Vec<char> = scenario.credential_token().chars().collect();
    let at = chars.len() - 10;
    chars[at] = if chars[at] == 'A' { 'B' } else { 'A' };
    let token: String = chars.into_iter().collect();
    let request = VerificationRequest::new(Value::String(token), "default").with_holder_binding(scenario.holder());

    let failure = reject(&scenario, &request).await;
    assert_eq!(failure.class, ErrorClass::ProofError);
    assert_eq!(failure.kind.as_deref(), Some("signature"));
}

#[tokio::test]
async fn test_unknown_issuer_key() {
    let scenario = Scenario::new(0);
    let rotated = Scenario {
        issuer: trustgate_verifier::Ed25519Signer::from_seed("issuer-key-2", &[2u8; 32]).unwrap(),
        ..Scenario::new(0)
    };
    let request = VerificationRequest::new(Value::String(rotated.credential_token()), "default")
        .with_holder_binding(scenario.holder());

    let failure = reject(&scenario, &request).await;
    assert_eq!(failure.class, ErrorClass::ProofError);
    assert_eq!(failure.kind.as_deref(), Some("keyNotFound"));
}

#[tokio::test]
async fn test_malformed_link_keeps_position() {
    let scenario = Scenario::new(2);
    let mut request = scenario.request();
    request.delegation_chain[1] = json!("not-a-grant");

    let vro = scenario.verifier().verify(&request).await.unwrap().vro;
    let failure = vro.failure.unwrap();
    assert_eq!(failure.class, ErrorClass::ChainError);
    assert_eq!(failure.kind.as_deref(), Some("structural"));
    assert_eq!(failure.link, Some(2));
    assert_eq!(vro.chain_depth, 2);
    assert_eq!(vro.invariants.structural, Outcome::Failed);
}

#[tokio::test]
async fn test_depth_limit() {
    let scenario = Scenario::new(4);
    let failure = reject(&scenario, &scenario.request()).await;
    assert_eq!(failure.class, ErrorClass::ChainError);
    assert_eq!(failure.kind.as_deref(), Some("depth"));
}

#[tokio::test]
async fn test_diagnostics_reports_every_failure() {
    let mut scenario = Scenario::new(3);
    scenario.settings.diagnostics = true;
    scenario.links[0].expires_at = NOW - 600;
    scenario.status.revoke(3);

    let vro = scenario.verify().await.vro;
    let first = vro.failure.unwrap();
    assert_eq!(first.kind.as_deref(), Some("expired"));
    assert_eq!(first.link, Some(1));
    assert!(vro
        .diagnostics
        .iter()
        .any(|f| f.kind.as_deref() == Some("revoked") && f.link == Some(3)));
}

#[tokio::test]
async fn test_unrecognized_credential_is_format_error() {
    let scenario = Scenario::new(0);
    let request = VerificationRequest::new(json!({"hello": "world"}), "default");
    let failure = reject(&scenario, &request).await;
    assert_eq!(failure.class, ErrorClass::FormatError);
    assert_eq!(failure.code, "E100");
    assert_eq!(failure.stage, Stage::Intake);
    assert_eq!(failure.step, Some(Step::Structural));
}

#[tokio::test]
async fn test_policy_rules_report_their_stage() {
    let mut scenario = Scenario::new(1);
    scenario.policy.required_claims = vec!["clearance".into()];
    let failure = reject(&scenario, &scenario.request()).await;
    assert_eq!(failure.class, ErrorClass::PolicyError);
    assert_eq!(failure.stage, Stage::Policy);
    assert_eq!(failure.step, None);

    let scenario = Scenario::new(1);
    let request = VerificationRequest::new(Value::String(scenario.credential_token()), "missing");
    let failure = reject(&scenario, &request).await;
    assert_eq!(failure.class, ErrorClass::PolicyError);
    assert_eq!(failure.stage, Stage::Intake);
}
