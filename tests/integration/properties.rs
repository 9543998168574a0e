//! Cross-cutting guarantees: determinism, format independence, fail-closed
//! defaults and cost growth with chain depth

use chrono::DateTime;
use serde_json::{json, Value};
use trustgate_tests::common::*;
use trustgate_verifier::result::VerificationStatus;
use trustgate_verifier::{chain_fingerprint, AdapterRegistry, CvcBuilder, ErrorClass, Outcome, ProfileTag, Step};

#[tokio::test]
async fn test_independent_runs_are_byte_identical() {
    let scenario = Scenario::new(2);
    let request = scenario.request();

    let a = scenario.verifier().verify(&request).await.unwrap();
    let b = scenario.verifier().verify(&request).await.unwrap();
    assert_eq!(a.vro.canonical_bytes().unwrap(), b.vro.canonical_bytes().unwrap());
    assert_eq!(a.token, b.token);
    assert_eq!(a.vro.chain_fingerprint, b.vro.chain_fingerprint);
    assert_eq!(a.vro.issued_at, NOW);
}

#[test]
fn test_fingerprint_tracks_order() {
    let scenario = Scenario::new(2);
    let registry = AdapterRegistry::standard();
    let links: Vec<_> = scenario.chain().iter().map(|raw| registry.parse_link(raw)).collect();

    let forward = chain_fingerprint(&links).unwrap();
    assert_eq!(chain_fingerprint(&links).unwrap(), forward);

    let reversed: Vec<_> = links.iter().rev().cloned().collect();
    assert_ne!(chain_fingerprint(&reversed).unwrap(), forward);
    assert_eq!(chain_fingerprint(&[]), None);
}

fn ld_equivalent() -> Value {
    let iso = |t: i64| DateTime::from_timestamp(t, 0).unwrap().to_rfc3339();
    json!({
        "@context": ["https://www.w3.org/ns/credentials/v2"],
        "type": ["VerifiableCredential", "EmployeeCredential"],
        "issuer": ISSUER,
        "validFrom": iso(NOW - 86_400),
        "validUntil": iso(NOW + 86_400),
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

#[tokio::test]
async fn test_equivalent_encodings_agree() {
    let scenario = Scenario::new(1);
    let registry = AdapterRegistry::standard();
    let jwt = registry
        .normalize_credential(&Value::String(scenario.credential_token()), None)
        .unwrap();
    let ld = registry.normalize_credential(&ld_equivalent(), None).unwrap();

    let cvc = |credential| {
        CvcBuilder::new("req-equivalence")
            .credential(credential)
            .policy(scenario.policy.clone())
            .received_at(NOW)
            .build()
            .unwrap()
    };
    let (a, b) = (cvc(jwt), cvc(ld));
    assert_eq!(a.metadata().profile, ProfileTag::VcJwt);
    assert_eq!(b.metadata().profile, ProfileTag::VcLd);
    assert_eq!(a.issuer(), b.issuer());
    assert_eq!(a.subject(), b.subject());
    assert_eq!(a.claims(), b.claims());
    assert_eq!(a.credential_types(), b.credential_types());
    assert_eq!(a.credential().scope, b.credential().scope);
    assert_eq!(a.status_refs(), b.status_refs());

    let verifier = scenario.verifier();
    let mut request = scenario.request();
    let via_jwt = verifier.verify(&request).await.unwrap().vro;
    request.presentation.payload = ld_equivalent();
    let via_ld = verifier.verify(&request).await.unwrap().vro;

    assert_eq!(via_jwt.status, via_ld.status);
    assert_eq!(via_jwt.decision, via_ld.decision);
    for step in Step::ALL {
        if step != Step::Cryptographic {
            assert_eq!(via_jwt.invariants.get(step), via_ld.invariants.get(step), "{:?}", step);
        }
    }
}

#[tokio::test]
async fn test_unresolvable_status_fails_closed() {
    let mut scenario = Scenario::new(1);
    scenario.publish_status = false;

    let vro = scenario.verify().await.vro;
    assert_eq!(vro.status, VerificationStatus::Invalid);
    let failure = vro.failure.unwrap();
    assert_eq!(failure.class, ErrorClass::ProofError);
    assert_eq!(failure.kind.as_deref(), Some("revoked"));
    assert_eq!(vro.invariants.revocation, Outcome::Failed);
}

#[tokio::test]
async fn test_unresolvable_status_fails_open_when_configured() {
    let mut scenario = Scenario::new(1);
    scenario.publish_status = false;
    scenario.policy.status_required = false;

    let vro = scenario.verify().await.vro;
    assert!(vro.is_valid(), "{:?}", vro.failure);
    assert_eq!(vro.invariants.revocation, Outcome::Skipped);
    assert!(vro.warnings.len() >= 2);
}

#[tokio::test]
async fn test_cost_grows_with_depth() {
    let mut previous = 0;
    for depth in 0..=3 {
        let vro = Scenario::new(depth).verify().await.vro;
        assert!(vro.is_valid(), "depth {}: {:?}", depth, vro.failure);
        assert_eq!(vro.telemetry.chain_depth, depth);
        let work = vro.telemetry.work_units;
        assert!(work > previous || depth == 0, "depth {} cost {} after {}", depth, work, previous);
        previous = work;
    }

    let shallow = Scenario::new(0).verify().await.vro.telemetry;
    let deep = Scenario::new(3).verify().await.vro.telemetry;
    assert!(deep.work_units > shallow.work_units);
    assert!(deep.request_bytes > shallow.request_bytes);
}

#[tokio::test]
async fn test_validity_window_edges() {
    let mut scenario = Scenario::new(1);
    scenario.credential.not_before = NOW + 4;
    scenario.links[0].not_before = NOW + 5;
    let vro = scenario.verify().await.vro;
    assert!(vro.is_valid(), "{:?}", vro.failure);
    assert_eq!(vro.invariants.temporal, Outcome::Passed);

    let mut unbounded = Scenario::new(1);
    unbounded.credential.not_before = i64::MIN;
    unbounded.credential.expires_at = i64::MAX;
    unbounded.links[0].expires_at = i64::MAX;
    let vro = unbounded.verify().await.vro;
    assert!(vro.is_valid(), "{:?}", vro.failure);

    unbounded.credential.not_before = i64::MAX;
    let vro = unbounded.verify().await.vro;
    let failure = vro.failure.unwrap();
    assert_eq!(failure.class, ErrorClass::ProofError);
    assert_eq!(failure.kind.as_deref(), Some("expired"));
}
