//! Chain fingerprint anchoring

use assert_matches::assert_matches;
use async_trait::async_trait;
use std::sync::Arc;
use trustgate_tests::common::*;
use trustgate_verifier::anchor::AnchorProof;
use trustgate_verifier::policy::AnchorUnavailable;
use trustgate_verifier::{
    AnchorLedger, AnchorRecord, ChainIntegrity, ErrorClass, FileLedger, InMemoryLedger, Outcome, ProofMetadata,
    Result, TrustError,
};

/// Ledger whose backing store cannot be reached
struct UnreachableLedger;

#[async_trait]
impl AnchorLedger for UnreachableLedger {
    async fn put(&self, _fingerprint: &str, _metadata: ProofMetadata, _timestamp: i64) -> Result<AnchorProof> {
        Err(TrustError::Ledger("connection refused".into()))
    }

    async fn get(&self, _fingerprint: &str) -> Result<Option<AnchorProof>> {
        Err(TrustError::Ledger("connection refused".into()))
    }

    async fn verify_chain(&self, _proof: &AnchorProof) -> Result<ChainIntegrity> {
        Err(TrustError::Ledger("connection refused".into()))
    }

    async fn records(&self) -> Result<Vec<AnchorRecord>> {
        Err(TrustError::Ledger("connection refused".into()))
    }
}

fn anchored(depth: usize) -> Scenario {
    let mut scenario = Scenario::new(depth);
    scenario.policy.require_anchor = true;
    scenario
}

#[tokio::test]
async fn test_anchor_recorded() {
    setup_test_logging();
    let scenario = anchored(2);
    let ledger = Arc::new(InMemoryLedger::new());
    let vro = scenario
        .verifier_with_ledger(ledger.clone())
        .verify(&scenario.request())
        .await
        .unwrap()
        .vro;

    assert!(vro.is_valid(), "{:?}", vro.failure);
    assert_eq!(vro.invariants.chain_integrity, Outcome::Passed);
    let anchor = vro.anchor.unwrap();
    let records = ledger.records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(anchor.record_hash, records[0].record_hash);
    assert_eq!(Some(&records[0].fingerprint), vro.chain_fingerprint.as_ref());
    assert_eq!(records[0].proof_metadata.chain_depth, 2);
}

#[tokio::test]
async fn test_unreachable_ledger_policy_error() {
    let scenario = anchored(1);
    let vro = scenario
        .verifier_with_ledger(Arc::new(UnreachableLedger))
        .verify(&scenario.request())
        .await
        .unwrap()
        .vro;

    assert!(!vro.is_valid());
    assert_eq!(vro.failure.unwrap().class, ErrorClass::PolicyError);
    assert_eq!(vro.invariants.chain_integrity, Outcome::Failed);
    assert!(vro.anchor.is_none());
}

#[tokio::test]
async fn test_unreachable_ledger_internal_error() {
    let mut scenario = anchored(1);
    scenario.policy.anchor_unavailable = AnchorUnavailable::InternalError;
    let vro = scenario
        .verifier_with_ledger(Arc::new(UnreachableLedger))
        .verify(&scenario.request())
        .await
        .unwrap()
        .vro;

    assert_eq!(vro.failure.unwrap().class, ErrorClass::InternalError);
    assert_eq!(vro.invariants.chain_integrity, Outcome::Failed);
}

#[tokio::test]
async fn test_rejected_chain_is_not_anchored() {
    let mut scenario = anchored(2);
    scenario.status.revoke(1);
    let ledger = Arc::new(InMemoryLedger::new());
    let vro = scenario
        .verifier_with_ledger(ledger.clone())
        .verify(&scenario.request())
        .await
        .unwrap()
        .vro;

    assert!(!vro.is_valid());
    assert!(ledger.records().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_repeat_verification_reuses_anchor() {
    let scenario = anchored(2);
    let ledger = Arc::new(InMemoryLedger::new());
    let verifier = scenario.verifier_with_ledger(ledger.clone());

    let first = verifier.verify(&scenario.request()).await.unwrap().vro;
    let second = verifier.verify(&scenario.request()).await.unwrap().vro;
    assert_eq!(first.anchor, second.anchor);
    assert_eq!(ledger.records().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_put_is_idempotent() {
    let ledger = InMemoryLedger::new();
    let a = ledger.put("fp-1", ProofMetadata::hash_chain("default", 1), NOW).await.unwrap();
    let b = ledger.put("fp-1", ProofMetadata::hash_chain("default", 1), NOW + 60).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(ledger.get("fp-1").await.unwrap(), Some(a));
    assert_eq!(ledger.get("fp-2").await.unwrap(), None);
}

#[tokio::test]
async fn test_file_ledger_detects_tampering() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("anchors.jsonl");

    {
        let ledger = FileLedger::open(&path).await.unwrap();
        for (i, fp) in ["fp-1", "fp-2", "fp-3"].iter().enumerate() {
            ledger
                .put(fp, ProofMetadata::hash_chain("default", i + 1), NOW + i as i64)
                .await
                .unwrap();
        }
    }

    let reopened = FileLedger::open(&path).await.unwrap();
    let records = reopened.records().await.unwrap();
    assert_eq!(records.len(), 3);
    assert_matches!(reopened.verify_chain(&records[2]).await.unwrap(), ChainIntegrity::Valid);

    let mut tampered = records.clone();
    tampered[1].previous_hash = "0".repeat(64);
    let content: String = tampered
        .iter()
        .map(|r| serde_json::to_string(r).unwrap() + "\n")
        .collect();
    std::fs::write(&path, content).unwrap();

    let reopened = FileLedger::open(&path).await.unwrap();
    let records = reopened.records().await.unwrap();
    assert_matches!(
        reopened.verify_chain(&records[2]).await.unwrap(),
        ChainIntegrity::Broken { sequence: 1, .. }
    );
    assert_matches!(reopened.verify_chain(&records[0]).await.unwrap(), ChainIntegrity::Valid);
}
