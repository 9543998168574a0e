//! Chain anchoring ledger
//!
//! Hash-linked append-only log of chain fingerprints. Every record stores
//! the hash of its predecessor; the first record links to [`GENESIS_HASH`].
//! `put` is idempotent per fingerprint and appends are serialized behind a
//! write lock, so concurrent writers observe a single linear history.

use crate::crypto::{canonical_json, sha256_hex};
use crate::error::{Result, TrustError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Previous-hash value of the first record
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Proof type written by the local hash-chain ledgers
pub const HASH_CHAIN_PROOF: &str = "hash-chain-sha256";

/// What was anchored and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofMetadata {
    /// Proof mechanism
    pub proof_type: String,
    /// Policy that required the anchor
    pub policy_id: String,
    /// Number of links in the anchored chain
    pub chain_depth: usize,
}

impl ProofMetadata {
    /// Metadata for a hash-chain anchor
    pub fn hash_chain(policy_id: impl Into<String>, chain_depth: usize) -> Self {
        Self {
            proof_type: HASH_CHAIN_PROOF.to_string(),
            policy_id: policy_id.into(),
            chain_depth,
        }
    }
}

/// One ledger entry; also serves as the anchor proof handed to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRecord {
    /// Position in the log, starting at 0
    pub sequence: u64,
    /// Anchored chain fingerprint
    pub fingerprint: String,
    /// `record_hash` of the previous entry
    pub previous_hash: String,
    /// Proof metadata
    pub proof_metadata: ProofMetadata,
    /// Anchoring time, seconds since the Unix epoch
    pub timestamp: i64,
    /// Hash over every other field of this record
    pub record_hash: String,
}

/// Proof returned by [`AnchorLedger::put`] and [`AnchorLedger::get`]
pub type AnchorProof = AnchorRecord;

#[derive(Serialize)]
struct HashedFields<'a> {
    sequence: u64,
    fingerprint: &'a str,
    previous_hash: &'a str,
    proof_metadata: &'a ProofMetadata,
    timestamp: i64,
}

impl AnchorRecord {
    /// Recompute the hash of this record
    pub fn compute_hash(&self) -> Result<String> {
        let bytes = canonical_json(&HashedFields {
            sequence: self.sequence,
            fingerprint: &self.fingerprint,
            previous_hash: &self.previous_hash,
            proof_metadata: &self.proof_metadata,
            timestamp: self.timestamp,
        })?;
        Ok(sha256_hex(bytes))
    }
}

/// Result of recomputing the hash chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainIntegrity {
    /// Every link up to the queried record recomputes
    Valid,
    /// Linkage breaks at `sequence`
    Broken {
        /// First bad record
        sequence: u64,
        /// What failed
        reason: String,
    },
}

impl ChainIntegrity {
    /// Whether the chain verified
    pub fn is_valid(&self) -> bool {
        matches!(self, ChainIntegrity::Valid)
    }
}

/// Tamper-evident fingerprint store
#[async_trait]
pub trait AnchorLedger: Send + Sync {
    /// Anchor a fingerprint; returns the existing proof if already anchored
    async fn put(&self, fingerprint: &str, metadata: ProofMetadata, timestamp: i64) -> Result<AnchorProof>;

    /// Look up the proof for a fingerprint
    async fn get(&self, fingerprint: &str) -> Result<Option<AnchorProof>>;

    /// Recompute linkage for every record up to and including `proof`
    async fn verify_chain(&self, proof: &AnchorProof) -> Result<ChainIntegrity>;

    /// Full log, oldest first
    async fn records(&self) -> Result<Vec<AnchorRecord>>;
}

/// Log state shared by the ledger backends
#[derive(Debug, Default)]
struct HashChain {
    records: Vec<AnchorRecord>,
    by_fingerprint: HashMap<String, usize>,
}

impl HashChain {
    fn from_records(records: Vec<AnchorRecord>) -> Self {
        let mut by_fingerprint = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            by_fingerprint.entry(record.fingerprint.clone()).or_insert(i);
        }
        Self {
            records,
            by_fingerprint,
        }
    }

    fn get(&self, fingerprint: &str) -> Option<&AnchorRecord> {
        self.by_fingerprint
            .get(fingerprint)
            .and_then(|i| self.records.get(*i))
    }

    fn next_record(&self, fingerprint: &str, metadata: ProofMetadata, timestamp: i64) -> Result<AnchorRecord> {
        let previous_hash = self
            .records
            .last()
            .map(|r| r.record_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let mut record = AnchorRecord {
            sequence: self.records.len() as u64,
            fingerprint: fingerprint.to_string(),
            previous_hash,
            proof_metadata: metadata,
            timestamp,
            record_hash: String::new(),
        };
        record.record_hash = record.compute_hash()?;
        Ok(record)
    }

    fn push(&mut self, record: AnchorRecord) {
        self.by_fingerprint
            .insert(record.fingerprint.clone(), self.records.len());
        self.records.push(record);
    }

    fn verify_prefix(&self, proof: &AnchorRecord) -> ChainIntegrity {
        let end = proof.sequence as usize;
        if end >= self.records.len() {
            return ChainIntegrity::Broken {
                sequence: proof.sequence,
                reason: "record not present in ledger".into(),
            };
        }

        let mut expected_previous: &str = GENESIS_HASH;
        for (i, record) in self.records[..=end].iter().enumerate() {
            let sequence = i as u64;
            if record.sequence != sequence {
                return ChainIntegrity::Broken {
                    sequence,
                    reason: format!("sequence {} stored at position {}", record.sequence, i),
                };
            }
            if record.previous_hash != expected_previous {
                return ChainIntegrity::Broken {
                    sequence,
                    reason: "previous hash does not match predecessor".into(),
                };
            }
            match record.compute_hash() {
                Ok(hash) if hash == record.record_hash => {}
                Ok(_) => {
                    return ChainIntegrity::Broken {
                        sequence,
                        reason: "record hash does not recompute".into(),
                    }
                }
                Err(e) => {
                    return ChainIntegrity::Broken {
                        sequence,
                        reason: e.to_string(),
                    }
                }
            }
            expected_previous = record.record_hash.as_str();
        }

        if &self.records[end] != proof {
            return ChainIntegrity::Broken {
                sequence: proof.sequence,
                reason: "proof does not match ledger record".into(),
            };
        }
        ChainIntegrity::Valid
    }
}

/// Ledger held in process memory
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    chain: RwLock<HashChain>,
}

impl InMemoryLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger restored from previously exported records
    pub fn from_records(records: Vec<AnchorRecord>) -> Self {
        Self {
            chain: RwLock::new(HashChain::from_records(records)),
        }
    }
}

#[async_trait]
impl AnchorLedger for InMemoryLedger {
    async fn put(&self, fingerprint: &str, metadata: ProofMetadata, timestamp: i64) -> Result<AnchorProof> {
        let mut chain = self.chain.write().await;
        if let Some(existing) = chain.get(fingerprint) {
            debug!(fingerprint, sequence = existing.sequence, "fingerprint already anchored");
            return Ok(existing.clone());
        }
        let record = chain.next_record(fingerprint, metadata, timestamp)?;
        chain.push(record.clone());
        Ok(record)
    }

    async fn get(&self, fingerprint: &str) -> Result<Option<AnchorProof>> {
        Ok(self.chain.read().await.get(fingerprint).cloned())
    }

    async fn verify_chain(&self, proof: &AnchorProof) -> Result<ChainIntegrity> {
        Ok(self.chain.read().await.verify_prefix(proof))
    }

    async fn records(&self) -> Result<Vec<AnchorRecord>> {
        Ok(self.chain.read().await.records.clone())
    }
}

/// Ledger persisted as JSON lines, one record per line
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    chain: Arc<Mutex<HashChain>>,
}

impl FileLedger {
    /// Open (or create) a ledger file and load its records
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) => Self::parse(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), records = records.len(), "anchor ledger opened");

        Ok(Self {
            path,
            chain: Arc::new(Mutex::new(HashChain::from_records(records))),
        })
    }

    fn parse(content: &str) -> Result<Vec<AnchorRecord>> {
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str(line)
                    .map_err(|e| TrustError::Ledger(format!("ledger line {} unreadable: {}", i + 1, e)))
            })
            .collect()
    }

    /// Ledger file location
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileLedger {
    async fn append(
        path: &Path,
        chain: &Mutex<HashChain>,
        fingerprint: &str,
        metadata: ProofMetadata,
        timestamp: i64,
    ) -> Result<AnchorProof> {
        let mut chain = chain.lock().await;
        if let Some(existing) = chain.get(fingerprint) {
            return Ok(existing.clone());
        }

        let record = chain.next_record(fingerprint, metadata, timestamp)?;
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| TrustError::Ledger(format!("cannot open {}: {}", path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| TrustError::Ledger(format!("append failed: {}", e)))?;
        // The line is in the file from here on; the in-memory chain must follow
        chain.push(record.clone());
        file.sync_data()
            .await
            .map_err(|e| TrustError::Ledger(format!("sync failed: {}", e)))?;
        Ok(record)
    }
}

#[async_trait]
impl AnchorLedger for FileLedger {
    /// Appends run on a detached task so a caller that stops waiting
    /// (timeout, dropped request) never leaves the file ahead of the chain.
    async fn put(&self, fingerprint: &str, metadata: ProofMetadata, timestamp: i64) -> Result<AnchorProof> {
        let path = self.path.clone();
        let chain = self.chain.clone();
        let fingerprint = fingerprint.to_string();
        tokio::spawn(async move { Self::append(&path, &chain, &fingerprint, metadata, timestamp).await })
            .await
            .map_err(|e| TrustError::Internal(format!("anchor append task failed: {}", e)))?
    }

    async fn get(&self, fingerprint: &str) -> Result<Option<AnchorProof>> {
        Ok(self.chain.lock().await.get(fingerprint).cloned())
    }

    async fn verify_chain(&self, proof: &AnchorProof) -> Result<ChainIntegrity> {
        Ok(self.chain.lock().await.verify_prefix(proof))
    }

    async fn records(&self) -> Result<Vec<AnchorRecord>> {
        Ok(self.chain.lock().await.records.clone())
    }
}
