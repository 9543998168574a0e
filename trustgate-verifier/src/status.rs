//! Revocation status resolution
//!
//! Status references point at a StatusList2021 document and an index into
//! its bitstring. The `encodedList` is base64url of the raw bitstring, most
//! significant bit first; bit set means revoked.
//!
//! A [`StatusResolver`] lives for one logical request: it owns the document
//! cache and enforces the I/O timeout. Sources may retry a bounded number of
//! times; whatever still fails surfaces as [`StatusState::Unknown`] and is
//! routed through policy by the caller.

use crate::crypto::{b64url_decode, b64url_encode};
use crate::error::{Result, TrustError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Pointer to a revocation entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatusRef {
    /// Status list document location
    pub url: String,
    /// Bit index within the list
    #[serde(default)]
    pub index: u64,
}

impl StatusRef {
    /// Create a reference
    pub fn new(url: impl Into<String>, index: u64) -> Self {
        Self {
            url: url.into(),
            index,
        }
    }
}

/// Resolved revocation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    /// Not revoked
    Active,
    /// Revoked
    Revoked,
    /// Could not be determined
    Unknown,
}

/// State plus the reason a lookup came back unknown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResolution {
    /// Resolved state
    pub state: StatusState,
    /// Failure detail when `state` is unknown
    pub reason: Option<String>,
}

impl StatusResolution {
    fn known(state: StatusState) -> Self {
        Self { state, reason: None }
    }

    fn unknown(reason: impl Into<String>) -> Self {
        Self {
            state: StatusState::Unknown,
            reason: Some(reason.into()),
        }
    }
}

/// Revocation bitstring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusList {
    bits: Vec<u8>,
}

impl StatusList {
    /// All-active list with room for `len` entries
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0u8; len.div_ceil(8)],
        }
    }

    /// Decode an `encodedList` value
    pub fn decode(encoded: &str) -> Result<Self> {
        let bits = b64url_decode(encoded).map_err(|e| TrustError::Status(e.to_string()))?;
        Ok(Self { bits })
    }

    /// Extract the list from a status list document
    pub fn from_document(doc: &Value) -> Result<Self> {
        let encoded = doc
            .get("encodedList")
            .or_else(|| doc.pointer("/credentialSubject/encodedList"))
            .and_then(Value::as_str)
            .ok_or_else(|| TrustError::Status("status document has no encodedList".into()))?;
        Self::decode(encoded)
    }

    /// Number of addressable entries
    pub fn len(&self) -> usize {
        self.bits.len() * 8
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Mark an entry revoked
    pub fn revoke(&mut self, index: u64) {
        let (byte, mask) = Self::position(index);
        if byte >= self.bits.len() {
            self.bits.resize(byte + 1, 0);
        }
        self.bits[byte] |= mask;
    }

    /// Check an entry; out-of-range indices are an error
    pub fn is_revoked(&self, index: u64) -> Result<bool> {
        let (byte, mask) = Self::position(index);
        self.bits
            .get(byte)
            .map(|b| b & mask != 0)
            .ok_or_else(|| {
                TrustError::Status(format!(
                    "status index {} outside list of {} entries",
                    index,
                    self.len()
                ))
            })
    }

    /// Base64url `encodedList`
    pub fn encode(&self) -> String {
        b64url_encode(&self.bits)
    }

    /// StatusList2021 credential document carrying this list
    pub fn to_document(&self, id: &str) -> Value {
        json!({
            "id": id,
            "type": ["VerifiableCredential", "StatusList2021Credential"],
            "credentialSubject": {
                "id": format!("{}#list", id),
                "type": "StatusList2021",
                "statusPurpose": "revocation",
                "encodedList": self.encode(),
            }
        })
    }

    fn position(index: u64) -> (usize, u8) {
        ((index / 8) as usize, 0x80u8 >> (index % 8))
    }
}

/// Where status documents come from
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Fetch the status document at `url`
    async fn fetch(&self, url: &str) -> Result<Value>;
}

/// Status documents provisioned in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryStatusSource {
    documents: HashMap<String, Value>,
}

impl InMemoryStatusSource {
    /// Empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document
    pub fn insert(&mut self, url: impl Into<String>, document: Value) {
        self.documents.insert(url.into(), document);
    }

    /// Builder-style [`InMemoryStatusSource::insert`]
    pub fn with(mut self, url: impl Into<String>, document: Value) -> Self {
        self.insert(url, document);
        self
    }
}

#[async_trait]
impl StatusSource for InMemoryStatusSource {
    async fn fetch(&self, url: &str) -> Result<Value> {
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| TrustError::Status(format!("no status document at {}", url)))
    }
}

/// Status documents fetched over HTTP with bounded retry
#[derive(Debug, Clone)]
pub struct HttpStatusSource {
    client: reqwest::Client,
    max_retries: u32,
    backoff: Duration,
}

impl HttpStatusSource {
    /// Create a source
    pub fn new(request_timeout: Duration, max_retries: u32, backoff: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TrustError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            max_retries,
            backoff,
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<Value> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&self, url: &str) -> Result<Value> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(doc) => return Ok(doc),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    debug!(url, attempt, error = %e, "retrying status fetch");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Per-request status resolver
pub struct StatusResolver {
    source: Arc<dyn StatusSource>,
    timeout: Duration,
    cache: RwLock<HashMap<String, Arc<StatusList>>>,
}

impl StatusResolver {
    /// Create a resolver with an empty cache
    pub fn new(source: Arc<dyn StatusSource>, timeout: Duration) -> Self {
        Self {
            source,
            timeout,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a status reference
    pub async fn resolve_status(&self, status: &StatusRef) -> StatusResolution {
        let list = match self.list(&status.url).await {
            Ok(list) => list,
            Err(e) => {
                warn!(url = %status.url, error = %e, "status resolution failed");
                return StatusResolution::unknown(e.to_string());
            }
        };

        match list.is_revoked(status.index) {
            Ok(true) => StatusResolution::known(StatusState::Revoked),
            Ok(false) => StatusResolution::known(StatusState::Active),
            Err(e) => StatusResolution::unknown(e.to_string()),
        }
    }

    async fn list(&self, url: &str) -> Result<Arc<StatusList>> {
        if let Some(list) = self.cache.read().await.get(url) {
            return Ok(list.clone());
        }

        let doc = tokio::time::timeout(self.timeout, self.source.fetch(url))
            .await
            .map_err(|_| TrustError::Timeout(format!("status fetch for {} exceeded {:?}", url, self.timeout)))??;
        let list = Arc::new(StatusList::from_document(&doc)?);

        self.cache
            .write()
            .await
            .entry(url.to_string())
            .or_insert_with(|| list.clone());
        Ok(list)
    }
}
