//! Verifier configuration
//!
//! Loaded from TOML. Relative paths are resolved against the directory of
//! the configuration file.
//!
//! ```toml
//! [verifier]
//! signing_key = "keys/verifier-key-1.key.json"
//! diagnostics = false
//! status_timeout = "2s"
//! ledger_timeout = "2s"
//!
//! [status]
//! mode = "http"
//! max_retries = 2
//!
//! [[key_sets]]
//! owner = "did:web:issuer.example"
//! jwks = "keys/issuer.jwks.json"
//!
//! [ledger]
//! path = "anchors.jsonl"
//!
//! [[policy]]
//! id = "default"
//! require_anchor = true
//! ```

use crate::anchor::FileLedger;
use crate::clock::{Clock, FixedClock, SystemClock, DETERMINISTIC_TIMESTAMP};
use crate::crypto::{Ed25519Signer, JwkSet, StaticKeySets};
use crate::error::{Result, TrustError};
use crate::policy::Policy;
use crate::status::{HttpStatusSource, InMemoryStatusSource, StatusSource};
use crate::verifier::{Verifier, VerifierSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use validator::Validate;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct VerifierConfig {
    /// Result signing and runtime switches
    #[serde(default)]
    #[validate(nested)]
    pub verifier: VerifierSection,
    /// Status list retrieval
    #[serde(default)]
    #[validate(nested)]
    pub status: StatusSection,
    /// Published key sets
    #[serde(default)]
    pub key_sets: Vec<KeySetEntry>,
    /// Anchor ledger
    #[serde(default)]
    pub ledger: Option<LedgerSection>,
    /// Policies
    #[serde(default, rename = "policy")]
    pub policies: Vec<Policy>,
    /// Directory relative paths resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// `[verifier]`
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VerifierSection {
    /// Key file written by `trustgate keygen`; a random key is used when absent
    #[serde(default)]
    pub signing_key: Option<PathBuf>,
    /// Key id for a random key
    #[serde(default = "VerifierSection::default_key_id")]
    #[validate(length(min = 1))]
    pub key_id: String,
    /// Keep evaluating after the first failure
    #[serde(default)]
    pub diagnostics: bool,
    /// Pin the clock to the deterministic timestamp
    #[serde(default)]
    pub deterministic: bool,
    /// Deadline for one status fetch
    #[serde(default = "VerifierSection::default_timeout", with = "humantime_serde")]
    pub status_timeout: Duration,
    /// Deadline for one ledger operation
    #[serde(default = "VerifierSection::default_timeout", with = "humantime_serde")]
    pub ledger_timeout: Duration,
}

impl VerifierSection {
    fn default_key_id() -> String {
        "verifier-key-1".to_string()
    }

    fn default_timeout() -> Duration {
        Duration::from_secs(2)
    }
}

impl Default for VerifierSection {
    fn default() -> Self {
        Self {
            signing_key: None,
            key_id: Self::default_key_id(),
            diagnostics: false,
            deterministic: false,
            status_timeout: Self::default_timeout(),
            ledger_timeout: Self::default_timeout(),
        }
    }
}

/// Where status documents come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusMode {
    /// Fetch over HTTP(S)
    #[default]
    Http,
    /// Only the documents listed under `[status.documents]`
    Local,
}

/// `[status]`
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StatusSection {
    /// Source of status documents
    #[serde(default)]
    pub mode: StatusMode,
    /// Per-request HTTP timeout
    #[serde(default = "StatusSection::default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Retries after a transport failure
    #[serde(default = "StatusSection::default_max_retries")]
    #[validate(range(max = 10))]
    pub max_retries: u32,
    /// Base delay between retries
    #[serde(default = "StatusSection::default_backoff", with = "humantime_serde")]
    pub backoff: Duration,
    /// URL to local file, for `mode = "local"`
    #[serde(default)]
    pub documents: BTreeMap<String, PathBuf>,
}

impl StatusSection {
    fn default_request_timeout() -> Duration {
        Duration::from_millis(1500)
    }

    fn default_max_retries() -> u32 {
        2
    }

    fn default_backoff() -> Duration {
        Duration::from_millis(100)
    }
}

impl Default for StatusSection {
    fn default() -> Self {
        Self {
            mode: StatusMode::default(),
            request_timeout: Self::default_request_timeout(),
            max_retries: Self::default_max_retries(),
            backoff: Self::default_backoff(),
            documents: BTreeMap::new(),
        }
    }
}

/// `[[key_sets]]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySetEntry {
    /// Identifier of the publishing party
    pub owner: String,
    /// JWKS file
    pub jwks: PathBuf,
}

/// `[ledger]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSection {
    /// JSON-lines ledger file
    pub path: PathBuf,
}

/// Signing key as persisted by `trustgate keygen`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKeyFile {
    /// Key id
    pub kid: String,
    /// Hex Ed25519 seed
    pub seed: String,
}

impl SigningKeyFile {
    /// Persistable form of `signer`
    pub fn from_signer(signer: &Ed25519Signer) -> Self {
        Self {
            kid: signer.kid().to_string(),
            seed: hex::encode(signer.seed()),
        }
    }

    /// Rebuild the signer
    pub fn signer(&self) -> Result<Ed25519Signer> {
        let seed = hex::decode(&self.seed)
            .map_err(|e| TrustError::Config(format!("signing key seed is not hex: {}", e)))?;
        Ed25519Signer::from_seed(self.kid.clone(), &seed)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| TrustError::Config(format!("failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| TrustError::Config(format!("failed to parse {}: {}", path.display(), e)))
}

impl VerifierConfig {
    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: VerifierConfig = toml::from_str(content)?;
        config
            .validate()
            .map_err(|e| TrustError::Config(format!("invalid configuration: {}", e)))?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| TrustError::Config(format!("failed to read config {}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    /// Resolve a configured path
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Runtime switches
    pub fn settings(&self) -> VerifierSettings {
        VerifierSettings {
            diagnostics: self.verifier.diagnostics,
            status_timeout: self.verifier.status_timeout,
            ledger_timeout: self.verifier.ledger_timeout,
        }
    }

    async fn signer(&self) -> Result<Ed25519Signer> {
        match &self.verifier.signing_key {
            Some(path) => read_json::<SigningKeyFile>(&self.resolve(path)).await?.signer(),
            None => {
                warn!(
                    kid = %self.verifier.key_id,
                    "no signing key configured, results are signed with an ephemeral key"
                );
                Ok(Ed25519Signer::generate(self.verifier.key_id.clone()))
            }
        }
    }

    async fn key_sets(&self) -> Result<StaticKeySets> {
        let mut sets = StaticKeySets::new();
        for entry in &self.key_sets {
            let set: JwkSet = read_json(&self.resolve(&entry.jwks)).await?;
            sets.insert(entry.owner.clone(), set);
        }
        Ok(sets)
    }

    async fn status_source(&self) -> Result<Arc<dyn StatusSource>> {
        match self.status.mode {
            StatusMode::Http => Ok(Arc::new(HttpStatusSource::new(
                self.status.request_timeout,
                self.status.max_retries,
                self.status.backoff,
            )?)),
            StatusMode::Local => {
                let mut source = InMemoryStatusSource::new();
                for (url, path) in &self.status.documents {
                    source.insert(url.clone(), read_json(&self.resolve(path)).await?);
                }
                Ok(Arc::new(source))
            }
        }
    }

    /// Assemble a verifier from this configuration
    pub async fn build_verifier(&self) -> Result<Verifier> {
        let clock: Arc<dyn Clock> = if self.verifier.deterministic {
            Arc::new(FixedClock::at(DETERMINISTIC_TIMESTAMP))
        } else {
            Arc::new(SystemClock::new())
        };

        let mut builder = Verifier::builder(self.signer().await?)
            .key_sets(Arc::new(self.key_sets().await?))
            .status_source(self.status_source().await?)
            .clock(clock)
            .settings(self.settings());
        if let Some(ledger) = &self.ledger {
            builder = builder.ledger(Arc::new(FileLedger::open(self.resolve(&ledger.path)).await?));
        }
        for policy in &self.policies {
            builder = builder.policy(policy.clone());
        }

        let verifier = builder.build()?;
        info!(
            policies = self.policies.len(),
            key_sets = self.key_sets.len(),
            ledger = self.ledger.is_some(),
            "verifier configured"
        );
        Ok(verifier)
    }
}
