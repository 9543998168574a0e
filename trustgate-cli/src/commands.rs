//! CLI command implementations

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use trustgate_verifier::config::SigningKeyFile;
use trustgate_verifier::{
    decode_signed_vro, AnchorLedger, ChainIntegrity, Ed25519Signer, FileLedger, JwkSet, VerificationRequest,
    VerifierConfig,
};

fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Verify one request; returns whether the result is VALID
///
/// # Arguments
/// * `request` - Request JSON, or a vp_token when `vp_token_policy` is set
/// * `config` - Verifier configuration file
/// * `vp_token_policy` - Policy for vp_token input
/// * `token_only` - Print only the compact JWS
pub async fn execute_verify(
    request: PathBuf,
    config: PathBuf,
    vp_token_policy: Option<String>,
    token_only: bool,
) -> Result<bool> {
    let config = VerifierConfig::load(&config).with_context(|| format!("Failed to load {}", config.display()))?;
    let verifier = config.build_verifier().await.context("Failed to configure verifier")?;
    let input = read_json(&request)?;

    let signed = match vp_token_policy {
        Some(policy) => verifier.verify_vp_token(&input, &policy).await?,
        None => {
            let request: VerificationRequest =
                serde_json::from_value(input).context("Input is not a verification request")?;
            debug!(policy = %request.policy_id, links = request.delegation_chain.len(), "verifying");
            verifier.verify(&request).await?
        }
    };

    if token_only {
        println!("{}", signed.token);
    } else {
        let output = serde_json::json!({ "vro": signed.vro, "token": signed.token });
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(signed.vro.is_valid())
}

/// Generate a signing key and its JWKS
///
/// Writes `<kid>.key.json` (secret) and `<kid>.jwks.json` (public).
pub async fn execute_keygen(kid: String, out: PathBuf) -> Result<()> {
    std::fs::create_dir_all(&out).with_context(|| format!("Failed to create {}", out.display()))?;
    let signer = Ed25519Signer::generate(kid.clone());

    let key_path = out.join(format!("{}.key.json", kid));
    let jwks_path = out.join(format!("{}.jwks.json", kid));
    if key_path.exists() {
        anyhow::bail!("{} already exists", key_path.display());
    }
    std::fs::write(&key_path, serde_json::to_string_pretty(&SigningKeyFile::from_signer(&signer))?)
        .with_context(|| format!("Failed to write {}", key_path.display()))?;
    std::fs::write(&jwks_path, serde_json::to_string_pretty(&signer.jwks())?)
        .with_context(|| format!("Failed to write {}", jwks_path.display()))?;

    info!(kid = %kid, "key generated");
    println!("✓ {}", key_path.display());
    println!("✓ {}", jwks_path.display());
    Ok(())
}

/// Verify a signed result and print its payload
pub async fn execute_decode_vro(token: String, jwks: PathBuf) -> Result<()> {
    let token = match std::fs::read_to_string(&token) {
        Ok(content) => content.trim().to_string(),
        Err(_) => token,
    };
    let keys: JwkSet = serde_json::from_value(read_json(&jwks)?).context("Invalid JWKS")?;
    let vro = decode_signed_vro(&token, &keys).context("Result signature check failed")?;
    println!("{}", serde_json::to_string_pretty(&vro)?);
    Ok(())
}

/// Check the ledger's hash chain; returns whether it is intact
pub async fn execute_anchor_verify(ledger: PathBuf) -> Result<bool> {
    let ledger = FileLedger::open(&ledger)
        .await
        .with_context(|| format!("Failed to open {}", ledger.display()))?;
    let records = ledger.records().await?;
    let Some(last) = records.last() else {
        println!("✓ ledger empty");
        return Ok(true);
    };

    match ledger.verify_chain(last).await? {
        ChainIntegrity::Valid => {
            println!("✓ {} records, head {}", records.len(), last.record_hash);
            Ok(true)
        }
        ChainIntegrity::Broken { sequence, reason } => {
            eprintln!("✗ chain broken at record {}: {}", sequence, reason);
            Ok(false)
        }
    }
}

/// Print ledger records, one per line
pub async fn execute_anchor_list(ledger: PathBuf) -> Result<()> {
    let ledger = FileLedger::open(&ledger)
        .await
        .with_context(|| format!("Failed to open {}", ledger.display()))?;
    for record in ledger.records().await? {
        println!(
            "{:>6}  {}  {}  depth={}  policy={}",
            record.sequence,
            record.timestamp,
            record.fingerprint,
            record.proof_metadata.chain_depth,
            record.proof_metadata.policy_id
        );
    }
    Ok(())
}
