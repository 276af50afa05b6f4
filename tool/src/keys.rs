// Licensed under the Apache-2.0 license

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};
use p256::SecretKey;

fn read_pem(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read key {}", path.display()))
}

/// Loads a P-256 private key in PKCS#8 or SEC1 PEM form.
pub fn load_signing_key(path: &Path) -> Result<SigningKey> {
    let pem = read_pem(path)?;
    if let Ok(key) = SigningKey::from_pkcs8_pem(&pem) {
        return Ok(key);
    }
    let secret = SecretKey::from_sec1_pem(&pem)
        .map_err(|e| anyhow!("{} is not a P-256 private key: {e}", path.display()))?;
    Ok(SigningKey::from(secret))
}

pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey> {
    let pem = read_pem(path)?;
    VerifyingKey::from_public_key_pem(&pem)
        .map_err(|e| anyhow!("{} is not a P-256 public key: {e}", path.display()))
}
