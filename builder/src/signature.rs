// Licensed under the Apache-2.0 license

//! Detached signatures over the payload digest.
//!
//! The bootloader expects the raw 64-byte `r || s` form of an ECDSA P-256
//! signature, while signers hand back the ASN.1 DER structure:
//!
//! ```text
//! 30 44 02 20 <r: 32 bytes> 02 20 <s: 32 bytes>     (70 bytes)
//! ```
//!
//! DER integers are variable length: a scalar with its top bit set gains a
//! leading zero and a small one loses leading bytes, so only some signatures
//! come back in the 70-byte shape above. Rather than re-encoding the integers,
//! the builder strips the framing at the fixed positions listed in
//! [`DER_SIGNATURE_LAYOUT`] and asks for a fresh signature whenever the output
//! does not have that exact shape. This is a normalization workaround for the
//! fixed offsets, not a cryptographic requirement.

use std::ops::Range;

use dfu_image::{DIGEST_SIZE, SIGNATURE_SIZE};
use log::debug;
use p256::ecdsa::signature::hazmat::RandomizedPrehashSigner;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::SigningError;

/// Upper bound on signature requests before giving up.
pub const MAX_SIGNING_ATTEMPTS: usize = 64;

/// Produces a detached signature over a SHA-256 digest, in the signer's
/// structured (DER) encoding.
pub trait SignatureProvider {
    fn sign_digest(&mut self, digest: &[u8; DIGEST_SIZE]) -> Result<Vec<u8>, SigningError>;
}

impl<F> SignatureProvider for F
where
    F: FnMut(&[u8; DIGEST_SIZE]) -> Result<Vec<u8>, SigningError>,
{
    fn sign_digest(&mut self, digest: &[u8; DIGEST_SIZE]) -> Result<Vec<u8>, SigningError> {
        self(digest)
    }
}

/// Framing bytes expected at a fixed position of the structured encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framing {
    pub offset: usize,
    pub bytes: &'static [u8],
}

impl Framing {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.bytes.len()
    }
}

/// Offset table mapping a structured signature onto raw `r || s`.
///
/// An encoding is accepted iff it is exactly `encoded_len` bytes long and holds
/// the expected framing bytes; what is left once the framing is removed is the
/// raw signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureLayout {
    pub encoded_len: usize,
    pub framing: [Framing; 2],
}

/// `SEQUENCE(68) INTEGER(32)` at `[0, 4)` and `INTEGER(32)` at `[36, 38)`.
pub const DER_SIGNATURE_LAYOUT: SignatureLayout = SignatureLayout {
    encoded_len: 70,
    framing: [
        Framing {
            offset: 0,
            bytes: &[0x30, 0x44, 0x02, 0x20],
        },
        Framing {
            offset: 36,
            bytes: &[0x02, 0x20],
        },
    ],
};

impl SignatureLayout {
    /// Strips the framing from `encoded`, or returns `None` when the encoding
    /// does not have the shape described by the table.
    pub fn normalize(&self, encoded: &[u8]) -> Option<[u8; SIGNATURE_SIZE]> {
        if encoded.len() != self.encoded_len {
            return None;
        }
        if self
            .framing
            .iter()
            .any(|framing| encoded.get(framing.range()) != Some(framing.bytes))
        {
            return None;
        }

        let mut raw = [0u8; SIGNATURE_SIZE];
        let mut kept = 0;
        for (i, byte) in encoded.iter().enumerate() {
            if self.framing.iter().any(|framing| framing.range().contains(&i)) {
                continue;
            }
            *raw.get_mut(kept)? = *byte;
            kept += 1;
        }
        (kept == SIGNATURE_SIZE).then_some(raw)
    }
}

/// Requests signatures from `signer` until one normalizes to raw `r || s`.
pub fn sign_normalized(
    signer: &mut dyn SignatureProvider,
    digest: &[u8; DIGEST_SIZE],
) -> Result<[u8; SIGNATURE_SIZE], SigningError> {
    let mut last_len = 0;
    for attempt in 1..=MAX_SIGNING_ATTEMPTS {
        let encoded = signer.sign_digest(digest)?;
        if let Some(raw) = DER_SIGNATURE_LAYOUT.normalize(&encoded) {
            debug!("Signature normalized on attempt {attempt}");
            return Ok(raw);
        }
        debug!(
            "Signature attempt {attempt} has a {}-byte encoding, requesting another",
            encoded.len()
        );
        last_len = encoded.len();
    }
    Err(SigningError::Unnormalizable {
        attempts: MAX_SIGNING_ATTEMPTS,
        expected: DER_SIGNATURE_LAYOUT.encoded_len,
        last_len,
    })
}

/// ECDSA P-256 signer. Signing is randomized, so each request yields a
/// different encoding.
pub struct EcdsaP256Signer {
    key: SigningKey,
}

impl EcdsaP256Signer {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        *self.key.verifying_key()
    }
}

impl SignatureProvider for EcdsaP256Signer {
    fn sign_digest(&mut self, digest: &[u8; DIGEST_SIZE]) -> Result<Vec<u8>, SigningError> {
        let signature: Signature = self
            .key
            .sign_prehash_with_rng(&mut OsRng, digest)
            .map_err(|e| SigningError::Signer(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}
