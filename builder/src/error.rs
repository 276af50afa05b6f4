// Licensed under the Apache-2.0 license

use std::io;
use std::path::PathBuf;

use dfu_image::ProofMode;
use thiserror::Error;

/// Errors raised while building, committing or verifying a DFU image.
///
/// Everything except the verification variants is a build-time
/// misconfiguration and is never retried.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("invalid layout: {0}")]
    InvalidLayout(String),
    #[error("payload of {payload_len} bytes exceeds the {limit} bytes available before the footer (capacity {capacity})")]
    SizeExceeded {
        payload_len: usize,
        limit: usize,
        capacity: usize,
    },
    #[error("capacity of {capacity} bytes cannot hold a {footer_size}-byte footer")]
    CapacityTooSmall { capacity: usize, footer_size: usize },
    #[error("footer space has not been reserved yet")]
    FooterNotReserved,
    #[error("footer space is already reserved")]
    FooterAlreadyReserved,
    #[error("footer is incomplete: {0} was never written")]
    FooterIncomplete(&'static str),
    #[error("image is built for {mode} proofs but was given a different proof source")]
    ProofModeMismatch { mode: ProofMode },
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("image of {len} bytes cannot hold a {footer_size}-byte footer")]
    ImageTooSmall { len: usize, footer_size: usize },
    #[error("CRC mismatch: footer holds 0x{expected:08X}, payload computes to 0x{actual:08X}")]
    CrcMismatch { expected: u32, actual: u32 },
    #[error("SHA-256 digest in the footer does not match the payload")]
    DigestMismatch,
    #[error("a verifying key is required to check a signed image")]
    MissingVerifyingKey,
    #[error("footer signature does not verify against the payload digest")]
    SignatureInvalid,
    #[error("failed to encode the image manifest: {0}")]
    Manifest(#[from] toml::ser::Error),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signer failed: {0}")]
    Signer(String),
    #[error("signer did not produce a {expected}-byte encoding in {attempts} attempts (last one was {last_len} bytes)")]
    Unnormalizable {
        attempts: usize,
        expected: usize,
        last_len: usize,
    },
    #[error("signature proofs require a signer")]
    MissingSigner,
}
