// Licensed under the Apache-2.0 license

use std::fs;
use std::path::{Path, PathBuf};

use dfu_image::{read_footer, split_image, ImageVersion, ProofMode};
use log::info;
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crc::crc32;
use crate::error::ImageError;

/// Directory created next to the build output to hold the committed image.
pub const UPDATE_DIR_NAME: &str = "update_firmware";
/// Manifest written alongside the committed image.
pub const MANIFEST_FILE_NAME: &str = "firmware_info.toml";

/// A complete, footer-sealed DFU image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfuImage {
    bytes: Vec<u8>,
    crc32: u32,
    version: ImageVersion,
    mode: ProofMode,
}

/// Recorded next to the committed image for release tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    #[serde(rename = "bin_crc")]
    pub crc32: String,
    #[serde(rename = "version_info")]
    pub version: String,
    #[serde(rename = "bin_auth")]
    pub proof: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedImage {
    pub image_path: PathBuf,
    pub manifest_path: PathBuf,
}

impl DfuImage {
    pub(crate) fn new(bytes: Vec<u8>, crc32: u32, version: ImageVersion, mode: ProofMode) -> Self {
        Self {
            bytes,
            crc32,
            version,
            mode,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    pub fn version(&self) -> ImageVersion {
        self.version
    }

    pub fn mode(&self) -> ProofMode {
        self.mode
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - self.mode.footer_size()]
    }

    pub fn manifest(&self) -> ManifestRecord {
        ManifestRecord {
            crc32: format!("{:08X}", self.crc32),
            version: self.version.to_string(),
            proof: self.mode.tag().to_string(),
        }
    }

    /// Writes the image as `<out_dir>/update_firmware/<file_name>` and the
    /// manifest next to it.
    pub fn commit(&self, out_dir: &Path, file_name: &str) -> Result<CommittedImage, ImageError> {
        let update_dir = out_dir.join(UPDATE_DIR_NAME);
        fs::create_dir_all(&update_dir).map_err(|source| ImageError::Io {
            path: update_dir.clone(),
            source,
        })?;

        let image_path = update_dir.join(file_name);
        fs::write(&image_path, &self.bytes).map_err(|source| ImageError::Io {
            path: image_path.clone(),
            source,
        })?;

        let manifest_path = update_dir.join(MANIFEST_FILE_NAME);
        let manifest = toml::to_string(&self.manifest())?;
        fs::write(&manifest_path, manifest).map_err(|source| ImageError::Io {
            path: manifest_path.clone(),
            source,
        })?;

        info!(
            "Wrote {} ({} bytes, CRC {:08X}, {})",
            image_path.display(),
            self.bytes.len(),
            self.crc32,
            self.version
        );
        Ok(CommittedImage {
            image_path,
            manifest_path,
        })
    }
}

/// Footer contents of an image, as reported by `info` and `verify`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    pub len: usize,
    pub payload_len: usize,
    pub crc32: u32,
    pub version: ImageVersion,
    pub mode: ProofMode,
    pub proof: Vec<u8>,
}

/// Decodes the footer of `image` without checking it.
pub fn inspect_image(image: &[u8], mode: ProofMode) -> Result<ImageSummary, ImageError> {
    let too_small = || ImageError::ImageTooSmall {
        len: image.len(),
        footer_size: mode.footer_size(),
    };
    let fields = read_footer(image, mode).ok_or_else(too_small)?;
    let (payload, _) = split_image(image, mode).ok_or_else(too_small)?;
    Ok(ImageSummary {
        len: image.len(),
        payload_len: payload.len(),
        crc32: fields.crc32,
        version: fields.version,
        mode,
        proof: fields.proof.to_vec(),
    })
}

/// Checks the CRC and the integrity proof of `image` against its payload.
///
/// Signed images need `key`; digest images ignore it.
pub fn verify_image(
    image: &[u8],
    mode: ProofMode,
    key: Option<&VerifyingKey>,
) -> Result<ImageSummary, ImageError> {
    let summary = inspect_image(image, mode)?;
    let payload = &image[..summary.payload_len];

    let actual = crc32(payload);
    if actual != summary.crc32 {
        return Err(ImageError::CrcMismatch {
            expected: summary.crc32,
            actual,
        });
    }

    let digest: [u8; 32] = Sha256::digest(payload).into();
    match mode {
        ProofMode::Digest => {
            if summary.proof != digest {
                return Err(ImageError::DigestMismatch);
            }
        }
        ProofMode::Signature => {
            let key = key.ok_or(ImageError::MissingVerifyingKey)?;
            let signature =
                Signature::from_slice(&summary.proof).map_err(|_| ImageError::SignatureInvalid)?;
            key.verify_prehash(&digest, &signature)
                .map_err(|_| ImageError::SignatureInvalid)?;
        }
    }
    info!(
        "Image verified: {} bytes, CRC {:08X}, {}, {mode} proof",
        summary.len, summary.crc32, summary.version
    );
    Ok(summary)
}
