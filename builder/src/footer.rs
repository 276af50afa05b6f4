// Licensed under the Apache-2.0 license

use dfu_image::{
    ImageVersion, ProofMode, CRC_OFFSET, CRC_SIZE, DIGEST_SIZE, PAYLOAD_FILL_BYTE, PROOF_OFFSET,
    VERSION_OFFSET, VERSION_SIZE,
};
use log::{debug, info};
use sha2::{Digest, Sha256};
use zerocopy::IntoBytes;

use crate::crc::crc32;
use crate::error::{ImageError, SigningError};
use crate::image::DfuImage;
use crate::signature::{sign_normalized, SignatureProvider};

/// Where the integrity proof comes from.
pub enum ProofSource<'a> {
    /// SHA-256 digest of the payload, written as is.
    Digest,
    /// Detached signature over the payload digest.
    Signer(&'a mut dyn SignatureProvider),
}

/// Target-specific inputs of an image build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageConfig {
    pub capacity: usize,
    pub version: ImageVersion,
    pub mode: ProofMode,
}

/// Builds the footer of a DFU image in memory.
///
/// The buffer starts out as the raw firmware; [`pad`](Self::pad) fills it up to
/// the footer boundary and [`reserve_footer`](Self::reserve_footer) appends the
/// zeroed trailer, after which the footer fields can be written in any order.
pub struct FooterBuilder {
    buffer: Vec<u8>,
    capacity: usize,
    mode: ProofMode,
    reserved: bool,
    crc32: Option<u32>,
    version: Option<ImageVersion>,
    proof_written: bool,
}

impl FooterBuilder {
    pub fn new(firmware: Vec<u8>, capacity: usize, mode: ProofMode) -> Self {
        Self {
            buffer: firmware,
            capacity,
            mode,
            reserved: false,
            crc32: None,
            version: None,
            proof_written: false,
        }
    }

    pub fn footer_size(&self) -> usize {
        self.mode.footer_size()
    }

    /// Number of payload bytes the capacity leaves room for.
    pub fn payload_limit(&self) -> Result<usize, ImageError> {
        self.capacity
            .checked_sub(self.footer_size())
            .ok_or(ImageError::CapacityTooSmall {
                capacity: self.capacity,
                footer_size: self.footer_size(),
            })
    }

    /// Appends `0xFF` until the payload reaches `capacity - footer_size`.
    ///
    /// The payload is never truncated: an oversized one is an error.
    pub fn pad(&mut self) -> Result<(), ImageError> {
        if self.reserved {
            return Err(ImageError::FooterAlreadyReserved);
        }
        let limit = self.payload_limit()?;
        let current = self.buffer.len();
        if current > limit {
            return Err(ImageError::SizeExceeded {
                payload_len: current,
                limit,
                capacity: self.capacity,
            });
        }
        info!(
            "Padding payload from {current} to {limit} bytes ({} fill bytes)",
            limit - current
        );
        self.buffer.resize(limit, PAYLOAD_FILL_BYTE);
        Ok(())
    }

    /// Appends the zeroed footer.
    pub fn reserve_footer(&mut self) -> Result<(), ImageError> {
        if self.reserved {
            return Err(ImageError::FooterAlreadyReserved);
        }
        debug!("Reserving {} bytes for the footer", self.footer_size());
        self.buffer
            .resize(self.buffer.len() + self.footer_size(), 0);
        self.reserved = true;
        Ok(())
    }

    /// The region covered by the CRC and the integrity proof.
    pub fn payload(&self) -> &[u8] {
        if self.reserved {
            &self.buffer[..self.buffer.len() - self.footer_size()]
        } else {
            &self.buffer
        }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn compute_crc32(&self) -> u32 {
        crc32(self.payload())
    }

    pub fn payload_digest(&self) -> [u8; DIGEST_SIZE] {
        Sha256::digest(self.payload()).into()
    }

    fn footer_mut(&mut self) -> Result<&mut [u8], ImageError> {
        if !self.reserved {
            return Err(ImageError::FooterNotReserved);
        }
        let start = self.buffer.len() - self.footer_size();
        Ok(&mut self.buffer[start..])
    }

    pub fn write_crc(&mut self, value: u32) -> Result<(), ImageError> {
        self.footer_mut()?[CRC_OFFSET..CRC_OFFSET + CRC_SIZE].copy_from_slice(&value.to_le_bytes());
        info!("CRC-32 of the payload: {value:08X}");
        self.crc32 = Some(value);
        Ok(())
    }

    pub fn write_version(&mut self, version: ImageVersion) -> Result<(), ImageError> {
        self.footer_mut()?[VERSION_OFFSET..VERSION_OFFSET + VERSION_SIZE]
            .copy_from_slice(version.as_bytes());
        info!("Image version: {version}");
        self.version = Some(version);
        Ok(())
    }

    /// Writes the digest of the payload, or a signature over it.
    pub fn write_integrity_proof(&mut self, source: ProofSource<'_>) -> Result<(), ImageError> {
        if !self.reserved {
            return Err(ImageError::FooterNotReserved);
        }
        let digest = self.payload_digest();
        debug!("SHA-256 of the payload: {digest:02x?}");
        let proof: Vec<u8> = match (self.mode, source) {
            (ProofMode::Digest, ProofSource::Digest) => digest.to_vec(),
            (ProofMode::Signature, ProofSource::Signer(signer)) => {
                sign_normalized(signer, &digest)?.to_vec()
            }
            (ProofMode::Signature, ProofSource::Digest) => {
                return Err(SigningError::MissingSigner.into())
            }
            (mode @ ProofMode::Digest, ProofSource::Signer(_)) => {
                return Err(ImageError::ProofModeMismatch { mode })
            }
        };
        let mode = self.mode;
        self.footer_mut()?[PROOF_OFFSET..PROOF_OFFSET + mode.proof_size()].copy_from_slice(&proof);
        info!("Wrote {}-byte {mode} proof", proof.len());
        self.proof_written = true;
        Ok(())
    }

    /// Freezes the buffer into an image. Every footer field must have been
    /// written.
    pub fn finish(self) -> Result<DfuImage, ImageError> {
        if !self.reserved {
            return Err(ImageError::FooterNotReserved);
        }
        let crc32 = self.crc32.ok_or(ImageError::FooterIncomplete("CRC-32"))?;
        let version = self.version.ok_or(ImageError::FooterIncomplete("version"))?;
        if !self.proof_written {
            return Err(ImageError::FooterIncomplete("integrity proof"));
        }
        Ok(DfuImage::new(self.buffer, crc32, version, self.mode))
    }
}

/// Pads `firmware` to `config.capacity` and fills in the footer.
pub fn build_image(
    firmware: Vec<u8>,
    config: &ImageConfig,
    source: ProofSource<'_>,
) -> Result<DfuImage, ImageError> {
    let mut builder = FooterBuilder::new(firmware, config.capacity, config.mode);
    builder.pad()?;
    builder.reserve_footer()?;
    let crc = builder.compute_crc32();
    builder.write_version(config.version)?;
    builder.write_crc(crc)?;
    builder.write_integrity_proof(source)?;
    builder.finish()
}
