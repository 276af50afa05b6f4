// Licensed under the Apache-2.0 license
#![no_std]

//! On-disk layout of the DFU image footer.
//!
//! A DFU image is exactly `capacity` bytes long. The last `footer_size` bytes
//! hold the trailer read by the bootloader; everything before it is the payload
//! (firmware followed by `0xFF` fill). The CRC and the integrity proof cover the
//! payload only.
//!
//! ```text
//! offset  size  field
//! 0       4     CRC-32 of the payload, little-endian
//! 4       1     version major
//! 5       2     version minor, big-endian
//! 7       1     version patch
//! 8       32|64 SHA-256 digest of the payload, or raw ECDSA P-256 r||s
//! ```

use core::fmt;
use core::mem::{offset_of, size_of};
use core::str::FromStr;

use zerocopy::byteorder::{BigEndian, LittleEndian, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const CRC_SIZE: usize = 4;
pub const VERSION_SIZE: usize = 4;
pub const DIGEST_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

/// Byte used to pad the payload up to `capacity - footer_size`.
pub const PAYLOAD_FILL_BYTE: u8 = 0xFF;

#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct ImageVersion {
    pub major: u8,
    pub minor: U16<BigEndian>,
    pub patch: u8,
}

impl ImageVersion {
    pub fn new(major: u8, minor: u16, patch: u8) -> Self {
        Self {
            major,
            minor: minor.into(),
            patch,
        }
    }
}

impl fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor.get(), self.patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseVersionError;

impl fmt::Display for ParseVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expected a version of the form MAJOR.MINOR.PATCH (major and patch < 256, minor < 65536)")
    }
}

impl FromStr for ImageVersion {
    type Err = ParseVersionError;

    /// Parses `1.2.3` or `v1.2.3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix('v').unwrap_or(s);
        let mut parts = s.split('.');
        let major = parts.next().ok_or(ParseVersionError)?;
        let minor = parts.next().ok_or(ParseVersionError)?;
        let patch = parts.next().ok_or(ParseVersionError)?;
        if parts.next().is_some() {
            return Err(ParseVersionError);
        }
        Ok(Self::new(
            major.parse().map_err(|_| ParseVersionError)?,
            minor.parse().map_err(|_| ParseVersionError)?,
            patch.parse().map_err(|_| ParseVersionError)?,
        ))
    }
}

/// Footer carrying a SHA-256 digest of the payload.
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DigestFooter {
    pub crc32: U32<LittleEndian>,
    pub version: ImageVersion,
    pub digest: [u8; DIGEST_SIZE],
}

/// Footer carrying a raw ECDSA P-256 signature (`r || s`) over the payload digest.
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SignatureFooter {
    pub crc32: U32<LittleEndian>,
    pub version: ImageVersion,
    pub signature: [u8; SIGNATURE_SIZE],
}

pub const DIGEST_FOOTER_SIZE: usize = size_of::<DigestFooter>();
pub const SIGNATURE_FOOTER_SIZE: usize = size_of::<SignatureFooter>();

pub const CRC_OFFSET: usize = offset_of!(DigestFooter, crc32);
pub const VERSION_OFFSET: usize = offset_of!(DigestFooter, version);
pub const PROOF_OFFSET: usize = offset_of!(DigestFooter, digest);

const _: () = assert!(DIGEST_FOOTER_SIZE == CRC_SIZE + VERSION_SIZE + DIGEST_SIZE);
const _: () = assert!(SIGNATURE_FOOTER_SIZE == CRC_SIZE + VERSION_SIZE + SIGNATURE_SIZE);
const _: () = assert!(offset_of!(SignatureFooter, signature) == PROOF_OFFSET);

/// What the last footer field proves about the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProofMode {
    Digest,
    Signature,
}

impl ProofMode {
    pub const fn proof_size(self) -> usize {
        match self {
            ProofMode::Digest => DIGEST_SIZE,
            ProofMode::Signature => SIGNATURE_SIZE,
        }
    }

    pub const fn footer_size(self) -> usize {
        match self {
            ProofMode::Digest => DIGEST_FOOTER_SIZE,
            ProofMode::Signature => SIGNATURE_FOOTER_SIZE,
        }
    }

    /// Tag recorded in the image manifest.
    pub const fn tag(self) -> &'static str {
        match self {
            ProofMode::Digest => "sha256",
            ProofMode::Signature => "ecdsa-p256",
        }
    }
}

impl fmt::Display for ProofMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Decoded footer fields, borrowing the proof bytes from the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FooterFields<'a> {
    pub crc32: u32,
    pub version: ImageVersion,
    pub proof: &'a [u8],
}

/// Splits a complete image into `(payload, footer)`.
///
/// Returns `None` if the image is too small to hold a footer of `mode`.
pub fn split_image(image: &[u8], mode: ProofMode) -> Option<(&[u8], &[u8])> {
    let footer_start = image.len().checked_sub(mode.footer_size())?;
    Some(image.split_at(footer_start))
}

/// Decodes the footer at the end of `image`.
pub fn read_footer(image: &[u8], mode: ProofMode) -> Option<FooterFields<'_>> {
    let (_, footer) = split_image(image, mode)?;
    match mode {
        ProofMode::Digest => {
            let footer = DigestFooter::ref_from_bytes(footer).ok()?;
            Some(FooterFields {
                crc32: footer.crc32.get(),
                version: footer.version,
                proof: &footer.digest,
            })
        }
        ProofMode::Signature => {
            let footer = SignatureFooter::ref_from_bytes(footer).ok()?;
            Some(FooterFields {
                crc32: footer.crc32.get(),
                version: footer.version,
                proof: &footer.signature,
            })
        }
    }
}
