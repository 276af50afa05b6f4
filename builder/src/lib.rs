// Licensed under the Apache-2.0 license

//! Host-side construction of DFU images.
//!
//! An image is the firmware padded with `0xFF` up to the footer boundary of the
//! target's application region, followed by a footer holding the CRC-32, the
//! version and an integrity proof (digest or signature) of the padded payload.

mod capacity;
mod crc;
mod error;
mod footer;
mod image;
mod signature;

pub use capacity::{LayoutBounds, APP_END_SYMBOL, APP_START_SYMBOL};
pub use crc::{crc32, IMAGE_CRC};
pub use error::{ImageError, SigningError};
pub use footer::{build_image, FooterBuilder, ImageConfig, ProofSource};
pub use image::{
    inspect_image, verify_image, CommittedImage, DfuImage, ImageSummary, ManifestRecord,
    MANIFEST_FILE_NAME, UPDATE_DIR_NAME,
};
pub use signature::{
    sign_normalized, EcdsaP256Signer, Framing, SignatureLayout, SignatureProvider,
    DER_SIGNATURE_LAYOUT, MAX_SIGNING_ATTEMPTS,
};

pub use dfu_image::{ImageVersion, ProofMode};
