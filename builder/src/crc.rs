// Licensed under the Apache-2.0 license

use crc::{Crc, NoTable, CRC_32_ISO_HDLC};

/// Reflected CRC-32 (polynomial 0xEDB88320, init and final XOR 0xFFFFFFFF),
/// evaluated one bit at a time like the bootloader does.
pub const IMAGE_CRC: Crc<u32, NoTable> = Crc::<u32, NoTable>::new(&CRC_32_ISO_HDLC);

pub fn crc32(data: &[u8]) -> u32 {
    IMAGE_CRC.checksum(data)
}
