// Licensed under the Apache-2.0 license

use std::time::Duration;

/// Wait for the START response. Covers the device-side flash erase.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(2);
/// Attempts per message, the first send included.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Tunables of one update session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub start_timeout: Duration,
    pub chunk_timeout: Duration,
    pub max_attempts: usize,
    /// Reject responses whose CRC-16 trailer does not match.
    pub verify_response_crc: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            start_timeout: DEFAULT_START_TIMEOUT,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            verify_response_crc: true,
        }
    }
}
