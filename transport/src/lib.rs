// Licensed under the Apache-2.0 license

//! Host side of the bootloader's serial update protocol.

pub mod config;
pub mod error;
pub mod link;
pub mod message;
pub mod session;

pub use config::SessionOptions;
pub use error::{AttemptFailure, Rejection, SessionError};
pub use link::{to_link_frame, ByteChannel, Link, LinkError, PolledLink, LINK_FRAME_SIZE};
pub use session::{Progress, States as SessionState, TransferSummary, TransportSession};
