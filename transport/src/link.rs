// Licensed under the Apache-2.0 license

use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use thiserror::Error;

use crate::message::FramingError;

/// Every transmission on the serial link is exactly this long.
pub const LINK_FRAME_SIZE: usize = 256;
/// Filler after the message bytes of a link frame.
pub const LINK_FILL_BYTE: u8 = 0xFF;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("timed out waiting for data")]
    Timeout,
    #[error("link is disconnected")]
    Disconnected,
    #[error("link I/O failed: {0}")]
    Io(String),
}

/// Raw byte channel to the device.
///
/// The session owns its link for the whole update and never has more than one
/// message in flight.
pub trait Link {
    /// Sends one link frame.
    fn send(&mut self, frame: &[u8]) -> Result<(), LinkError>;

    /// Blocks until bytes arrive or `timeout` elapses.
    ///
    /// Returns whatever the device has sent so far, which may be a partial
    /// message; a wait that sees no data at all is [`LinkError::Timeout`].
    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, LinkError>;
}

impl<L: Link + ?Sized> Link for &mut L {
    fn send(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        (**self).send(frame)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, LinkError> {
        (**self).receive(timeout)
    }
}

/// Copies `message` into a fixed-size link frame padded with `0xFF`.
pub fn to_link_frame(message: &[u8]) -> Result<[u8; LINK_FRAME_SIZE], FramingError> {
    let mut frame = [LINK_FILL_BYTE; LINK_FRAME_SIZE];
    frame
        .get_mut(..message.len())
        .ok_or(FramingError::FrameTooLong {
            len: message.len(),
            max: LINK_FRAME_SIZE,
        })?
        .copy_from_slice(message);
    Ok(frame)
}

/// Non-blocking byte channel, such as an open serial port.
pub trait ByteChannel {
    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Number of bytes that can be read without blocking.
    fn bytes_waiting(&mut self) -> Result<usize, LinkError>;

    fn read(&mut self, max: usize) -> Result<Vec<u8>, LinkError>;
}

/// Turns a [`ByteChannel`] into a [`Link`] by polling it until a deadline.
pub struct PolledLink<C: ByteChannel> {
    channel: C,
    poll_interval: Duration,
}

impl<C: ByteChannel> PolledLink<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn into_inner(self) -> C {
        self.channel
    }
}

impl<C: ByteChannel> Link for PolledLink<C> {
    fn send(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        self.channel.write(frame)
    }

    /// Once bytes show up, keeps reading until the channel stays quiet for one
    /// poll interval or a whole link frame has arrived.
    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, LinkError> {
        let deadline = Instant::now() + timeout;
        let mut received = Vec::new();
        loop {
            let waiting = self.channel.bytes_waiting()?;
            if waiting > 0 {
                received.extend(self.channel.read(waiting)?);
                if received.len() >= LINK_FRAME_SIZE {
                    return Ok(received);
                }
            } else if !received.is_empty() {
                return Ok(received);
            }
            let now = Instant::now();
            if now >= deadline {
                if received.is_empty() {
                    debug!("No data after {timeout:?}");
                    return Err(LinkError::Timeout);
                }
                return Ok(received);
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}
