// Licensed under the Apache-2.0 license

use std::io::{Read, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use dfu_transport::{
    ByteChannel, Link, LinkError, PolledLink, SessionOptions, TransferSummary, TransportSession,
};
use log::info;
use serialport::SerialPort;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial port as a non-blocking [`ByteChannel`].
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

fn io_error(e: impl std::fmt::Display) -> LinkError {
    LinkError::Io(e.to_string())
}

impl SerialChannel {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
            .with_context(|| format!("Failed to open serial port {path}"))?;
        info!("Opened {path} at {baud_rate} baud");
        Ok(Self { port })
    }
}

impl ByteChannel for SerialChannel {
    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.port.write_all(bytes).map_err(io_error)?;
        self.port.flush().map_err(io_error)
    }

    fn bytes_waiting(&mut self) -> Result<usize, LinkError> {
        let waiting = self.port.bytes_to_read().map_err(io_error)?;
        usize::try_from(waiting).map_err(io_error)
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>, LinkError> {
        let mut buffer = vec![0u8; max];
        let len = self.port.read(&mut buffer).map_err(io_error)?;
        buffer.truncate(len);
        Ok(buffer)
    }
}

/// Streams `image` over `link` until the device has acknowledged every chunk.
pub fn run_update<L: Link>(
    link: L,
    image: &[u8],
    options: SessionOptions,
) -> Result<TransferSummary> {
    let mut session = TransportSession::new(link, image, options)?;
    let summary = session.run().context("Update failed")?;
    info!(
        "Update complete: {} bytes in {} chunks, {} retries",
        summary.bytes, summary.chunks, summary.retries
    );
    Ok(summary)
}

pub fn update_over_serial(
    path: &str,
    baud_rate: u32,
    image: &[u8],
    options: SessionOptions,
) -> Result<TransferSummary> {
    let link = PolledLink::new(SerialChannel::open(path, baud_rate)?);
    run_update(link, image, options)
}
