// Licensed under the Apache-2.0 license

//! Streams a DFU image to the bootloader.
//!
//! The session sends START, waits for the device to erase, then sends the
//! image one DATA chunk at a time. Each chunk must be acknowledged by a STATUS
//! counting it before the next one goes out; a chunk is resent as is up to
//! `max_attempts` times in total. A failed START is followed by a best-effort
//! CANCEL, an exhausted chunk is not.

use std::time::Duration;

use log::{debug, error, info, warn};
use smlang::statemachine;

use crate::config::SessionOptions;
use crate::error::{AttemptFailure, Rejection, SessionError};
use crate::link::{to_link_frame, Link, LinkError};
use crate::message::{
    build_cancel, build_start, data_message, parse_response, parse_response_unchecked,
    DeviceResponse, StatusResponse, CHUNK_FILL_BYTE, PACKET_PAYLOAD_SIZE,
};

/// The STATUS packet counter is 16 bits wide.
pub const MAX_CHUNKS: usize = u16::MAX as usize;

statemachine! {
    derive_states: [Debug, Clone, Copy],
    derive_events: [Clone, Debug],
    transitions: {
        *Idle + Begin / on_begin = Starting,

        Starting + StartAccepted(StatusResponse) [has_chunks] / on_start_accepted = Transferring,
        Starting + StartAccepted(StatusResponse) [!has_chunks] / on_empty_image = Completed,
        Starting + StartRejected(AttemptFailure) / on_start_rejected = Failed,

        Transferring + ChunkAccepted(StatusResponse) [!is_last_chunk] / on_next_chunk = Transferring,
        Transferring + ChunkAccepted(StatusResponse) [is_last_chunk] / on_transfer_complete = Completed,
        Transferring + ChunkRejected(AttemptFailure) [has_attempts_left] / on_retry_chunk = Transferring,
        Transferring + ChunkRejected(AttemptFailure) [!has_attempts_left] / on_chunk_exhausted = Failed,

        Idle + Cancel / on_cancel = Cancelled,
        Starting + Cancel / on_cancel = Cancelled,
        Transferring + Cancel / on_cancel = Cancelled
    }
}

fn state_name(state: States) -> &'static str {
    match state {
        States::Idle => "Idle",
        States::Starting => "Starting",
        States::Transferring => "Transferring",
        States::Completed => "Completed",
        States::Failed => "Failed",
        States::Cancelled => "Cancelled",
    }
}

fn event_name(event: &Events) -> &'static str {
    match event {
        Events::Begin => "Begin",
        Events::StartAccepted(_) => "StartAccepted",
        Events::StartRejected(_) => "StartRejected",
        Events::ChunkAccepted(_) => "ChunkAccepted",
        Events::ChunkRejected(_) => "ChunkRejected",
        Events::Cancel => "Cancel",
    }
}

/// Counters of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    pub bytes: usize,
    pub chunks: usize,
    /// DATA resends across all chunks.
    pub retries: usize,
}

/// Result of driving the session one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Running,
    Completed(TransferSummary),
}

pub struct SessionContext<L: Link> {
    link: L,
    image: Vec<u8>,
    chunk_count: usize,
    /// Index of the chunk in flight.
    seq: u16,
    /// Attempts spent on the chunk in flight.
    attempt: usize,
    max_attempts: usize,
    retries: usize,
    /// Send error of the last message, reported as the outcome of its attempt.
    send_failure: Option<LinkError>,
    failure: Option<SessionError>,
}

impl<L: Link> SessionContext<L> {
    fn send_message(&mut self, what: &str, message: &[u8]) {
        let result = to_link_frame(message)
            .map_err(|e| LinkError::Io(e.to_string()))
            .and_then(|frame| self.link.send(&frame));
        match result {
            Ok(()) => debug!("Sent {what}: {:02x?}", message),
            Err(e) => {
                warn!("Failed to send {what}: {e}");
                self.send_failure = Some(e);
            }
        }
    }

    /// Chunk `seq` of the image; the final one is padded with `0xFF`.
    fn chunk(&self, seq: u16) -> [u8; PACKET_PAYLOAD_SIZE] {
        let mut chunk = [CHUNK_FILL_BYTE; PACKET_PAYLOAD_SIZE];
        let start = usize::from(seq) * PACKET_PAYLOAD_SIZE;
        let end = (start + PACKET_PAYLOAD_SIZE).min(self.image.len());
        if start < end {
            chunk[..end - start].copy_from_slice(&self.image[start..end]);
        }
        chunk
    }

    fn send_chunk(&mut self) {
        let message = data_message(self.seq, &self.chunk(self.seq));
        self.attempt += 1;
        let what = format!(
            "DATA {} (attempt {}/{})",
            self.seq, self.attempt, self.max_attempts
        );
        self.send_message(&what, &message);
    }

    fn send_cancel(&mut self) {
        self.send_message("CANCEL", &build_cancel());
        // Nobody waits for the answer to a CANCEL.
        self.send_failure = None;
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn seq(&self) -> u16 {
        self.seq
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }
}

impl<L: Link> StateMachineContext for SessionContext<L> {
    // Guards
    fn has_chunks(&self, _status: &StatusResponse) -> Result<bool, ()> {
        Ok(self.chunk_count > 0)
    }

    fn is_last_chunk(&self, _status: &StatusResponse) -> Result<bool, ()> {
        Ok(usize::from(self.seq) + 1 >= self.chunk_count)
    }

    fn has_attempts_left(&self, _failure: &AttemptFailure) -> Result<bool, ()> {
        Ok(self.attempt < self.max_attempts)
    }

    // Actions
    fn on_begin(&mut self) -> Result<(), ()> {
        info!(
            "Starting update: {} bytes in {} chunks",
            self.image.len(),
            self.chunk_count
        );
        self.send_message("START", &build_start());
        Ok(())
    }

    fn on_start_accepted(&mut self, _status: StatusResponse) -> Result<(), ()> {
        info!("Device accepted START");
        self.seq = 0;
        self.attempt = 0;
        self.send_chunk();
        Ok(())
    }

    fn on_empty_image(&mut self, _status: StatusResponse) -> Result<(), ()> {
        info!("Device accepted START, image is empty");
        Ok(())
    }

    fn on_start_rejected(&mut self, failure: AttemptFailure) -> Result<(), ()> {
        error!("START failed: {failure}");
        self.send_cancel();
        self.failure = Some(SessionError::StartFailed(failure));
        Ok(())
    }

    fn on_next_chunk(&mut self, status: StatusResponse) -> Result<(), ()> {
        info!(
            "Chunk {}/{} accepted",
            status.packets_received, self.chunk_count
        );
        self.seq += 1;
        self.attempt = 0;
        self.send_chunk();
        Ok(())
    }

    fn on_transfer_complete(&mut self, status: StatusResponse) -> Result<(), ()> {
        info!(
            "Chunk {}/{} accepted, transfer complete",
            status.packets_received, self.chunk_count
        );
        Ok(())
    }

    fn on_retry_chunk(&mut self, failure: AttemptFailure) -> Result<(), ()> {
        warn!(
            "Chunk {} attempt {}/{} failed: {failure}",
            self.seq, self.attempt, self.max_attempts
        );
        self.retries += 1;
        self.send_chunk();
        Ok(())
    }

    fn on_chunk_exhausted(&mut self, failure: AttemptFailure) -> Result<(), ()> {
        error!(
            "Chunk {} failed after {} attempts: {failure}",
            self.seq, self.attempt
        );
        self.failure = Some(SessionError::ChunkFailed {
            seq: self.seq,
            attempts: self.attempt,
            last: failure,
        });
        Ok(())
    }

    fn on_cancel(&mut self) -> Result<(), ()> {
        info!("Cancelling update");
        self.send_cancel();
        Ok(())
    }
}

/// One update run over an exclusively owned [`Link`].
pub struct TransportSession<L: Link> {
    machine: StateMachine<SessionContext<L>>,
    options: SessionOptions,
}

impl<L: Link> TransportSession<L> {
    pub fn new(link: L, image: &[u8], options: SessionOptions) -> Result<Self, SessionError> {
        if options.max_attempts == 0 {
            return Err(SessionError::InvalidOptions(
                "max_attempts must be at least 1",
            ));
        }
        let chunk_count = image.len().div_ceil(PACKET_PAYLOAD_SIZE);
        if chunk_count > MAX_CHUNKS {
            return Err(SessionError::ImageTooLarge {
                chunks: chunk_count,
                max: MAX_CHUNKS,
            });
        }
        let context = SessionContext {
            link,
            image: image.to_vec(),
            chunk_count,
            seq: 0,
            attempt: 0,
            max_attempts: options.max_attempts,
            retries: 0,
            send_failure: None,
            failure: None,
        };
        Ok(Self {
            machine: StateMachine::new(context),
            options,
        })
    }

    pub fn state(&self) -> States {
        *self.machine.state()
    }

    pub fn context(&self) -> &SessionContext<L> {
        self.machine.context()
    }

    pub fn link(&self) -> &L {
        self.machine.context().link()
    }

    pub fn link_mut(&mut self) -> &mut L {
        self.machine.context_mut().link_mut()
    }

    /// Runs the session to a terminal state.
    pub fn run(&mut self) -> Result<TransferSummary, SessionError> {
        loop {
            if let Progress::Completed(summary) = self.step()? {
                return Ok(summary);
            }
        }
    }

    /// Sends the next message, or waits for the answer to the last one.
    ///
    /// In a terminal state this reports the outcome again.
    pub fn step(&mut self) -> Result<Progress, SessionError> {
        let event = match self.state() {
            States::Idle => Events::Begin,
            States::Starting => match self.await_status(self.options.start_timeout, None) {
                Ok(status) => Events::StartAccepted(status),
                Err(failure) => Events::StartRejected(failure),
            },
            States::Transferring => {
                let expected = self.machine.context().seq + 1;
                match self.await_status(self.options.chunk_timeout, Some(expected)) {
                    Ok(status) => Events::ChunkAccepted(status),
                    Err(failure) => Events::ChunkRejected(failure),
                }
            }
            States::Completed => return Ok(Progress::Completed(self.summary())),
            States::Failed => {
                return Err(self
                    .machine
                    .context()
                    .failure
                    .clone()
                    .unwrap_or(SessionError::UnexpectedEvent {
                        state: state_name(States::Failed),
                        event: "none",
                    }))
            }
            States::Cancelled => return Err(SessionError::Cancelled),
        };
        self.fire(event)?;
        Ok(Progress::Running)
    }

    /// Sends one CANCEL and stops the session. Does nothing once the session has
    /// ended.
    pub fn cancel(&mut self) -> Result<(), SessionError> {
        match self.state() {
            States::Completed | States::Failed | States::Cancelled => {
                debug!("Session already ended, ignoring cancel");
                Ok(())
            }
            _ => self.fire(Events::Cancel),
        }
    }

    fn summary(&self) -> TransferSummary {
        let context = self.machine.context();
        TransferSummary {
            bytes: context.image.len(),
            chunks: context.chunk_count,
            retries: context.retries,
        }
    }

    fn fire(&mut self, event: Events) -> Result<(), SessionError> {
        let state = self.state();
        let event_name = event_name(&event);
        if self.machine.process_event(event).is_err() {
            error!(
                "Event {event_name} rejected in state {}",
                state_name(state)
            );
            return Err(SessionError::UnexpectedEvent {
                state: state_name(state),
                event: event_name,
            });
        }
        let next = self.state();
        if next != state {
            info!("Session: {} -> {}", state_name(state), state_name(next));
        }
        Ok(())
    }

    /// Waits for the STATUS answering the message just sent.
    ///
    /// `expected_packets` is the packet count the STATUS must report, if any.
    fn await_status(
        &mut self,
        timeout: Duration,
        expected_packets: Option<u16>,
    ) -> Result<StatusResponse, AttemptFailure> {
        let verify_crc = self.options.verify_response_crc;
        let context = self.machine.context_mut();
        if let Some(e) = context.send_failure.take() {
            return Err(AttemptFailure::Link(e));
        }

        let raw = match context.link.receive(timeout) {
            Ok(raw) => raw,
            Err(LinkError::Timeout) => return Err(AttemptFailure::Timeout),
            Err(e) => return Err(AttemptFailure::Link(e)),
        };
        debug!("Received {} bytes: {:02x?}", raw.len(), raw);

        let parsed = if verify_crc {
            parse_response(&raw)
        } else {
            parse_response_unchecked(&raw)
        };
        let reason = match parsed {
            Err(error) => return Err(AttemptFailure::Malformed { error, raw }),
            Ok(DeviceResponse::OpResult(op_result)) => Rejection::OpResult(op_result),
            Ok(DeviceResponse::Status(status)) if !status.op_result.is_success() => {
                Rejection::Status(status)
            }
            Ok(DeviceResponse::Status(status)) => match expected_packets {
                Some(expected) if status.packets_received != expected => Rejection::PacketCount {
                    expected,
                    actual: status.packets_received,
                },
                _ => return Ok(status),
            },
        };
        Err(AttemptFailure::Rejected { reason, raw })
    }
}
