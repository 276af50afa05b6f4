// Licensed under the Apache-2.0 license
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dfu_transport::message::{
    encode_op_result, encode_status, parse_request, FramingError, HostMessage, OpResult,
    OpResultCode, StatusResponse,
};
use dfu_transport::{Link, LinkError, SessionOptions, LINK_FRAME_SIZE};
use log::{debug, LevelFilter};
use simple_logger::SimpleLogger;

pub fn init_logger() {
    // Only the first call installs the logger
    let _ = SimpleLogger::new().with_level(LevelFilter::Debug).init();
}

pub fn test_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

pub fn fast_options() -> SessionOptions {
    SessionOptions {
        start_timeout: Duration::from_millis(500),
        chunk_timeout: Duration::from_millis(50),
        ..Default::default()
    }
}

/// One scripted answer of a [`ScriptedLink`].
#[derive(Debug, Clone)]
pub enum Reply {
    Status {
        op_result: OpResult,
        packets_received: u16,
    },
    OpResult(OpResult),
    Raw(Vec<u8>),
    Timeout,
    Error(LinkError),
}

impl Reply {
    pub fn ok(packets_received: u16) -> Self {
        Reply::Status {
            op_result: OpResult::SUCCESS,
            packets_received,
        }
    }

    pub fn error_status(code: OpResultCode, packets_received: u16) -> Self {
        Reply::Status {
            op_result: code.into(),
            packets_received,
        }
    }

    fn into_bytes(self) -> Result<Vec<u8>, LinkError> {
        match self {
            Reply::Status {
                op_result,
                packets_received,
            } => Ok(encode_status(&StatusResponse {
                op_result,
                active: true,
                packets_received,
            })),
            Reply::OpResult(op_result) => Ok(encode_op_result(op_result)),
            Reply::Raw(bytes) => Ok(bytes),
            Reply::Timeout => Err(LinkError::Timeout),
            Reply::Error(e) => Err(e),
        }
    }
}

/// Link that records every frame and answers from a script. Once the script
/// runs out every receive times out.
pub struct ScriptedLink {
    replies: VecDeque<Reply>,
    sent: Vec<Vec<u8>>,
    /// Indices of `send` calls that fail.
    failing_sends: Vec<usize>,
    send_calls: usize,
}

impl ScriptedLink {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: replies.into_iter().collect(),
            sent: vec![],
            failing_sends: vec![],
            send_calls: 0,
        }
    }

    pub fn fail_send(mut self, call: usize) -> Self {
        self.failing_sends.push(call);
        self
    }

    /// Frames as they reached the wire.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    pub fn sent_messages(&self) -> Vec<HostMessage> {
        self.sent
            .iter()
            .map(|frame| parse_request(frame).unwrap())
            .collect()
    }

    pub fn data_sends(&self, seq: u16) -> usize {
        self.sent_messages()
            .iter()
            .filter(|m| matches!(m, HostMessage::Data { seq: s, .. } if *s == seq))
            .count()
    }

    pub fn remaining_replies(&self) -> usize {
        self.replies.len()
    }
}

impl Link for ScriptedLink {
    fn send(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let call = self.send_calls;
        self.send_calls += 1;
        if self.failing_sends.contains(&call) {
            return Err(LinkError::Io("write failed".into()));
        }
        assert_eq!(frame.len(), LINK_FRAME_SIZE);
        self.sent.push(frame.to_vec());
        Ok(())
    }

    fn receive(&mut self, _timeout: Duration) -> Result<Vec<u8>, LinkError> {
        self.replies
            .pop_front()
            .map_or(Err(LinkError::Timeout), Reply::into_bytes)
    }
}

/// Host end of the channel pair connecting to a [`SimulatedBootloader`].
pub struct ChannelLink {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl Link for ChannelLink {
    fn send(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        self.tx
            .send(frame.to_vec())
            .map_err(|_| LinkError::Disconnected)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, LinkError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => LinkError::Timeout,
            RecvTimeoutError::Disconnected => LinkError::Disconnected,
        })
    }
}

/// What the device saw, returned when its thread exits.
#[derive(Debug, Default)]
pub struct DeviceReport {
    pub flash: Vec<u8>,
    pub received: Vec<HostMessage>,
    pub started: bool,
    pub packets_received: u16,
}

/// Bootloader running the update rules on its own thread: START erases and
/// resets the packet counter, DATA is only accepted with the packet number the
/// counter expects, CANCEL resets. A frame failing its CRC is answered with
/// OP_RESULT, an unparsable one is ignored.
#[derive(Default)]
pub struct SimulatedBootloader {
    already_started: bool,
    ignored_data: Vec<(u16, usize)>,
}

impl SimulatedBootloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// START is refused because an update is already in progress.
    pub fn already_started(mut self) -> Self {
        self.already_started = true;
        self
    }

    /// Drops the first `times` DATA frames with sequence `seq` without answering.
    pub fn ignore_data(mut self, seq: u16, times: usize) -> Self {
        self.ignored_data.push((seq, times));
        self
    }

    pub fn spawn(self) -> (ChannelLink, JoinHandle<DeviceReport>) {
        let (host_tx, device_rx) = mpsc::channel::<Vec<u8>>();
        let (device_tx, host_rx) = mpsc::channel::<Vec<u8>>();
        let handle = thread::spawn(move || self.serve(device_rx, device_tx));
        (
            ChannelLink {
                tx: host_tx,
                rx: host_rx,
            },
            handle,
        )
    }

    fn serve(mut self, rx: Receiver<Vec<u8>>, tx: Sender<Vec<u8>>) -> DeviceReport {
        let mut report = DeviceReport {
            started: self.already_started,
            ..Default::default()
        };
        while let Ok(frame) = rx.recv() {
            let reply = match parse_request(&frame) {
                Ok(message) => {
                    debug!("Device received {message:?}");
                    report.received.push(message.clone());
                    self.handle(&mut report, message)
                }
                Err(FramingError::CrcMismatch { .. }) => {
                    Some(encode_op_result(OpResultCode::CrcErr.into()))
                }
                Err(e) => {
                    debug!("Device ignored frame: {e}");
                    None
                }
            };
            if let Some(reply) = reply {
                if tx.send(reply).is_err() {
                    break;
                }
            }
        }
        report
    }

    fn handle(&mut self, report: &mut DeviceReport, message: HostMessage) -> Option<Vec<u8>> {
        let accepted = match message {
            HostMessage::Start => {
                if report.started {
                    false
                } else {
                    report.started = true;
                    report.packets_received = 0;
                    report.flash.clear();
                    true
                }
            }
            HostMessage::Data { seq, payload } => {
                if let Some(ignored) = self
                    .ignored_data
                    .iter_mut()
                    .find(|(s, times)| *s == seq && *times > 0)
                {
                    ignored.1 -= 1;
                    return None;
                }
                if report.started && seq == report.packets_received {
                    report.flash.extend_from_slice(&payload);
                    report.packets_received += 1;
                    true
                } else {
                    false
                }
            }
            HostMessage::Cancel => {
                report.started = false;
                report.packets_received = 0;
                return Some(encode_op_result(OpResult::SUCCESS));
            }
        };
        let op_result = if accepted {
            OpResult::SUCCESS
        } else {
            OpResultCode::GenericErr.into()
        };
        Some(encode_status(&StatusResponse {
            op_result,
            active: report.started,
            packets_received: report.packets_received,
        }))
    }
}
