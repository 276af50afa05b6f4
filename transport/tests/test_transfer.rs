// Licensed under the Apache-2.0 license

#[cfg(test)]
mod common;

use common::{init_logger, test_image, Reply, ScriptedLink};
use dfu_transport::message::{HostMessage, OpResult, OpResultCode, PACKET_PAYLOAD_SIZE};
use dfu_transport::{
    AttemptFailure, LinkError, Progress, Rejection, SessionError, SessionOptions, SessionState,
    TransportSession, LINK_FRAME_SIZE,
};

fn run(
    link: &mut ScriptedLink,
    image: &[u8],
    options: SessionOptions,
) -> (Result<dfu_transport::TransferSummary, SessionError>, SessionState) {
    let mut session = TransportSession::new(link, image, options).unwrap();
    let result = session.run();
    (result, session.state())
}

#[test]
fn test_all_chunks_acknowledged_first_try() {
    init_logger();
    let image = test_image(3 * PACKET_PAYLOAD_SIZE);
    let mut link = ScriptedLink::new([Reply::ok(0), Reply::ok(1), Reply::ok(2), Reply::ok(3)]);

    let (result, state) = run(&mut link, &image, SessionOptions::default());
    let summary = result.unwrap();
    assert!(matches!(state, SessionState::Completed));
    assert_eq!(summary.chunks, 3);
    assert_eq!(summary.retries, 0);

    let messages = link.sent_messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0], HostMessage::Start);
    for (seq, message) in messages[1..].iter().enumerate() {
        let start = seq * PACKET_PAYLOAD_SIZE;
        assert_eq!(
            message,
            &HostMessage::Data {
                seq: seq as u16,
                payload: image[start..start + PACKET_PAYLOAD_SIZE].try_into().unwrap(),
            }
        );
    }
}

#[test]
fn test_every_frame_is_padded() {
    init_logger();
    let mut link = ScriptedLink::new([Reply::ok(0), Reply::ok(1)]);
    let (result, _) = run(&mut link, &test_image(10), SessionOptions::default());
    result.unwrap();

    assert_eq!(link.sent().len(), 2);
    let start = &link.sent()[0];
    assert_eq!(start.len(), LINK_FRAME_SIZE);
    assert!(start[4..].iter().all(|b| *b == 0xFF));
    let data = &link.sent()[1];
    assert_eq!(data.len(), LINK_FRAME_SIZE);
    assert!(data[134..].iter().all(|b| *b == 0xFF));
    // final chunk filler inside the DATA payload
    assert!(data[4 + 10..132].iter().all(|b| *b == 0xFF));
}

#[test]
fn test_chunk_succeeds_on_third_attempt() {
    init_logger();
    let image = test_image(3 * PACKET_PAYLOAD_SIZE);
    let mut link = ScriptedLink::new([
        Reply::ok(0),
        Reply::ok(1),
        Reply::Timeout,
        Reply::Timeout,
        Reply::ok(2),
        Reply::ok(3),
    ]);

    let (result, state) = run(&mut link, &image, SessionOptions::default());
    let summary = result.unwrap();
    assert!(matches!(state, SessionState::Completed));
    assert_eq!(summary.retries, 2);
    assert_eq!(link.data_sends(0), 1);
    assert_eq!(link.data_sends(1), 3);
    assert_eq!(link.data_sends(2), 1);

    // resends are byte-identical
    let sent = link.sent();
    assert_eq!(sent[2], sent[3]);
    assert_eq!(sent[3], sent[4]);
}

#[test]
fn test_chunk_rejected_on_every_attempt() {
    init_logger();
    let image = test_image(2 * PACKET_PAYLOAD_SIZE);
    let mut link = ScriptedLink::new([
        Reply::ok(0),
        Reply::ok(1),
        Reply::error_status(OpResultCode::GenericErr, 1),
        Reply::OpResult(OpResultCode::CrcErr.into()),
        Reply::ok(1),
        Reply::ok(2),
    ]);

    let (result, state) = run(&mut link, &image, SessionOptions::default());
    assert!(matches!(state, SessionState::Failed));
    match result {
        Err(SessionError::ChunkFailed {
            seq,
            attempts,
            last: AttemptFailure::Rejected { reason, raw },
        }) => {
            assert_eq!(seq, 1);
            assert_eq!(attempts, 3);
            assert_eq!(
                reason,
                Rejection::PacketCount {
                    expected: 2,
                    actual: 1
                }
            );
            assert_eq!(raw.len(), 8);
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // nothing after the third attempt, not even a CANCEL
    assert_eq!(
        link.sent_messages().last(),
        Some(&HostMessage::Data {
            seq: 1,
            payload: image[128..256].try_into().unwrap()
        })
    );
    assert_eq!(link.sent().len(), 5);
    assert_eq!(link.data_sends(1), 3);
    assert_eq!(link.remaining_replies(), 1);
}

#[test]
fn test_start_rejected_sends_cancel() {
    init_logger();
    let mut link = ScriptedLink::new([Reply::OpResult(OpResultCode::GenericErr.into())]);

    let (result, state) = run(&mut link, &test_image(500), SessionOptions::default());
    assert!(matches!(state, SessionState::Failed));
    assert!(matches!(
        result,
        Err(SessionError::StartFailed(AttemptFailure::Rejected {
            reason: Rejection::OpResult(OpResult::Code(OpResultCode::GenericErr)),
            ..
        }))
    ));
    assert_eq!(
        link.sent_messages(),
        vec![HostMessage::Start, HostMessage::Cancel]
    );
}

#[test]
fn test_start_timeout_sends_cancel() {
    init_logger();
    let mut link = ScriptedLink::new([]);

    let (result, _) = run(&mut link, &test_image(500), SessionOptions::default());
    assert_eq!(result, Err(SessionError::StartFailed(AttemptFailure::Timeout)));
    assert_eq!(
        link.sent_messages(),
        vec![HostMessage::Start, HostMessage::Cancel]
    );
}

#[test]
fn test_start_status_error() {
    init_logger();
    let mut link = ScriptedLink::new([Reply::error_status(OpResultCode::GenericErr, 0)]);

    let (result, _) = run(&mut link, &test_image(500), SessionOptions::default());
    assert!(matches!(
        result,
        Err(SessionError::StartFailed(AttemptFailure::Rejected {
            reason: Rejection::Status(_),
            ..
        }))
    ));
    assert_eq!(link.data_sends(0), 0);
}

#[test]
fn test_malformed_response_is_a_failed_attempt() {
    init_logger();
    let mut unexpected_length = vec![0x03, 0x09, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00];
    unexpected_length.resize(LINK_FRAME_SIZE, 0xFF);
    let mut link = ScriptedLink::new([
        Reply::ok(0),
        Reply::Raw(unexpected_length),
        Reply::Raw(vec![0x03]),
        Reply::ok(1),
    ]);

    let (result, state) = run(&mut link, &test_image(64), SessionOptions::default());
    assert!(matches!(state, SessionState::Completed));
    assert_eq!(result.unwrap().retries, 2);
    assert_eq!(link.data_sends(0), 3);
}

#[test]
fn test_malformed_response_reported() {
    init_logger();
    let mut link = ScriptedLink::new([
        Reply::ok(0),
        Reply::Raw(vec![0x42, 0x08]),
        Reply::Raw(vec![0x42, 0x08]),
        Reply::Raw(vec![0x42, 0x08]),
    ]);

    let (result, _) = run(&mut link, &test_image(64), SessionOptions::default());
    match result {
        Err(SessionError::ChunkFailed {
            last: AttemptFailure::Malformed { raw, .. },
            ..
        }) => assert_eq!(raw, vec![0x42, 0x08]),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_response_crc_check() {
    init_logger();
    let mut corrupted = dfu_transport::message::encode_status(&dfu_transport::message::StatusResponse {
        op_result: OpResult::SUCCESS,
        active: true,
        packets_received: 1,
    });
    corrupted[7] ^= 0x01;

    let mut link = ScriptedLink::new([Reply::ok(0), Reply::Raw(corrupted.clone())]);
    let options = SessionOptions {
        max_attempts: 1,
        ..Default::default()
    };
    let (result, _) = run(&mut link, &test_image(64), options.clone());
    assert!(matches!(
        result,
        Err(SessionError::ChunkFailed {
            last: AttemptFailure::Malformed { .. },
            ..
        })
    ));

    let mut link = ScriptedLink::new([Reply::ok(0), Reply::Raw(corrupted)]);
    let options = SessionOptions {
        verify_response_crc: false,
        ..options
    };
    let (result, _) = run(&mut link, &test_image(64), options);
    assert!(result.is_ok());
}

#[test]
fn test_link_errors_count_as_attempts() {
    init_logger();
    let mut link = ScriptedLink::new([
        Reply::ok(0),
        Reply::Error(LinkError::Io("framing error".into())),
        Reply::ok(1),
    ])
    .fail_send(1);

    let (result, state) = run(&mut link, &test_image(64), SessionOptions::default());
    assert!(matches!(state, SessionState::Completed));
    assert_eq!(result.unwrap().retries, 2);
    // the failed write never reached the wire
    assert_eq!(link.data_sends(0), 2);
    assert_eq!(link.remaining_replies(), 0);
}

#[test]
fn test_empty_image() {
    init_logger();
    let mut link = ScriptedLink::new([Reply::ok(0)]);
    let (result, state) = run(&mut link, &[], SessionOptions::default());
    assert!(matches!(state, SessionState::Completed));
    assert_eq!(result.unwrap().chunks, 0);
    assert_eq!(link.sent_messages(), vec![HostMessage::Start]);
}

#[test]
fn test_cancel_during_transfer() {
    init_logger();
    let mut link = ScriptedLink::new([Reply::ok(0)]);
    {
        let mut session =
            TransportSession::new(&mut link, &test_image(300), SessionOptions::default()).unwrap();
        assert_eq!(session.step(), Ok(Progress::Running));
        assert_eq!(session.step(), Ok(Progress::Running));
        assert!(matches!(session.state(), SessionState::Transferring));

        session.cancel().unwrap();
        assert!(matches!(session.state(), SessionState::Cancelled));
        assert_eq!(session.run(), Err(SessionError::Cancelled));

        // already ended
        session.cancel().unwrap();
    }
    assert_eq!(
        link.sent_messages(),
        vec![
            HostMessage::Start,
            HostMessage::Data {
                seq: 0,
                payload: test_image(300)[..128].try_into().unwrap()
            },
            HostMessage::Cancel
        ]
    );
}

#[test]
fn test_cancel_before_start() {
    init_logger();
    let mut link = ScriptedLink::new([]);
    {
        let mut session =
            TransportSession::new(&mut link, &test_image(10), SessionOptions::default()).unwrap();
        session.cancel().unwrap();
        assert!(matches!(session.state(), SessionState::Cancelled));
    }
    assert_eq!(link.sent_messages(), vec![HostMessage::Cancel]);
}
