use riptide::StreamId;
use riptide::error::TransportError;
use riptide::frame::{AckFrame, AckRange, Frame, StreamFrame};

fn roundtrip(frame: Frame) {
    let mut buf = Vec::new();
    let written = frame.encode(&mut buf);
    assert_eq!(written, buf.len());
    let (decoded, used) = Frame::decode(&buf).expect("decodes");
    assert_eq!(used, written);
    assert_eq!(decoded, frame);
}

#[test]
fn test_all_frame_variants_roundtrip() {
    roundtrip(Frame::Stream(StreamFrame {
        stream_id: StreamId(7),
        fin: true,
        offset: 0xDEAD_BEEF_0042,
        data: b"hello world".to_vec(),
    }));
    roundtrip(Frame::Ack(AckFrame {
        delay_ms: 25,
        largest: 100,
        first_range: 5,
        ranges: vec![
            AckRange { gap: 1, length: 2 },
            AckRange { gap: 3, length: 5 },
        ],
    }));
    roundtrip(Frame::Padding { length: 64 });
    roundtrip(Frame::ResetStream {
        stream_id: StreamId(3),
        error_code: 0x0012,
        final_offset: 4096,
    });
    roundtrip(Frame::ConnectionClose {
        error_code: 0x0003,
        reason: "idle timeout".to_string(),
    });
    roundtrip(Frame::Blocked {
        maximum_data: 1 << 40,
    });
    roundtrip(Frame::StreamBlocked {
        stream_id: StreamId(1),
        maximum_stream_data: 65536,
    });
    roundtrip(Frame::Ping);
    roundtrip(Frame::MaxData {
        maximum_data: 123_456_789,
    });
    roundtrip(Frame::MaxStreamData {
        stream_id: StreamId(9),
        maximum_stream_data: 1,
    });
    roundtrip(Frame::MaxStreams {
        unidirectional: false,
        maximum: 128,
    });
    roundtrip(Frame::MaxStreams {
        unidirectional: true,
        maximum: 0,
    });
    roundtrip(Frame::PathChallenge {
        token: [1, 2, 3, 4, 5, 6, 7, 8],
    });
    roundtrip(Frame::PathResponse { token: [0xFF; 8] });
    roundtrip(Frame::Crypto {
        random: [0x42; 16],
        data: [0x17; 32],
    });
    roundtrip(Frame::SessionToken {
        effective_secs: 0,
        token: [0xAB; 32],
    });
    roundtrip(Frame::AckFrequency {
        seq: 3,
        ack_eliciting_threshold: 10,
        reordering_threshold: 3,
        max_ack_delay_ms: 25,
    });
    roundtrip(Frame::Version { version: 1 });
}

#[test]
fn test_truncated_input_is_rejected() {
    let frames = [
        Frame::Stream(StreamFrame {
            stream_id: StreamId(1),
            fin: false,
            offset: 10,
            data: vec![0u8; 32],
        }),
        Frame::ConnectionClose {
            error_code: 0,
            reason: "bye".into(),
        },
        Frame::Crypto {
            random: [0; 16],
            data: [0; 32],
        },
    ];
    for frame in frames {
        let mut buf = Vec::new();
        frame.encode(&mut buf);
        for cut in 1..buf.len() {
            assert_eq!(
                Frame::decode(&buf[..cut]).unwrap_err(),
                TransportError::FrameFormat,
                "truncation at {cut} must fail"
            );
        }
    }
}

#[test]
fn test_unknown_frame_type_is_rejected() {
    assert_eq!(
        Frame::decode(&[0x00]).unwrap_err(),
        TransportError::FrameFormat
    );
    assert_eq!(
        Frame::decode(&[0x12]).unwrap_err(),
        TransportError::FrameFormat
    );
}

#[test]
fn test_stream_unknown_flags_rejected() {
    // flags byte with a bit other than FIN set
    let mut buf = Vec::new();
    Frame::Stream(StreamFrame {
        stream_id: StreamId(1),
        fin: false,
        offset: 0,
        data: vec![1, 2, 3],
    })
    .encode(&mut buf);
    buf[3] = 0x01;
    assert_eq!(Frame::decode(&buf).unwrap_err(), TransportError::FrameFormat);
}

#[test]
fn test_connection_close_requires_utf8_reason() {
    let mut buf = Vec::new();
    Frame::ConnectionClose {
        error_code: 0,
        reason: "ab".into(),
    }
    .encode(&mut buf);
    let len = buf.len();
    buf[len - 2] = 0xFF;
    buf[len - 1] = 0xFE;
    assert_eq!(Frame::decode(&buf).unwrap_err(), TransportError::FrameFormat);
}

#[test]
fn test_max_streams_type_constraint() {
    let mut buf = Vec::new();
    Frame::MaxStreams {
        unidirectional: true,
        maximum: 4,
    }
    .encode(&mut buf);
    buf[1] = 2;
    assert_eq!(Frame::decode(&buf).unwrap_err(), TransportError::FrameFormat);
}

#[test]
fn test_ack_underflow_rejected() {
    // first_range larger than largest
    let mut buf = Vec::new();
    Frame::Ack(AckFrame {
        delay_ms: 0,
        largest: 4,
        first_range: 5,
        ranges: Vec::new(),
    })
    .encode(&mut buf);
    assert_eq!(Frame::decode(&buf).unwrap_err(), TransportError::FrameFormat);

    // ranges walking below zero
    let mut buf = Vec::new();
    Frame::Ack(AckFrame {
        delay_ms: 0,
        largest: 10,
        first_range: 2,
        ranges: vec![AckRange { gap: 20, length: 0 }],
    })
    .encode(&mut buf);
    assert_eq!(Frame::decode(&buf).unwrap_err(), TransportError::FrameFormat);
}

#[test]
fn test_padding_consumes_exact_length() {
    let mut buf = Vec::new();
    Frame::Padding { length: 10 }.encode(&mut buf);
    buf.extend_from_slice(&[0xEE; 4]); // trailing bytes beyond the frame
    let (frame, used) = Frame::decode(&buf).unwrap();
    assert_eq!(frame, Frame::Padding { length: 10 });
    assert_eq!(used, 1 + 2 + 10);
}
