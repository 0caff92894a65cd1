use std::collections::BTreeSet;

use proptest::prelude::*;
use riptide::StreamId;
use riptide::frame::{AckFrame, Frame, StreamFrame};
use riptide::recovery::ack_to_pns;

fn arb_ack() -> impl Strategy<Value = AckFrame> {
    (
        any::<u16>(),
        proptest::collection::btree_set(0u64..5_000, 1..200),
    )
        .prop_map(|(delay_ms, pns)| AckFrame::from_runs(delay_ms, &runs_of(&pns)))
}

/// Inclusive `(high, low)` runs of a packet-number set, highest first.
fn runs_of(pns: &BTreeSet<u64>) -> Vec<(u64, u64)> {
    let mut runs: Vec<(u64, u64)> = Vec::new();
    for &pn in pns {
        match runs.last_mut() {
            Some((_, high)) if *high + 1 == pn => *high = pn,
            _ => runs.push((pn, pn)),
        }
    }
    runs.iter().rev().map(|&(low, high)| (high, low)).collect()
}

fn arb_frame() -> impl Strategy<Value = Frame> {
    prop_oneof![
        (
            any::<u16>(),
            any::<bool>(),
            any::<u64>(),
            proptest::collection::vec(any::<u8>(), 0..600)
        )
            .prop_map(|(id, fin, offset, data)| Frame::Stream(StreamFrame {
                stream_id: StreamId(id),
                fin,
                offset,
                data,
            })),
        arb_ack().prop_map(Frame::Ack),
        (0u16..2000).prop_map(|length| Frame::Padding { length }),
        (any::<u16>(), any::<u16>(), any::<u64>()).prop_map(|(id, error_code, final_offset)| {
            Frame::ResetStream {
                stream_id: StreamId(id),
                error_code,
                final_offset,
            }
        }),
        (any::<u16>(), "[a-z ]{0,40}").prop_map(|(error_code, reason)| Frame::ConnectionClose {
            error_code,
            reason,
        }),
        any::<u64>().prop_map(|maximum_data| Frame::Blocked { maximum_data }),
        (any::<u16>(), any::<u64>()).prop_map(|(id, max)| Frame::StreamBlocked {
            stream_id: StreamId(id),
            maximum_stream_data: max,
        }),
        Just(Frame::Ping),
        any::<u64>().prop_map(|maximum_data| Frame::MaxData { maximum_data }),
        (any::<u16>(), any::<u64>()).prop_map(|(id, max)| Frame::MaxStreamData {
            stream_id: StreamId(id),
            maximum_stream_data: max,
        }),
        (any::<bool>(), any::<u16>()).prop_map(|(unidirectional, maximum)| Frame::MaxStreams {
            unidirectional,
            maximum,
        }),
        any::<[u8; 8]>().prop_map(|token| Frame::PathChallenge { token }),
        any::<[u8; 8]>().prop_map(|token| Frame::PathResponse { token }),
        (any::<[u8; 16]>(), any::<[u8; 32]>())
            .prop_map(|(random, data)| Frame::Crypto { random, data }),
        (any::<u16>(), any::<[u8; 32]>()).prop_map(|(effective_secs, token)| {
            Frame::SessionToken {
                effective_secs,
                token,
            }
        }),
        (any::<u8>(), any::<u8>(), any::<u8>(), any::<u32>()).prop_map(
            |(seq, ack_eliciting_threshold, reordering_threshold, max_ack_delay_ms)| {
                Frame::AckFrequency {
                    seq,
                    ack_eliciting_threshold,
                    reordering_threshold,
                    max_ack_delay_ms,
                }
            }
        ),
        any::<u32>().prop_map(|version| Frame::Version { version }),
    ]
}

proptest! {
    /// Every valid frame survives encode/decode unchanged.
    #[test]
    fn frame_roundtrip(frame in arb_frame()) {
        let mut buf = Vec::new();
        let written = frame.encode(&mut buf);
        prop_assert_eq!(written, buf.len());
        let (decoded, used) = Frame::decode(&buf).unwrap();
        prop_assert_eq!(used, written);
        prop_assert_eq!(decoded, frame);
    }

    /// ACK ranges reconstruct exactly the acknowledged set.
    #[test]
    fn ack_set_roundtrip(pns in proptest::collection::btree_set(0u64..5_000, 1..200)) {
        let ack = AckFrame::from_runs(0, &runs_of(&pns));
        let decoded: BTreeSet<u64> = ack_to_pns(&ack).unwrap().into_iter().collect();
        prop_assert_eq!(decoded, pns);
    }

    /// Frames decode from a concatenated packet payload in order.
    #[test]
    fn frames_concatenate(frames in proptest::collection::vec(arb_frame(), 1..8)) {
        let mut buf = Vec::new();
        for frame in &frames {
            frame.encode(&mut buf);
        }
        let mut cursor = 0;
        let mut decoded = Vec::new();
        while cursor < buf.len() {
            let (frame, used) = Frame::decode(&buf[cursor..]).unwrap();
            decoded.push(frame);
            cursor += used;
        }
        prop_assert_eq!(decoded, frames);
    }
}
