use riptide::StreamId;
use riptide::error::TransportError;
use riptide::stream::{RecvState, SendState, Stream};

const BUF: usize = 64 * 1024;

fn stream() -> Stream {
    Stream::new(StreamId(1), 1 << 20, 1 << 20)
}

#[test]
fn test_write_then_chunk() {
    let mut s = stream();
    assert_eq!(s.write(b"hello world", BUF).unwrap(), 11);
    let chunk = s.next_chunk(1200, u64::MAX).unwrap();
    assert_eq!(chunk.offset, 0);
    assert_eq!(chunk.data, b"hello world");
    assert!(!chunk.fin);
    assert!(!chunk.is_retransmit);
    assert!(s.next_chunk(1200, u64::MAX).is_none());
}

#[test]
fn test_chunking_respects_max_len() {
    let mut s = stream();
    s.write(&[7u8; 3000], BUF).unwrap();
    let c1 = s.next_chunk(1200, u64::MAX).unwrap();
    let c2 = s.next_chunk(1200, u64::MAX).unwrap();
    let c3 = s.next_chunk(1200, u64::MAX).unwrap();
    assert_eq!(c1.data.len(), 1200);
    assert_eq!(c2.offset, 1200);
    assert_eq!(c3.data.len(), 600);
}

#[test]
fn test_fin_piggybacks_on_last_chunk() {
    let mut s = stream();
    s.write(b"bye", BUF).unwrap();
    s.finish().unwrap();
    let chunk = s.next_chunk(1200, u64::MAX).unwrap();
    assert!(chunk.fin);
    assert_eq!(s.send_state(), SendState::DataSent);
}

#[test]
fn test_zero_length_fin_after_data_sent() {
    let mut s = stream();
    s.write(b"data", BUF).unwrap();
    let _ = s.next_chunk(1200, u64::MAX).unwrap();
    s.finish().unwrap();
    let fin = s.next_chunk(1200, u64::MAX).unwrap();
    assert_eq!(fin.offset, 4);
    assert!(fin.data.is_empty());
    assert!(fin.fin);
}

#[test]
fn test_ack_frees_buffer_and_finishes() {
    let mut s = stream();
    s.write(b"abcd", BUF).unwrap();
    s.finish().unwrap();
    let chunk = s.next_chunk(1200, u64::MAX).unwrap();
    s.on_chunk_acked(chunk.offset, chunk.data.len(), chunk.fin);
    assert_eq!(s.send_state(), SendState::DataRecvd);
}

#[test]
fn test_lost_chunk_is_retransmitted_from_buffer() {
    let mut s = stream();
    s.write(&[9u8; 100], BUF).unwrap();
    let chunk = s.next_chunk(1200, u64::MAX).unwrap();
    assert!(s.next_chunk(1200, u64::MAX).is_none());

    s.on_chunk_lost(chunk.offset, chunk.data.len(), chunk.fin);
    let rtx = s.next_chunk(1200, u64::MAX).unwrap();
    assert!(rtx.is_retransmit);
    assert_eq!(rtx.offset, 0);
    assert_eq!(rtx.data, chunk.data);
}

#[test]
fn test_partially_acked_loss_resends_only_holes() {
    let mut s = stream();
    s.write(&[1u8; 300], BUF).unwrap();
    let c = s.next_chunk(1200, u64::MAX).unwrap();
    assert_eq!(c.data.len(), 300);
    // Middle hundred bytes got acked through another path.
    s.on_chunk_acked(100, 100, false);
    s.on_chunk_lost(0, 300, false);
    let r1 = s.next_chunk(1200, u64::MAX).unwrap();
    assert_eq!((r1.offset, r1.data.len()), (0, 100));
    let r2 = s.next_chunk(1200, u64::MAX).unwrap();
    assert_eq!((r2.offset, r2.data.len()), (200, 100));
    assert!(s.next_chunk(1200, u64::MAX).is_none());
}

#[test]
fn test_flow_control_blocks_and_resumes() {
    let mut s = Stream::new(StreamId(1), 10, 1 << 20);
    s.write(&[5u8; 30], BUF).unwrap();
    let c = s.next_chunk(1200, u64::MAX).unwrap();
    assert_eq!(c.data.len(), 10);
    assert!(s.next_chunk(1200, u64::MAX).is_none());
    assert_eq!(s.take_blocked(), Some(10));
    // Duplicate BLOCKED is suppressed until the limit moves.
    assert!(s.next_chunk(1200, u64::MAX).is_none());
    assert_eq!(s.take_blocked(), None);

    s.on_max_stream_data(25);
    let c = s.next_chunk(1200, u64::MAX).unwrap();
    assert_eq!((c.offset, c.data.len()), (10, 15));
}

#[test]
fn test_max_stream_data_is_idempotent() {
    let mut s = Stream::new(StreamId(1), 10, 1 << 20);
    s.on_max_stream_data(50);
    s.on_max_stream_data(50);
    assert_eq!(s.peer_max_data(), 50);
    s.on_max_stream_data(20); // stale, must not shrink
    assert_eq!(s.peer_max_data(), 50);
}

#[test]
fn test_connection_allowance_caps_chunk() {
    let mut s = stream();
    s.write(&[3u8; 500], BUF).unwrap();
    let c = s.next_chunk(1200, 120).unwrap();
    assert_eq!(c.data.len(), 120);
    assert!(s.next_chunk(1200, 0).is_none());
}

#[test]
fn test_reassembly_in_order_delivery() {
    let mut s = stream();
    assert!(s.on_stream_frame(0, b"hel", false).unwrap());
    assert!(!s.on_stream_frame(3, b"lo", true).unwrap());
    let (data, fin) = s.read().unwrap();
    assert_eq!(data, b"hello");
    assert!(fin);
    assert_eq!(s.recv_state(), RecvState::DataRead);
}

#[test]
fn test_reassembly_out_of_order() {
    let mut s = stream();
    // The gap keeps the prefix unreadable.
    assert!(!s.on_stream_frame(3, b"lo", false).unwrap());
    assert!(!s.readable());
    assert!(s.on_stream_frame(0, b"hel", false).unwrap());
    let (data, fin) = s.read().unwrap();
    assert_eq!(data, b"hello");
    assert!(!fin);
}

#[test]
fn test_overlap_must_match() {
    let mut s = stream();
    s.on_stream_frame(0, b"abcdef", false).unwrap();
    // Identical overlap is fine.
    s.on_stream_frame(2, b"cdef", false).unwrap();
    // Conflicting overlap is a protocol error.
    assert_eq!(
        s.on_stream_frame(2, b"XXXX", false).unwrap_err(),
        TransportError::FrameFormat
    );
}

#[test]
fn test_final_offset_mismatch() {
    let mut s = stream();
    // FIN at offset 6 with the prefix still missing.
    s.on_stream_frame(5, b"x", true).unwrap();
    // A conflicting final offset is a violation.
    assert_eq!(
        s.on_stream_frame(0, b"ab", true).unwrap_err(),
        TransportError::StreamStateError
    );
    // Data past the declared end is too.
    assert_eq!(
        s.on_stream_frame(4, b"zzz", false).unwrap_err(),
        TransportError::StreamStateError
    );
}

#[test]
fn test_recv_flow_control_violation() {
    let mut s = Stream::new(StreamId(1), 1 << 20, 10);
    assert_eq!(
        s.on_stream_frame(0, &[0u8; 11], false).unwrap_err(),
        TransportError::FlowControlViolation
    );
}

#[test]
fn test_watermark_readvertises_credit() {
    let mut s = Stream::new(StreamId(1), 1 << 20, 100);
    assert!(s.take_max_stream_data().is_none());
    s.on_stream_frame(0, &[1u8; 60], false).unwrap();
    let _ = s.read().unwrap();
    let new_limit = s.take_max_stream_data().expect("credit re-advertised");
    assert_eq!(new_limit, 160);
}

#[test]
fn test_reset_terminates_both_ways() {
    let mut s = stream();
    s.write(b"pending", BUF).unwrap();
    s.reset(0x0100).unwrap();
    assert_eq!(s.send_state(), SendState::ResetSent);
    assert_eq!(s.take_pending_reset(), Some((0x0100, 7)));
    assert!(s.next_chunk(1200, u64::MAX).is_none());
    s.on_reset_acked();
    assert_eq!(s.send_state(), SendState::ResetRecvd);

    s.on_reset_stream(5, 0).unwrap();
    assert_eq!(s.recv_state(), RecvState::ResetRecvd);
    assert_eq!(s.read().unwrap_err(), TransportError::StreamClosed);
    assert!(s.is_terminated());
}

#[test]
fn test_write_after_finish_rejected() {
    let mut s = stream();
    s.write(b"x", BUF).unwrap();
    s.finish().unwrap();
    assert_eq!(
        s.write(b"y", BUF).unwrap_err(),
        TransportError::StreamStateError
    );
}

#[test]
fn test_buffer_limit_backpressure() {
    let mut s = stream();
    assert_eq!(s.write(&[0u8; 100], 64).unwrap(), 64);
    assert_eq!(s.write_capacity(64), 0);
}
