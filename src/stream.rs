//! Per-stream send and receive buffers with offset semantics, flow control
//! and FIN handling.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, trace};

use crate::StreamId;
use crate::error::TransportError;
use crate::ranges::RangeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Ready,
    Send,
    DataSent,
    ResetSent,
    /// Everything up to the final offset was acknowledged.
    DataRecvd,
    /// The peer acknowledged our reset.
    ResetRecvd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    Recv,
    SizeKnown,
    DataRecvd,
    ResetRecvd,
    DataRead,
    ResetRead,
}

/// A chunk of stream data chosen for (re)transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub offset: u64,
    pub data: Vec<u8>,
    pub fin: bool,
    pub is_retransmit: bool,
}

#[derive(Debug)]
struct SendBuffer {
    /// Offset of `buf[0]`; everything below is acknowledged and dropped.
    base_offset: u64,
    buf: VecDeque<u8>,
    write_offset: u64,
    /// New-data cursor between `base_offset` and `write_offset`.
    next_send_offset: u64,
    acked: RangeSet,
    /// Byte ranges declared lost, awaiting retransmission.
    lost: RangeSet,
    fin_offset: Option<u64>,
    fin_sent: bool,
    fin_acked: bool,
    fin_lost: bool,
    /// Peer-advertised stream credit (absolute offset).
    max_data: u64,
    /// The limit we last reported as blocking us, to send STREAM_BLOCKED
    /// once per limit.
    blocked_at: Option<u64>,
    pending_blocked: bool,
    state: SendState,
}

impl SendBuffer {
    fn new(max_data: u64) -> Self {
        Self {
            base_offset: 0,
            buf: VecDeque::new(),
            write_offset: 0,
            next_send_offset: 0,
            acked: RangeSet::new(),
            lost: RangeSet::new(),
            fin_offset: None,
            fin_sent: false,
            fin_acked: false,
            fin_lost: false,
            max_data,
            blocked_at: None,
            pending_blocked: false,
            state: SendState::Ready,
        }
    }

    fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn write(&mut self, data: &[u8], buffer_limit: usize) -> Result<usize, TransportError> {
        match self.state {
            SendState::Ready | SendState::Send => {}
            SendState::DataSent | SendState::DataRecvd => {
                return Err(TransportError::StreamStateError);
            }
            SendState::ResetSent | SendState::ResetRecvd => {
                return Err(TransportError::StreamClosed);
            }
        }
        if self.fin_offset.is_some() {
            return Err(TransportError::StreamStateError);
        }
        let space = buffer_limit.saturating_sub(self.buf.len());
        let accepted = data.len().min(space);
        self.buf.extend(&data[..accepted]);
        self.write_offset += accepted as u64;
        if accepted > 0 {
            self.state = SendState::Send;
        }
        Ok(accepted)
    }

    fn finish(&mut self) -> Result<(), TransportError> {
        match self.state {
            SendState::Ready | SendState::Send => {
                self.fin_offset = Some(self.write_offset);
                Ok(())
            }
            _ => Err(TransportError::StreamStateError),
        }
    }

    fn copy_range(&self, offset: u64, len: usize) -> Vec<u8> {
        let start = (offset - self.base_offset) as usize;
        self.buf.range(start..start + len).copied().collect()
    }

    /// Whether `offset + len` is the final offset of a finished stream.
    fn is_fin_chunk(&self, offset: u64, len: usize) -> bool {
        self.fin_offset == Some(offset + len as u64)
    }

    /// Picks the next chunk to transmit: lost ranges first (oldest byte
    /// first), then new data gated by flow control.
    fn next_chunk(&mut self, max_len: usize, conn_allowance: u64) -> Option<StreamChunk> {
        if max_len == 0 {
            return None;
        }
        if matches!(self.state, SendState::ResetSent | SendState::ResetRecvd) {
            return None;
        }

        // Retransmissions are not subject to flow control: the bytes were
        // inside the limits when first sent.
        loop {
            let next = self.lost.iter().next();
            let Some((start, end)) = next else { break };
            let len = ((end - start + 1) as usize).min(max_len);
            self.lost.remove(start, start + len as u64 - 1);
            if self.acked.contains(start) {
                continue;
            }
            let data = self.copy_range(start, len);
            let fin = self.is_fin_chunk(start, len);
            return Some(StreamChunk {
                offset: start,
                data,
                fin,
                is_retransmit: true,
            });
        }

        if self.fin_lost {
            self.fin_lost = false;
            let offset = self.fin_offset.expect("fin was sent before being lost");
            return Some(StreamChunk {
                offset,
                data: Vec::new(),
                fin: true,
                is_retransmit: true,
            });
        }

        // New data, capped by the lower of the stream and connection limits.
        let flow_limit = self.max_data.min(self.next_send_offset + conn_allowance);
        if self.next_send_offset < self.write_offset {
            if self.next_send_offset >= flow_limit {
                if flow_limit == self.max_data && self.blocked_at != Some(self.max_data) {
                    self.blocked_at = Some(self.max_data);
                    self.pending_blocked = true;
                }
                return None;
            }
            let available = (self.write_offset - self.next_send_offset)
                .min(flow_limit - self.next_send_offset) as usize;
            let len = available.min(max_len);
            let offset = self.next_send_offset;
            let data = self.copy_range(offset, len);
            self.next_send_offset += len as u64;
            let fin = self.is_fin_chunk(offset, len);
            if fin {
                self.fin_sent = true;
                self.state = SendState::DataSent;
            }
            return Some(StreamChunk {
                offset,
                data,
                fin,
                is_retransmit: false,
            });
        }

        // A zero-length FIN once all data went out.
        if self.fin_offset == Some(self.next_send_offset) && !self.fin_sent {
            self.fin_sent = true;
            self.state = SendState::DataSent;
            return Some(StreamChunk {
                offset: self.next_send_offset,
                data: Vec::new(),
                fin: true,
                is_retransmit: false,
            });
        }

        None
    }

    fn on_ack(&mut self, offset: u64, len: usize, fin: bool) {
        if len > 0 {
            self.acked.insert(offset, offset + len as u64 - 1);
            self.lost.remove(offset, offset + len as u64 - 1);
        }
        if fin && self.fin_offset == Some(offset + len as u64) {
            self.fin_acked = true;
        }

        // Drop the acknowledged contiguous prefix.
        let run = self.acked.contiguous_run_from(self.base_offset);
        if run > 0 {
            self.buf.drain(..(run as usize).min(self.buf.len()));
            self.base_offset += run;
            self.acked.remove_below(self.base_offset);
        }

        if self.fin_acked && self.base_offset == self.fin_offset.unwrap_or(u64::MAX) {
            self.state = SendState::DataRecvd;
        }
    }

    fn on_lost(&mut self, offset: u64, len: usize, fin: bool) {
        let end = offset + len as u64;
        let mut cursor = offset.max(self.base_offset);
        while cursor < end {
            let acked_run = self.acked.contiguous_run_from(cursor);
            if acked_run > 0 {
                cursor += acked_run;
                continue;
            }
            let next_acked = self
                .acked
                .iter()
                .find(|&(start, _)| start > cursor)
                .map(|(start, _)| start)
                .unwrap_or(end)
                .min(end);
            self.lost.insert(cursor, next_acked - 1);
            cursor = next_acked;
        }
        if fin && !self.fin_acked && self.fin_offset == Some(end) && len == 0 {
            self.fin_lost = true;
        }
    }

    /// Size of the chunk `next_chunk` would produce, without consuming it.
    fn next_chunk_len(&self, max_len: usize, conn_allowance: u64) -> Option<usize> {
        if max_len == 0 {
            return None;
        }
        if matches!(self.state, SendState::ResetSent | SendState::ResetRecvd) {
            return None;
        }
        if let Some((start, end)) = self.lost.iter().next() {
            return Some(((end - start + 1) as usize).min(max_len));
        }
        if self.fin_lost {
            return Some(0);
        }
        let flow_limit = self.max_data.min(self.next_send_offset + conn_allowance);
        if self.next_send_offset < self.write_offset {
            if self.next_send_offset >= flow_limit {
                return None;
            }
            let available = (self.write_offset - self.next_send_offset)
                .min(flow_limit - self.next_send_offset) as usize;
            return Some(available.min(max_len));
        }
        if self.fin_offset == Some(self.next_send_offset) && !self.fin_sent {
            return Some(0);
        }
        None
    }

    /// Bytes that could go out right now, ignoring the connection limit.
    fn sendable(&self) -> bool {
        !self.lost.is_empty()
            || self.fin_lost
            || (self.next_send_offset < self.write_offset
                && self.next_send_offset < self.max_data)
            || (self.fin_offset == Some(self.next_send_offset) && !self.fin_sent)
    }
}

#[derive(Debug)]
struct RecvBuffer {
    /// Out-of-order chunks keyed by offset, non-overlapping.
    chunks: BTreeMap<u64, Vec<u8>>,
    read_offset: u64,
    highest_received: u64,
    /// Credit advertised to the peer (absolute offset).
    max_data: u64,
    window: u64,
    /// Set when crossing the re-advertise watermark.
    pending_max_data: bool,
    fin_offset: Option<u64>,
    state: RecvState,
}

impl RecvBuffer {
    fn new(window: u64) -> Self {
        Self {
            chunks: BTreeMap::new(),
            read_offset: 0,
            highest_received: 0,
            max_data: window,
            window,
            pending_max_data: false,
            fin_offset: None,
            state: RecvState::Recv,
        }
    }

    fn insert(&mut self, offset: u64, data: &[u8], fin: bool) -> Result<(), TransportError> {
        match self.state {
            RecvState::Recv | RecvState::SizeKnown => {}
            RecvState::DataRecvd | RecvState::DataRead => {
                // Late retransmissions of already-delivered data are routine.
                return Ok(());
            }
            RecvState::ResetRecvd | RecvState::ResetRead => {
                return Err(TransportError::StreamStateError);
            }
        }

        let end = offset + data.len() as u64;
        if fin {
            if self.fin_offset.is_some_and(|f| f != end) {
                return Err(TransportError::StreamStateError);
            }
            if self.highest_received > end {
                return Err(TransportError::StreamStateError);
            }
            self.fin_offset = Some(end);
            self.state = RecvState::SizeKnown;
        }
        if self.fin_offset.is_some_and(|f| end > f) {
            return Err(TransportError::StreamStateError);
        }
        if end > self.max_data {
            return Err(TransportError::FlowControlViolation);
        }

        self.insert_validated(offset, data)?;
        self.highest_received = self.highest_received.max(end);

        if self
            .fin_offset
            .is_some_and(|f| self.contiguous_end() == f)
        {
            self.state = RecvState::DataRecvd;
        }
        Ok(())
    }

    /// Splices `data` into the reassembly map. Overlaps must carry
    /// identical bytes; anything else is a protocol violation.
    fn insert_validated(&mut self, offset: u64, data: &[u8]) -> Result<(), TransportError> {
        let mut cursor = offset.max(self.read_offset);
        let end = offset + data.len() as u64;

        while cursor < end {
            // The chunk covering or preceding the cursor.
            if let Some((&chunk_start, chunk)) = self.chunks.range(..=cursor).next_back()
                && chunk_start + chunk.len() as u64 > cursor
            {
                let chunk_end = chunk_start + chunk.len() as u64;
                let overlap_end = chunk_end.min(end);
                let theirs = &chunk[(cursor - chunk_start) as usize..(overlap_end - chunk_start) as usize];
                let ours = &data[(cursor - offset) as usize..(overlap_end - offset) as usize];
                if theirs != ours {
                    return Err(TransportError::FrameFormat);
                }
                cursor = overlap_end;
                continue;
            }
            // Free space up to the next stored chunk.
            let gap_end = self
                .chunks
                .range(cursor..)
                .next()
                .map(|(&s, _)| s)
                .unwrap_or(end)
                .min(end);
            if gap_end > cursor {
                let piece = data[(cursor - offset) as usize..(gap_end - offset) as usize].to_vec();
                self.chunks.insert(cursor, piece);
                cursor = gap_end;
            }
        }
        Ok(())
    }

    /// End of the contiguous sequence starting at `read_offset`.
    fn contiguous_end(&self) -> u64 {
        let mut end = self.read_offset;
        for (&start, chunk) in self.chunks.range(self.read_offset..) {
            if start > end {
                break;
            }
            end = end.max(start + chunk.len() as u64);
        }
        end
    }

    fn readable(&self) -> bool {
        match self.state {
            RecvState::Recv | RecvState::SizeKnown => self.contiguous_end() > self.read_offset,
            RecvState::DataRecvd => true,
            _ => false,
        }
    }

    fn read(&mut self) -> (Vec<u8>, bool) {
        let end = self.contiguous_end();
        let mut out = Vec::with_capacity((end - self.read_offset) as usize);
        while let Some((&start, _)) = self.chunks.range(..end).next() {
            let chunk = self.chunks.remove(&start).unwrap();
            let skip = (self.read_offset.max(start) - start) as usize;
            out.extend_from_slice(&chunk[skip..]);
        }
        self.read_offset = end;

        // Re-advertise credit once half the window has been consumed.
        if self.max_data - self.read_offset < self.window / 2 {
            self.max_data = self.read_offset + self.window;
            self.pending_max_data = true;
        }

        let finished = self.fin_offset == Some(self.read_offset);
        if finished && self.state == RecvState::DataRecvd {
            self.state = RecvState::DataRead;
        }
        (out, finished)
    }
}

/// A bidirectional stream.
#[derive(Debug)]
pub struct Stream {
    pub id: StreamId,
    send: SendBuffer,
    recv: RecvBuffer,
    reset_error: Option<u16>,
    /// RESET_STREAM awaiting (re)transmission.
    pending_reset: bool,
}

impl Stream {
    pub fn new(id: StreamId, peer_max_data: u64, recv_window: u64) -> Self {
        Self {
            id,
            send: SendBuffer::new(peer_max_data),
            recv: RecvBuffer::new(recv_window),
            reset_error: None,
            pending_reset: false,
        }
    }

    // Send side.

    pub fn write(&mut self, data: &[u8], buffer_limit: usize) -> Result<usize, TransportError> {
        self.send.write(data, buffer_limit)
    }

    pub fn finish(&mut self) -> Result<(), TransportError> {
        self.send.finish()
    }

    pub fn reset(&mut self, error_code: u16) -> Result<(), TransportError> {
        match self.send.state {
            SendState::ResetSent | SendState::ResetRecvd => Ok(()),
            SendState::DataRecvd => Err(TransportError::StreamStateError),
            _ => {
                self.send.state = SendState::ResetSent;
                self.reset_error = Some(error_code);
                self.pending_reset = true;
                Ok(())
            }
        }
    }

    pub fn next_chunk(&mut self, max_len: usize, conn_allowance: u64) -> Option<StreamChunk> {
        self.send.next_chunk(max_len, conn_allowance)
    }

    pub fn next_chunk_len(&self, max_len: usize, conn_allowance: u64) -> Option<usize> {
        self.send.next_chunk_len(max_len, conn_allowance)
    }

    pub fn on_chunk_acked(&mut self, offset: u64, len: usize, fin: bool) {
        self.send.on_ack(offset, len, fin);
    }

    pub fn on_chunk_lost(&mut self, offset: u64, len: usize, fin: bool) {
        trace!(stream = %self.id, offset, len, "stream chunk lost");
        self.send.on_lost(offset, len, fin);
    }

    pub fn on_reset_acked(&mut self) {
        if self.send.state == SendState::ResetSent {
            self.send.state = SendState::ResetRecvd;
        }
    }

    pub fn take_pending_reset(&mut self) -> Option<(u16, u64)> {
        if self.pending_reset {
            self.pending_reset = false;
            Some((self.reset_error.unwrap_or(0), self.send.write_offset))
        } else {
            None
        }
    }

    pub fn retransmit_reset(&mut self) {
        if self.send.state == SendState::ResetSent {
            self.pending_reset = true;
        }
    }

    pub fn sendable(&self) -> bool {
        self.pending_reset || self.send.sendable()
    }

    /// Room left in the send buffer.
    pub fn write_capacity(&self, buffer_limit: usize) -> usize {
        buffer_limit.saturating_sub(self.send.buffered())
    }

    pub fn send_state(&self) -> SendState {
        self.send.state
    }

    /// The stream ran into its peer-advertised limit; emit STREAM_BLOCKED.
    pub fn take_blocked(&mut self) -> Option<u64> {
        if self.send.pending_blocked {
            self.send.pending_blocked = false;
            self.send.blocked_at
        } else {
            None
        }
    }

    pub fn on_max_stream_data(&mut self, maximum: u64) {
        // Absolute and idempotent; stale values never shrink the limit.
        if maximum > self.send.max_data {
            debug!(stream = %self.id, maximum, "stream credit raised");
            self.send.max_data = maximum;
        }
    }

    pub fn peer_max_data(&self) -> u64 {
        self.send.max_data
    }

    // Receive side.

    pub fn on_stream_frame(
        &mut self,
        offset: u64,
        data: &[u8],
        fin: bool,
    ) -> Result<bool, TransportError> {
        let was_readable = self.recv.readable();
        self.recv.insert(offset, data, fin)?;
        Ok(!was_readable && self.recv.readable())
    }

    pub fn on_reset_stream(&mut self, error_code: u16, final_offset: u64) -> Result<(), TransportError> {
        match self.recv.state {
            RecvState::DataRead | RecvState::ResetRead => Ok(()),
            _ => {
                if self.recv.highest_received > final_offset {
                    return Err(TransportError::StreamStateError);
                }
                debug!(stream = %self.id, error_code, "stream reset by peer");
                self.recv.state = RecvState::ResetRecvd;
                self.recv.chunks.clear();
                Ok(())
            }
        }
    }

    pub fn readable(&self) -> bool {
        self.recv.readable()
    }

    /// Drains the contiguous prefix. The bool reports FIN: the peer will
    /// send no more data.
    pub fn read(&mut self) -> Result<(Vec<u8>, bool), TransportError> {
        match self.recv.state {
            RecvState::ResetRecvd => {
                self.recv.state = RecvState::ResetRead;
                Err(TransportError::StreamClosed)
            }
            RecvState::ResetRead => Err(TransportError::StreamClosed),
            _ => Ok(self.recv.read()),
        }
    }

    pub fn recv_state(&self) -> RecvState {
        self.recv.state
    }

    /// Highest contiguous-or-not offset received so far, the quantity
    /// charged against connection-level flow control.
    pub fn recv_highest(&self) -> u64 {
        self.recv.highest_received
    }

    /// The packet carrying our MAX_STREAM_DATA was lost; re-advertise.
    pub fn on_max_stream_data_lost(&mut self) {
        self.recv.pending_max_data = true;
    }

    /// Fresh credit to advertise with MAX_STREAM_DATA, if the watermark was
    /// crossed.
    pub fn take_max_stream_data(&mut self) -> Option<u64> {
        if self.recv.pending_max_data {
            self.recv.pending_max_data = false;
            Some(self.recv.max_data)
        } else {
            None
        }
    }

    /// Both directions reached a terminal state; the record can be dropped.
    pub fn is_terminated(&self) -> bool {
        matches!(
            self.send.state,
            SendState::DataRecvd | SendState::ResetRecvd
        ) && matches!(
            self.recv.state,
            RecvState::DataRead | RecvState::ResetRead
        )
    }
}
