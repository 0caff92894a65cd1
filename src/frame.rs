use crate::StreamId;
use crate::error::TransportError;
use crate::wire::{Reader, WriteExt};

/// One-byte frame type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Stream = 0x01,
    Ack = 0x02,
    Padding = 0x03,
    ResetStream = 0x04,
    ConnectionClose = 0x05,
    Blocked = 0x06,
    StreamBlocked = 0x07,
    Ping = 0x08,
    MaxData = 0x09,
    MaxStreamData = 0x0A,
    MaxStreams = 0x0B,
    PathChallenge = 0x0C,
    PathResponse = 0x0D,
    Crypto = 0x0E,
    SessionToken = 0x0F,
    AckFrequency = 0x10,
    Version = 0x11,
}

impl FrameType {
    /// Bit position in a packet's frame-type bitmap.
    pub fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

/// STREAM frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub stream_id: StreamId,
    pub fin: bool,
    pub offset: u64,
    pub data: Vec<u8>,
}

const STREAM_FLAG_FIN: u8 = 0x80;

/// A `(gap, length)` pair describing alternating unacked/acked runs below
/// the previous run. `gap + 1` packets are unacked, then `length + 1`
/// packets acked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRange {
    pub gap: u32,
    pub length: u32,
}

/// ACK frame: acknowledged packet-number runs descending from `largest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame {
    pub delay_ms: u16,
    pub largest: u64,
    /// The first contiguous run covers `first_range + 1` packets ending at
    /// `largest`.
    pub first_range: u64,
    /// Ranges beyond the first, highest first.
    pub ranges: Vec<AckRange>,
}

impl AckFrame {
    /// Builds an ACK from inclusive `(high, low)` runs sorted descending.
    /// The first run must end at the largest acknowledged packet number.
    pub fn from_runs(delay_ms: u16, runs: &[(u64, u64)]) -> Self {
        debug_assert!(!runs.is_empty());
        let (largest, mut prev_low) = runs[0];
        debug_assert!(largest >= prev_low);
        let mut ranges = Vec::with_capacity(runs.len().saturating_sub(1));
        for &(high, low) in &runs[1..] {
            debug_assert!(prev_low > high + 1 && high >= low);
            ranges.push(AckRange {
                gap: (prev_low - high - 2) as u32,
                length: (high - low) as u32,
            });
            prev_low = low;
        }
        Self {
            delay_ms,
            largest,
            first_range: runs[0].0 - runs[0].1,
            ranges,
        }
    }

    /// Reconstructs the inclusive `(high, low)` runs, highest first.
    /// Fails with `FrameFormat` if any run would underflow below zero.
    pub fn runs(&self) -> Result<Vec<(u64, u64)>, TransportError> {
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        if self.first_range > self.largest {
            return Err(TransportError::FrameFormat);
        }
        let mut low = self.largest - self.first_range;
        out.push((self.largest, low));
        for range in &self.ranges {
            // gap+1 unacked packets, then length+1 acked ones, all below `low`.
            let needed = range.gap as u64 + 2 + range.length as u64;
            if low < needed {
                return Err(TransportError::FrameFormat);
            }
            let high = low - range.gap as u64 - 2;
            low = high - range.length as u64;
            out.push((high, low));
        }
        Ok(out)
    }
}

/// The typed frame sum. Each variant round-trips through
/// `encode`/`decode` preserving equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Stream(StreamFrame),
    Ack(AckFrame),
    Padding {
        length: u16,
    },
    ResetStream {
        stream_id: StreamId,
        error_code: u16,
        final_offset: u64,
    },
    ConnectionClose {
        error_code: u16,
        reason: String,
    },
    Blocked {
        maximum_data: u64,
    },
    StreamBlocked {
        stream_id: StreamId,
        maximum_stream_data: u64,
    },
    Ping,
    MaxData {
        maximum_data: u64,
    },
    MaxStreamData {
        stream_id: StreamId,
        maximum_stream_data: u64,
    },
    MaxStreams {
        unidirectional: bool,
        maximum: u16,
    },
    PathChallenge {
        token: [u8; 8],
    },
    PathResponse {
        token: [u8; 8],
    },
    Crypto {
        random: [u8; 16],
        data: [u8; 32],
    },
    SessionToken {
        /// Validity in seconds; zero selects the wire maximum (`u16::MAX`,
        /// about 18.2 hours).
        effective_secs: u16,
        token: [u8; 32],
    },
    AckFrequency {
        seq: u8,
        ack_eliciting_threshold: u8,
        reordering_threshold: u8,
        max_ack_delay_ms: u32,
    },
    Version {
        version: u32,
    },
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Stream(_) => FrameType::Stream,
            Frame::Ack(_) => FrameType::Ack,
            Frame::Padding { .. } => FrameType::Padding,
            Frame::ResetStream { .. } => FrameType::ResetStream,
            Frame::ConnectionClose { .. } => FrameType::ConnectionClose,
            Frame::Blocked { .. } => FrameType::Blocked,
            Frame::StreamBlocked { .. } => FrameType::StreamBlocked,
            Frame::Ping => FrameType::Ping,
            Frame::MaxData { .. } => FrameType::MaxData,
            Frame::MaxStreamData { .. } => FrameType::MaxStreamData,
            Frame::MaxStreams { .. } => FrameType::MaxStreams,
            Frame::PathChallenge { .. } => FrameType::PathChallenge,
            Frame::PathResponse { .. } => FrameType::PathResponse,
            Frame::Crypto { .. } => FrameType::Crypto,
            Frame::SessionToken { .. } => FrameType::SessionToken,
            Frame::AckFrequency { .. } => FrameType::AckFrequency,
            Frame::Version { .. } => FrameType::Version,
        }
    }

    /// Whether receiving this frame obliges the peer to acknowledge the
    /// carrying packet.
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(
            self,
            Frame::Ack(_) | Frame::Padding { .. } | Frame::ConnectionClose { .. }
        )
    }

    /// Serializes the frame into `out` and returns the bytes written.
    pub fn encode(&self, out: &mut Vec<u8>) -> usize {
        let start = out.len();
        out.put_u8(self.frame_type() as u8);
        match self {
            Frame::Stream(stream) => {
                out.put_u16(stream.stream_id.0);
                out.put_u8(if stream.fin { STREAM_FLAG_FIN } else { 0 });
                out.put_u64(stream.offset);
                out.put_u16(stream.data.len() as u16);
                out.extend_from_slice(&stream.data);
            }
            Frame::Ack(ack) => {
                out.put_u16(ack.delay_ms);
                out.put_u64(ack.largest);
                out.put_u64(ack.first_range);
                out.put_u8(ack.ranges.len() as u8);
                for range in &ack.ranges {
                    out.put_u32(range.gap);
                    out.put_u32(range.length);
                }
            }
            Frame::Padding { length } => {
                out.put_u16(*length);
                out.resize(out.len() + *length as usize, 0);
            }
            Frame::ResetStream {
                stream_id,
                error_code,
                final_offset,
            } => {
                out.put_u16(stream_id.0);
                out.put_u16(*error_code);
                out.put_u64(*final_offset);
            }
            Frame::ConnectionClose { error_code, reason } => {
                out.put_u16(*error_code);
                out.put_u16(reason.len() as u16);
                out.extend_from_slice(reason.as_bytes());
            }
            Frame::Blocked { maximum_data } => out.put_u64(*maximum_data),
            Frame::StreamBlocked {
                stream_id,
                maximum_stream_data,
            } => {
                out.put_u16(stream_id.0);
                out.put_u64(*maximum_stream_data);
            }
            Frame::Ping => {}
            Frame::MaxData { maximum_data } => out.put_u64(*maximum_data),
            Frame::MaxStreamData {
                stream_id,
                maximum_stream_data,
            } => {
                out.put_u16(stream_id.0);
                out.put_u64(*maximum_stream_data);
            }
            Frame::MaxStreams {
                unidirectional,
                maximum,
            } => {
                out.put_u8(u8::from(*unidirectional));
                out.put_u16(*maximum);
            }
            Frame::PathChallenge { token } | Frame::PathResponse { token } => {
                out.extend_from_slice(token);
            }
            Frame::Crypto { random, data } => {
                out.extend_from_slice(random);
                out.extend_from_slice(data);
            }
            Frame::SessionToken {
                effective_secs,
                token,
            } => {
                out.put_u16(*effective_secs);
                out.extend_from_slice(token);
            }
            Frame::AckFrequency {
                seq,
                ack_eliciting_threshold,
                reordering_threshold,
                max_ack_delay_ms,
            } => {
                out.put_u8(*seq);
                out.put_u8(*ack_eliciting_threshold);
                out.put_u8(*reordering_threshold);
                out.put_u32(*max_ack_delay_ms);
            }
            Frame::Version { version } => out.put_u32(*version),
        }
        out.len() - start
    }

    /// Parses one frame from the start of `input`, returning the frame and
    /// the bytes consumed.
    pub fn decode(input: &[u8]) -> Result<(Frame, usize), TransportError> {
        let mut r = Reader::new(input);
        let tag = r.get_u8()?;
        let frame = match tag {
            0x01 => {
                let stream_id = StreamId(r.get_u16()?);
                let flags = r.get_u8()?;
                if flags & !STREAM_FLAG_FIN != 0 {
                    return Err(TransportError::FrameFormat);
                }
                let offset = r.get_u64()?;
                let length = r.get_u16()?;
                let data = r.get_bytes(length as usize)?.to_vec();
                Frame::Stream(StreamFrame {
                    stream_id,
                    fin: flags & STREAM_FLAG_FIN != 0,
                    offset,
                    data,
                })
            }
            0x02 => {
                let delay_ms = r.get_u16()?;
                let largest = r.get_u64()?;
                let first_range = r.get_u64()?;
                let range_count = r.get_u8()?;
                let mut ranges = Vec::with_capacity(range_count as usize);
                for _ in 0..range_count {
                    let gap = r.get_u32()?;
                    let length = r.get_u32()?;
                    ranges.push(AckRange { gap, length });
                }
                let ack = AckFrame {
                    delay_ms,
                    largest,
                    first_range,
                    ranges,
                };
                // Rejects ranges whose running lowest packet number would
                // underflow.
                ack.runs()?;
                Frame::Ack(ack)
            }
            0x03 => {
                let length = r.get_u16()?;
                r.get_bytes(length as usize)?;
                Frame::Padding { length }
            }
            0x04 => Frame::ResetStream {
                stream_id: StreamId(r.get_u16()?),
                error_code: r.get_u16()?,
                final_offset: r.get_u64()?,
            },
            0x05 => {
                let error_code = r.get_u16()?;
                let reason_length = r.get_u16()?;
                let raw = r.get_bytes(reason_length as usize)?;
                let reason = std::str::from_utf8(raw)
                    .map_err(|_| TransportError::FrameFormat)?
                    .to_string();
                Frame::ConnectionClose { error_code, reason }
            }
            0x06 => Frame::Blocked {
                maximum_data: r.get_u64()?,
            },
            0x07 => Frame::StreamBlocked {
                stream_id: StreamId(r.get_u16()?),
                maximum_stream_data: r.get_u64()?,
            },
            0x08 => Frame::Ping,
            0x09 => Frame::MaxData {
                maximum_data: r.get_u64()?,
            },
            0x0A => Frame::MaxStreamData {
                stream_id: StreamId(r.get_u16()?),
                maximum_stream_data: r.get_u64()?,
            },
            0x0B => {
                let kind = r.get_u8()?;
                if kind > 1 {
                    return Err(TransportError::FrameFormat);
                }
                Frame::MaxStreams {
                    unidirectional: kind == 1,
                    maximum: r.get_u16()?,
                }
            }
            0x0C => Frame::PathChallenge {
                token: r.get_array()?,
            },
            0x0D => Frame::PathResponse {
                token: r.get_array()?,
            },
            0x0E => Frame::Crypto {
                random: r.get_array()?,
                data: r.get_array()?,
            },
            0x0F => Frame::SessionToken {
                effective_secs: r.get_u16()?,
                token: r.get_array()?,
            },
            0x10 => Frame::AckFrequency {
                seq: r.get_u8()?,
                ack_eliciting_threshold: r.get_u8()?,
                reordering_threshold: r.get_u8()?,
                max_ack_delay_ms: r.get_u32()?,
            },
            0x11 => Frame::Version {
                version: r.get_u32()?,
            },
            _ => return Err(TransportError::FrameFormat),
        };
        Ok((frame, r.pos()))
    }
}
