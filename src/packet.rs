//! Outer packet layout: cleartext header, truncated packet number and a
//! sealed payload of frames.

use crate::error::TransportError;
use crate::wire::{Reader, WriteExt};

/// Header flag: packet carries handshake CRYPTO material and its payload is
/// not sealed (no keys exist yet).
pub const FLAG_HELLO: u8 = 0x01;

/// Fixed header bytes before the variable-length packet number.
pub const HEADER_FIXED_LEN: usize = 4 + 4 + 4 + 1;
/// Trailing header bytes after the packet number (flags + payload length).
pub const HEADER_TAIL_LEN: usize = 1 + 2;
/// AES-GCM authentication tag length appended to sealed payloads.
pub const AEAD_TAG_LEN: usize = 16;

/// Cleartext packet header. The whole header (packet-number bytes included)
/// is authenticated as associated data of the payload AEAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u32,
    /// Destination connection ID, the receiver's routing key.
    pub dcid: u32,
    pub scid: u32,
    pub pn_len: u8,
    pub pn_truncated: u32,
    pub flags: u8,
    pub payload_len: u16,
}

impl PacketHeader {
    pub fn len(&self) -> usize {
        HEADER_FIXED_LEN + self.pn_len as usize + HEADER_TAIL_LEN
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> usize {
        debug_assert!((1..=4).contains(&self.pn_len));
        let start = out.len();
        out.put_u32(self.version);
        out.put_u32(self.dcid);
        out.put_u32(self.scid);
        out.put_u8(self.pn_len);
        out.extend_from_slice(&self.pn_truncated.to_le_bytes()[..self.pn_len as usize]);
        out.put_u8(self.flags);
        out.put_u16(self.payload_len);
        out.len() - start
    }

    pub fn decode(input: &[u8]) -> Result<(Self, usize), TransportError> {
        let mut r = Reader::new(input);
        let version = r.get_u32()?;
        let dcid = r.get_u32()?;
        let scid = r.get_u32()?;
        let pn_len = r.get_u8()?;
        if !(1..=4).contains(&pn_len) {
            return Err(TransportError::FrameFormat);
        }
        let mut pn_bytes = [0u8; 4];
        pn_bytes[..pn_len as usize].copy_from_slice(r.get_bytes(pn_len as usize)?);
        let flags = r.get_u8()?;
        let payload_len = r.get_u16()?;
        Ok((
            Self {
                version,
                dcid,
                scid,
                pn_len,
                pn_truncated: u32::from_le_bytes(pn_bytes),
                flags,
                payload_len,
            },
            r.pos(),
        ))
    }
}

/// Smallest packet-number encoding that lets the receiver reconstruct `pn`
/// given it has acknowledged everything up to `largest_acked`.
pub fn packet_number_len(pn: u64, largest_acked: Option<u64>) -> u8 {
    let range = match largest_acked {
        // Twice the unacknowledged distance must fit.
        Some(acked) => 2 * (pn - acked),
        None => 2 * pn + 1,
    };
    match range {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

pub fn truncate_packet_number(pn: u64, pn_len: u8) -> u32 {
    if pn_len >= 4 {
        pn as u32
    } else {
        (pn & ((1u64 << (pn_len as u64 * 8)) - 1)) as u32
    }
}

/// Reconstructs a full packet number from its truncated form using the
/// expected-minus-window method against the highest packet received so far.
pub fn expand_packet_number(truncated: u32, pn_len: u8, highest_received: Option<u64>) -> u64 {
    let expected = highest_received.map_or(0, |h| h + 1);
    let win = 1u64 << (pn_len.min(4) as u64 * 8);
    let half = win / 2;
    let candidate = (expected & !(win - 1)) | truncated as u64;
    if candidate + half <= expected {
        candidate + win
    } else if candidate > expected + half && candidate >= win {
        candidate - win
    } else {
        candidate
    }
}
