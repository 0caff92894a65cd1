use thiserror::Error;

/// Errors of the transport layer.
///
/// Every variant has a numeric code that is stable on the wire: it is the
/// `error_code` carried by CONNECTION_CLOSE and RESET_STREAM frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no error")]
    NoError,
    #[error("internal invariant violation")]
    Internal,
    #[error("operation cancelled")]
    Cancelled,
    #[error("handshake, idle or probe timeout")]
    Timeout,
    #[error("protocol version mismatch")]
    VersionMismatch,
    #[error("stream closed")]
    StreamClosed,
    #[error("stream not found")]
    StreamNotFound,
    #[error("operation invalid in current stream state")]
    StreamStateError,
    #[error("stream limit exceeded")]
    StreamLimitError,
    #[error("peer violated flow control")]
    FlowControlViolation,
    #[error("stream data blocked")]
    StreamDataBlocked,
    #[error("stream data limited")]
    StreamDataLimited,
    #[error("malformed frame")]
    FrameFormat,
    #[error("frame not allowed in current state")]
    FrameUnexpected,
    /// Application-defined close code (`0x0100` and above).
    #[error("application error {0:#06x}")]
    Application(u16),
}

impl TransportError {
    pub fn code(&self) -> u16 {
        match self {
            TransportError::NoError => 0x0000,
            TransportError::Internal => 0x0001,
            TransportError::Cancelled => 0x0002,
            TransportError::Timeout => 0x0003,
            TransportError::VersionMismatch => 0x0004,
            TransportError::StreamClosed => 0x0010,
            TransportError::StreamNotFound => 0x0011,
            TransportError::StreamStateError => 0x0012,
            TransportError::StreamLimitError => 0x0013,
            TransportError::FlowControlViolation => 0x0020,
            TransportError::StreamDataBlocked => 0x0021,
            TransportError::StreamDataLimited => 0x0022,
            TransportError::FrameFormat => 0x0030,
            TransportError::FrameUnexpected => 0x0031,
            TransportError::Application(code) => *code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => TransportError::NoError,
            0x0001 => TransportError::Internal,
            0x0002 => TransportError::Cancelled,
            0x0003 => TransportError::Timeout,
            0x0004 => TransportError::VersionMismatch,
            0x0010 => TransportError::StreamClosed,
            0x0011 => TransportError::StreamNotFound,
            0x0012 => TransportError::StreamStateError,
            0x0013 => TransportError::StreamLimitError,
            0x0020 => TransportError::FlowControlViolation,
            0x0021 => TransportError::StreamDataBlocked,
            0x0022 => TransportError::StreamDataLimited,
            0x0030 => TransportError::FrameFormat,
            0x0031 => TransportError::FrameUnexpected,
            code if code >= 0x0100 => TransportError::Application(code),
            _ => TransportError::Internal,
        }
    }
}
