//! Frame types delivered to stream consumers

use bytes::Bytes;

use crate::sdk::{NET_DVR_STREAMDATA, NET_DVR_SYSHEAD};

/// Classification of a delivered chunk.
///
/// Only two real-data tags are surfaced. Anything else the device sends
/// (audio-only data, private vendor data, tags added by newer firmware) has no
/// `FrameKind` and is dropped by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// System header: stream initialisation metadata, sent before any body
    Header,
    /// Encoded media payload (PS/RTP packets)
    Body,
}

impl FrameKind {
    /// Map an SDK data-type tag to a frame kind.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            NET_DVR_SYSHEAD => Some(FrameKind::Header),
            NET_DVR_STREAMDATA => Some(FrameKind::Body),
            _ => None,
        }
    }

    /// The SDK data-type tag for this kind.
    pub fn as_tag(&self) -> u32 {
        match self {
            FrameKind::Header => NET_DVR_SYSHEAD,
            FrameKind::Body => NET_DVR_STREAMDATA,
        }
    }
}

/// One classified chunk of the live stream.
///
/// The payload is owned: it was copied out of the SDK buffer before the
/// native callback returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePacket {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl FramePacket {
    /// Create a header packet
    pub fn header(payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Header,
            payload,
        }
    }

    /// Create a body packet
    pub fn body(payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Body,
            payload,
        }
    }

    pub fn is_header(&self) -> bool {
        self.kind == FrameKind::Header
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
