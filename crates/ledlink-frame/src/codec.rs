use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: type (1) + content length (4) = 5 bytes.
pub const HEADER_SIZE: usize = 5;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// A communication packet follows the header.
    Packet = 0,
    /// Heartbeat; no content.
    KeepAlive = 1,
    /// Cooperative teardown notice; no content.
    Disconnect = 2,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FrameType::Packet),
            1 => Ok(FrameType::KeepAlive),
            2 => Ok(FrameType::Disconnect),
            other => Err(FrameError::InvalidFrameType(other)),
        }
    }
}

/// Decoded frame header.
///
/// `content_length` is the exact byte length of the content for packet
/// frames and always zero otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub content_length: u32,
}

impl FrameHeader {
    pub fn packet(content_length: u32) -> Self {
        Self {
            frame_type: FrameType::Packet,
            content_length,
        }
    }

    pub fn keep_alive() -> Self {
        Self {
            frame_type: FrameType::KeepAlive,
            content_length: 0,
        }
    }

    pub fn disconnect() -> Self {
        Self {
            frame_type: FrameType::Disconnect,
            content_length: 0,
        }
    }

    /// On-wire representation.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.frame_type as u8;
        out[1..].copy_from_slice(&self.content_length.to_le_bytes());
        out
    }

    /// Parse a header from the start of `src`.
    ///
    /// Returns `Ok(None)` if fewer than [`HEADER_SIZE`] bytes are present.
    /// Does not consume anything, so it is safe to use on peeked bytes.
    pub fn decode(src: &[u8], max_payload: usize) -> Result<Option<Self>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let frame_type = FrameType::try_from(src[0])?;
        let content_length = u32::from_le_bytes([src[1], src[2], src[3], src[4]]);
        let len = content_length as usize;

        if frame_type != FrameType::Packet && len != 0 {
            return Err(FrameError::UnexpectedContent { frame_type, len });
        }
        if len > max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: max_payload,
            });
        }

        Ok(Some(Self {
            frame_type,
            content_length,
        }))
    }

    /// Header plus content size.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.content_length as usize
    }
}

/// A complete frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub content: Bytes,
}

impl Frame {
    /// A packet frame carrying `content`.
    pub fn packet(content: impl Into<Bytes>) -> Self {
        Self {
            frame_type: FrameType::Packet,
            content: content.into(),
        }
    }

    pub fn keep_alive() -> Self {
        Self {
            frame_type: FrameType::KeepAlive,
            content: Bytes::new(),
        }
    }

    pub fn disconnect() -> Self {
        Self {
            frame_type: FrameType::Disconnect,
            content: Bytes::new(),
        }
    }

    /// The total wire size of this frame (header + content).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.content.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────────┬──────────────────────────┐
/// │ Type (1B)│ Length (4B LE)│ Content (Length bytes)   │
/// │ 0/1/2    │              │ packet frames only       │
/// └──────────┴──────────────┴──────────────────────────┘
/// ```
pub fn encode_frame(frame_type: FrameType, content: &[u8], dst: &mut BytesMut) -> Result<()> {
    if frame_type != FrameType::Packet && !content.is_empty() {
        return Err(FrameError::UnexpectedContent {
            frame_type,
            len: content.len(),
        });
    }
    if content.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: content.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + content.len());
    dst.put_u8(frame_type as u8);
    dst.put_u32_le(content.len() as u32);
    dst.put_slice(content);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some(header) = FrameHeader::decode(src, max_payload)? else {
        return Ok(None);
    };

    if src.len() < header.frame_len() {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let content = src.split_to(header.content_length as usize).freeze();

    Ok(Some(Frame {
        frame_type: header.frame_type,
        content,
    }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum content size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
