//! `tokio_util::codec` adapter for the link frame format.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, Frame, DEFAULT_MAX_PAYLOAD};
use crate::error::FrameError;

/// Frames an async byte stream into [`Frame`]s.
///
/// Control frames are yielded like any other frame; keep-alive handling is
/// left to the caller.
#[derive(Debug, Clone)]
pub struct LinkCodec {
    max_payload_size: usize,
}

impl LinkCodec {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }
}

impl Default for LinkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LinkCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        decode_frame(src, self.max_payload_size)
    }
}

impl Encoder<Frame> for LinkCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        if frame.content.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: frame.content.len(),
                max: self.max_payload_size,
            });
        }
        encode_frame(frame.frame_type, &frame.content, dst)
    }
}
