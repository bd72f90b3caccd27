use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, Frame, FrameConfig, FrameType};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
///
/// Each frame is encoded into one buffer before it touches the stream, so a
/// frame is either written whole or the call fails.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.frame_type, frame.content.as_ref())
    }

    /// Wrap `content` in a packet frame and send it.
    pub fn send_packet(&mut self, content: &[u8]) -> Result<()> {
        self.send(FrameType::Packet, content)
    }

    /// Send a header-only keep-alive frame.
    pub fn send_keep_alive(&mut self) -> Result<()> {
        self.send(FrameType::KeepAlive, &[])
    }

    /// Send a header-only disconnect frame.
    pub fn send_disconnect(&mut self) -> Result<()> {
        self.send(FrameType::Disconnect, &[])
    }

    /// Encode and send a frame of the given type.
    ///
    /// A write timeout is reported, not retried.
    pub fn send(&mut self, frame_type: FrameType, content: &[u8]) -> Result<()> {
        if content.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: content.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(frame_type, content, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}
