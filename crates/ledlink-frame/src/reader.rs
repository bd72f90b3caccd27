use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_frame, Frame, FrameConfig, FrameHeader, HEADER_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// The reader never pulls bytes past the end of the frame it is assembling,
/// so whatever is still in the stream can be inspected with a peek.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached. A read
    /// timeout surfaces as an `Io` error; bytes received so far are kept and
    /// the next call resumes the same frame.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                return Ok(frame);
            }

            let wanted = self.pending_frame_len()? - self.buf.len();
            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let chunk = &mut chunk[..wanted.min(READ_CHUNK_SIZE)];
            let read = match self.inner.read(chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Wire length of the frame currently being assembled.
    fn pending_frame_len(&self) -> Result<usize> {
        match FrameHeader::decode(&self.buf, self.config.max_payload_size)? {
            Some(header) => Ok(header.frame_len()),
            None => Ok(HEADER_SIZE),
        }
    }

    /// Bytes of a partially received frame held in the reader.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::{encode_frame, FrameType};

    fn packet_wire(contents: &[&[u8]]) -> Vec<u8> {
        let mut wire = BytesMut::new();
        for content in contents {
            encode_frame(FrameType::Packet, content, &mut wire).unwrap();
        }
        wire.to_vec()
    }

    #[test]
    fn read_single_frame() {
        let mut reader = FrameReader::new(Cursor::new(packet_wire(&[b"hello"])));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.frame_type, FrameType::Packet);
        assert_eq!(frame.content.as_ref(), b"hello");
    }

    #[test]
    fn read_interleaved_keep_alives() {
        let mut wire = BytesMut::new();
        encode_frame(FrameType::KeepAlive, b"", &mut wire).unwrap();
        encode_frame(FrameType::Packet, b"one", &mut wire).unwrap();
        encode_frame(FrameType::KeepAlive, b"", &mut wire).unwrap();
        encode_frame(FrameType::Disconnect, b"", &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let kinds: Vec<FrameType> = (0..4)
            .map(|_| reader.read_frame().unwrap().frame_type)
            .collect();

        assert_eq!(
            kinds,
            vec![
                FrameType::KeepAlive,
                FrameType::Packet,
                FrameType::KeepAlive,
                FrameType::Disconnect
            ]
        );
    }

    #[test]
    fn never_reads_past_current_frame() {
        let wire = packet_wire(&[b"first", b"second"]);
        let first_len = HEADER_SIZE + 5;

        let mut reader = FrameReader::new(Cursor::new(wire));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.content.as_ref(), b"first");
        assert_eq!(reader.get_ref().position() as usize, first_len);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn read_frame_with_large_payload() {
        let payload = vec![0xAB; 64 * 1024];
        let mut reader = FrameReader::new(Cursor::new(packet_wire(&[&payload])));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.content.as_ref(), payload.as_slice());
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: packet_wire(&[b"slow"]),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.content.as_ref(), b"slow");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_frame() {
        let mut partial = BytesMut::new();
        partial.put_u8(0);
        partial.put_u32_le(16);
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn invalid_type_in_stream() {
        let bytes = vec![0x07, 0x00, 0x00, 0x00, 0x00];
        let mut reader = FrameReader::new(Cursor::new(bytes));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::InvalidFrameType(0x07)));
    }

    #[test]
    fn oversized_frame_in_stream() {
        let mut wire = BytesMut::new();
        wire.put_u8(0);
        wire.put_u32_le(1024);

        let cfg = FrameConfig {
            max_payload_size: 16,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(Cursor::new(wire.to_vec()), cfg);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }

            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn timeout_mid_frame_resumes() {
        let reader = StallingReader {
            bytes: packet_wire(&[b"resume"]),
            pos: 0,
            stall_at: 3,
            stalled: false,
        };
        let mut framed = FrameReader::new(reader);

        let err = framed.read_frame().unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(framed.buffered(), 3);

        let frame = framed.read_frame().unwrap();
        assert_eq!(frame.content.as_ref(), b"resume");
        assert_eq!(framed.buffered(), 0);
    }

    /// Hands out bytes one at a time and reports a single timeout at `stall_at`.
    struct StallingReader {
        bytes: Vec<u8>,
        pos: usize,
        stall_at: usize,
        stalled: bool,
    }

    impl Read for StallingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos == self.stall_at && !self.stalled {
                self.stalled = true;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            state: 0,
            bytes: packet_wire(&[b"ok"]),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let frame = framed.read_frame().unwrap();

        assert_eq!(frame.content.as_ref(), b"ok");
    }

    struct InterruptedThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn roundtrip_over_loopback() {
        let (left, right) = ledlink_transport::loopback_pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.send_packet(b"ping").unwrap();
        writer.send_keep_alive().unwrap();

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.content.as_ref(), b"ping");
        assert_eq!(reader.read_frame().unwrap(), crate::codec::Frame::keep_alive());
    }
}
