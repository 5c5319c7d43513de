//! Newline framing for the serial device stream.
//!
//! Bytes from the device arrive in arbitrary chunks. `DeviceLineCodec`
//! accumulates them and yields one `String` per `\n`-terminated line with
//! trailing whitespace (including `\r`) removed, so the lines produced are
//! the same however the stream was split. Invalid UTF-8 is replaced rather
//! than rejected; the controller speaks ASCII and a corrupted byte should not
//! cost the link.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

/// Longest line accepted from the device, excluding the newline.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Line codec for the rotator serial protocol.
#[derive(Debug, Clone)]
pub struct DeviceLineCodec {
    /// Index up to which the buffer is known to hold no newline
    next_index: usize,

    /// Dropping the remainder of an overlong line
    discarding: bool,

    max_length: usize,
}

impl DeviceLineCodec {
    /// Creates a codec with the default line limit.
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    /// Creates a codec with a custom line limit.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            discarding: false,
            max_length,
        }
    }

    /// Returns the line limit.
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for DeviceLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for DeviceLineCodec {
    type Item = String;
    type Error = ProtocolError;

    /// Decodes the next complete line.
    ///
    /// Returns `ProtocolError::LineTooLong` once when a line outgrows the
    /// limit; the codec then skips to the next newline and stays usable.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        loop {
            let start = self.next_index.min(src.len());
            let newline = src
                .get(start..)
                .and_then(|unscanned| unscanned.iter().position(|b| *b == b'\n'))
                .map(|offset| start + offset);

            let Some(newline) = newline else {
                if src.len() > self.max_length {
                    src.clear();
                    self.next_index = 0;
                    if !self.discarding {
                        self.discarding = true;
                        return Err(ProtocolError::LineTooLong {
                            max: self.max_length,
                        });
                    }
                } else {
                    self.next_index = src.len();
                }
                return Ok(None);
            };

            let frame = src.split_to(newline + 1);
            self.next_index = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }

            let content = frame.get(..newline).unwrap_or_default();
            if content.len() > self.max_length {
                return Err(ProtocolError::LineTooLong {
                    max: self.max_length,
                });
            }

            let line = String::from_utf8_lossy(content);
            return Ok(Some(line.trim_end().to_string()));
        }
    }
}

impl Encoder<&str> for DeviceLineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, line: &str, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &[u8] = b"READY\r\nPOS:0\nACK:CW\r\nPOS:15\n\nERROR:STALL  \nPOS:3";

    fn decode_all(codec: &mut DeviceLineCodec, buf: &mut BytesMut) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = codec.decode(buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    fn decode_in_chunks(data: &[u8], chunk_size: usize) -> (Vec<String>, BytesMut) {
        let mut codec = DeviceLineCodec::new();
        let mut buf = BytesMut::new();
        let mut lines = Vec::new();
        for chunk in data.chunks(chunk_size) {
            buf.extend_from_slice(chunk);
            lines.extend(decode_all(&mut codec, &mut buf));
        }
        (lines, buf)
    }

    #[test]
    fn test_whole_stream() {
        let (lines, rest) = decode_in_chunks(STREAM, STREAM.len());
        assert_eq!(
            lines,
            vec!["READY", "POS:0", "ACK:CW", "POS:15", "", "ERROR:STALL"]
        );
        assert_eq!(&rest[..], b"POS:3");
    }

    #[test]
    fn test_framing_is_chunk_size_invariant() {
        let (expected, expected_rest) = decode_in_chunks(STREAM, STREAM.len());
        for chunk_size in 1..STREAM.len() {
            let (lines, rest) = decode_in_chunks(STREAM, chunk_size);
            assert_eq!(lines, expected, "chunk size {chunk_size}");
            assert_eq!(rest, expected_rest, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn test_partial_line_completed_by_later_read() {
        let mut codec = DeviceLineCodec::new();
        let mut buf = BytesMut::from(&b"PO"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"S:9");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"0\r\nACK");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("POS:90".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"ACK");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut codec = DeviceLineCodec::new();
        let mut buf = BytesMut::from(&b"ACK:\xff\n"[..]);
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert!(line.starts_with("ACK:"));
    }

    #[test]
    fn test_overlong_line_skipped() {
        let mut codec = DeviceLineCodec::with_max_length(8);
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::LineTooLong { max: 8 })
        ));

        buf.extend_from_slice(b"abc\nPOS:1\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("POS:1".to_string()));
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = DeviceLineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("STOP", &mut buf).unwrap();
        assert_eq!(&buf[..], b"STOP\n");
    }
}
