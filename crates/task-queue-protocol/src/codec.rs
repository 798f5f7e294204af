use crate::{ProtocolError, Result, MAX_LINE_LENGTH};
use bytes::{Buf, BufMut, BytesMut};
use std::fmt::Display;
use tokio_util::codec::{Decoder, Encoder};

/// One decoded unit of the line protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),

    /// A line longer than the codec's limit. Its bytes are skipped up to the
    /// next newline and the stream continues after it.
    Oversized,
}

/// Codec for newline-delimited text messages
///
/// Frame format: `<text>\n`, with an optional `\r` before the newline.
/// Used on both ends of the connection: the broker decodes command lines and
/// encodes [`Response`](crate::Response)s, clients do the reverse with
/// [`Command`](crate::Command).
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Bytes of the buffer already scanned for a newline
    next_index: usize,
    /// Skipping the rest of an oversized line
    is_discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        LineCodec {
            max_length,
            next_index: 0,
            is_discarding: false,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Take everything buffered as one line even though no newline arrived.
    ///
    /// Returns `None` for an empty buffer or the tail of an oversized line.
    pub fn take_partial(&mut self, src: &mut BytesMut) -> Option<Frame> {
        self.next_index = 0;
        if self.is_discarding {
            src.clear();
            return None;
        }
        if src.is_empty() {
            return None;
        }

        let frame = src.split();
        Some(Frame::Line(to_line(&frame)))
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn to_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            // Never look further than one byte past the limit
            let read_to = src.len().min(self.max_length + 1);
            let newline = src[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            match (self.is_discarding, newline) {
                (true, Some(newline)) => {
                    src.advance(newline + 1);
                    self.is_discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(newline)) => {
                    self.next_index = 0;
                    let frame = src.split_to(newline + 1);
                    return Ok(Some(Frame::Line(to_line(&frame[..newline]))));
                }
                (false, None) if src.len() > self.max_length => {
                    self.is_discarding = true;
                    self.next_index = 0;
                    return Ok(Some(Frame::Oversized));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        // A final line without terminator, e.g. from a peer that half-closed
        Ok(self.take_partial(src))
    }
}

impl<T: Display> Encoder<T> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let line = item.to_string();

        if line.contains('\n') {
            return Err(ProtocolError::EmbeddedNewline);
        }

        if line.len() > self.max_length {
            return Err(ProtocolError::LineTooLong {
                max: self.max_length,
            });
        }

        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Command, Response};

    fn line(text: &str) -> Option<Frame> {
        Some(Frame::Line(text.to_string()))
    }

    #[test]
    fn test_decode_lines() {
        let mut codec = LineCodec::new();
        let mut buffer = BytesMut::from(&b"GET a\r\nGET b\n"[..]);

        assert_eq!(codec.decode(&mut buffer).unwrap(), line("GET a"));
        assert_eq!(codec.decode(&mut buffer).unwrap(), line("GET b"));
        assert!(codec.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_partial_line() {
        let mut codec = LineCodec::new();
        let mut buffer = BytesMut::from(&b"ADD q 5 he"[..]);

        // Should return None (waiting for more data)
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"llo\n");
        assert_eq!(codec.decode(&mut buffer).unwrap(), line("ADD q 5 hello"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_unterminated_line_at_eof() {
        let mut codec = LineCodec::new();
        let mut buffer = BytesMut::from(&b"SAVE"[..]);

        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert_eq!(codec.decode_eof(&mut buffer).unwrap(), line("SAVE"));
        assert!(codec.decode_eof(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_take_partial() {
        let mut codec = LineCodec::new();
        let mut buffer = BytesMut::from(&b"ADD q 5 hello"[..]);

        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert_eq!(codec.take_partial(&mut buffer), line("ADD q 5 hello"));
        assert!(buffer.is_empty());
        assert!(codec.take_partial(&mut buffer).is_none());

        // Scanning restarts from the beginning of new data
        buffer.extend_from_slice(b"GET q\n");
        assert_eq!(codec.decode(&mut buffer).unwrap(), line("GET q"));
    }

    #[test]
    fn test_line_too_long() {
        let mut codec = LineCodec::with_max_length(8);

        let mut ok = BytesMut::from(&b"12345678\n"[..]);
        assert_eq!(codec.decode(&mut ok).unwrap(), line("12345678"));

        let mut too_long = BytesMut::from(&b"123456789\n"[..]);
        assert_eq!(codec.decode(&mut too_long).unwrap(), Some(Frame::Oversized));
    }

    #[test]
    fn test_oversized_line_is_skipped() {
        let mut codec = LineCodec::with_max_length(8);
        let mut buffer = BytesMut::from(&b"ADD q 20 aaaaaa"[..]);

        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(Frame::Oversized));
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert!(buffer.is_empty());

        // The rest of the long line arrives later, followed by a normal one
        buffer.extend_from_slice(b"aaaaaaaaaaaaaa\nGET q\n");
        assert_eq!(codec.decode(&mut buffer).unwrap(), line("GET q"));
        assert!(codec.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_oversized_tail_is_not_a_partial_line() {
        let mut codec = LineCodec::with_max_length(4);
        let mut buffer = BytesMut::from(&b"abcdefgh"[..]);

        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(Frame::Oversized));
        buffer.extend_from_slice(b"ij");
        assert!(codec.take_partial(&mut buffer).is_none());
        assert!(codec.decode_eof(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = LineCodec::new();
        let mut buffer = BytesMut::new();

        codec.encode(Response::Yes, &mut buffer).unwrap();
        codec.encode(Command::Get { queue: "q".to_string() }, &mut buffer).unwrap();

        assert_eq!(&buffer[..], b"YES\nGET q\n");
    }

    #[test]
    fn test_encode_rejects_embedded_newline() {
        let mut codec = LineCodec::new();
        let mut buffer = BytesMut::new();

        let cmd = Command::Add {
            queue: "q".to_string(),
            length: 3,
            data: "a\nb".to_string(),
        };
        assert!(matches!(
            codec.encode(cmd, &mut buffer),
            Err(ProtocolError::EmbeddedNewline)
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut codec = LineCodec::new();
        let mut buffer = BytesMut::from(&b"GET \xff\n"[..]);
        let Some(Frame::Line(text)) = codec.decode(&mut buffer).unwrap() else {
            panic!("expected a line");
        };
        assert!(text.starts_with("GET "));
    }
}
