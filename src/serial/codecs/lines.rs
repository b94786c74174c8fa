use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::serial::error::SerialPortError;

/// Longest line we are willing to buffer before giving up on it.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 256;

/// This codec frames the instrument's text protocol.
///
/// Reading splits on a delimiter byte (`\n`). Carriage returns are dropped
/// wherever they appear, and bytes outside ASCII are skipped without
/// interrupting the line they were found in.
///
/// Writing appends a terminator (`\r\n`) to each line.
#[derive(Debug, Clone)]
pub struct LinesCodec {
    /// How far we have looked for a delimiter into the buffer
    cursor: usize,

    /// How to delimit incoming byte streams.
    /// This delimiter is not included in the yielded frames.
    read_delimiter: u8,

    /// Appended when writing (encoding) lines.
    write_terminator: &'static [u8],

    /// Bytes without a delimiter beyond this are thrown away.
    max_length: usize,

    /// Set while skipping the rest of an overlong line.
    is_discarding: bool,
}

impl LinesCodec {
    /// Create a new codec.
    pub fn new(read_delimiter: u8, write_terminator: &'static [u8], max_length: usize) -> Self {
        Self {
            cursor: 0,
            read_delimiter,
            write_terminator,
            max_length,
            is_discarding: false,
        }
    }

    fn to_text(raw: &[u8]) -> String {
        raw.iter()
            .filter(|byte| byte.is_ascii() && **byte != b'\r')
            .map(|&byte| byte as char)
            .collect()
    }
}

impl Default for LinesCodec {
    fn default() -> Self {
        Self::new(b'\n', b"\r\n", DEFAULT_MAX_LINE_LENGTH)
    }
}

impl Decoder for LinesCodec {
    type Item = String;
    type Error = SerialPortError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let read_to = src.len();

            let look_at = &src[self.cursor..read_to];
            let position = look_at.iter().position(|&byte| byte == self.read_delimiter);

            match (self.is_discarding, position) {
                (true, Some(position)) => {
                    // The tail of the overlong line goes too, delimiter included.
                    src.advance(self.cursor + position + 1);
                    self.cursor = 0;
                    self.is_discarding = false;
                }
                (true, None) => {
                    src.clear();
                    self.cursor = 0;

                    return Ok(None);
                }
                (false, Some(position)) => {
                    // Since we might "start late" in the buffer (from the cursor),
                    // the "global" position within the buffer has to be calculated.
                    let actual_position = self.cursor + position;

                    // Next time we need to start over.
                    self.cursor = 0;

                    let line = src.split_to(actual_position);

                    // Discard the delimiter.
                    src.advance(1);

                    return Ok(Some(Self::to_text(&line)));
                }
                (false, None) if read_to > self.max_length => {
                    warn!(
                        bytes = read_to,
                        "No line delimiter within {} bytes, discarding", self.max_length
                    );
                    src.clear();
                    self.cursor = 0;
                    self.is_discarding = true;

                    return Ok(None);
                }
                (false, None) => {
                    // No full frame yet. The bytes looked at so far do not need to be
                    // scanned again when more arrive.
                    self.cursor = read_to;

                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None => {
                if !src.is_empty() {
                    debug!(bytes = src.len(), "Dropping unterminated line at end of stream");
                    src.clear();
                }
                self.cursor = 0;
                self.is_discarding = false;

                Ok(None)
            }
        }
    }
}

impl Encoder<String> for LinesCodec {
    type Error = SerialPortError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + self.write_terminator.len());
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(self.write_terminator);

        Ok(())
    }
}
