//! LSP header framing over an arbitrary byte stream.
//!
//! Every JSON-RPC message is preceded by an ASCII header block:
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <payload>
//! ```
//!
//! `Content-Length` is the only header this codec requires; any other header
//! (`Content-Type`, in practice) is accepted and ignored.

use std::io::{self, BufRead, Write};

use thiserror::Error;

/// Errors raised while reading or writing framed messages.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The header block ended without a `Content-Length` header.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// A `Content-Length` header value could not be parsed as a length.
    #[error("invalid Content-Length header: {value}")]
    InvalidContentLength {
        /// The raw header value that failed to parse.
        value: String,
    },

    /// The stream closed cleanly between frames.
    #[error("stream closed")]
    Eof,

    /// The frame declared `Content-Length: 0`. JSON cannot be empty, so this
    /// can never decode to a useful message.
    #[error("empty payload (Content-Length: 0)")]
    EmptyPayload,
}

/// Writes one frame (header block followed by payload) to `writer`.
///
/// # Errors
///
/// Returns [`FramingError::Io`] if the underlying writer fails.
pub fn write_message<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), FramingError> {
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame (header block followed by payload) from `reader`.
///
/// Returns [`FramingError::Eof`] if the stream closes cleanly before any
/// header bytes are read, distinguishing a clean shutdown between frames from
/// a truncated frame.
///
/// # Errors
///
/// Returns [`FramingError::MissingContentLength`] if the header block never
/// names a length, [`FramingError::InvalidContentLength`] if the value is not
/// a valid non-negative integer, [`FramingError::EmptyPayload`] if it names a
/// length of zero, and [`FramingError::Io`] for any other read failure,
/// including a truncated payload.
pub fn read_message<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, FramingError> {
    let content_length = read_headers(reader)?;
    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).map_err(|source| {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            FramingError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed mid-frame",
            ))
        } else {
            FramingError::Io(source)
        }
    })?;
    Ok(payload)
}

fn read_headers<R: BufRead>(reader: &mut R) -> Result<usize, FramingError> {
    let mut content_length: Option<usize> = None;
    let mut saw_any_line = false;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            return if saw_any_line {
                Err(FramingError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed while reading headers",
                )))
            } else {
                Err(FramingError::Eof)
            };
        }
        saw_any_line = true;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }

        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let value = value.trim();
                let parsed: usize =
                    value.parse().map_err(|_err| FramingError::InvalidContentLength {
                        value: value.to_string(),
                    })?;
                if parsed == 0 {
                    return Err(FramingError::EmptyPayload);
                }
                content_length = Some(parsed);
            }
        }
    }

    content_length.ok_or(FramingError::MissingContentLength)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn writes_header_and_payload() {
        let mut buf = Vec::new();
        write_message(&mut buf, b"hello").expect("write should succeed");
        assert_eq!(buf, b"Content-Length: 5\r\n\r\nhello");
    }

    #[rstest]
    fn writes_empty_payload() {
        let mut buf = Vec::new();
        write_message(&mut buf, b"").expect("write should succeed");
        assert_eq!(buf, b"Content-Length: 0\r\n\r\n");
    }

    #[rstest]
    fn zero_length_content_is_a_framing_error() {
        let mut cursor = Cursor::new(b"Content-Length: 0\r\n\r\n".to_vec());
        let result = read_message(&mut cursor);
        assert!(matches!(result, Err(FramingError::EmptyPayload)));
    }

    #[rstest]
    fn reads_simple_frame() {
        let mut cursor = Cursor::new(b"Content-Length: 5\r\n\r\nhello".to_vec());
        let payload = read_message(&mut cursor).expect("read should succeed");
        assert_eq!(payload, b"hello");
    }

    #[rstest]
    fn header_names_are_case_insensitive() {
        let mut cursor = Cursor::new(b"content-LENGTH: 4\r\n\r\ntest".to_vec());
        let payload = read_message(&mut cursor).expect("read should succeed");
        assert_eq!(payload, b"test");
    }

    #[rstest]
    fn ignores_unknown_headers() {
        let mut cursor =
            Cursor::new(b"Content-Type: application/vscode-jsonrpc\r\nContent-Length: 4\r\n\r\ntest".to_vec());
        let payload = read_message(&mut cursor).expect("read should succeed");
        assert_eq!(payload, b"test");
    }

    #[rstest]
    fn missing_content_length_is_an_error() {
        let mut cursor = Cursor::new(b"Content-Type: application/json\r\n\r\ntest".to_vec());
        let result = read_message(&mut cursor);
        assert!(matches!(result, Err(FramingError::MissingContentLength)));
    }

    #[rstest]
    fn invalid_content_length_is_an_error() {
        let mut cursor = Cursor::new(b"Content-Length: nope\r\n\r\ntest".to_vec());
        let result = read_message(&mut cursor);
        assert!(matches!(
            result,
            Err(FramingError::InvalidContentLength { .. })
        ));
    }

    #[rstest]
    fn clean_eof_between_frames_is_reported() {
        let mut cursor = Cursor::new(Vec::new());
        let result = read_message(&mut cursor);
        assert!(matches!(result, Err(FramingError::Eof)));
    }

    #[rstest]
    fn truncated_payload_is_an_io_error() {
        let mut cursor = Cursor::new(b"Content-Length: 10\r\n\r\nabc".to_vec());
        let result = read_message(&mut cursor);
        assert!(matches!(result, Err(FramingError::Io(_))));
    }

    #[rstest]
    fn round_trips_a_json_payload() {
        let json = br#"{"jsonrpc":"2.0","id":1,"method":"test"}"#;
        let mut buf = Vec::new();
        write_message(&mut buf, json).expect("write should succeed");

        let mut cursor = Cursor::new(buf);
        let received = read_message(&mut cursor).expect("read should succeed");
        assert_eq!(received, json);
    }
}
