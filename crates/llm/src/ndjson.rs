//! Line-delimited JSON streaming for the Ollama chat endpoint.
//!
//! Ollama streams one JSON object per line. We buffer incoming chunks,
//! drain complete lines, and feed each to a parser closure. Frames that
//! fail to parse are skipped; the stream ends when a frame carries
//! `done: true` or the body closes.

use sov_domain::error::{Error, Result};

use crate::BoxStream;

/// Extract complete lines from a streaming buffer.
///
/// The buffer is drained in-place: consumed bytes are removed and any
/// trailing partial line remains for the next call.
pub(crate) fn drain_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();

    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..pos).collect();
        buffer.drain(..1); // remove the delimiter
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }

    lines
}

/// What a parsed frame contributed to the stream.
///
/// A frame may carry content and the done flag at once; a frame that fails
/// to parse carries neither and is skipped.
#[derive(Debug, Default)]
pub(crate) struct Frame {
    pub content: Option<String>,
    pub done: bool,
}

/// Build a [`BoxStream`] of content fragments from an NDJSON response and a
/// frame parser. The stream stops at the first frame whose done flag is set
/// or when the body closes, whichever comes first.
pub(crate) fn ndjson_response_stream<F>(
    response: reqwest::Response,
    parse_frame: F,
) -> BoxStream<'static, Result<String>>
where
    F: Fn(&str) -> Frame + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();

        'outer: loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for line in drain_lines(&mut buffer) {
                        let frame = parse_frame(&line);
                        if let Some(text) = frame.content {
                            yield Ok(text);
                        }
                        if frame.done {
                            break 'outer;
                        }
                    }
                }
                Ok(None) => {
                    // Body closed; flush a trailing partial line if any.
                    let tail = buffer.trim().to_string();
                    if !tail.is_empty() {
                        if let Some(text) = parse_frame(&tail).content {
                            yield Ok(text);
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Error::Http(format!("stream read: {e}")));
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_single_complete_line() {
        let mut buf = String::from("{\"a\":1}\n");
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_multiple_lines() {
        let mut buf = String::from("first\nsecond\n");
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["first", "second"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_partial_line_stays_in_buffer() {
        let mut buf = String::from("complete\npartial");
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["complete"]);
        assert_eq!(buf, "partial");
    }

    #[test]
    fn drain_empty_buffer() {
        let mut buf = String::new();
        assert!(drain_lines(&mut buf).is_empty());
    }

    #[test]
    fn drain_skips_blank_lines() {
        let mut buf = String::from("\n\npayload\n\n");
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["payload"]);
    }

    #[test]
    fn drain_incremental_buffering() {
        let mut buf = String::from("chu");
        assert!(drain_lines(&mut buf).is_empty());
        assert_eq!(buf, "chu");

        buf.push_str("nk1\nchunk2\n");
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["chunk1", "chunk2"]);
        assert!(buf.is_empty());
    }
}
