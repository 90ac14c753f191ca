//! Decoding of server-sent-event style completion streams
//!
//! The wire format is newline-delimited `data: {json}` frames terminated
//! by a `data: [DONE]` sentinel. A malformed frame is logged and skipped;
//! it must never abort the rest of the response.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::pin::Pin;

use crate::Result;

/// Boxed byte-chunk stream feeding the decoder
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Terminal sentinel frame body
const DONE_SENTINEL: &str = "[DONE]";

/// One parsed frame from the stream
#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Outcome of parsing a single line
enum Frame {
    Fragment(String),
    Done,
    Skip,
}

/// Lazy, finite, non-restartable sequence of text fragments decoded from
/// a chunked completion response body.
///
/// The sequence ends when the transport reports end-of-stream or the
/// `[DONE]` sentinel arrives; a mid-stream transport failure is surfaced
/// as a terminal `Err` item, distinguishable from clean completion.
pub struct StreamDecoder {
    inner: ByteStream,
    // Raw bytes; a multi-byte character may straddle transport chunks,
    // so decoding happens per complete line, never per chunk
    buffer: Vec<u8>,
    done: bool,
}

impl StreamDecoder {
    #[must_use]
    pub fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            done: false,
        }
    }

    /// Next text fragment, or `None` once the stream has finished.
    ///
    /// After a terminal `Err` or `None` the decoder yields `None`
    /// forever; it cannot be restarted.
    pub async fn next_fragment(&mut self) -> Option<Result<String>> {
        loop {
            while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                match parse_line(line.trim()) {
                    Frame::Fragment(text) => return Some(Ok(text)),
                    Frame::Done => {
                        self.done = true;
                        return None;
                    }
                    Frame::Skip => {}
                }
            }

            if self.done {
                return None;
            }

            match self.inner.next().await {
                Some(Ok(chunk)) => {
                    self.buffer.extend_from_slice(&chunk);
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    // Clean end of transport; flush a trailing unterminated line
                    self.done = true;
                    let rest = std::mem::take(&mut self.buffer);
                    let rest = String::from_utf8_lossy(&rest);
                    if let Frame::Fragment(text) = parse_line(rest.trim()) {
                        return Some(Ok(text));
                    }
                    return None;
                }
            }
        }
    }
}

/// Parse one `data: `-prefixed frame line
fn parse_line(line: &str) -> Frame {
    let Some(body) = line.strip_prefix("data:").map(str::trim_start) else {
        return Frame::Skip;
    };

    if body == DONE_SENTINEL {
        return Frame::Done;
    }

    match serde_json::from_str::<StreamFrame>(body) {
        Ok(frame) => frame
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .map_or(Frame::Skip, Frame::Fragment),
        Err(e) => {
            tracing::warn!(error = %e, frame = %body, "skipping malformed stream frame");
            Frame::Skip
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn decoder_from(lines: Vec<Result<&'static str>>) -> StreamDecoder {
        let chunks = lines
            .into_iter()
            .map(|r| r.map(|s| Bytes::from_static(s.as_bytes())));
        StreamDecoder::new(Box::pin(futures::stream::iter(chunks)))
    }

    async fn collect(decoder: &mut StreamDecoder) -> (Vec<String>, Option<Error>) {
        let mut fragments = Vec::new();
        let mut error = None;
        while let Some(item) = decoder.next_fragment().await {
            match item {
                Ok(f) => fragments.push(f),
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }
        (fragments, error)
    }

    #[tokio::test]
    async fn decodes_delta_fragments_in_order() {
        let mut decoder = decoder_from(vec![Ok(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\
             data: [DONE]\n",
        )]);

        let (fragments, error) = collect(&mut decoder).await;
        assert_eq!(fragments, vec!["Hel", "lo"]);
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn frame_split_across_chunks_is_reassembled() {
        let mut decoder = decoder_from(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"con"),
            Ok("tent\":\"ok\"}}]}\ndata: [DONE]\n"),
        ]);

        let (fragments, error) = collect(&mut decoder).await;
        assert_eq!(fragments, vec!["ok"]);
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn multibyte_character_split_across_chunks_is_reassembled() {
        // Split the transport inside the two-byte encoding of 'é'
        let frame =
            "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\ndata: [DONE]\n".as_bytes();
        let split = frame.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let chunks = vec![
            Ok(Bytes::copy_from_slice(&frame[..split])),
            Ok(Bytes::copy_from_slice(&frame[split..])),
        ];
        let mut decoder = StreamDecoder::new(Box::pin(futures::stream::iter(chunks)));

        let (fragments, error) = collect(&mut decoder).await;
        assert_eq!(fragments, vec!["café"]);
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped_not_fatal() {
        let mut decoder = decoder_from(vec![Ok(
            "data: {bad json}\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\
             data: [DONE]\n",
        )]);

        let (fragments, error) = collect(&mut decoder).await;
        assert_eq!(fragments, vec!["ok"]);
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn non_data_lines_and_empty_deltas_are_ignored() {
        let mut decoder = decoder_from(vec![Ok(
            ": keepalive\n\
             \n\
             data: {\"choices\":[{\"delta\":{}}]}\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\
             data: [DONE]\n",
        )]);

        let (fragments, error) = collect(&mut decoder).await;
        assert_eq!(fragments, vec!["x"]);
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn transport_failure_is_terminal_error() {
        let mut decoder = decoder_from(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"part\"}}]}\n"),
            Err(Error::Transport("connection reset".to_string())),
        ]);

        let (fragments, error) = collect(&mut decoder).await;
        assert_eq!(fragments, vec!["part"]);
        assert!(matches!(error, Some(Error::Transport(_))));

        // Not restartable after the terminal error
        assert!(decoder.next_fragment().await.is_none());
    }

    #[tokio::test]
    async fn end_of_stream_without_sentinel_is_clean() {
        let mut decoder = decoder_from(vec![Ok(
            "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}",
        )]);

        let (fragments, error) = collect(&mut decoder).await;
        assert_eq!(fragments, vec!["tail"]);
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn nothing_after_done_sentinel() {
        let mut decoder = decoder_from(vec![Ok(
            "data: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        )]);

        let (fragments, error) = collect(&mut decoder).await;
        assert!(fragments.is_empty());
        assert!(error.is_none());
    }
}
