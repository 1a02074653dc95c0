//! Incremental decoder for the gateway's `text/event-stream` completion body.
//!
//! Bytes are buffered until a full line is available, so a read may end anywhere
//! (mid-line or mid UTF-8 sequence) without affecting the decoded output.

use super::protocol::{StreamChunk, DONE_SENTINEL};

const DATA_PREFIX: &str = "data: ";

/// One decoded unit of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Non-empty `choices[0].delta.content`.
    Delta(String),
    /// The `[DONE]` sentinel.
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the sentinel has been seen; further input is ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one read's worth of bytes and return the frames completed by it.
    /// Decoding stops at the sentinel: `Done` is always the last frame and
    /// anything buffered after it is discarded.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.finished {
            return frames;
        }
        self.buffer.extend_from_slice(bytes);
        while let Some(i) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..i).collect();
            self.buffer.drain(..1);
            if let Some(frame) = self.decode_line(&line_bytes) {
                frames.push(frame);
                if self.finished {
                    self.buffer.clear();
                    break;
                }
            }
        }
        frames
    }

    /// Flush a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if self.finished || self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        self.decode_line(&rest)
    }

    fn decode_line(&mut self, line_bytes: &[u8]) -> Option<SseFrame> {
        let line = String::from_utf8_lossy(line_bytes);
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return None;
        }
        let data = line.strip_prefix(DATA_PREFIX)?;
        if data == DONE_SENTINEL {
            self.finished = true;
            return Some(SseFrame::Done);
        }
        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => chunk.into_content().map(SseFrame::Delta),
            Err(e) => {
                log::debug!("skipping malformed stream line: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_line(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({ "choices": [{ "delta": { "content": text } }] })
        )
    }

    fn sample_stream() -> Vec<u8> {
        let mut s = String::new();
        s.push_str(": keep-alive\n\n");
        s.push_str(&delta_line("Hé"));
        s.push_str(&delta_line("llo, "));
        s.push_str("data: {not json\n\n");
        s.push_str("event: ping\n");
        s.push_str(&delta_line("wörld 🌍"));
        s.push_str("data: [DONE]\n\n");
        s.into_bytes()
    }

    fn decode_in_pieces(bytes: &[u8], splits: &[usize]) -> Vec<SseFrame> {
        let mut decoder = SseDecoder::new();
        let mut frames = Vec::new();
        let mut start = 0;
        for end in splits.iter().copied().chain(std::iter::once(bytes.len())) {
            frames.extend(decoder.push(&bytes[start..end]));
            start = end;
        }
        frames.extend(decoder.finish());
        frames
    }

    #[test]
    fn decodes_deltas_and_sentinel() {
        let frames = decode_in_pieces(&sample_stream(), &[]);
        assert_eq!(
            frames,
            vec![
                SseFrame::Delta("Hé".to_string()),
                SseFrame::Delta("llo, ".to_string()),
                SseFrame::Delta("wörld 🌍".to_string()),
                SseFrame::Done,
            ]
        );
    }

    #[test]
    fn framing_is_independent_of_read_boundaries() {
        let bytes = sample_stream();
        let expected = decode_in_pieces(&bytes, &[]);
        // every single split point, including ones inside multi-byte characters
        for split in 1..bytes.len() {
            assert_eq!(decode_in_pieces(&bytes, &[split]), expected, "split at {}", split);
        }
        // one byte per read
        let every: Vec<usize> = (1..bytes.len()).collect();
        assert_eq!(decode_in_pieces(&bytes, &every), expected);
    }

    #[test]
    fn nothing_is_emitted_after_done() {
        let mut decoder = SseDecoder::new();
        let mut input = delta_line("a");
        input.push_str("data: [DONE]\n");
        input.push_str(&delta_line("late"));
        let frames = decoder.push(input.as_bytes());
        assert_eq!(frames, vec![SseFrame::Delta("a".to_string()), SseFrame::Done]);
        assert!(decoder.is_finished());
        assert!(decoder.push(delta_line("later").as_bytes()).is_empty());
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn crlf_and_missing_space_after_colon() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\r\ndata:{\"choices\":[{\"delta\":{\"content\":\"y\"}}]}\r\n",
        );
        assert_eq!(frames, vec![SseFrame::Delta("x".to_string())]);
    }

    #[test]
    fn finish_decodes_unterminated_last_line() {
        let mut decoder = SseDecoder::new();
        let line = delta_line("tail");
        let trimmed = line.trim_end();
        assert!(decoder.push(trimmed.as_bytes()).is_empty());
        assert_eq!(decoder.finish(), Some(SseFrame::Delta("tail".to_string())));
    }
}
