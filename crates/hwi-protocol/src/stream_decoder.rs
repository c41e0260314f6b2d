//! Stream decoder for panel output.
//!
//! This module provides a stateful decoder for the unframed text the panel
//! writes to the telnet connection. Bytes arrive in arbitrary pieces: half a
//! frame, several frames, a prompt, an echo of the last command. The decoder
//! normalizes each arrival, appends it to an internal buffer, and extracts
//! every complete frame body that any registered grammar recognizes.
//!
//! # Normalization
//!
//! The panel mixes `\r`, `\n` and `\r\n` line endings. Before buffering, every
//! newline becomes a carriage return and every run of carriage returns
//! collapses to a single [`FRAME_SEPARATOR`].
//!
//! # Extraction
//!
//! After each arrival the buffer is scanned repeatedly. On every pass the
//! left-most complete body across all grammars is taken (ties go to the
//! grammar registered first), the decode counter is incremented, and the
//! buffer becomes `leading + separator + trailing`. Scanning stops when no
//! grammar matches, so frames always come out in stream order and a chunk
//! carrying several frames of the same kind yields all of them.
//!
//! # Usage
//!
//! ```
//! use hwi_protocol::{FrameKind, StreamDecoder};
//!
//! let mut decoder = StreamDecoder::new();
//!
//! decoder.feed(b"DL, [01:01:00:02:04], 5");
//! assert!(decoder.next_frame().is_none());
//!
//! decoder.feed(b"0\r\n");
//! let frame = decoder.next_frame().unwrap();
//! assert_eq!(frame.kind, FrameKind::DimLevel);
//! assert_eq!(frame.fields, vec!["01:01:00:02:04", "50"]);
//! ```

use std::collections::VecDeque;

use hwi_core::constants::FRAME_SEPARATOR;

use crate::{DecodedFrame, FrameGrammar, FrameKind};

/// Maximum buffered text before old text is discarded.
///
/// Prompts and command echoes never match a grammar and would otherwise
/// accumulate for the life of the connection.
pub const MAX_DECODE_BUFFER: usize = 4 * 1024; // 4 KB

/// Initial buffer capacity for incoming text.
const INITIAL_BUFFER_CAPACITY: usize = 512;

/// Recommended initial capacity for frame queue.
const INITIAL_FRAME_QUEUE_CAPACITY: usize = 4;

/// Stateful multi-grammar decoder.
///
/// # Example
///
/// ```
/// use hwi_protocol::StreamDecoder;
///
/// let mut decoder = StreamDecoder::new();
/// decoder.feed(b"L232> DL, [01:02], 10\rDL, [01:03], 20\r");
///
/// let levels: Vec<_> = decoder
///     .drain_frames()
///     .map(|frame| frame.fields[1].clone())
///     .collect();
/// assert_eq!(levels, vec!["10", "20"]);
/// assert_eq!(decoder.decode_count(), 2);
/// ```
#[derive(Debug)]
pub struct StreamDecoder {
    /// Normalized text not yet consumed by a match.
    buffer: String,

    /// Registered grammars, in registration order.
    grammars: Vec<FrameGrammar>,

    /// Number of frames decoded so far.
    counter: u64,

    /// Decoded frames ready for extraction.
    frames: VecDeque<DecodedFrame>,
}

impl StreamDecoder {
    /// Create a decoder with the built-in grammars.
    pub fn new() -> Self {
        Self::with_grammars(FrameGrammar::defaults())
    }

    /// Create a decoder with an explicit grammar set.
    pub fn with_grammars(grammars: Vec<FrameGrammar>) -> Self {
        Self {
            buffer: String::with_capacity(INITIAL_BUFFER_CAPACITY),
            grammars,
            counter: 0,
            frames: VecDeque::with_capacity(INITIAL_FRAME_QUEUE_CAPACITY),
        }
    }

    /// Register a grammar, replacing any existing grammar for the same kind.
    pub fn register_grammar(&mut self, grammar: FrameGrammar) {
        match self.grammars.iter_mut().find(|g| g.kind() == grammar.kind()) {
            Some(existing) => *existing = grammar,
            None => self.grammars.push(grammar),
        }
    }

    /// Kinds this decoder can produce.
    pub fn kinds(&self) -> impl Iterator<Item = FrameKind> + '_ {
        self.grammars.iter().map(FrameGrammar::kind)
    }

    /// Feed raw bytes from the transport.
    ///
    /// Non-UTF-8 bytes are replaced; the panel only emits ASCII.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.feed_str(&String::from_utf8_lossy(bytes));
    }

    /// Feed text from the transport.
    pub fn feed_str(&mut self, text: &str) {
        normalize_into(text, &mut self.buffer);
        self.extract_frames();
        self.enforce_limit();
    }

    /// Extract next decoded frame if available.
    pub fn next_frame(&mut self) -> Option<DecodedFrame> {
        self.frames.pop_front()
    }

    /// Returns number of frames ready for extraction.
    pub fn frames_available(&self) -> usize {
        self.frames.len()
    }

    /// Total frames decoded since creation (or the last `clear`).
    pub fn decode_count(&self) -> u64 {
        self.counter
    }

    /// Normalized text still waiting for a match.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Discard buffered text and queued frames, and reset the counter.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.frames.clear();
        self.counter = 0;
    }

    /// Returns an iterator that drains all currently available frames.
    pub fn drain_frames(&mut self) -> DrainFrames<'_> {
        DrainFrames { decoder: self }
    }

    fn extract_frames(&mut self) {
        while let Some((kind, body_start, body_end, fields)) = self.leftmost_match() {
            // Each extraction must shrink the buffer or the scan never ends.
            if body_end - body_start <= FRAME_SEPARATOR.len_utf8() {
                break;
            }

            self.counter += 1;
            let text = self.buffer[body_start..body_end].to_string();

            let mut rest = String::with_capacity(self.buffer.len() - (body_end - body_start) + 1);
            rest.push_str(&self.buffer[..body_start]);
            rest.push(FRAME_SEPARATOR);
            rest.push_str(&self.buffer[body_end..]);
            self.buffer = rest;

            self.frames
                .push_back(DecodedFrame::new(kind, self.counter, fields).with_text(text));
        }
    }

    fn leftmost_match(&self) -> Option<(FrameKind, usize, usize, Vec<String>)> {
        self.grammars
            .iter()
            .enumerate()
            .filter_map(|(order, grammar)| {
                grammar
                    .find(&self.buffer)
                    .map(|m| (m.body.start, order, grammar.kind(), m))
            })
            .min_by_key(|(start, order, _, _)| (*start, *order))
            .map(|(_, _, kind, m)| (kind, m.body.start, m.body.end, m.fields))
    }

    /// Keep only the text after the last separator once the buffer is too
    /// large; that tail is the only place a frame can still be in progress.
    fn enforce_limit(&mut self) {
        if self.buffer.len() <= MAX_DECODE_BUFFER {
            return;
        }

        match self.buffer.rfind(FRAME_SEPARATOR) {
            Some(pos) if self.buffer.len() - pos <= MAX_DECODE_BUFFER => {
                self.buffer.drain(..pos);
            }
            _ => self.buffer.clear(),
        }
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Append `text` to `buffer`, mapping each run of line breaks to one separator.
fn normalize_into(text: &str, buffer: &mut String) {
    let mut in_break = false;
    for c in text.chars() {
        if c == '\r' || c == '\n' {
            if !in_break {
                buffer.push(FRAME_SEPARATOR);
                in_break = true;
            }
        } else {
            buffer.push(c);
            in_break = false;
        }
    }
}

/// Iterator that drains frames from a [`StreamDecoder`].
pub struct DrainFrames<'a> {
    decoder: &'a mut StreamDecoder,
}

impl<'a> Iterator for DrainFrames<'a> {
    type Item = DecodedFrame;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_frame()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.decoder.frames_available();
        (len, Some(len))
    }
}

impl<'a> ExactSizeIterator for DrainFrames<'a> {
    fn len(&self) -> usize {
        self.decoder.frames_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const FRAME_50: &[u8] = b"DL, [01:01:00:02:04], 50\r";
    const FRAME_75: &[u8] = b"DL, [01:01:00:02:04], 75\r";

    fn levels(decoder: &mut StreamDecoder) -> Vec<String> {
        decoder
            .drain_frames()
            .map(|frame| frame.fields[1].clone())
            .collect()
    }

    #[rstest]
    #[case("a\nb", "a;b")]
    #[case("a\r\nb", "a;b")]
    #[case("a\r\r\n\n\rb", "a;b")]
    #[case("\n\nab", ";ab")]
    #[case("ab", "ab")]
    fn test_normalize(#[case] input: &str, #[case] expected: &str) {
        let mut out = String::new();
        normalize_into(input, &mut out);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_single_frame() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(FRAME_50);

        let frame = decoder.next_frame().unwrap();
        assert_eq!(frame.kind, FrameKind::DimLevel);
        assert_eq!(frame.counter, 1);
        assert_eq!(frame.fields, vec!["01:01:00:02:04", "50"]);
        assert_eq!(frame.text, "DL, [01:01:00:02:04], 50");
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn test_partial_frame_completed_later() {
        let mut decoder = StreamDecoder::new();

        decoder.feed(b"DL, [01:01:");
        assert_eq!(decoder.frames_available(), 0);

        decoder.feed(b"00:02:04], 5");
        assert_eq!(decoder.frames_available(), 0);

        decoder.feed(b"0");
        assert_eq!(decoder.frames_available(), 0);

        decoder.feed(b"\n");
        assert_eq!(levels(&mut decoder), vec!["50"]);
    }

    #[test]
    fn test_sequential_frames_increment_counter() {
        let mut decoder = StreamDecoder::new();

        decoder.feed(FRAME_50);
        let first = decoder.next_frame().unwrap();

        decoder.feed(FRAME_75);
        let second = decoder.next_frame().unwrap();

        assert_eq!(first.fields[1], "50");
        assert_eq!(second.fields[1], "75");
        assert_eq!(second.counter, first.counter + 1);
    }

    #[test]
    fn test_two_frames_in_one_arrival() {
        let mut decoder = StreamDecoder::new();

        let mut chunk = FRAME_50.to_vec();
        chunk.extend_from_slice(FRAME_75);
        decoder.feed(&chunk);

        assert_eq!(levels(&mut decoder), vec!["50", "75"]);
        assert_eq!(decoder.decode_count(), 2);
    }

    #[test]
    fn test_consumed_body_never_rematched() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(FRAME_50);
        assert_eq!(decoder.frames_available(), 1);

        decoder.feed(b"L232> ");
        decoder.feed(b"\r\n");
        assert_eq!(decoder.frames_available(), 1);
        assert!(!decoder.buffered().contains("DL"));
    }

    #[test]
    fn test_buffer_splice_keeps_leading_and_trailing() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(b"L232> DL, [01:02], 9\rRD");

        assert_eq!(decoder.frames_available(), 1);
        assert_eq!(decoder.buffered(), "L232> ;;RD");
    }

    #[test]
    fn test_noise_is_buffered_not_rejected() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(b"garbage \x01\x02 more\r\nL232> ");
        assert_eq!(decoder.frames_available(), 0);
        assert!(!decoder.buffered().is_empty());
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut decoder = StreamDecoder::new();
        let line = "L232> \r".repeat(200);

        for _ in 0..20 {
            decoder.feed(line.as_bytes());
        }
        assert!(decoder.buffered().len() <= MAX_DECODE_BUFFER);

        // A frame in progress survives trimming
        decoder.feed(b"DL, [01:02], 4");
        decoder.feed(line.as_bytes());
        assert_eq!(levels(&mut decoder), vec!["4"]);
    }

    #[test]
    fn test_oversized_line_is_dropped() {
        let mut decoder = StreamDecoder::new();
        decoder.feed("x".repeat(MAX_DECODE_BUFFER + 10).as_bytes());
        assert!(decoder.buffered().is_empty());
    }

    #[test]
    fn test_grammars_emit_in_stream_order() {
        let short_form = FrameGrammar::new(FrameKind::DimLevel, r"LV=(\d+)", r"\D").unwrap();
        let mut decoder =
            StreamDecoder::with_grammars(vec![short_form, FrameGrammar::dim_level()]);

        decoder.feed(b"DL, [01:02], 5\rLV=3\rDL, [01:02], 6\rLV=4\r");

        let fields: Vec<_> = decoder.drain_frames().map(|f| f.fields).collect();
        assert_eq!(
            fields,
            vec![
                vec!["01:02".to_string(), "5".to_string()],
                vec!["3".to_string()],
                vec!["01:02".to_string(), "6".to_string()],
                vec!["4".to_string()],
            ]
        );
    }

    #[test]
    fn test_register_grammar_replaces_same_kind() {
        let mut decoder = StreamDecoder::new();
        decoder.register_grammar(
            FrameGrammar::new(FrameKind::DimLevel, r"LEVEL (\d+)", r"\D").unwrap(),
        );
        assert_eq!(decoder.kinds().count(), 1);

        decoder.feed(FRAME_50);
        assert_eq!(decoder.frames_available(), 0);

        decoder.feed(b"LEVEL 12\r");
        assert_eq!(decoder.next_frame().unwrap().fields, vec!["12"]);
    }

    #[test]
    fn test_clear() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(FRAME_50);
        decoder.feed(b"DL, [01");
        decoder.clear();

        assert_eq!(decoder.frames_available(), 0);
        assert_eq!(decoder.decode_count(), 0);
        assert!(decoder.buffered().is_empty());
    }
}
