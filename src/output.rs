//! Output buffering for supervised services.
//!
//! Every service owns one `OutputBuffer`. Lines are appended whole, tagged
//! with where they came from, and numbered with a sequence that keeps
//! growing for the lifetime of the service. The buffer itself is bounded: once
//! it holds `max_lines` entries the oldest are evicted, but sequence numbers are
//! never reused, so incremental readers can detect the gap.

use std::collections::VecDeque;

use strip_ansi_escapes::strip;

/// Default number of lines kept per service.
pub const DEFAULT_MAX_LINES: usize = 5000;

/// Indicates where a buffered line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    /// Standard output of the service process.
    Stdout,
    /// Standard error of the service process.
    Stderr,
    /// Output of a one-shot stop command.
    StopCommand,
    /// Diagnostics and notes emitted by the supervisor itself.
    Supervisor,
}

/// A single buffered line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Position of this line in the service's output history.
    pub seq: u64,
    /// The line content without its trailing newline.
    pub text: String,
    /// Stream or component that produced the line.
    pub source: OutputSource,
}

/// A fixed-capacity ring buffer of `OutputLine`s.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    max_lines: usize,
    lines: VecDeque<OutputLine>,
    next_seq: u64,
    evicted: u64,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES)
    }
}

impl OutputBuffer {
    /// Creates a new buffer; a capacity of zero is raised to one.
    pub fn new(max_lines: usize) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            max_lines,
            lines: VecDeque::with_capacity(max_lines.min(1024)),
            next_seq: 0,
            evicted: 0,
        }
    }

    /// Appends one line.
    ///
    /// Returns `true` if an old line was dropped to make room.
    pub fn push(&mut self, text: impl Into<String>, source: OutputSource) -> bool {
        let mut dropped = false;
        self.lines.push_back(OutputLine {
            seq: self.next_seq,
            text: text.into(),
            source,
        });
        self.next_seq += 1;
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
            self.evicted += 1;
            dropped = true;
        }
        dropped
    }

    /// Appends a block of text, one entry per line.
    pub fn push_text(&mut self, text: &str, source: OutputSource) {
        for line in text.lines() {
            self.push(line, source);
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    /// Sequence number the next appended line will receive.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Number of lines evicted since the buffer was created.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputLine> {
        self.lines.iter()
    }

    /// Returns the retained lines with `seq >= since`.
    pub fn since(&self, since: u64) -> Vec<OutputLine> {
        let first = self.lines.front().map(|line| line.seq).unwrap_or(self.next_seq);
        let skip = since.saturating_sub(first).min(self.lines.len() as u64) as usize;
        self.lines.iter().skip(skip).cloned().collect()
    }

    /// Returns the retained output as newline-terminated text.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for line in &self.lines {
            text.push_str(&line.text);
            text.push('\n');
        }
        text
    }
}

/// Sanitizes text for display, optionally stripping ANSI escape codes.
///
/// If `strip_ansi` is true, ANSI codes are removed. Invalid UTF-8 sequences are replaced.
pub fn sanitize_text(text: &str, strip_ansi: bool) -> String {
    if !strip_ansi {
        return text.to_string();
    }
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}

/// Decodes a raw line read from a child stream.
pub(crate) fn decode_line(mut bytes: &[u8]) -> String {
    if let Some(stripped) = bytes.strip_suffix(b"\n") {
        bytes = stripped;
    }
    if let Some(stripped) = bytes.strip_suffix(b"\r") {
        bytes = stripped;
    }
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_drops_oldest() {
        let mut buffer = OutputBuffer::new(2);
        buffer.push("a", OutputSource::Stdout);
        buffer.push("b", OutputSource::Stderr);
        let dropped = buffer.push("c", OutputSource::Stdout);
        assert!(dropped);
        let lines = buffer.iter().map(|l| l.text.clone()).collect::<Vec<_>>();
        assert_eq!(lines, vec!["b", "c"]);
        assert_eq!(buffer.evicted(), 1);
        assert_eq!(buffer.next_seq(), 3);
    }

    #[test]
    fn since_returns_only_new_lines() {
        let mut buffer = OutputBuffer::new(10);
        buffer.push_text("one\ntwo\nthree\n", OutputSource::Stdout);
        let seqs = buffer.since(1).iter().map(|l| l.seq).collect::<Vec<_>>();
        assert_eq!(seqs, vec![1, 2]);
        assert!(buffer.since(3).is_empty());
        assert!(buffer.since(99).is_empty());
    }

    #[test]
    fn since_skips_evicted_gap() {
        let mut buffer = OutputBuffer::new(2);
        for n in 0..5 {
            buffer.push(n.to_string(), OutputSource::Stdout);
        }
        let texts = buffer.since(0).into_iter().map(|l| l.text).collect::<Vec<_>>();
        assert_eq!(texts, vec!["3", "4"]);
    }

    #[test]
    fn text_is_newline_terminated() {
        let mut buffer = OutputBuffer::new(0);
        assert_eq!(buffer.max_lines(), 1);
        assert_eq!(buffer.text(), "");
        buffer.push("only", OutputSource::Supervisor);
        assert_eq!(buffer.text(), "only\n");
    }

    #[test]
    fn decode_strips_line_endings() {
        assert_eq!(decode_line(b"hello\r\n"), "hello");
        assert_eq!(decode_line(b"tail"), "tail");
        assert_eq!(decode_line(b"bad \xff byte\n"), "bad \u{fffd} byte");
    }

    #[test]
    fn sanitize_strips_ansi_when_asked() {
        assert_eq!(sanitize_text("\x1b[31mred\x1b[0m", true), "red");
        assert_eq!(sanitize_text("\x1b[31mred\x1b[0m", false), "\x1b[31mred\x1b[0m");
    }
}
