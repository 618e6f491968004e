//! Bounded, line-oriented buffer of styled console output.
//!
//! Lines carry monotonic sequence numbers so readers can poll for what was
//! appended since their last look, even after old lines have been evicted.

use std::collections::VecDeque;

use crate::ansi::StyledRun;

/// Default retention per buffer, in lines.
pub const DEFAULT_MAX_RETAINED_LINES: usize = 2000;

/// One line of output. The newest line stays open (`terminated == false`)
/// until a newline arrives for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferLine {
    pub seq: u64,
    pub runs: Vec<StyledRun>,
    pub terminated: bool,
}

impl BufferLine {
    fn open(seq: u64) -> Self {
        Self {
            seq,
            runs: Vec::new(),
            terminated: false,
        }
    }

    /// Line text without styling or the trailing newline.
    pub fn text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct TextBuffer {
    lines: VecDeque<BufferLine>,
    max_lines: usize,
    next_seq: u64,
}

impl TextBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            max_lines: max_lines.max(1),
            next_seq: 1,
        }
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    /// Change retention; trims immediately. Returns the number of lines evicted.
    pub fn set_max_lines(&mut self, max_lines: usize) -> usize {
        self.max_lines = max_lines.max(1);
        self.evict()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Append runs, splitting them at newlines, then evict the oldest lines
    /// beyond the retention limit. Returns the number of lines evicted.
    pub fn append<I>(&mut self, runs: I) -> usize
    where
        I: IntoIterator<Item = StyledRun>,
    {
        for run in runs {
            for piece in run.text.split_inclusive('\n') {
                let (content, ends_line) = match piece.strip_suffix('\n') {
                    Some(content) => (content, true),
                    None => (piece, false),
                };
                let line = self.open_line();
                if !content.is_empty() {
                    line.runs.push(StyledRun::new(run.style.clone(), content));
                }
                if ends_line {
                    line.terminated = true;
                }
            }
        }
        self.evict()
    }

    /// Whether the newest line is still waiting for its newline.
    pub fn has_open_line(&self) -> bool {
        self.lines.back().is_some_and(|line| !line.terminated)
    }

    /// Terminate the newest line if it is still open, so the next append
    /// starts a fresh line. Returns whether a line was closed.
    pub fn end_open_line(&mut self) -> bool {
        match self.lines.back_mut() {
            Some(line) if !line.terminated => {
                line.terminated = true;
                true
            }
            _ => false,
        }
    }

    fn open_line(&mut self) -> &mut BufferLine {
        let needs_new = self.lines.back().map_or(true, |line| line.terminated);
        if needs_new {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.lines.push_back(BufferLine::open(seq));
        }
        // A line was pushed above if the deque was empty.
        let last = self.lines.len() - 1;
        &mut self.lines[last]
    }

    fn evict(&mut self) -> usize {
        let excess = self.lines.len().saturating_sub(self.max_lines);
        self.lines.drain(..excess);
        excess
    }

    pub fn lines(&self) -> impl Iterator<Item = &BufferLine> {
        self.lines.iter()
    }

    /// Lines with `seq > since_seq`, plus the oldest retained seq when
    /// lines the caller never saw were already evicted.
    pub fn lines_since(&self, since_seq: u64) -> (Vec<BufferLine>, Option<u64>) {
        let gap = match self.lines.front() {
            Some(oldest) if since_seq + 1 < oldest.seq => Some(oldest.seq),
            _ => None,
        };
        let lines = self
            .lines
            .iter()
            .filter(|line| line.seq > since_seq)
            .cloned()
            .collect();
        (lines, gap)
    }

    /// Sequence number of the newest line, or 0 if nothing was ever appended.
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    /// Full contents as plain text.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.text());
            if line.terminated {
                out.push('\n');
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETAINED_LINES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ansi::{scan, StyleCache};

    fn push(buffer: &mut TextBuffer, cache: &mut StyleCache, text: &str) -> usize {
        buffer.append(scan(text, cache))
    }

    #[test]
    fn newlines_split_lines() {
        let mut cache = StyleCache::new();
        let mut buffer = TextBuffer::new(10);
        push(&mut buffer, &mut cache, "one\ntwo\nthr");
        assert_eq!(buffer.line_count(), 3);
        let texts: Vec<String> = buffer.lines().map(BufferLine::text).collect();
        assert_eq!(texts, vec!["one", "two", "thr"]);
        assert!(!buffer.lines().last().unwrap().terminated);
    }

    #[test]
    fn partial_line_is_continued_by_next_append() {
        let mut cache = StyleCache::new();
        let mut buffer = TextBuffer::new(10);
        push(&mut buffer, &mut cache, "hal");
        push(&mut buffer, &mut cache, "f\x1b[31mred\n");
        assert_eq!(buffer.line_count(), 1);
        let line = buffer.lines().next().unwrap();
        assert_eq!(line.text(), "halfred");
        assert_eq!(line.runs.len(), 3);
        assert_eq!(line.runs[2].style_key(), "31");
        assert!(line.terminated);
    }

    #[test]
    fn blank_lines_hold_no_runs() {
        let mut cache = StyleCache::new();
        let mut buffer = TextBuffer::new(10);
        push(&mut buffer, &mut cache, "a\n\nb\n");
        assert_eq!(buffer.line_count(), 3);
        assert!(buffer.lines().nth(1).unwrap().runs.is_empty());
        assert!(buffer
            .lines()
            .flat_map(|line| line.runs.iter())
            .all(|run| !run.text.is_empty()));
    }

    #[test]
    fn eviction_keeps_newest_lines_in_order() {
        let mut cache = StyleCache::new();
        let max = 5;
        let extra = 3;
        let mut buffer = TextBuffer::new(max);
        let mut evicted = 0;
        for i in 1..=max + extra {
            evicted += push(&mut buffer, &mut cache, &format!("line {i}\n"));
        }
        assert_eq!(evicted, extra);
        assert_eq!(buffer.line_count(), max);
        let texts: Vec<String> = buffer.lines().map(BufferLine::text).collect();
        let expected: Vec<String> = (extra + 1..=max + extra).map(|i| format!("line {i}")).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn shrinking_retention_trims_immediately() {
        let mut cache = StyleCache::new();
        let mut buffer = TextBuffer::new(10);
        push(&mut buffer, &mut cache, "a\nb\nc\nd\n");
        assert_eq!(buffer.set_max_lines(2), 2);
        assert_eq!(buffer.text(), "c\nd\n");
    }

    #[test]
    fn lines_since_reports_gap_after_eviction() {
        let mut cache = StyleCache::new();
        let mut buffer = TextBuffer::new(2);
        push(&mut buffer, &mut cache, "a\nb\nc\nd\n");
        let (lines, gap) = buffer.lines_since(0);
        assert_eq!(gap, Some(3));
        assert_eq!(lines.len(), 2);

        let (lines, gap) = buffer.lines_since(3);
        assert!(gap.is_none());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text(), "d");
    }

    #[test]
    fn ending_open_line_forces_fresh_line() {
        let mut cache = StyleCache::new();
        let mut buffer = TextBuffer::new(10);
        push(&mut buffer, &mut cache, "part");
        assert!(buffer.has_open_line());
        assert!(buffer.end_open_line());
        assert!(!buffer.has_open_line());
        assert!(!buffer.end_open_line());

        push(&mut buffer, &mut cache, "next\n");
        let texts: Vec<String> = buffer.lines().map(BufferLine::text).collect();
        assert_eq!(texts, vec!["part", "next"]);
    }

    #[test]
    fn seq_survives_clear() {
        let mut cache = StyleCache::new();
        let mut buffer = TextBuffer::new(10);
        push(&mut buffer, &mut cache, "a\nb\n");
        buffer.clear();
        assert!(buffer.is_empty());
        push(&mut buffer, &mut cache, "c\n");
        assert_eq!(buffer.last_seq(), 3);
    }

    #[test]
    fn zero_retention_is_clamped_to_one_line() {
        let buffer = TextBuffer::new(0);
        assert_eq!(buffer.max_lines(), 1);
    }
}
