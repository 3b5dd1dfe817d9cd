use crate::bmap::{BlockRange, Span};

/// Contiguous run of blocks inside one span of one range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub start: u64,
    /// Inclusive.
    pub end: u64,
    pub len: u64,
}

/// Lazily splits a range into batches of at most `max_blocks` blocks.
///
/// Spans are walked in order and each span is split on its own, so a batch
/// never straddles the hole between two spans. Every batch except the last
/// of a span is exactly `max_blocks` long.
#[derive(Debug, Clone)]
pub struct Batches<'a> {
    spans: &'a [Span],
    next: u64,
    max_blocks: u64,
}

impl<'a> Batches<'a> {
    pub fn new(range: &'a BlockRange, max_blocks: u64) -> Self {
        let spans = range.spans();
        Self {
            spans,
            next: spans.first().map_or(0, |s| s.first),
            max_blocks: max_blocks.max(1),
        }
    }
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let span = *self.spans.first()?;
        let start = self.next;
        let len = (span.last - start + 1).min(self.max_blocks);
        let end = start + len - 1;
        if end == span.last {
            self.spans = &self.spans[1..];
            self.next = self.spans.first().map_or(0, |s| s.first);
        } else {
            self.next = end + 1;
        }
        Some(Batch { start, end, len })
    }
}
