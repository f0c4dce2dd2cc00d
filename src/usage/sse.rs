use super::{TokenUsage, UsageFormat};

const MAX_CARRY_BYTES: usize = 16 * 1024 * 1024;

/// Incremental SSE framing for usage snooping.
///
/// Bytes are pushed as they arrive from upstream. Complete event blocks
/// (terminated by a blank line) are handed to the format's event parser; the
/// unterminated tail is carried over and prefixed onto the next push, so an
/// event split across reads is seen exactly once.
pub struct SseUsageTracker {
    format: UsageFormat,
    carry: Vec<u8>,
    usage: Option<TokenUsage>,
    usage_events: usize,
    overflowed: bool,
}

impl SseUsageTracker {
    pub fn new(format: UsageFormat) -> Self {
        Self {
            format,
            carry: Vec::new(),
            usage: None,
            usage_events: 0,
            overflowed: false,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.carry.extend_from_slice(bytes);

        while let Some((end, delim)) = find_event_boundary(&self.carry) {
            let block: Vec<u8> = self.carry.drain(..end + delim).take(end).collect();
            self.on_block(&block);
        }

        if self.carry.len() > MAX_CARRY_BYTES {
            if !self.overflowed {
                tracing::warn!(
                    format = self.format.as_str(),
                    carry_bytes = self.carry.len(),
                    "sse event exceeds carry buffer; dropping it"
                );
            }
            self.overflowed = true;
            self.carry.clear();
        }
    }

    /// Flushes a trailing block that upstream never terminated and returns
    /// the accumulated usage.
    pub fn finish(&mut self) -> Option<TokenUsage> {
        if !self.carry.is_empty() {
            let block = std::mem::take(&mut self.carry);
            self.on_block(&block);
        }
        self.usage
    }

    /// Usage merged from the events seen so far, without flushing the tail.
    pub fn usage(&self) -> Option<TokenUsage> {
        self.usage
    }

    /// Number of event blocks that carried usage so far.
    pub fn usage_events(&self) -> usize {
        self.usage_events
    }

    /// Whether an event was dropped for exceeding the carry buffer.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    fn on_block(&mut self, block: &[u8]) {
        let text = String::from_utf8_lossy(block);
        let Some(found) = self.format.from_event(&text) else {
            return;
        };
        self.usage_events += 1;
        match self.usage.as_mut() {
            Some(u) => u.merge(found),
            None => self.usage = Some(found),
        }
    }
}

/// Position of the first blank-line terminator and its length.
fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = find(buf, b"\n\n").map(|i| (i, 2));
    let crlf = find(buf, b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
