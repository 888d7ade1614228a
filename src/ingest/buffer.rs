//! # Fragment Buffer
//!
//! Accumulates raw bytes and decides when they form a fragment. The clock is
//! passed in so every rule can be tested without sleeping.
//!
//! ## Flush Rules
//!
//! | Trigger | Behavior |
//! |---------|----------|
//! | `\n`, `\r` or `\r\n` | flush; `\r\n` counts as one line end |
//! | buffer starts with `##` and ends with `##` | flush (frame close) |
//! | no byte for `idle_timeout` | flush via [`FragmentBuffer::poll_idle`] |
//! | buffer reaches `max_len` bytes | flush |
//!
//! Fragments are decoded lossily as UTF-8 and trimmed; blank ones are
//! dropped.

use std::time::{Duration, Instant};

use crate::parser::matchers::FRAME_MARKER;

/// Default idle timeout before a partial fragment is flushed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(100);

/// Default upper bound on a single fragment.
pub const DEFAULT_MAX_FRAGMENT_LEN: usize = 1024;

#[derive(Debug)]
pub struct FragmentBuffer {
    pending: Vec<u8>,
    last_byte_at: Option<Instant>,
    /// The previous byte was `\r`; a following `\n` belongs to it
    after_cr: bool,
    idle_timeout: Duration,
    max_len: usize,
}

impl Default for FragmentBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_FRAGMENT_LEN)
    }
}

impl FragmentBuffer {
    pub fn new(idle_timeout: Duration, max_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            last_byte_at: None,
            after_cr: false,
            idle_timeout,
            max_len: max_len.max(FRAME_MARKER.len() * 2),
        }
    }

    /// Feed bytes received at `now`; returns the fragments they completed.
    pub fn push(&mut self, bytes: &[u8], now: Instant) -> Vec<String> {
        let mut fragments = Vec::new();

        for &byte in bytes {
            let after_cr = std::mem::replace(&mut self.after_cr, byte == b'\r');
            match byte {
                b'\n' if after_cr => {}
                b'\r' | b'\n' => fragments.extend(self.flush()),
                b' ' | b'\t' if self.pending.is_empty() => {}
                _ => {
                    self.pending.push(byte);
                    if self.frame_closed() || self.pending.len() >= self.max_len {
                        fragments.extend(self.flush());
                    }
                }
            }
        }

        if !bytes.is_empty() && !self.pending.is_empty() {
            self.last_byte_at = Some(now);
        }
        fragments
    }

    /// Flush if nothing has arrived for the idle timeout.
    pub fn poll_idle(&mut self, now: Instant) -> Option<String> {
        match self.last_byte_at {
            Some(last) if now.duration_since(last) >= self.idle_timeout => self.flush(),
            _ => None,
        }
    }

    /// Flush whatever has accumulated.
    pub fn flush(&mut self) -> Option<String> {
        self.last_byte_at = None;
        if self.pending.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&bytes);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn frame_closed(&self) -> bool {
        let marker = FRAME_MARKER.as_bytes();
        self.pending.len() >= marker.len() * 2
            && self.pending.starts_with(marker)
            && self.pending.ends_with(marker)
    }
}
