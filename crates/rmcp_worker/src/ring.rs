//! Bounded stderr capture.

use std::collections::VecDeque;

/// Ring buffer retaining the last `cap` bytes written.
///
/// Memory is O(cap) regardless of how much the worker prints.
#[derive(Debug)]
pub(crate) struct RingBuffer {
    buf: VecDeque<u8>,
    cap: usize,
}

impl RingBuffer {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(cap.min(8192)),
            cap: cap.max(1),
        }
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.buf.len() == self.cap {
                self.buf.pop_front();
            }
            self.buf.push_back(b);
        }
    }

    /// The retained tail as lossy UTF-8.
    pub(crate) fn tail(&self) -> String {
        let bytes: Vec<u8> = self.buf.iter().copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
