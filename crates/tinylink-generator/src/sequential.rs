use crate::Generator;
use std::sync::atomic::{AtomicU64, Ordering};
use tinylink_core::ShortCode;

/// Deterministic generator producing `prefix` followed by a zero-padded counter,
/// e.g. `seq000000`, `seq000001`.
///
/// Every code it emits is distinct, so it is handy for seeding a pool in
/// tests or for reproducing an allocation order.
#[derive(Debug)]
pub struct SequentialGenerator {
    prefix: String,
    width: usize,
    counter: AtomicU64,
}

impl SequentialGenerator {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::with_offset(prefix, 0)
    }

    /// Starts counting from `offset` instead of zero.
    pub fn with_offset(prefix: impl Into<String>, offset: u64) -> Self {
        Self {
            prefix: prefix.into(),
            width: 6,
            counter: AtomicU64::new(offset),
        }
    }

    /// Number of digits the counter is padded to.
    pub fn width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }
}

impl Generator for SequentialGenerator {
    fn generate(&self) -> ShortCode {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        ShortCode::new_unchecked(format!("{}{:0width$}", self.prefix, count, width = self.width))
    }
}
