//! URL shortener service implementation.
//!
//! This crate owns the write path: the [`CodeAllocator`] that hands out
//! pre-generated codes from a [`CodePool`](tinylink_core::CodePool), the
//! background [`Replenisher`] that keeps the pool topped up, and the
//! [`ShortenerService`] that ties allocation to the mapping store.

pub mod allocator;
pub mod replenisher;
pub mod service;

pub use allocator::{AllocatorSettings, CodeAllocator};
pub use replenisher::{Replenisher, ReplenisherSettings};
pub use service::ShortenerService;
pub use tinylink_core::{ReplenishOutcome, ShortenerError};
