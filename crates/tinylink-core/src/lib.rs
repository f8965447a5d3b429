//! Core types and traits for the tinylink URL shortener.
//!
//! This crate provides shared types and traits used by the shortener
//! (code allocation) side and the redirector (batched lookup) side.

pub mod error;
pub mod pool;
pub mod repository;
pub mod shortcode;
pub mod shortener;

pub use error::{CoreError, ShortenerError, StorageError};
pub use pool::{CodePool, PoolEntry, ReplenishOutcome};
pub use repository::{ClickRecorder, ReadRepository, Repository, UrlRecord};
pub use shortcode::ShortCode;
pub use shortener::{Shortened, Shortener};
