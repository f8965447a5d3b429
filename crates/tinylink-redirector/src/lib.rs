//! Redirect resolution with request batching.
//!
//! Concurrent redirect lookups are collected by a [`RedirectBatcher`] and
//! resolved with one multi-key read per batch. A batch is flushed when it
//! reaches `batch_size` requests or when its oldest request has waited
//! `max_wait`, whichever comes first.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tinylink_core::ShortCode;
//! use tinylink_redirector::{BatcherSettings, RedirectorService};
//! use tinylink_storage::InMemoryRepository;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repository = Arc::new(InMemoryRepository::new());
//! let service = RedirectorService::new(repository, BatcherSettings::default());
//!
//! let code = ShortCode::new("abc123")?;
//! if let Some(record) = service.resolve(&code).await? {
//!     println!("Redirect to: {}", record.original_url);
//! }
//! # Ok(())
//! # }
//! ```

pub mod batcher;
pub mod error;
pub mod redirector;
pub mod service;

pub use batcher::{BatcherSettings, BatcherStats, PendingResolution, QueueState, RedirectBatcher};
pub use error::{RedirectorError, Result};
pub use redirector::Redirector;
pub use service::RedirectorService;
