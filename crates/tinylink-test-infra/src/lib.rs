//! Disposable database servers for integration tests.

mod error;
pub mod mysql;
pub mod postgres;

pub use error::{Result, TestInfraError};
