pub mod error;
pub mod memory;
pub mod mysql;
pub mod postgres;

pub use error::{Result, StorageError};
pub use memory::{InMemoryCodePool, InMemoryRepository};
pub use mysql::{MySqlCodePool, MySqlRepository};
pub use postgres::{PostgresCodePool, PostgresRepository};
