pub mod alphabet;
pub mod random;
pub mod sequential;

pub use alphabet::{Alphabet, AlphabetError};
pub use random::{InvalidLength, RandomGenerator, DEFAULT_CODE_LENGTH};
pub use sequential::SequentialGenerator;

use tinylink_core::ShortCode;

/// Trait for generating short codes.
///
/// Implementations are pure generators that don't interact with storage.
/// Uniqueness is not their concern: the code pool drops duplicates when
/// the generated codes are inserted.
pub trait Generator: Send + Sync + 'static {
    /// Generates one candidate short code.
    fn generate(&self) -> ShortCode;

    /// Generates `count` candidate codes for one bulk insert.
    fn generate_batch(&self, count: usize) -> Vec<ShortCode> {
        (0..count).map(|_| self.generate()).collect()
    }
}
