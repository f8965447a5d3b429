use crate::{Alphabet, Generator};
use rand::Rng;
use thiserror::Error;
use tinylink_core::shortcode::{MAX_LENGTH, MIN_LENGTH};
use tinylink_core::ShortCode;

pub const DEFAULT_CODE_LENGTH: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("code length must be between {min} and {max}, got {length}")]
pub struct InvalidLength {
    pub length: usize,
    pub min: usize,
    pub max: usize,
}

/// Uniformly random fixed-length codes over an [`Alphabet`].
///
/// Collisions are expected and cheap: the pool ignores duplicates on insert,
/// so the generator never checks storage.
#[derive(Debug, Clone)]
pub struct RandomGenerator {
    alphabet: Alphabet,
    length: usize,
}

impl RandomGenerator {
    pub fn new(alphabet: Alphabet, length: usize) -> Result<Self, InvalidLength> {
        if !(MIN_LENGTH..=MAX_LENGTH).contains(&length) {
            return Err(InvalidLength {
                length,
                min: MIN_LENGTH,
                max: MAX_LENGTH,
            });
        }
        Ok(Self { alphabet, length })
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn length(&self) -> usize {
        self.length
    }

    fn generate_with<R: Rng + ?Sized>(&self, rng: &mut R) -> ShortCode {
        let chars = self.alphabet.chars();
        let code: String = (0..self.length)
            .map(|_| chars[rng.gen_range(0..chars.len())])
            .collect();
        ShortCode::new_unchecked(code)
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        Self {
            alphabet: Alphabet::base62(),
            length: DEFAULT_CODE_LENGTH,
        }
    }
}

impl Generator for RandomGenerator {
    fn generate(&self) -> ShortCode {
        self.generate_with(&mut rand::thread_rng())
    }

    fn generate_batch(&self, count: usize) -> Vec<ShortCode> {
        let mut rng = rand::thread_rng();
        (0..count).map(|_| self.generate_with(&mut rng)).collect()
    }
}
