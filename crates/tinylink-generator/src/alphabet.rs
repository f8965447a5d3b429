use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// Characters used by the original bucket generator.
pub const BASE62: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlphabetError {
    #[error("alphabet must contain at least two characters")]
    TooSmall,
    #[error("alphabet character '{0}' is not allowed in a short code")]
    InvalidCharacter(char),
    #[error("alphabet contains '{0}' more than once")]
    Duplicate(char),
}

/// The character set codes are drawn from.
///
/// Every character must be valid inside a [`ShortCode`](tinylink_core::ShortCode),
/// and appear only once so that each character is equally likely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    chars: Vec<char>,
}

impl Alphabet {
    pub fn new(chars: &str) -> Result<Self, AlphabetError> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(chars.len());

        for c in chars.chars() {
            if !(c.is_ascii_alphanumeric() || c == '-' || c == '_') {
                return Err(AlphabetError::InvalidCharacter(c));
            }
            if !seen.insert(c) {
                return Err(AlphabetError::Duplicate(c));
            }
            out.push(c);
        }

        if out.len() < 2 {
            return Err(AlphabetError::TooSmall);
        }

        Ok(Self { chars: out })
    }

    pub fn base62() -> Self {
        Self {
            chars: BASE62.chars().collect(),
        }
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Number of distinct codes of `length` characters, saturating at `u128::MAX`.
    pub fn keyspace(&self, length: usize) -> u128 {
        let base = self.chars.len() as u128;
        (0..length).fold(1u128, |acc, _| acc.saturating_mul(base))
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::base62()
    }
}

impl FromStr for Alphabet {
    type Err = AlphabetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Display for Alphabet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.chars.iter().try_for_each(|c| write!(f, "{c}"))
    }
}
