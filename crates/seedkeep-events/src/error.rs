//! Identifier parsing error primitives.

use std::fmt::{self, Display, Formatter};

/// Error emitted when a string cannot be parsed into an info hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoHashError {
    /// Input did not have the expected number of characters.
    InvalidLength {
        /// Number of characters supplied.
        length: usize,
    },
    /// Input contained a non hexadecimal character.
    InvalidCharacter {
        /// Offending character.
        character: char,
    },
}

impl Display for InfoHashError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("invalid info hash")
    }
}

impl std::error::Error for InfoHashError {}
