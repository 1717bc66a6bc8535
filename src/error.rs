//! Error types returned by `WeakValueMap`.

use core::fmt;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InsertError {
    DuplicateKey,
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertError::DuplicateKey => f.write_str("an entry with the same key already exists"),
        }
    }
}

impl std::error::Error for InsertError {}

/// Key absent, or its value has already been dropped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KeyNotFound;

impl fmt::Display for KeyNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("key not present or its value was reclaimed")
    }
}

impl std::error::Error for KeyNotFound {}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CopyError {
    /// `available` slots remain after the offset but `required` live entries exist.
    BufferTooSmall { required: usize, available: usize },
}

impl fmt::Display for CopyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyError::BufferTooSmall {
                required,
                available,
            } => write!(
                f,
                "destination too small: {} entries to copy, {} slots available",
                required, available
            ),
        }
    }
}

impl std::error::Error for CopyError {}
