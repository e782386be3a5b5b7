use crate::marker::UnitType;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A value handed to the builder can't be represented in the encoding.
    #[error("Value out of range: {0}")]
    OutOfRange(String),
    /// A code point outside of the 21-bit unicode range, or a surrogate.
    #[error("Invalid unicode code point 0x{0:x}")]
    InvalidCodePoint(u32),
    /// Tried to finalize a feature while nothing was written into the builder.
    #[error("Nothing was written into the builder")]
    EmptyBuffer,
    /// `end_struct` was called with a mark that doesn't belong to an open structure.
    #[error("Unbalanced structure: {0}")]
    UnbalancedStruct(String),
    /// The unit at the current position isn't of the type the caller required.
    #[error("Expected {expected}, but found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: UnitType,
    },
    /// The buffer ended before the unit did.
    #[error("Expected data length {expected}, but got {actual} on step [{step}]")]
    LengthTooShort {
        step: &'static str,
        actual: usize,
        expected: usize,
    },
    /// Basic encoding failure, such as a reserved lead-in byte.
    #[error("Basic JBON encoding failure: {0}")]
    BadEncode(String),
    /// Nesting or size limit was hit while decoding.
    #[error("Hit parsing limit: {0}")]
    ParseLimit(String),
    /// A reference was found, but no dictionary of that kind is attached.
    #[error("Found a {0} reference, but no {0} dictionary is available")]
    MissingDictionary(&'static str),
    /// A reference points past the end of its dictionary.
    #[error("Reference {index} not found in the {dictionary} dictionary")]
    BadReference {
        dictionary: &'static str,
        index: usize,
    },
    /// A record refers to a global dictionary the manager doesn't know.
    #[error("Unknown global dictionary '{0}'")]
    UnknownDictionary(String),
}

impl Error {
    pub(crate) fn too_short(step: &'static str, actual: usize, expected: usize) -> Self {
        Error::LengthTooShort {
            step,
            actual,
            expected,
        }
    }
}
