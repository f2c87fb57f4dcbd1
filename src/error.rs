use std::{fmt, io};

/// Errors that can occur when working with an emulated sparse file.
///
/// None of these are recoverable for the file that raised them: they mean the
/// caller misused the store or the store itself is in a state it should never
/// reach. They are returned rather than aborting so tests can assert on them.
#[derive(Debug, Clone, PartialEq)]
pub enum EmulatorError {
    /// A filler run was written before any literal block existed.
    FillerBeforeLiteral,
    /// A seek normalized to a position before the start of the stream.
    NegativeSeek(i64),
    /// A seek normalized to a position beyond the logical end.
    SeekPastEnd { target: u64, size: u64 },
    /// Normalizing the seek offset overflowed 64-bit arithmetic.
    SeekOverflow,
    /// The write would grow the logical size past `i64::MAX`.
    SizeOverflow,
    /// The read cursor reached a state no write/seek sequence can produce.
    InternalInconsistency(String),
    /// File was not found at the specified path.
    FileNotFound(String),
    /// The provided path is invalid (e.g., empty string).
    InvalidPath(String),
    /// A filler source could not be built.
    InvalidFiller(String),
}

impl fmt::Display for EmulatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulatorError::FillerBeforeLiteral => {
                write!(f, "Filler write before any literal block")
            }
            EmulatorError::NegativeSeek(target) => {
                write!(f, "Negative seek target: {target}")
            }
            EmulatorError::SeekPastEnd { target, size } => {
                write!(f, "Seek target {target} is past logical end {size}")
            }
            EmulatorError::SeekOverflow => {
                write!(f, "Seek offset overflows 64-bit position")
            }
            EmulatorError::SizeOverflow => {
                write!(f, "Write would overflow the logical size")
            }
            EmulatorError::InternalInconsistency(msg) => {
                write!(f, "Internal inconsistency: {msg}")
            }
            EmulatorError::FileNotFound(path) => {
                write!(f, "File not found: {path}")
            }
            EmulatorError::InvalidPath(path) => {
                write!(f, "Invalid path: {path}")
            }
            EmulatorError::InvalidFiller(msg) => {
                write!(f, "Invalid filler: {msg}")
            }
        }
    }
}

impl std::error::Error for EmulatorError {}

impl From<EmulatorError> for io::Error {
    fn from(err: EmulatorError) -> Self {
        let kind = match err {
            EmulatorError::NegativeSeek(_)
            | EmulatorError::SeekPastEnd { .. }
            | EmulatorError::SeekOverflow => io::ErrorKind::InvalidInput,
            EmulatorError::FileNotFound(_) => io::ErrorKind::NotFound,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
