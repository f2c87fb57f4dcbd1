use std::sync::Arc;

use lazy_static::lazy_static;

use crate::{Result, error::EmulatorError};

/// Size of the default filler buffer, and so the largest chunk a gap read returns.
pub const DEFAULT_FILLER_SIZE: usize = 1024 * 1024;

/// Byte pattern the default filler buffer is made of.
pub const DEFAULT_FILLER_BYTE: u8 = 0xAA;

lazy_static! {
    static ref DEFAULT_FILLER: Arc<Filler> = Arc::new(Filler {
        data: vec![DEFAULT_FILLER_BYTE; DEFAULT_FILLER_SIZE].into_boxed_slice(),
    });
}

/// Immutable buffer of repeated bytes handed out for every position inside a gap.
#[derive(Debug, PartialEq)]
pub struct Filler {
    data: Box<[u8]>,
}

impl Filler {
    /// Builds a filler of `size` copies of `byte`.
    ///
    /// # Errors
    ///
    /// Returns `EmulatorError::InvalidFiller` if `size` is zero, since a gap
    /// could then never be delivered.
    pub fn new(size: usize, byte: u8) -> Result<Self> {
        if size == 0 {
            return Err(EmulatorError::InvalidFiller("Filler size cannot be zero".to_string()));
        }
        Ok(Self { data: vec![byte; size].into_boxed_slice() })
    }

    /// The process-wide filler shared by every file built with `SparseFile::new`.
    pub fn shared() -> Arc<Filler> { Arc::clone(&DEFAULT_FILLER) }

    pub fn len(&self) -> usize { self.data.len() }

    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    /// Returns the first `len` bytes. `len` must not exceed `self.len()`.
    pub(crate) fn view(&self, len: usize) -> &[u8] { &self.data[..len] }

    pub fn as_slice(&self) -> &[u8] { &self.data }
}
