//! `std::io` access to a `SparseFile`, so ordinary readers and writers can
//! drive it.
//!
//! The inherent `read`, `seek` and `write` methods shadow the trait methods of
//! the same name; call the trait through `Read::read(&mut file, ..)` or use the
//! provided helpers such as `read_to_end`, `read_exact` and `write_all`.
//!
//! `io::Read` starts from wherever the cursor is, so position it with `open`
//! or a seek first.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::{
    error::EmulatorError,
    file::{Segment, SparseFile, Whence},
};

impl Read for SparseFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let start = self.position();
        let (copied, available) = match SparseFile::read(self)? {
            Some(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                (n, chunk.len())
            }
            None => return Ok(0),
        };

        // The chunk was only partly consumed; put the cursor right after what we took.
        if copied < available {
            SparseFile::seek(self, (start + copied as u64) as i64, Whence::Start)?;
        }
        Ok(copied)
    }
}

impl Seek for SparseFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (offset, whence) = match pos {
            SeekFrom::Start(offset) => {
                let offset = i64::try_from(offset).map_err(|_| EmulatorError::SeekOverflow)?;
                (offset, Whence::Start)
            }
            SeekFrom::Current(offset) => (offset, Whence::Current),
            SeekFrom::End(offset) => (offset, Whence::End),
        };
        Ok(SparseFile::seek(self, offset, whence)?)
    }
}

/// Every byte written through `io::Write` is kept as a literal block.
impl Write for SparseFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        SparseFile::write(self, Segment::Literal(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}
