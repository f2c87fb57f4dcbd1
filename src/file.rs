use std::sync::Arc;

use log::{debug, error, trace};

use crate::{Result, error::EmulatorError, filler::Filler};

/// One write handed to a `SparseFile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Bytes that are retained and reproduced verbatim on read.
    Literal(&'a [u8]),
    /// A run of filler bytes, recorded only as a length.
    Filler(u64),
}

impl Segment<'_> {
    pub fn len(&self) -> u64 {
        match self {
            Segment::Literal(bytes) => bytes.len() as u64,
            Segment::Filler(len) => *len,
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Reference point for `SparseFile::seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// A literal payload and the gap of filler that follows it.
#[derive(Debug)]
struct Block {
    payload: Box<[u8]>,
    gap: u64,
}

/// Read-side position. `block` is `None` before the first open and once the
/// stream is exhausted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Cursor {
    /// Set by `open` and `seek`; an unset cursor stays at end of stream.
    opened: bool,
    block: Option<usize>,
    position: u64,
    /// Offset of the next undelivered payload byte in the current block.
    literal: Option<usize>,
    gap_remaining: u64,
}

/// Append-only byte stream where runs of filler cost no storage.
///
/// The logical stream is every block's payload followed by its gap, in order.
/// Writes only ever extend the end; reads go through a single cursor that is
/// positioned by `open` or `seek`.
///
/// # Examples
///
/// ```rust
/// use sparsefs::{SparseFile, Whence};
///
/// let mut file = SparseFile::new();
/// file.write_literal(b"header").unwrap();
/// file.write_filler(4 * 1024 * 1024 * 1024).unwrap();
/// file.write_literal(b"trailer").unwrap();
///
/// file.seek(-7, Whence::End).unwrap();
/// assert_eq!(file.read().unwrap(), Some(&b"trailer"[..]));
/// assert_eq!(file.read().unwrap(), None);
/// ```
#[derive(Debug)]
pub struct SparseFile {
    filler: Arc<Filler>,
    blocks: Vec<Block>,
    size: u64,
    cursor: Cursor,
}

impl SparseFile {
    /// Creates an empty file backed by the process-wide filler.
    pub fn new() -> Self { Self::with_filler(Filler::shared()) }

    /// Creates an empty file whose gaps are delivered from `filler`.
    pub fn with_filler(filler: Arc<Filler>) -> Self {
        Self {
            filler,
            blocks: Vec::new(),
            size: 0,
            cursor: Cursor::default(),
        }
    }

    /// Appends `segment` to the end of the stream and returns its length.
    ///
    /// A literal segment is copied into a new block. A filler segment only
    /// extends the gap of the last block, so its cost does not depend on its
    /// length. Empty literals are ignored.
    ///
    /// Writes are visible to a read pass already in progress: a cursor in
    /// the last block's gap or at end of stream picks up the appended bytes.
    ///
    /// # Errors
    ///
    /// Returns `EmulatorError::FillerBeforeLiteral` if filler is written before
    /// any literal block exists.
    /// Returns `EmulatorError::SizeOverflow` if the logical size would exceed
    /// `i64::MAX`.
    pub fn write(&mut self, segment: Segment<'_>) -> Result<u64> {
        let len = segment.len();
        let new_size = self
            .size
            .checked_add(len)
            .filter(|&size| size <= i64::MAX as u64)
            .ok_or_else(|| {
                error!("write of {len} bytes overflows logical size {}", self.size);
                EmulatorError::SizeOverflow
            })?;

        match segment {
            Segment::Filler(len) => {
                let tail_index = self.blocks.len().wrapping_sub(1);
                let Some(tail) = self.blocks.last_mut() else {
                    error!("filler write of {len} bytes on a file with no literal block");
                    return Err(EmulatorError::FillerBeforeLiteral);
                };
                tail.gap += len;
                debug!("extended gap of block {tail_index} to {}", tail.gap);

                if self.cursor.block == Some(tail_index) {
                    self.cursor.gap_remaining += len;
                } else if self.at_end_of_pass() && len > 0 {
                    self.cursor.block = Some(tail_index);
                    self.cursor.literal = None;
                    self.cursor.gap_remaining = len;
                }
            }
            Segment::Literal(bytes) => {
                if bytes.is_empty() {
                    return Ok(0);
                }
                self.blocks.push(Block { payload: bytes.into(), gap: 0 });
                let index = self.blocks.len() - 1;
                debug!(
                    "appended block {index} with {} literal bytes at offset {}",
                    bytes.len(),
                    self.size
                );

                if self.at_end_of_pass() {
                    self.enter_block(index);
                }
            }
        }

        self.size = new_size;
        Ok(len)
    }

    pub fn write_literal(&mut self, bytes: &[u8]) -> Result<u64> {
        self.write(Segment::Literal(bytes))
    }

    pub fn write_filler(&mut self, len: u64) -> Result<u64> {
        self.write(Segment::Filler(len))
    }

    /// Positions the read cursor at the start of the stream.
    ///
    /// Calling it again starts a fresh pass and abandons the previous one.
    pub fn open(&mut self) {
        self.cursor.opened = true;
        self.cursor.position = 0;
        self.enter_block(0);
        debug!("opened file of {} bytes in {} blocks", self.size, self.blocks.len());
    }

    /// Returns the next chunk of the stream, or `None` at end of stream.
    ///
    /// A literal payload is returned whole. A gap is returned in pieces of at
    /// most one filler buffer. Chunks are never empty.
    ///
    /// # Errors
    ///
    /// Returns `EmulatorError::InternalInconsistency` if the cursor points at
    /// a block with nothing left to deliver after advancing.
    pub fn read(&mut self) -> Result<Option<&[u8]>> {
        while let Some(index) = self.cursor.block {
            if self.cursor.literal.is_some() || self.cursor.gap_remaining > 0 {
                break;
            }
            self.enter_block(index + 1);
        }

        let Some(index) = self.cursor.block else {
            return Ok(None);
        };

        if let Some(start) = self.cursor.literal.take() {
            let len = self.blocks[index].payload.len() - start;
            trace!("literal chunk of {len} bytes at {}", self.cursor.position);
            self.cursor.position += len as u64;
            return Ok(Some(&self.blocks[index].payload[start..]));
        }

        let chunk = self.filler.len() as u64;
        if self.cursor.gap_remaining > chunk {
            trace!("filler chunk of {chunk} bytes at {}", self.cursor.position);
            self.cursor.gap_remaining -= chunk;
            self.cursor.position += chunk;
            return Ok(Some(self.filler.as_slice()));
        }

        if self.cursor.gap_remaining > 0 {
            // Fits in usize: bounded by the filler length.
            let len = self.cursor.gap_remaining as usize;
            trace!("final filler chunk of {len} bytes at {}", self.cursor.position);
            self.cursor.gap_remaining = 0;
            self.cursor.position += len as u64;
            self.enter_block(index + 1);
            return Ok(Some(self.filler.view(len)));
        }

        error!("read cursor stuck on block {index} at {}", self.cursor.position);
        Err(EmulatorError::InternalInconsistency(format!(
            "block {index} has nothing to deliver at position {}",
            self.cursor.position
        )))
    }

    /// Moves the read cursor and returns the new absolute position.
    ///
    /// The target may be anywhere in `[0, len()]`; landing exactly on `len()`
    /// leaves the cursor at end of stream. A failed seek leaves the cursor
    /// where it was.
    ///
    /// # Errors
    ///
    /// Returns `EmulatorError::NegativeSeek` if the target is before the start.
    /// Returns `EmulatorError::SeekPastEnd` if the target is beyond `len()`.
    /// Returns `EmulatorError::SeekOverflow` if the target cannot be computed.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => self.cursor.position,
            Whence::End => self.size,
        };
        // Positions never exceed the logical size, which stays within i64.
        let target = (base as i64).checked_add(offset).ok_or_else(|| {
            error!("seek by {offset} from {base} overflows");
            EmulatorError::SeekOverflow
        })?;
        if target < 0 {
            error!("negative seek to {target}");
            return Err(EmulatorError::NegativeSeek(target));
        }
        let target = target as u64;
        if target > self.size {
            error!("seek to {target} past logical end {}", self.size);
            return Err(EmulatorError::SeekPastEnd { target, size: self.size });
        }

        self.cursor.opened = true;
        self.cursor.position = target;

        let mut start = 0;
        for (index, block) in self.blocks.iter().enumerate() {
            let payload_end = start + block.payload.len() as u64;
            if target < payload_end {
                self.cursor.block = Some(index);
                self.cursor.literal = Some((target - start) as usize);
                self.cursor.gap_remaining = block.gap;
                debug!("seek to {target}: block {index} payload");
                return Ok(target);
            }

            let gap_end = payload_end + block.gap;
            if target < gap_end {
                self.cursor.block = Some(index);
                self.cursor.literal = None;
                self.cursor.gap_remaining = gap_end - target;
                debug!("seek to {target}: block {index} gap, {} remaining", gap_end - target);
                return Ok(target);
            }
            start = gap_end;
        }

        self.enter_block(self.blocks.len());
        debug!("seek to end of stream at {target}");
        Ok(target)
    }

    /// Seeks forward (or backward, if negative) by `amount` from the current
    /// position and returns the distance actually moved.
    pub fn skip(&mut self, amount: i64) -> Result<i64> {
        let before = self.cursor.position;
        let after = self.seek(amount, Whence::Current)?;
        Ok(after as i64 - before as i64)
    }

    /// Logical length of the stream.
    pub fn len(&self) -> u64 { self.size }

    pub fn is_empty(&self) -> bool { self.size == 0 }

    /// Logical offset of the next byte `read` will deliver.
    pub fn position(&self) -> u64 { self.cursor.position }

    pub fn block_count(&self) -> usize { self.blocks.len() }

    /// Bytes of literal payload actually held in memory.
    pub fn retained_bytes(&self) -> usize {
        self.blocks.iter().map(|block| block.payload.len()).sum()
    }

    /// Undelivered payload of the block under the cursor.
    pub fn pending_literal(&self) -> &[u8] {
        match (self.cursor.block, self.cursor.literal) {
            (Some(index), Some(start)) => &self.blocks[index].payload[start..],
            _ => &[],
        }
    }

    /// Undelivered filler bytes before the next block.
    pub fn pending_gap(&self) -> u64 { self.cursor.gap_remaining }

    pub fn filler(&self) -> &Filler { &self.filler }

    /// True when a pass has delivered everything written so far.
    fn at_end_of_pass(&self) -> bool {
        self.cursor.opened && self.cursor.block.is_none() && self.cursor.position == self.size
    }

    /// Points the cursor at the start of block `index`, or at end of stream
    /// if there is no such block.
    fn enter_block(&mut self, index: usize) {
        match self.blocks.get(index) {
            Some(block) => {
                self.cursor.block = Some(index);
                self.cursor.literal = (!block.payload.is_empty()).then_some(0);
                self.cursor.gap_remaining = block.gap;
            }
            None => {
                self.cursor.block = None;
                self.cursor.literal = None;
                self.cursor.gap_remaining = 0;
            }
        }
    }
}

impl Default for SparseFile {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filler::{DEFAULT_FILLER_BYTE, DEFAULT_FILLER_SIZE};

    const GB: u64 = 1024 * 1024 * 1024;
    const TB: u64 = 1024 * GB;

    fn init_logger() { let _ = env_logger::builder().is_test(true).try_init(); }

    fn small_file() -> SparseFile {
        init_logger();
        SparseFile::with_filler(Arc::new(Filler::new(4, b'.').unwrap()))
    }

    fn chunks(file: &mut SparseFile) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        while let Some(chunk) = file.read()? {
            assert!(!chunk.is_empty());
            out.push(chunk.to_vec());
        }
        Ok(out)
    }

    fn drain(file: &mut SparseFile) -> Result<Vec<u8>> { Ok(chunks(file)?.concat()) }

    /// literal "ab" + 6 filler, literal "cde" + 0, literal "f" + 9 filler
    fn mixed_file() -> Result<SparseFile> {
        let mut file = small_file();
        file.write_literal(b"ab")?;
        file.write_filler(4)?;
        file.write_filler(2)?;
        file.write_literal(b"cde")?;
        file.write_literal(b"f")?;
        file.write_filler(9)?;
        Ok(file)
    }

    #[test]
    fn test_write_accounting() -> Result<()> {
        let file = mixed_file()?;
        assert_eq!(file.len(), 21);
        assert_eq!(file.block_count(), 3);
        assert_eq!(file.retained_bytes(), 6);
        Ok(())
    }

    #[test]
    fn test_filler_before_literal() {
        let mut file = small_file();
        assert_eq!(file.write_filler(10), Err(EmulatorError::FillerBeforeLiteral));
        assert_eq!(file.write_filler(0), Err(EmulatorError::FillerBeforeLiteral));
        assert!(file.is_empty());
    }

    #[test]
    fn test_empty_literal_is_ignored() -> Result<()> {
        let mut file = small_file();
        assert_eq!(file.write_literal(b"")?, 0);
        assert_eq!(file.block_count(), 0);
        assert_eq!(file.write_filler(1), Err(EmulatorError::FillerBeforeLiteral));
        Ok(())
    }

    #[test]
    fn test_size_overflow() -> Result<()> {
        let mut file = small_file();
        file.write_literal(b"x")?;
        assert_eq!(file.write_filler(i64::MAX as u64), Err(EmulatorError::SizeOverflow));
        assert_eq!(file.len(), 1);
        file.write_filler(i64::MAX as u64 - 1)?;
        assert_eq!(file.len(), i64::MAX as u64);
        Ok(())
    }

    #[test]
    fn test_read_before_open() -> Result<()> {
        let mut file = mixed_file()?;
        assert_eq!(file.read()?, None);
        Ok(())
    }

    #[test]
    fn test_read_chunks() -> Result<()> {
        let mut file = mixed_file()?;
        file.open();
        let expected: Vec<&[u8]> = vec![
            &b"ab"[..],
            &b"...."[..],
            &b".."[..],
            &b"cde"[..],
            &b"f"[..],
            &b"...."[..],
            &b"...."[..],
            &b"."[..],
        ];
        assert_eq!(chunks(&mut file)?, expected);
        assert_eq!(file.position(), 21);
        assert_eq!(file.read()?, None);
        Ok(())
    }

    #[test]
    fn test_reopen_restarts() -> Result<()> {
        let mut file = mixed_file()?;
        file.open();
        let first = drain(&mut file)?;
        file.open();
        file.read()?;
        file.open();
        assert_eq!(drain(&mut file)?, first);
        Ok(())
    }

    #[test]
    fn test_empty_file() -> Result<()> {
        let mut file = small_file();
        file.open();
        assert_eq!(file.read()?, None);
        assert_eq!(file.seek(0, Whence::End)?, 0);
        assert_eq!(file.read()?, None);
        Ok(())
    }

    #[test]
    fn test_boundary_chunk() -> Result<()> {
        init_logger();
        let mut file = SparseFile::new();
        file.write_literal(b"H")?;
        file.write_filler(DEFAULT_FILLER_SIZE as u64)?;
        file.open();

        assert_eq!(file.read()?, Some(&b"H"[..]));
        let chunk = file.read()?.unwrap();
        assert_eq!(chunk.len(), DEFAULT_FILLER_SIZE);
        assert!(chunk.iter().all(|&b| b == DEFAULT_FILLER_BYTE));
        assert_eq!(file.read()?, None);
        Ok(())
    }

    #[test]
    fn test_round_trip_size() -> Result<()> {
        init_logger();
        let mut file = SparseFile::new();
        file.write_literal(b"meta")?;
        file.write_filler(3 * DEFAULT_FILLER_SIZE as u64 + 17)?;
        file.write_literal(b"more")?;
        file.write_filler(1)?;
        file.write_literal(b"end")?;
        file.open();

        let mut total = 0;
        while let Some(chunk) = file.read()? {
            assert!(chunk.len() <= DEFAULT_FILLER_SIZE);
            total += chunk.len() as u64;
        }
        assert_eq!(total, file.len());
        Ok(())
    }

    #[test]
    fn test_gap_costs_no_memory() -> Result<()> {
        let mut small = small_file();
        small.write_literal(b"h")?;
        small.write_filler(1)?;

        let mut huge = small_file();
        huge.write_literal(b"h")?;
        huge.write_filler(TB)?;

        assert_eq!(small.block_count(), huge.block_count());
        assert_eq!(small.retained_bytes(), huge.retained_bytes());
        assert_eq!(huge.len(), TB + 1);
        Ok(())
    }

    #[test]
    fn test_seek_into_gap_before_next_block() -> Result<()> {
        init_logger();
        let mut file = SparseFile::new();
        file.write_literal(b"a")?;
        file.write_filler(10_000_001)?;
        file.write_literal(b"b")?;
        file.write_filler(0)?;

        assert_eq!(file.seek(10_000_001, Whence::Start)?, 10_000_001);
        assert!(file.pending_literal().is_empty());
        assert_eq!(file.pending_gap(), 1);
        assert_eq!(file.read()?, Some(&[DEFAULT_FILLER_BYTE][..]));
        assert_eq!(file.read()?, Some(&b"b"[..]));
        assert_eq!(file.read()?, None);
        Ok(())
    }

    #[test]
    fn test_seek_into_payload() -> Result<()> {
        let mut file = mixed_file()?;
        file.seek(10, Whence::Start)?;
        assert_eq!(file.pending_literal(), b"e");
        assert_eq!(file.pending_gap(), 0);
        assert_eq!(file.read()?, Some(&b"e"[..]));
        assert_eq!(file.read()?, Some(&b"f"[..]));
        Ok(())
    }

    #[test]
    fn test_seek_errors_on_empty_file() {
        let mut file = small_file();
        assert_eq!(file.seek(-1, Whence::Start), Err(EmulatorError::NegativeSeek(-1)));
        assert_eq!(
            file.seek(1, Whence::End),
            Err(EmulatorError::SeekPastEnd { target: 1, size: 0 })
        );
    }

    #[test]
    fn test_failed_seek_keeps_cursor() -> Result<()> {
        let mut file = mixed_file()?;
        file.seek(4, Whence::Start)?;
        let before = file.cursor.clone();

        assert!(file.seek(-5, Whence::Current).is_err());
        assert!(file.seek(1, Whence::End).is_err());
        assert_eq!(file.seek(i64::MAX, Whence::End), Err(EmulatorError::SeekOverflow));
        assert_eq!(file.cursor, before);
        Ok(())
    }

    #[test]
    fn test_seek_to_end() -> Result<()> {
        let mut file = mixed_file()?;
        file.open();
        assert_eq!(file.seek(0, Whence::End)?, 21);
        assert_eq!(file.read()?, None);
        assert_eq!(file.seek(-1, Whence::Current)?, 20);
        assert_eq!(file.read()?, Some(&b"."[..]));
        Ok(())
    }

    #[test]
    fn test_seek_matches_sequential_read() -> Result<()> {
        let mut file = mixed_file()?;
        file.open();
        let full = drain(&mut file)?;
        assert_eq!(full.len() as u64, file.len());

        for offset in 0..=file.len() {
            assert_eq!(file.seek(offset as i64, Whence::Start)?, offset);
            assert_eq!(file.position(), offset);
            assert_eq!(drain(&mut file)?, &full[offset as usize..], "offset {offset}");
        }
        Ok(())
    }

    #[test]
    fn test_skip_matches_seek() -> Result<()> {
        let mut file = mixed_file()?;
        let len = file.len() as i64;

        for from in 0..=len {
            for amount in -from..=(len - from) {
                file.seek(from, Whence::Start)?;
                assert_eq!(file.skip(amount)?, amount);
                let skipped = file.cursor.clone();

                file.seek(from + amount, Whence::Start)?;
                assert_eq!(file.cursor, skipped, "skip {amount} from {from}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_skip_after_partial_read() -> Result<()> {
        let mut file = mixed_file()?;
        file.open();
        file.read()?;
        file.read()?;
        assert_eq!(file.position(), 6);
        assert_eq!(file.skip(5)?, 5);
        assert_eq!(file.read()?, Some(&b"f"[..]));
        assert_eq!(file.skip(-13), Err(EmulatorError::NegativeSeek(-1)));
        assert_eq!(file.position(), 12);
        Ok(())
    }

    #[test]
    fn test_filler_written_mid_gap_is_delivered() -> Result<()> {
        let mut file = small_file();
        file.write_literal(b"x")?;
        file.write_filler(4)?;
        file.open();
        assert_eq!(file.read()?, Some(&b"x"[..]));

        file.write_filler(4)?;
        assert_eq!(file.pending_gap(), 8);
        assert_eq!(drain(&mut file)?, b"........");
        assert_eq!(file.position(), file.len());
        Ok(())
    }

    #[test]
    fn test_filler_before_gap_starts_is_delivered() -> Result<()> {
        let mut file = small_file();
        file.write_literal(b"xy")?;
        file.open();
        file.seek(1, Whence::Start)?;

        file.write_filler(3)?;
        assert_eq!(file.pending_literal(), b"y");
        assert_eq!(file.pending_gap(), 3);
        assert_eq!(drain(&mut file)?, b"y...");
        Ok(())
    }

    #[test]
    fn test_writes_after_end_of_pass_are_delivered() -> Result<()> {
        let mut file = small_file();
        file.write_literal(b"ab")?;
        file.write_filler(2)?;
        file.open();
        assert_eq!(drain(&mut file)?, b"ab..");
        assert_eq!(file.read()?, None);

        file.write_filler(5)?;
        assert_eq!(drain(&mut file)?, b".....");

        file.write_literal(b"cd")?;
        file.write_filler(1)?;
        assert_eq!(drain(&mut file)?, b"cd.");
        assert_eq!(file.position(), file.len());

        file.open();
        assert_eq!(drain(&mut file)?, b"ab.......cd.");
        Ok(())
    }

    #[test]
    fn test_write_before_open_keeps_cursor_unset() -> Result<()> {
        let mut file = small_file();
        file.write_literal(b"ab")?;
        assert_eq!(file.read()?, None);
        file.write_literal(b"cd")?;
        file.write_filler(3)?;
        assert_eq!(file.read()?, None);
        assert_eq!(file.position(), 0);
        Ok(())
    }

    #[test]
    fn test_read_never_reaches_stuck_state() -> Result<()> {
        // Every layout of up to three blocks with gaps around the filler size,
        // read from every offset.
        let gaps = [0, 1, 3, 4, 5, 8, 9];
        let payloads: [&[u8]; 2] = [b"x", b"yz"];
        for &first_gap in &gaps {
            for &second_gap in &gaps {
                for &payload in &payloads {
                    let mut file = small_file();
                    file.write_literal(payload)?;
                    file.write_filler(first_gap)?;
                    file.write_literal(b"m")?;
                    file.write_filler(second_gap)?;
                    file.write_literal(payload)?;

                    for offset in 0..=file.len() {
                        file.seek(offset as i64, Whence::Start)?;
                        let rest = drain(&mut file)?;
                        assert_eq!(rest.len() as u64, file.len() - offset);
                        assert_eq!(file.pending_gap(), 0);
                    }
                }
            }
        }
        Ok(())
    }
}
