//! Record-buffered block input.

use std::fs::File;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use log::trace;

use crate::header::Block;
use crate::stream::{BlockPosition, Result, StreamError};
use crate::{BLOCK_SIZE, DEFAULT_BLOCKING_FACTOR};

/// Block-granular reader over a seekable byte source.
///
/// The stream owns a lazily-allocated record buffer, sized once for its
/// lifetime, and refills it one whole record at a time. The cursor is a
/// (record, block) pair; [`seek_record`] and [`skip_blocks`] reposition it
/// without the caller ever addressing raw byte offsets.
///
/// [`seek_record`]: InputStream::seek_record
/// [`skip_blocks`]: InputStream::skip_blocks
#[derive(Debug)]
pub struct InputStream<R> {
    source: R,
    blocking_factor: usize,
    /// Record buffer; empty until the first fetch, record-sized afterwards.
    record: Vec<u8>,
    /// Index of the record held in the buffer, when `loaded`.
    record_id: u64,
    /// Whole blocks the loaded record holds; less than the blocking factor
    /// only for a short trailing record.
    blocks_in_record: usize,
    /// Block cursor within the loaded record.
    block_id: usize,
    loaded: bool,
}

impl InputStream<File> {
    /// Open an archive file with the default blocking factor.
    ///
    /// A failure to open the file makes no stream at all, so it surfaces
    /// here as a plain [`io::Error`] rather than a streaming result.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::open_with_blocking_factor(path, DEFAULT_BLOCKING_FACTOR)
    }

    /// Open an archive file with a caller-chosen blocking factor.
    pub fn open_with_blocking_factor(
        path: impl AsRef<Path>,
        blocking_factor: usize,
    ) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::with_blocking_factor(file, blocking_factor))
    }
}

impl<R: Read + Seek> InputStream<R> {
    /// Wrap a seekable byte source with the default blocking factor.
    pub fn new(source: R) -> Self {
        Self::with_blocking_factor(source, DEFAULT_BLOCKING_FACTOR)
    }

    /// Wrap a seekable byte source with a caller-chosen blocking factor.
    ///
    /// # Panics
    ///
    /// Panics if `blocking_factor` is zero.
    pub fn with_blocking_factor(source: R, blocking_factor: usize) -> Self {
        assert!(blocking_factor > 0, "blocking factor must be positive");
        Self {
            source,
            blocking_factor,
            record: Vec::new(),
            record_id: 0,
            blocks_in_record: 0,
            block_id: 0,
            loaded: false,
        }
    }

    /// The configured blocking factor.
    #[must_use]
    pub fn blocking_factor(&self) -> usize {
        self.blocking_factor
    }

    /// The stream position of the next block to be read, normalized so a
    /// cursor resting on a record boundary addresses the following record.
    #[must_use]
    pub fn position(&self) -> BlockPosition {
        if self.loaded && self.block_id >= self.blocking_factor {
            BlockPosition {
                record: self.record_id + 1,
                block: 0,
            }
        } else {
            BlockPosition {
                record: self.record_id,
                block: if self.loaded { self.block_id } else { 0 },
            }
        }
    }

    /// Read the next block and advance the cursor.
    ///
    /// Returns `Ok(None)` when the source cannot yield another full block:
    /// the loaded record was a short trailing one and is exhausted, or no
    /// further record exists.
    pub fn read_block(&mut self) -> Result<Option<Block>> {
        match self.current_block()? {
            Some(block) => {
                self.block_id += 1;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    /// Read the next block without advancing the cursor.
    ///
    /// Peeking past a record boundary fetches the following record; the
    /// peeked block is still what the next [`read_block`] returns.
    ///
    /// [`read_block`]: InputStream::read_block
    pub fn peek_block(&mut self) -> Result<Option<Block>> {
        self.current_block()
    }

    /// Reposition to the start of `record` and load it eagerly.
    ///
    /// Returns `Ok(false)` when the record lies past the end of the input.
    pub fn seek_record(&mut self, record: u64) -> Result<bool> {
        let offset = record * self.record_size() as u64;
        self.source.seek(SeekFrom::Start(offset))?;
        self.loaded = false;
        self.record_id = record;
        self.block_id = 0;
        self.fill_record(record)
    }

    /// Advance the cursor by `count` blocks.
    ///
    /// A skip that stays within the loaded record only moves the cursor;
    /// one that crosses a record boundary re-seeks, because physical I/O
    /// happens at record granularity only.
    pub fn skip_blocks(&mut self, count: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let factor = self.blocking_factor as u64;
        let target = self.absolute_block() + count;
        let record = target / factor;
        let block = (target % factor) as usize;

        if self.loaded && record == self.record_id {
            self.block_id = block;
        } else if self.loaded && record == self.record_id + 1 && block == 0 {
            // landing exactly on the boundary: the next read fetches the
            // following record on its own
            self.block_id = self.blocking_factor;
        } else {
            trace!("skip of {count} blocks re-seeks to record {record}, block {block}");
            self.seek_record(record)?;
            self.block_id = block;
        }
        Ok(())
    }

    fn record_size(&self) -> usize {
        self.blocking_factor * BLOCK_SIZE
    }

    /// Absolute index of the block under the cursor.
    fn absolute_block(&self) -> u64 {
        let factor = self.blocking_factor as u64;
        if self.loaded {
            self.record_id * factor + self.block_id as u64
        } else {
            self.record_id * factor
        }
    }

    /// Resolve the block under the cursor, fetching the next record when
    /// the current one is exhausted or was never loaded.
    fn current_block(&mut self) -> Result<Option<Block>> {
        if !self.loaded || self.block_id >= self.blocks_in_record {
            // a short record is the last one the input has to offer
            if self.loaded && self.blocks_in_record < self.blocking_factor {
                return Ok(None);
            }
            let next = if self.loaded {
                self.record_id + 1
            } else {
                self.record_id
            };
            if !self.fill_record(next)? {
                return Ok(None);
            }
        }
        let offset = self.block_id * BLOCK_SIZE;
        let mut block = Block::default();
        block
            .bytes
            .copy_from_slice(&self.record[offset..offset + BLOCK_SIZE]);
        Ok(Some(block))
    }

    /// Fetch record `target` from the source's current position.
    ///
    /// Reads up to one full record; a short read is accepted on a block
    /// boundary (trailing record) and rejected inside a block.
    fn fill_record(&mut self, target: u64) -> Result<bool> {
        if self.record.is_empty() {
            self.record = vec![0u8; self.record_size()];
        }
        let mut filled = 0;
        while filled < self.record.len() {
            match self.source.read(&mut self.record[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Ok(false);
        }
        if filled % BLOCK_SIZE != 0 {
            return Err(StreamError::TornBlock { record: target });
        }
        self.record_id = target;
        self.blocks_in_record = filled / BLOCK_SIZE;
        self.block_id = 0;
        self.loaded = true;
        trace!("record {target} loaded ({} blocks)", self.blocks_in_record);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use similar_asserts::assert_eq;

    use super::*;

    /// A sequence of blocks where block `i` is filled with the byte `i`.
    fn numbered_blocks(count: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(count * BLOCK_SIZE);
        for i in 0..count {
            data.extend_from_slice(&[i as u8; BLOCK_SIZE]);
        }
        data
    }

    fn stream(data: Vec<u8>, factor: usize) -> InputStream<Cursor<Vec<u8>>> {
        InputStream::with_blocking_factor(Cursor::new(data), factor)
    }

    #[test]
    fn test_sequential_reads() {
        let mut input = stream(numbered_blocks(4), 2);
        for i in 0..4u8 {
            let block = input.read_block().unwrap().unwrap();
            assert_eq!(block.bytes[0], i);
            assert_eq!(block.bytes[BLOCK_SIZE - 1], i);
        }
        assert!(input.read_block().unwrap().is_none());
        assert!(input.read_block().unwrap().is_none());
    }

    #[test]
    fn test_empty_input() {
        let mut input = stream(Vec::new(), 2);
        assert!(input.read_block().unwrap().is_none());
        assert!(!input.seek_record(0).unwrap());
    }

    #[test]
    fn test_short_trailing_record() {
        // three blocks with blocking factor 2: the second record is short
        let mut input = stream(numbered_blocks(3), 2);
        for i in 0..3u8 {
            assert_eq!(input.read_block().unwrap().unwrap().bytes[0], i);
        }
        assert!(input.read_block().unwrap().is_none());
    }

    #[test]
    fn test_torn_block() {
        let mut data = numbered_blocks(2);
        data.extend_from_slice(&[0xaa; 100]);
        let mut input = stream(data, 2);
        assert_eq!(input.read_block().unwrap().unwrap().bytes[0], 0);
        assert_eq!(input.read_block().unwrap().unwrap().bytes[0], 1);
        assert!(matches!(
            input.read_block(),
            Err(StreamError::TornBlock { record: 1 })
        ));
    }

    #[test]
    fn test_peek_does_not_advance() {
        let mut input = stream(numbered_blocks(4), 2);
        assert_eq!(input.read_block().unwrap().unwrap().bytes[0], 0);
        assert_eq!(input.read_block().unwrap().unwrap().bytes[0], 1);

        // peeking across the record boundary fetches record 1 but the
        // cursor still addresses the same block
        assert_eq!(input.peek_block().unwrap().unwrap().bytes[0], 2);
        assert_eq!(input.peek_block().unwrap().unwrap().bytes[0], 2);
        assert_eq!(input.read_block().unwrap().unwrap().bytes[0], 2);
    }

    #[test]
    fn test_peek_at_end() {
        let mut input = stream(numbered_blocks(2), 2);
        input.skip_blocks(2).unwrap();
        assert!(input.peek_block().unwrap().is_none());
    }

    #[test]
    fn test_seek_record() {
        let mut input = stream(numbered_blocks(6), 2);
        assert!(input.seek_record(2).unwrap());
        assert_eq!(input.read_block().unwrap().unwrap().bytes[0], 4);

        assert!(input.seek_record(0).unwrap());
        assert_eq!(input.read_block().unwrap().unwrap().bytes[0], 0);

        assert!(!input.seek_record(3).unwrap());
        assert!(input.read_block().unwrap().is_none());
    }

    #[test]
    fn test_skip_within_record() {
        let mut input = stream(numbered_blocks(4), 4);
        input.read_block().unwrap().unwrap();
        input.skip_blocks(2).unwrap();
        assert_eq!(input.read_block().unwrap().unwrap().bytes[0], 3);
    }

    #[test]
    fn test_skip_across_record_boundary() {
        // cursor on block 1 of record 0; skipping 3 blocks must land on
        // block 0 of record 2
        let mut input = stream(numbered_blocks(6), 2);
        input.read_block().unwrap().unwrap();
        input.skip_blocks(3).unwrap();
        assert_eq!(
            input.position(),
            BlockPosition {
                record: 2,
                block: 0
            }
        );
        assert_eq!(input.read_block().unwrap().unwrap().bytes[0], 4);
    }

    #[test]
    fn test_skip_to_exact_boundary() {
        let mut input = stream(numbered_blocks(4), 2);
        input.read_block().unwrap().unwrap();
        input.skip_blocks(1).unwrap();
        assert_eq!(
            input.position(),
            BlockPosition {
                record: 1,
                block: 0
            }
        );
        assert_eq!(input.read_block().unwrap().unwrap().bytes[0], 2);
    }

    #[test]
    fn test_position_tracks_reads() {
        let mut input = stream(numbered_blocks(4), 2);
        assert_eq!(input.position(), BlockPosition::START);
        input.read_block().unwrap().unwrap();
        assert_eq!(
            input.position(),
            BlockPosition {
                record: 0,
                block: 1
            }
        );
        input.read_block().unwrap().unwrap();
        // boundary positions normalize to the following record
        assert_eq!(
            input.position(),
            BlockPosition {
                record: 1,
                block: 0
            }
        );
    }
}
