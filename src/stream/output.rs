//! Record-buffered block output.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use log::trace;

use crate::header::Block;
use crate::stream::Result;
use crate::{BLOCK_SIZE, DEFAULT_BLOCKING_FACTOR};

/// Block-granular writer over a byte sink.
///
/// Blocks accumulate in a record buffer and reach the sink one full record
/// at a time, in submission order. Closing the stream zero-pads a partial
/// final record so the output is always a whole number of records, the way
/// a tape drive expects its medium.
///
/// Dropping the stream performs a best-effort close; call [`close`] to
/// observe flush errors.
///
/// [`close`]: OutputStream::close
#[derive(Debug)]
pub struct OutputStream<W: Write> {
    sink: W,
    blocking_factor: usize,
    /// Record buffer; empty until the first write, record-sized afterwards.
    /// Zeroed after every flush, so the tail past the cursor always holds
    /// zero blocks.
    record: Vec<u8>,
    record_id: u64,
    block_id: usize,
    finished: bool,
}

impl OutputStream<File> {
    /// Create (or truncate) an archive file with the default blocking
    /// factor.
    ///
    /// A failure to create the file makes no stream at all, so it surfaces
    /// here as a plain [`io::Error`] rather than a streaming result.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::create_with_blocking_factor(path, DEFAULT_BLOCKING_FACTOR)
    }

    /// Create (or truncate) an archive file with a caller-chosen blocking
    /// factor.
    pub fn create_with_blocking_factor(
        path: impl AsRef<Path>,
        blocking_factor: usize,
    ) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::with_blocking_factor(file, blocking_factor))
    }
}

impl<W: Write> OutputStream<W> {
    /// Wrap a byte sink with the default blocking factor.
    pub fn new(sink: W) -> Self {
        Self::with_blocking_factor(sink, DEFAULT_BLOCKING_FACTOR)
    }

    /// Wrap a byte sink with a caller-chosen blocking factor.
    ///
    /// # Panics
    ///
    /// Panics if `blocking_factor` is zero.
    pub fn with_blocking_factor(sink: W, blocking_factor: usize) -> Self {
        assert!(blocking_factor > 0, "blocking factor must be positive");
        Self {
            sink,
            blocking_factor,
            record: Vec::new(),
            record_id: 0,
            block_id: 0,
            finished: false,
        }
    }

    /// The configured blocking factor.
    #[must_use]
    pub fn blocking_factor(&self) -> usize {
        self.blocking_factor
    }

    /// Total number of blocks submitted so far.
    #[must_use]
    pub fn blocks_written(&self) -> u64 {
        self.record_id * self.blocking_factor as u64 + self.block_id as u64
    }

    /// Append one block; a filled record is flushed to the sink.
    pub fn write_block(&mut self, block: &Block) -> Result<()> {
        if self.record.is_empty() {
            self.record = vec![0u8; self.blocking_factor * BLOCK_SIZE];
        }
        let offset = self.block_id * BLOCK_SIZE;
        self.record[offset..offset + BLOCK_SIZE].copy_from_slice(&block.bytes);
        self.block_id += 1;
        if self.block_id == self.blocking_factor {
            self.flush_record()?;
        }
        Ok(())
    }

    /// Flush any partial record (zero-padded to full record size) and the
    /// sink, consuming the stream.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn flush_record(&mut self) -> Result<()> {
        self.sink.write_all(&self.record)?;
        self.record.fill(0);
        self.record_id += 1;
        self.block_id = 0;
        trace!("record {} flushed", self.record_id - 1);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if self.block_id > 0 {
            self.record[self.block_id * BLOCK_SIZE..].fill(0);
            self.flush_record()?;
        }
        self.sink.flush()?;
        self.finished = true;
        Ok(())
    }
}

impl<W: Write> Drop for OutputStream<W> {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}
