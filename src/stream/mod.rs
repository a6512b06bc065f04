//! Record-granular block streams.
//!
//! Tape devices transfer whole records — blocking-factor many 512-byte
//! blocks — per I/O operation, and this module mirrors that: both stream
//! types buffer exactly one record and only touch the underlying byte
//! source/sink at record granularity. Callers read and write [`Block`]s;
//! the streams handle the record bookkeeping, including the record-aligned
//! re-seek needed when a skip crosses a record boundary.
//!
//! [`InputStream`] adds `peek`/`seek`/`skip` on top of block reads, which
//! is what lets the parser re-visit an entry's payload long after the
//! record buffer has been recycled. [`OutputStream`] flushes full records
//! and zero-pads the final partial record on close.
//!
//! End-of-input is a value, not an error: operations return
//! `Ok(None)`/`Ok(false)` when the stream cannot yield another full block,
//! in the same way [`std::io::Read`] distinguishes a clean EOF.
//!
//! [`Block`]: crate::header::Block

use thiserror::Error;

mod input;
mod output;

pub use input::InputStream;
pub use output::OutputStream;

/// Errors produced by the block streams.
#[derive(Debug, Error)]
pub enum StreamError {
    /// I/O error from the underlying byte source or sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The input ended in the middle of a block.
    ///
    /// Archives may end with a short record, but always on a block
    /// boundary; a torn block is a data error, never a valid end.
    #[error("record {record} is torn: input ended inside a block")]
    TornBlock {
        /// Index of the record that ended mid-block.
        record: u64,
    },
}

/// Result type for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// A captured stream position: a record index and a block index within
/// that record.
///
/// Positions are the streams' only addressing scheme; the parser captures
/// one per entry so payloads can be re-read without rescanning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockPosition {
    /// Record index, counted from the start of the archive.
    pub record: u64,
    /// Block index within the record.
    pub block: usize,
}

impl BlockPosition {
    /// Position of the first block of the archive.
    pub const START: BlockPosition = BlockPosition { record: 0, block: 0 };
}
