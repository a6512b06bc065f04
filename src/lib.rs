//! Record-blocked reader and writer for USTAR/GNU tar archives.
//!
//! A tar archive is a flat sequence of 512-byte blocks: for every entry a
//! header block, then the payload rounded up to whole blocks, and finally
//! two all-zero blocks marking the end. Tape drives move those blocks in
//! fixed-size *records* of blocking-factor many blocks (default 20, i.e.
//! 10240-byte records), and this crate keeps that discipline even on
//! regular files: all physical I/O happens one record at a time, while the
//! caller-facing API deals in blocks.
//!
//! The layers, bottom up:
//!
//! - [`header`] — the fixed-layout header/block codec: octal fields,
//!   checksum, the all-zero end-of-archive test.
//! - [`stream`] — record-buffered block streams: [`InputStream`] with
//!   block-granular read/peek and record-aligned seek/skip, and
//!   [`OutputStream`] with ordered writes and zero-padded close.
//! - [`parser`] — entry discovery over an input stream: checksum-validated
//!   [`Entry`] listing and lazy, position-keyed payload retrieval.
//! - [`archiver`] — subtree serialization onto an output stream:
//!   breadth-first traversal, header synthesis from file metadata, GNU
//!   long-name emission, payload packing.
//!
//! # Example
//!
//! ```no_run
//! use blocktar::{InputStream, Parser};
//!
//! let mut stream = InputStream::open("archive.tar")?;
//! let mut parser = Parser::new(&mut stream);
//! let entries = parser.list_files()?;
//! for entry in &entries {
//!     println!("{}", entry.path_lossy());
//! }
//! // payloads can be fetched lazily, in any order
//! if let Some(entry) = entries.iter().find(|e| e.is_file()) {
//!     let bytes = parser.read_file(entry)?;
//!     println!("{} payload bytes", bytes.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Writing is a single call:
//!
//! ```no_run
//! blocktar::archive("some/tree", "tree.tar")?;
//! # Ok::<(), blocktar::ArchiveError>(())
//! ```
//!
//! Everything is synchronous, single-threaded, blocking I/O; a stream and
//! whatever parser or archiver borrows it form one exclusive sequence of
//! operations, which the `&mut` borrows enforce.

pub mod archiver;
pub mod entry;
pub mod header;
pub mod parser;
pub mod stream;

pub use archiver::{archive, archive_with_blocking_factor, ArchiveError, Archiver};
pub use entry::Entry;
pub use header::{Block, EntryType, Header, HeaderError};
pub use parser::{ParseError, Parser};
pub use stream::{BlockPosition, InputStream, OutputStream, StreamError};

/// Size of one archive block in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Default number of blocks per record, matching historical tar practice.
pub const DEFAULT_BLOCKING_FACTOR: usize = 20;
