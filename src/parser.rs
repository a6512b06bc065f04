//! Streaming archive parser.
//!
//! The parser drives an [`InputStream`] to discover successive entries. It
//! validates each header's checksum, resolves GNU long-name extensions,
//! and captures each entry's payload position so [`read_file`] can go back
//! to any entry later without rescanning the archive from the start.
//!
//! [`read_file`]: Parser::read_file

use std::io::{Read, Seek};

use log::{debug, trace};
use thiserror::Error;

use crate::entry::Entry;
use crate::header::{EntryType, Header, HeaderError};
use crate::stream::{InputStream, StreamError};
use crate::BLOCK_SIZE;

/// Errors that can occur while parsing an archive.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Error from the underlying block stream.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// Header decoding error (checksum, invalid octal).
    #[error("header error: {0}")]
    Header(#[from] HeaderError),

    /// A zero block not followed by a second zero block.
    ///
    /// A legitimate end-of-archive marker is two consecutive zero blocks;
    /// a lone one means the archive is corrupted.
    #[error("isolated zero block at record {record}, block {block}")]
    LoneZeroBlock {
        /// Record index of the offending block.
        record: u64,
        /// Block index within the record.
        block: usize,
    },

    /// The archive ended inside an entry's data.
    #[error("archive ended unexpectedly inside an entry")]
    UnexpectedEnd,
}

/// Result type for parser operations.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Archive parser over a borrowed input stream.
///
/// The parser holds a mutable borrow of its stream for its whole lifetime;
/// exactly one logical sequence of operations can drive the stream at a
/// time.
#[derive(Debug)]
pub struct Parser<'a, R> {
    stream: &'a mut InputStream<R>,
}

impl<'a, R: Read + Seek> Parser<'a, R> {
    /// Create a parser over an input stream.
    pub fn new(stream: &'a mut InputStream<R>) -> Self {
        Self { stream }
    }

    /// Parse the entry at the current stream position.
    ///
    /// GNU long-name ('L') blocks are consumed and applied to the entry
    /// they precede; PAX 'x'/'g' headers are recognized and their payloads
    /// skipped undecoded. Returns `Ok(None)` at the end-of-archive marker
    /// or when the input is exhausted.
    ///
    /// The returned entry owns its header; its payload is not read until
    /// [`read_file`] is called for it.
    ///
    /// # Errors
    ///
    /// A checksum mismatch or an isolated zero block aborts the parse, but
    /// leaves the stream seekable: a caller may reposition and retry.
    ///
    /// [`read_file`]: Parser::read_file
    pub fn next_file(&mut self) -> Result<Option<Entry>> {
        let mut long_name: Option<Vec<u8>> = None;
        loop {
            let at = self.stream.position();
            let Some(block) = self.stream.read_block()? else {
                return Ok(None);
            };

            if block.is_zero() {
                // one zero block alone is corruption, two are the marker
                return match self.stream.peek_block()? {
                    Some(next) if next.is_zero() => Ok(None),
                    _ => Err(ParseError::LoneZeroBlock {
                        record: at.record,
                        block: at.block,
                    }),
                };
            }

            let mut header = Header::from_block(&block);
            header.verify_checksum()?;
            header.terminate_strings();

            match header.entry_type() {
                EntryType::GnuLongName => {
                    let mut name = self.unpack(header.size()?)?;
                    name.pop_if(|&mut b| b == 0);
                    trace!("long-name block carries {} path bytes", name.len());
                    long_name = Some(name);
                }
                EntryType::XHeader | EntryType::XGlobalHeader => {
                    self.stream.skip_blocks(header.size_in_blocks()?)?;
                }
                _ => {
                    let position = self.stream.position();
                    let path = match long_name.take() {
                        Some(name) => name,
                        None => header.name_bytes().to_vec(),
                    };
                    return Ok(Some(Entry::new(header, path, position)));
                }
            }
        }
    }

    /// List every entry in the archive, in archive order.
    ///
    /// Resets the stream to record 0, then alternates [`next_file`] with a
    /// block-granular skip over each entry's payload, so no payload byte
    /// is ever materialized. An archive whose input is already exhausted
    /// lists as empty.
    ///
    /// [`next_file`]: Parser::next_file
    pub fn list_files(&mut self) -> Result<Vec<Entry>> {
        if !self.stream.seek_record(0)? {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        while let Some(entry) = self.next_file()? {
            self.stream.skip_blocks(entry.header().size_in_blocks()?)?;
            entries.push(entry);
        }
        debug!("listed {} entries", entries.len());
        Ok(entries)
    }

    /// Read one entry's payload.
    ///
    /// Seeks back to the entry's captured position and unpacks exactly
    /// `size` bytes, dropping the final block's padding. Independent of
    /// [`list_files`]: entries may be read in any order, any number of
    /// times.
    ///
    /// [`list_files`]: Parser::list_files
    pub fn read_file(&mut self, entry: &Entry) -> Result<Vec<u8>> {
        let size = entry.header().size()?;
        if size == 0 {
            return Ok(Vec::new());
        }
        let position = entry.position();
        if !self.stream.seek_record(position.record)? {
            return Err(ParseError::UnexpectedEnd);
        }
        self.stream.skip_blocks(position.block as u64)?;
        self.unpack(size)
    }

    /// Read `ceil(size / 512)` blocks and keep the first `size` bytes.
    fn unpack(&mut self, size: u64) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(size as usize);
        for _ in 0..size.div_ceil(BLOCK_SIZE as u64) {
            let block = self.stream.read_block()?.ok_or(ParseError::UnexpectedEnd)?;
            let take = (size as usize - data.len()).min(BLOCK_SIZE);
            data.extend_from_slice(&block.bytes[..take]);
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::header::Block;
    use crate::stream::{BlockPosition, OutputStream};

    /// Build an archive in memory with the tar crate as the oracle writer.
    fn create_tar_with<F>(f: F) -> Vec<u8>
    where
        F: FnOnce(&mut tar::Builder<&mut Vec<u8>>),
    {
        let mut data = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut data);
            f(&mut builder);
            builder.finish().unwrap();
        }
        data
    }

    fn append_file(builder: &mut tar::Builder<&mut Vec<u8>>, path: &str, content: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o644);
        header.set_uid(1000);
        header.set_gid(1000);
        header.set_mtime(1234567890);
        header.set_size(content.len() as u64);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, path, content).unwrap();
    }

    fn parse_all(data: Vec<u8>, factor: usize) -> (Vec<Entry>, InputStream<Cursor<Vec<u8>>>) {
        let mut stream = InputStream::with_blocking_factor(Cursor::new(data), factor);
        let entries = Parser::new(&mut stream).list_files().unwrap();
        (entries, stream)
    }

    #[test]
    fn test_empty_archive() {
        let data = create_tar_with(|_| {});
        let (entries, _) = parse_all(data, 20);
        assert!(entries.is_empty());
    }

    #[test]
    fn test_single_file() {
        let data = create_tar_with(|b| append_file(b, "hello.txt", b"Hello, World!"));
        let (entries, mut stream) = parse_all(data, 20);

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.path_bytes(), b"hello.txt");
        assert_eq!(entry.entry_type(), EntryType::Regular);
        assert_eq!(entry.size().unwrap(), 13);
        assert_eq!(entry.header().file_mode().unwrap(), 0o644);
        assert_eq!(entry.header().owner_uid().unwrap(), 1000);
        assert_eq!(entry.header().modified().unwrap(), 1234567890);

        let payload = Parser::new(&mut stream).read_file(entry).unwrap();
        assert_eq!(payload, b"Hello, World!");
    }

    #[test]
    fn test_payload_positions() {
        let data = create_tar_with(|b| {
            append_file(b, "a", b"first");
            append_file(b, "b", b"second");
        });
        let (entries, _) = parse_all(data, 20);

        // header at block 0, payload at block 1; the next header at block 2
        assert_eq!(
            entries[0].position(),
            BlockPosition {
                record: 0,
                block: 1
            }
        );
        assert_eq!(
            entries[1].position(),
            BlockPosition {
                record: 0,
                block: 3
            }
        );
    }

    #[test]
    fn test_read_files_out_of_order() {
        // blocking factor 2 forces payload reads to straddle records
        let contents: Vec<Vec<u8>> = (0..6u8).map(|i| vec![i + b'a'; 700]).collect();
        let data = create_tar_with(|b| {
            for (i, content) in contents.iter().enumerate() {
                append_file(b, &format!("file{i}"), content);
            }
        });
        let (entries, mut stream) = parse_all(data, 2);
        assert_eq!(entries.len(), 6);

        let mut parser = Parser::new(&mut stream);
        for index in [5, 1, 4, 0, 2, 3, 1] {
            let payload = parser.read_file(&entries[index]).unwrap();
            assert_eq!(payload, contents[index], "entry {index}");
        }
    }

    #[test]
    fn test_gnu_long_name_resolved() {
        let long_path = format!("very/long/path/{}", "x".repeat(120));
        let data = create_tar_with(|b| append_file(b, &long_path, b"content"));
        let (entries, mut stream) = parse_all(data, 20);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path_bytes(), long_path.as_bytes());
        assert_eq!(entries[0].entry_type(), EntryType::Regular);

        let payload = Parser::new(&mut stream).read_file(&entries[0]).unwrap();
        assert_eq!(payload, b"content");
    }

    #[test]
    fn test_pax_entries_skipped() {
        // a PAX 'x' extension precedes the real entry; its payload is
        // recognized but never decoded
        let mut data = Vec::new();
        {
            let mut output = OutputStream::with_blocking_factor(&mut data, 20);
            let pax = b"28 path=some/other/name.txt\n";
            let mut header = Header::new_ustar();
            header.set_name(b"pax-extension");
            header.set_entry_type(EntryType::XHeader);
            header.set_size(pax.len() as u64).unwrap();
            header.set_checksum();
            output.write_block(&header.to_block()).unwrap();
            let mut block = Block::default();
            block.bytes[..pax.len()].copy_from_slice(pax);
            output.write_block(&block).unwrap();

            let mut header = Header::new_ustar();
            header.set_name(b"real.txt");
            header.set_entry_type(EntryType::Regular);
            header.set_size(7).unwrap();
            header.set_checksum();
            output.write_block(&header.to_block()).unwrap();
            let mut block = Block::default();
            block.bytes[..7].copy_from_slice(b"content");
            output.write_block(&block).unwrap();

            output.write_block(&Block::default()).unwrap();
            output.write_block(&Block::default()).unwrap();
            output.close().unwrap();
        }
        let (entries, mut stream) = parse_all(data, 20);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path_bytes(), b"real.txt");
        assert_eq!(entries[0].entry_type(), EntryType::Regular);
        let payload = Parser::new(&mut stream).read_file(&entries[0]).unwrap();
        assert_eq!(payload, b"content");
    }

    #[test]
    fn test_terminator_only_archive() {
        let data = vec![0u8; 2 * BLOCK_SIZE];
        let (entries, _) = parse_all(data, 20);
        assert!(entries.is_empty());
    }

    #[test]
    fn test_lone_zero_block_is_corruption() {
        let mut data = vec![0u8; BLOCK_SIZE];
        data.extend_from_slice(&[0xffu8; BLOCK_SIZE]);
        let mut stream = InputStream::with_blocking_factor(Cursor::new(data), 20);
        let err = Parser::new(&mut stream).list_files().unwrap_err();
        assert!(matches!(
            err,
            ParseError::LoneZeroBlock {
                record: 0,
                block: 0
            }
        ));
    }

    #[test]
    fn test_trailing_lone_zero_block_is_corruption() {
        let data = vec![0u8; BLOCK_SIZE];
        let mut stream = InputStream::with_blocking_factor(Cursor::new(data), 20);
        let err = Parser::new(&mut stream).list_files().unwrap_err();
        assert!(matches!(err, ParseError::LoneZeroBlock { .. }));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut data = create_tar_with(|b| append_file(b, "x.txt", b"data"));
        data[0] ^= 0x01;
        let mut stream = InputStream::with_blocking_factor(Cursor::new(data), 20);
        let err = Parser::new(&mut stream).list_files().unwrap_err();
        assert!(matches!(
            err,
            ParseError::Header(HeaderError::ChecksumMismatch { .. })
        ));

        // the stream stays usable: seeking back and re-parsing reproduces
        // the same result instead of compounding the failure
        let err = Parser::new(&mut stream).list_files().unwrap_err();
        assert!(matches!(
            err,
            ParseError::Header(HeaderError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_input_lists_empty() {
        let (entries, _) = parse_all(Vec::new(), 20);
        assert!(entries.is_empty());
    }
}
