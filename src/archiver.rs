//! Archive writer: serializes a filesystem subtree into a tar stream.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use log::debug;
use nix::unistd::{Gid, Group, Uid, User};
use rustix::fs::FileType;
use thiserror::Error;

use crate::header::{Block, EntryType, Header, HeaderError};
use crate::stream::{OutputStream, StreamError};
use crate::{BLOCK_SIZE, DEFAULT_BLOCKING_FACTOR};

/// Sentinel carried in the name field of GNU long-name marker headers.
pub const LONG_NAME_SENTINEL: &[u8] = b"././@LongName";

/// Width of the header's name field; longer paths go through the GNU
/// long-name extension.
const NAME_FIELD_WIDTH: usize = 100;

/// Typeflag written for sockets. UStar and the GNU extensions define no
/// socket mapping, so this byte is a placeholder no mainstream writer
/// emits.
const SOCKET_TYPEFLAG: u8 = b'8';

/// Errors that can occur while writing an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The path to archive does not exist.
    #[error("source path {0:?} does not exist")]
    MissingSource(PathBuf),

    /// The destination archive could not be created.
    ///
    /// This leaves no usable stream behind, unlike the recoverable
    /// variants below.
    #[error("failed to create archive {path:?}")]
    Create {
        /// The destination path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading a filesystem object's metadata failed.
    #[error("failed to read metadata for {path:?}")]
    Stat {
        /// The path being examined.
        path: PathBuf,
        /// The underlying errno.
        #[source]
        source: rustix::io::Errno,
    },

    /// Listing a directory's children failed.
    #[error("failed to read directory {path:?}")]
    ReadDir {
        /// The directory being traversed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading a file's payload failed.
    #[error("failed to read {path:?}")]
    ReadSource {
        /// The file being packed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A metadata value did not fit its header field.
    #[error("header field: {0}")]
    Header(#[from] HeaderError),

    /// Error from the underlying block stream.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
}

/// Result type for archiving operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Serialize a filesystem subtree into a new archive file, using the
/// default blocking factor.
///
/// # Errors
///
/// Returns [`ArchiveError::Create`] if the destination cannot be created,
/// and any traversal error otherwise; a failed operation never leaves a
/// partially-written entry (the destination file itself may exist but is
/// not a valid archive).
pub fn archive(source: impl AsRef<Path>, destination: impl AsRef<Path>) -> Result<()> {
    archive_with_blocking_factor(source, destination, DEFAULT_BLOCKING_FACTOR)
}

/// Serialize a filesystem subtree into a new archive file with a
/// caller-chosen blocking factor.
pub fn archive_with_blocking_factor(
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    blocking_factor: usize,
) -> Result<()> {
    let destination = destination.as_ref();
    let mut stream = OutputStream::create_with_blocking_factor(destination, blocking_factor)
        .map_err(|source| ArchiveError::Create {
            path: destination.to_path_buf(),
            source,
        })?;
    Archiver::new(&mut stream).archive_tree(source)?;
    stream.close()?;
    Ok(())
}

/// Archive writer over a borrowed output stream.
#[derive(Debug)]
pub struct Archiver<'a, W: Write> {
    stream: &'a mut OutputStream<W>,
}

impl<'a, W: Write> Archiver<'a, W> {
    /// Create an archiver over an output stream.
    pub fn new(stream: &'a mut OutputStream<W>) -> Self {
        Self { stream }
    }

    /// Serialize the subtree rooted at `source` into the stream and write
    /// the end-of-archive marker.
    ///
    /// The traversal is breadth-first: a directory's header is written
    /// when the directory is dequeued, and its children (sorted by name)
    /// are appended to the work queue. Regular files contribute their
    /// payload right after their header; every other kind of object is
    /// header-only.
    ///
    /// The caller still owns the stream and is responsible for closing it.
    pub fn archive_tree(&mut self, source: impl AsRef<Path>) -> Result<()> {
        let source = source.as_ref();
        if let Err(errno) = rustix::fs::lstat(source) {
            return Err(match errno {
                rustix::io::Errno::NOENT => ArchiveError::MissingSource(source.to_path_buf()),
                errno => ArchiveError::Stat {
                    path: source.to_path_buf(),
                    source: errno,
                },
            });
        }

        let mut queue = VecDeque::from([source.to_path_buf()]);
        while let Some(path) = queue.pop_front() {
            let stat = rustix::fs::lstat(&path).map_err(|source| ArchiveError::Stat {
                path: path.clone(),
                source,
            })?;
            let file_type = FileType::from_raw_mode(stat.st_mode);

            let header = self.build_header(&path, &stat, file_type)?;
            self.write_entry_header(&path, &header)?;

            match file_type {
                FileType::Directory => {
                    let mut children = Vec::new();
                    let listing =
                        std::fs::read_dir(&path).map_err(|source| ArchiveError::ReadDir {
                            path: path.clone(),
                            source,
                        })?;
                    for child in listing {
                        let child = child.map_err(|source| ArchiveError::ReadDir {
                            path: path.clone(),
                            source,
                        })?;
                        children.push(child.path());
                    }
                    children.sort();
                    queue.extend(children);
                }
                FileType::RegularFile => {
                    self.pack(&path, stat.st_size.max(0) as u64)?;
                }
                _ => {}
            }
            debug!("archived {path:?}");
        }

        // end-of-archive marker
        self.stream.write_block(&Block::default())?;
        self.stream.write_block(&Block::default())?;
        Ok(())
    }

    /// Synthesize the header for one filesystem object.
    ///
    /// Owner and group names are resolved from the numeric ids when the
    /// system knows them; an unresolved id leaves the field empty. The
    /// checksum is encoded last, over the final value of every other
    /// field.
    fn build_header(
        &self,
        path: &Path,
        stat: &rustix::fs::Stat,
        file_type: FileType,
    ) -> Result<Header> {
        let mut header = Header::new_ustar();
        header.set_name(path.as_os_str().as_bytes());
        header.set_file_mode(stat.st_mode & 0o7777)?;
        header.set_owner_uid(u64::from(stat.st_uid))?;
        header.set_owner_gid(u64::from(stat.st_gid))?;
        header.set_modified(stat.st_mtime.max(0) as u64)?;
        header.set_device(0, 0)?;

        let size = match file_type {
            FileType::RegularFile => stat.st_size.max(0) as u64,
            _ => 0,
        };
        header.set_size(size)?;

        header.typeflag = match file_type {
            FileType::RegularFile => EntryType::Regular.to_byte(),
            FileType::Symlink => EntryType::Symlink.to_byte(),
            FileType::CharacterDevice => EntryType::CharDevice.to_byte(),
            FileType::BlockDevice => EntryType::BlockDevice.to_byte(),
            FileType::Directory => EntryType::Directory.to_byte(),
            FileType::Fifo => EntryType::Fifo.to_byte(),
            FileType::Socket => SOCKET_TYPEFLAG,
            _ => EntryType::Regular.to_byte(),
        };

        if file_type == FileType::Symlink {
            let target =
                rustix::fs::readlink(path, Vec::new()).map_err(|source| ArchiveError::Stat {
                    path: path.to_path_buf(),
                    source,
                })?;
            header.set_link_name(target.as_bytes());
        }

        if let Some(user) = User::from_uid(Uid::from_raw(stat.st_uid)).ok().flatten() {
            header.set_username(user.name.as_bytes());
        }
        if let Some(group) = Group::from_gid(Gid::from_raw(stat.st_gid)).ok().flatten() {
            header.set_groupname(group.name.as_bytes());
        }

        header.set_checksum();
        Ok(header)
    }

    /// Write an entry's header block, preceded by a GNU long-name sequence
    /// when the path does not fit the name field.
    fn write_entry_header(&mut self, path: &Path, header: &Header) -> Result<()> {
        let name = path.as_os_str().as_bytes();
        if name.len() > NAME_FIELD_WIDTH {
            self.write_long_name(name)?;
        }
        self.stream.write_block(&header.to_block())?;
        Ok(())
    }

    /// Emit the GNU long-name sequence: an 'L' marker header whose size is
    /// the path's byte length, then the path bytes spanning whole blocks
    /// with the last one zero-padded.
    fn write_long_name(&mut self, name: &[u8]) -> Result<()> {
        debug!("long-name extension for {} path bytes", name.len());
        let mut marker = Header::new_ustar();
        marker.set_name(LONG_NAME_SENTINEL);
        marker.set_entry_type(EntryType::GnuLongName);
        marker.set_size(name.len() as u64)?;
        marker.set_file_mode(0)?;
        marker.set_owner_uid(0)?;
        marker.set_owner_gid(0)?;
        marker.set_modified(0)?;
        marker.set_device(0, 0)?;
        marker.set_checksum();
        self.stream.write_block(&marker.to_block())?;

        for chunk in name.chunks(BLOCK_SIZE) {
            let mut block = Block::default();
            block.bytes[..chunk.len()].copy_from_slice(chunk);
            self.stream.write_block(&block)?;
        }
        Ok(())
    }

    /// Pack a regular file's payload: `ceil(size / 512)` blocks, the final
    /// one zero-padded.
    ///
    /// `size` is the length recorded in the already-written header, so
    /// exactly that many bytes are emitted even if the file changes
    /// underneath us: a shrunken file is padded out with zeros, a grown
    /// one is cut off at the recorded length.
    fn pack(&mut self, path: &Path, size: u64) -> Result<()> {
        let mut file = File::open(path).map_err(|source| ArchiveError::ReadSource {
            path: path.to_path_buf(),
            source,
        })?;

        let mut remaining = size;
        let mut block = Block::default();
        while remaining > 0 {
            let want = remaining.min(BLOCK_SIZE as u64) as usize;
            block.bytes.fill(0);
            let mut filled = 0;
            while filled < want {
                match file.read(&mut block.bytes[filled..want]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(source) => {
                        return Err(ArchiveError::ReadSource {
                            path: path.to_path_buf(),
                            source,
                        })
                    }
                }
            }
            if filled < want {
                debug!("{path:?} shrank while being packed");
            }
            self.stream.write_block(&block)?;
            remaining -= want as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::header::parse_octal;

    #[test]
    fn test_long_name_sequence_layout() {
        let name = vec![b'p'; 700];
        let mut data = Vec::new();
        {
            let mut stream = OutputStream::with_blocking_factor(&mut data, 20);
            Archiver::new(&mut stream).write_long_name(&name).unwrap();
            stream.close().unwrap();
        }

        // marker block plus ceil(700 / 512) = 2 payload blocks
        let marker = Header::from_block(&Block {
            bytes: data[..BLOCK_SIZE].try_into().unwrap(),
        });
        assert_eq!(marker.entry_type(), EntryType::GnuLongName);
        assert_eq!(marker.name_bytes(), LONG_NAME_SENTINEL);
        assert_eq!(marker.size().unwrap(), 700);
        assert_eq!(marker.size_in_blocks().unwrap(), 2);
        marker.verify_checksum().unwrap();
        assert_eq!(parse_octal(&marker.mode).unwrap(), 0);

        let payload = &data[BLOCK_SIZE..3 * BLOCK_SIZE];
        assert_eq!(&payload[..700], &name[..]);
        assert!(payload[700..].iter().all(|&b| b == 0));
    }
}
