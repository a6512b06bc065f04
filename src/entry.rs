//! Parsed archive entries.

use std::borrow::Cow;
use std::fmt;

use crate::header::{EntryType, Header, Result as HeaderResult};
use crate::stream::BlockPosition;

/// One archive member: a header plus the captured stream position of its
/// payload.
///
/// Entries are produced by [`Parser::next_file`] and own a deep copy of
/// their header, so they stay valid after the stream's record buffer has
/// been overwritten by further reads. The payload position is set once at
/// parse time and only used internally by [`Parser::read_file`] to re-seek;
/// it is not exposed for mutation.
///
/// [`Parser::next_file`]: crate::parser::Parser::next_file
/// [`Parser::read_file`]: crate::parser::Parser::read_file
#[derive(Clone)]
pub struct Entry {
    header: Header,
    path: Vec<u8>,
    position: BlockPosition,
}

impl Entry {
    pub(crate) fn new(header: Header, path: Vec<u8>, position: BlockPosition) -> Self {
        Self {
            header,
            path,
            position,
        }
    }

    /// The entry's header.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The resolved path: the payload of a preceding GNU long-name block
    /// when one was present, the header's name field otherwise.
    #[must_use]
    pub fn path_bytes(&self) -> &[u8] {
        &self.path
    }

    /// The resolved path as a lossy UTF-8 string.
    #[must_use]
    pub fn path_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.path)
    }

    /// The entry type.
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        self.header.entry_type()
    }

    /// The payload size in bytes.
    pub fn size(&self) -> HeaderResult<u64> {
        self.header.size()
    }

    /// Check if this is a regular file entry.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.entry_type().is_file()
    }

    /// Check if this is a directory entry.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.entry_type().is_dir()
    }

    /// Check if this is a symbolic link entry.
    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.entry_type().is_symlink()
    }

    /// Stream position where the payload begins.
    pub(crate) fn position(&self) -> BlockPosition {
        self.position
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("path", &self.path_lossy())
            .field("entry_type", &self.entry_type())
            .field("size", &self.size().ok())
            .field("position", &self.position)
            .finish()
    }
}
