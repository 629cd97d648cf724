//! Typed error kinds for every layer of the filesystem.
//!
//! Each layer surfaces its own kind unchanged; the high-level API (see
//! [`crate::api`]) is the only place that turns a bare "not found" signal
//! from a lower layer into a distinction between [`Error::NotFound`] and
//! [`Error::InvalidPath`].

use std::fmt;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every typed error kind a `blockfs` operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A read or write to the backing image file failed.
    #[error("disk i/o error: {0}")]
    DiskIo(#[from] std::io::Error),

    /// A caller passed a malformed or out-of-range argument.
    #[error("bad argument: {0}")]
    BadArgument(&'static str),

    /// An in-memory allocation could not be satisfied.
    #[error("out of memory")]
    NoMemory,

    /// A bitmap index was out of range, or a bitmap operation failed.
    #[error("bitmap operation failed: {0}")]
    BitmapOperation(&'static str),

    /// An inode operation was attempted on an invalid or unreadable inode.
    #[error("inode operation failed: {0}")]
    InodeOperation(&'static str),

    /// A filename or path component violated the naming rule.
    #[error("invalid name")]
    InvalidName,

    /// `touch`/`mkdir`/`dir_add` target a name that already exists.
    #[error("directory entry already exists")]
    DirentExists,

    /// Invariant violation that should be unreachable in correct code.
    #[error("internal error: {0}")]
    Internal(&'static str),

    /// A path did not resolve to any inode.
    #[error("not found")]
    NotFound,

    /// The inode or block bitmap has no free slot.
    #[error("no space left")]
    NoSpace,

    /// `open` was called with an invalid combination of flags.
    #[error("invalid file flags")]
    InvalidFileFlags,

    /// `seek` was called with an unrecognized whence value.
    #[error("invalid whence")]
    InvalidWhence,

    /// A path failed to parse, or an interior component was not a directory.
    #[error("invalid path")]
    InvalidPath,

    /// Opening the backing image file failed.
    #[error("attach failed: {0}")]
    Attach(&'static str),

    /// Closing the backing image file failed.
    #[error("detach failed: {0}")]
    Detach(&'static str),

    /// The open-file table has no free slot.
    #[error("too many open files")]
    TooManyOpenFiles,
}

impl Error {
    /// True for errors that represent "no such entity" rather than a hard
    /// failure — used by the high-level API to decide between `NotFound`
    /// and `InvalidPath` when translating a lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}

/// `BadIndex` is reported through [`Error::BitmapOperation`] with a fixed
/// message so call sites don't need to format one each time.
pub(crate) fn bad_index() -> Error {
    Error::BitmapOperation("index out of range")
}

impl fmt::Display for crate::inode::InodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            crate::inode::InodeType::Invalid => "invalid",
            crate::inode::InodeType::File => "file",
            crate::inode::InodeType::Directory => "directory",
        };
        f.write_str(s)
    }
}
