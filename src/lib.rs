//! A small UNIX-style block filesystem living inside a single fixed-size
//! image file.
//!
//! A [`FileSystem`] owns exactly one attached image: a superblock, two
//! independent bitmap allocators (inodes and data blocks), an inode
//! table, and a flat region of data blocks. Directories are regular files
//! whose content is an array of fixed-size entries; regular files are
//! addressed through 12 direct block pointers plus one single-indirect
//! block, both allocated lazily.
//!
//! ```no_run
//! use blockfs::{FileSystem, OpenFlags, ROOT_INODE};
//!
//! # fn main() -> blockfs::Result<()> {
//! let mut fs = FileSystem::format("image.bfs".as_ref(), 1024, 4096)?;
//! let file = fs.touch(ROOT_INODE, "/hello.txt")?;
//! let fd = fs.handle_open(file, OpenFlags::WRONLY)?;
//! fs.handle_write(fd, b"hi")?;
//! fs.handle_close(fd)?;
//! assert_eq!(fs.cat(ROOT_INODE, "/hello.txt")?, b"hi");
//! fs.unmount()?;
//! # Ok(())
//! # }
//! ```

mod api;
mod bitmap;
mod directory;
mod disk;
mod error;
mod fs;
mod handle;
mod inode;
mod path;
mod superblock;

pub use api::{DirEntry, Stat};
pub use error::{Error, Result};
pub use fs::{FileSystem, InodeNumber, ROOT_INODE};
pub use handle::{Fd, OpenFlags, Whence, MAX_OPEN_FILES};
pub use inode::InodeType;
pub use path::Path;
