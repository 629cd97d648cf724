//! Block-addressable backing store over a host file.
//!
//! Disk layout:
//!   [ superblock | inode bitmap | block bitmap | inode table | data blocks ]
//!
//! Block numbers are 1-based throughout; block 0 is the sentinel "no
//! block." Every read/write is exactly `block_size` bytes, issued with
//! positional I/O so no shared file cursor is ever touched — concurrent
//! callers may read and write distinct blocks without any lock here.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::{Error, Result};

/// Blocks are 1-based; anything smaller than this is rejected outright.
pub const MIN_BLOCK_SIZE: u32 = 512;

/// An attached disk image: a host file viewed as `blocks` fixed-size
/// blocks of `block_size` bytes each.
#[derive(Debug)]
pub struct Disk {
    file: File,
    block_size: u32,
    blocks: u32,
}

impl Disk {
    /// Opens the image file at `path`, verifying that its size is an exact
    /// multiple of `block_size` and that `block_size` is large enough to
    /// hold a superblock.
    pub fn attach(path: &Path, block_size: u32) -> Result<Self> {
        if block_size < MIN_BLOCK_SIZE {
            return Err(Error::Attach("block_size below MIN_BLOCK_SIZE"));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|_| Error::Attach("failed to open image file"))?;

        let len = file
            .metadata()
            .map_err(|_| Error::Attach("failed to stat image file"))?
            .len();

        if len % u64::from(block_size) != 0 {
            return Err(Error::Attach("image size is not a multiple of block_size"));
        }

        let blocks = (len / u64::from(block_size)) as u32;
        log::debug!("attached disk: blocks={blocks} block_size={block_size}");

        Ok(Self {
            file,
            block_size,
            blocks,
        })
    }

    /// Creates a new zero-filled image of `blocks * block_size` bytes at
    /// `path` and attaches it. This stands in for the out-of-scope external
    /// image pre-allocator, needed here so tests can build a disk end to
    /// end without one.
    pub fn create(path: &Path, blocks: u32, block_size: u32) -> Result<Self> {
        if block_size < MIN_BLOCK_SIZE {
            return Err(Error::Attach("block_size below MIN_BLOCK_SIZE"));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|_| Error::Attach("failed to create image file"))?;
        file.set_len(u64::from(blocks) * u64::from(block_size))
            .map_err(|_| Error::Attach("failed to size image file"))?;

        Ok(Self {
            file,
            block_size,
            blocks,
        })
    }

    /// Closes the underlying file handle. After this call the `Disk` must
    /// not be used again; dropping it has the same effect.
    pub fn detach(self) -> Result<()> {
        drop(self.file);
        Ok(())
    }

    /// Total number of blocks in the image.
    pub fn blocks(&self) -> u32 {
        self.blocks
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    fn offset_of(&self, block_no: u32) -> Result<u64> {
        if block_no == 0 || block_no > self.blocks {
            return Err(Error::BadArgument("block number out of range"));
        }
        Ok(u64::from(block_no - 1) * u64::from(self.block_size))
    }

    /// Reads exactly one block into `buf`, which must be `block_size` bytes.
    pub fn read(&self, block_no: u32, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.block_size as usize);
        let offset = self.offset_of(block_no)?;
        self.file
            .read_exact_at(buf, offset)
            .map_err(Error::DiskIo)?;
        Ok(())
    }

    /// Writes exactly one block from `buf`, which must be `block_size` bytes.
    pub fn write(&self, block_no: u32, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.block_size as usize);
        let offset = self.offset_of(block_no)?;
        self.file
            .write_all_at(buf, offset)
            .map_err(Error::DiskIo)?;
        Ok(())
    }

    /// Reads a contiguous `[start, end]` run of blocks into `buf`, which
    /// must be exactly `(end - start + 1) * block_size` bytes. Stops on
    /// the first error.
    pub fn read_range(&self, start: u32, end: u32, buf: &mut [u8]) -> Result<()> {
        let bs = self.block_size as usize;
        for (i, block_no) in (start..=end).enumerate() {
            self.read(block_no, &mut buf[i * bs..(i + 1) * bs])?;
        }
        Ok(())
    }

    /// Writes a contiguous `[start, end]` run of blocks from `buf`. Stops
    /// on the first error.
    pub fn write_range(&self, start: u32, end: u32, buf: &[u8]) -> Result<()> {
        let bs = self.block_size as usize;
        for (i, block_no) in (start..=end).enumerate() {
            self.write(block_no, &buf[i * bs..(i + 1) * bs])?;
        }
        Ok(())
    }
}
