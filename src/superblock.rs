//! On-disk superblock and the layout computation run at `format` time.
//!
//! Disk layout, in block order:
//! ```text
//! [ superblock | inode bitmap | block bitmap | inode table | data blocks ]
//! ```
//! Block 1 always holds the superblock; everything else is computed from
//! the requested geometry.

use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::{Error, Result};
use crate::inode::Dinode;

pub const FS_MAGIC: u32 = 0x5346_4259; // "YBFS" as seen little-endian

/// The raw, fixed-size, on-disk superblock record.
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct RawSuperblock {
    pub magic: u32,
    pub block_size: u32,
    pub block_count: u32,
    pub inode_count: u32,
    pub inode_bitmap_start: u32,
    pub inode_bitmap_blocks: u32,
    pub block_bitmap_start: u32,
    pub block_bitmap_blocks: u32,
    pub inode_table_start: u32,
    pub inode_table_blocks: u32,
    pub data_start: u32,
    pub data_blocks: u32,
    /// Advisory free-inode count, refreshed from the inode bitmap whenever
    /// the superblock is flushed. Never consulted by the allocator itself
    /// (see [`Superblock`]'s doc comment).
    pub free_inodes: u32,
    /// Advisory free-block count, refreshed from the block bitmap whenever
    /// the superblock is flushed.
    pub free_blocks: u32,
}

const_assert_eq!(std::mem::size_of::<RawSuperblock>(), 56);

/// Mount-time geometry, derived from [`RawSuperblock`] and validated
/// against the constraints in this filesystem's on-disk format.
///
/// Deliberately omits `free_inodes`/`free_blocks`: those two fields are
/// advisory counters that live only in the on-disk record, recomputed from
/// the bitmaps each time the superblock is flushed (see
/// [`crate::fs::FileSystem::flush_superblock`]) and never consulted for
/// allocator correctness, so there is nothing for the in-memory mount
/// state to cache.
#[derive(Debug, Clone, Copy)]
pub struct Superblock {
    pub block_size: u32,
    pub block_count: u32,
    pub inode_count: u32,
    pub inode_bitmap_start: u32,
    pub inode_bitmap_blocks: u32,
    pub block_bitmap_start: u32,
    pub block_bitmap_blocks: u32,
    pub inode_table_start: u32,
    pub inode_table_blocks: u32,
    pub data_start: u32,
    pub data_blocks: u32,
}

/// Fraction of the image's total blocks reserved for the inode table.
const INODE_BLOCK_PERCENTAGE: u32 = 10;

impl Superblock {
    /// Computes a fresh layout for `format`, given only the requested
    /// total block count and block size. `inodeblocks` and `inode_count`
    /// are derived from that geometry, not supplied independently: the
    /// inode table always gets a fixed 10% of total blocks, and however
    /// many [`Dinode`] records fit in those blocks is however many inodes
    /// the image has room for. Block 1 is reserved for the superblock
    /// itself; everything after is packed tightly.
    pub fn compute(block_count: u32, block_size: u32) -> Result<Self> {
        // Per the on-disk format: S mod 64 == 0 so a Dinode (64 bytes) packs
        // exactly, and S mod 256 == 0 so a Dirent (256 bytes) packs exactly.
        // Requiring the stricter 256 implies the 64 check as well.
        if block_size < crate::disk::MIN_BLOCK_SIZE || block_size % 256 != 0 {
            return Err(Error::BadArgument("block_size must be a multiple of 256"));
        }
        if block_count == 0 {
            return Err(Error::BadArgument("block_count must be nonzero"));
        }

        let inode_table_blocks = block_count / INODE_BLOCK_PERCENTAGE;
        let inodes_per_block = (block_size as usize / std::mem::size_of::<Dinode>()) as u32;
        let inode_count = inode_table_blocks * inodes_per_block;
        if inode_table_blocks == 0 || inode_count == 0 {
            return Err(Error::BadArgument("block_count too small to reserve any inodes"));
        }

        let inode_bitmap_blocks = blocks_for_bits(inode_count, block_size);
        let block_bitmap_blocks = blocks_for_bits(block_count, block_size);

        let inode_bitmap_start = 2;
        let block_bitmap_start = inode_bitmap_start + inode_bitmap_blocks;
        let inode_table_start = block_bitmap_start + block_bitmap_blocks;
        let data_start = inode_table_start + inode_table_blocks;
        if data_start >= block_count {
            return Err(Error::BadArgument("block_count too small for this block_size"));
        }
        let data_blocks = block_count - data_start;

        Ok(Self {
            block_size,
            block_count,
            inode_count,
            inode_bitmap_start,
            inode_bitmap_blocks,
            block_bitmap_start,
            block_bitmap_blocks,
            inode_table_start,
            inode_table_blocks,
            data_start,
            data_blocks,
        })
    }

    /// Renders the on-disk record. `free_inodes`/`free_blocks` are left at
    /// `0` here; the caller (`FileSystem::flush_superblock`) overwrites them
    /// with a fresh bitmap `free_count()` immediately before writing, since
    /// those two counters have no home in [`Superblock`] itself.
    pub fn to_raw(&self) -> RawSuperblock {
        RawSuperblock {
            magic: FS_MAGIC,
            block_size: self.block_size,
            block_count: self.block_count,
            inode_count: self.inode_count,
            inode_bitmap_start: self.inode_bitmap_start,
            inode_bitmap_blocks: self.inode_bitmap_blocks,
            block_bitmap_start: self.block_bitmap_start,
            block_bitmap_blocks: self.block_bitmap_blocks,
            inode_table_start: self.inode_table_start,
            inode_table_blocks: self.inode_table_blocks,
            data_start: self.data_start,
            data_blocks: self.data_blocks,
            free_inodes: 0,
            free_blocks: 0,
        }
    }

    pub fn from_raw(raw: &RawSuperblock) -> Result<Self> {
        if raw.magic != FS_MAGIC {
            return Err(Error::Attach("bad superblock magic"));
        }
        Ok(Self {
            block_size: raw.block_size,
            block_count: raw.block_count,
            inode_count: raw.inode_count,
            inode_bitmap_start: raw.inode_bitmap_start,
            inode_bitmap_blocks: raw.inode_bitmap_blocks,
            block_bitmap_start: raw.block_bitmap_start,
            block_bitmap_blocks: raw.block_bitmap_blocks,
            inode_table_start: raw.inode_table_start,
            inode_table_blocks: raw.inode_table_blocks,
            data_start: raw.data_start,
            data_blocks: raw.data_blocks,
        })
    }

    /// Which block (1-based) holds inode `n`'s [`Dinode`] record, and the
    /// record's byte offset within that block.
    pub fn inode_location(&self, inode_number: u32) -> (u32, usize) {
        let inodes_per_block = self.block_size as usize / std::mem::size_of::<Dinode>();
        let index = inode_number as usize - 1;
        let block = self.inode_table_start + (index / inodes_per_block) as u32;
        let offset = (index % inodes_per_block) * std::mem::size_of::<Dinode>();
        (block, offset)
    }
}

fn blocks_for_bits(bits: u32, block_size: u32) -> u32 {
    let bits_per_block = block_size * 8;
    (bits + bits_per_block - 1) / bits_per_block
}
