//! On-disk inode layout and the file block-map (direct + single-indirect
//! pointers).
//!
//! ```text
//! offset  field            size
//! 0       inode_number     4
//! 4       file_type        4
//! 8       file_size        4
//! 12      direct[12]       48
//! 60      single_indirect  4
//! ------------------------------
//! 64 bytes total
//! ```

use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::{Error, Result};

/// Number of direct block pointers held inline in every inode.
pub const NDIRECT: usize = 12;

/// What kind of entity an inode represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    Invalid = 0,
    File = 1,
    Directory = 2,
}

impl InodeType {
    pub fn from_u32(v: u32) -> Result<Self> {
        match v {
            0 => Ok(InodeType::Invalid),
            1 => Ok(InodeType::File),
            2 => Ok(InodeType::Directory),
            _ => Err(Error::InodeOperation("unrecognized file_type value")),
        }
    }
}

/// The raw, fixed-size, on-disk inode record.
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct Dinode {
    pub inode_number: u32,
    pub file_type: u32,
    pub file_size: u32,
    pub direct_blocks: [u32; NDIRECT],
    pub single_indirect: u32,
}

const_assert_eq!(std::mem::size_of::<Dinode>(), 64);

impl Dinode {
    /// An all-zero, unallocated inode record (inode_number 0 marks a free
    /// slot in the inode table).
    pub fn empty() -> Self {
        Self::new_zeroed()
    }

    pub fn is_free(&self) -> bool {
        self.inode_number == 0
    }

    pub fn file_type(&self) -> Result<InodeType> {
        InodeType::from_u32(self.file_type)
    }

    pub fn set_file_type(&mut self, t: InodeType) {
        self.file_type = t as u32;
    }
}

/// Number of block-pointer slots held in one single-indirect block, given
/// the mount's block size. Each pointer is a `u32`.
pub fn indirect_pointers_per_block(block_size: u32) -> u32 {
    block_size / 4
}

/// Maximum file size, in blocks, representable by direct + single-indirect
/// pointers at the given block size.
pub fn max_file_blocks(block_size: u32) -> u32 {
    NDIRECT as u32 + indirect_pointers_per_block(block_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dinode_is_64_bytes() {
        assert_eq!(std::mem::size_of::<Dinode>(), 64);
    }

    #[test]
    fn empty_inode_is_free() {
        assert!(Dinode::empty().is_free());
    }

    #[test]
    fn file_type_roundtrips() {
        let mut d = Dinode::empty();
        d.set_file_type(InodeType::Directory);
        assert_eq!(d.file_type().unwrap(), InodeType::Directory);
    }

    #[test]
    fn rejects_unrecognized_file_type() {
        let mut d = Dinode::empty();
        d.file_type = 99;
        assert!(d.file_type().is_err());
    }

    #[test]
    fn max_file_blocks_matches_geometry() {
        assert_eq!(max_file_blocks(4096), 12 + 1024);
    }
}
