//! Directory contents: fixed-size directory entries packed into a file's
//! data blocks, and the operations that maintain them.
//!
//! ```text
//! offset  field       size
//! 0       inode_num   4
//! 4       name[252]   252
//! --------------------------
//! 256 bytes total
//! ```
//! A directory is just a file whose content is an array of [`Dirent`]
//! records; `inode_num == 0` marks an unused slot available for reuse.

use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::{Error, Result};
use crate::fs::{FileSystem, InodeNumber};
use crate::inode::InodeType;
use crate::path::MAX_FILENAME_LEN;

/// The raw, fixed-size, on-disk directory entry record.
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct Dirent {
    pub inode_num: u32,
    pub name: [u8; MAX_FILENAME_LEN],
}

const_assert_eq!(std::mem::size_of::<Dirent>(), 256);

impl Dirent {
    pub fn is_free(&self) -> bool {
        self.inode_num == 0
    }

    pub fn name_str(&self) -> Result<&str> {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..len]).map_err(|_| Error::InvalidName)
    }

    fn set_name(&mut self, name: &str) -> Result<()> {
        if name.len() >= MAX_FILENAME_LEN {
            return Err(Error::InvalidName);
        }
        self.name = [0u8; MAX_FILENAME_LEN];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
        Ok(())
    }
}

impl FileSystem {
    fn dirents_per_block(&self) -> usize {
        self.superblock().block_size as usize / std::mem::size_of::<Dirent>()
    }

    /// Reads logical block `index` of `dir_inode` as an array of dirents,
    /// treating an unallocated (hole) block as all-free.
    fn read_dirent_block(&self, dinode: &crate::inode::Dinode, index: u32) -> Result<Vec<Dirent>> {
        let per_block = self.dirents_per_block();
        let block_no = self.block_map_get(dinode, index)?;
        if block_no == 0 {
            return Ok(vec![Dirent::new_zeroed(); per_block]);
        }
        let mut buf = vec![0u8; self.superblock().block_size as usize];
        self.disk.read(block_no, &mut buf)?;
        Ok(buf
            .chunks_exact(std::mem::size_of::<Dirent>())
            .map(|c| Dirent::read_from(c).unwrap())
            .collect())
    }

    fn write_dirent_block(&mut self, dinode: &mut crate::inode::Dinode, index: u32, entries: &[Dirent]) -> Result<()> {
        let block_no = self.block_map_alloc(dinode, index)?;
        let mut buf = vec![0u8; self.superblock().block_size as usize];
        for (i, e) in entries.iter().enumerate() {
            let off = i * std::mem::size_of::<Dirent>();
            buf[off..off + std::mem::size_of::<Dirent>()].copy_from_slice(e.as_bytes());
        }
        self.disk.write(block_no, &buf)
    }

    fn blocks_in_use(&self, dinode: &crate::inode::Dinode) -> u32 {
        let per_block = self.superblock().block_size;
        if per_block == 0 {
            0
        } else {
            (dinode.file_size + per_block - 1) / per_block
        }
    }

    /// Looks up `name` among `dir_inode`'s children. Returns
    /// [`Error::NotFound`] if no entry matches.
    pub fn dir_lookup(&self, dir_inode: InodeNumber, name: &str) -> Result<InodeNumber> {
        let dinode = self.read_inode(dir_inode)?;
        if dinode.file_type()? != InodeType::Directory {
            return Err(Error::InodeOperation("not a directory"));
        }
        let blocks = self.blocks_in_use(&dinode);
        for b in 0..blocks {
            for entry in self.read_dirent_block(&dinode, b)? {
                if !entry.is_free() && entry.name_str()? == name {
                    return Ok(entry.inode_num);
                }
            }
        }
        Err(Error::NotFound)
    }

    /// Scans `dir_inode`'s children for the one whose inode number is
    /// `child_inode`, returning its name. Used for path reconstruction
    /// when the caller already knows the parent.
    pub fn dir_reverse_lookup(&self, dir_inode: InodeNumber, child_inode: InodeNumber) -> Result<String> {
        let dinode = self.read_inode(dir_inode)?;
        if dinode.file_type()? != InodeType::Directory {
            return Err(Error::InodeOperation("not a directory"));
        }
        let blocks = self.blocks_in_use(&dinode);
        for b in 0..blocks {
            for entry in self.read_dirent_block(&dinode, b)? {
                if !entry.is_free() && entry.inode_num == child_inode {
                    return Ok(entry.name_str()?.to_string());
                }
            }
        }
        Err(Error::NotFound)
    }

    /// Adds a `(name, child_inode)` entry to `dir_inode`. Picks a slot per
    /// the standard policy: if the directory's size is an exact multiple
    /// of the block size (no partially-used block to scan), allocate a
    /// fresh block and use its first slot; otherwise scan existing blocks
    /// for the first freed (hole) slot.
    pub fn dir_add(&mut self, dir_inode: InodeNumber, name: &str, child_inode: InodeNumber) -> Result<()> {
        if self.dir_lookup(dir_inode, name).is_ok() {
            return Err(Error::DirentExists);
        }

        let mut dinode = self.read_inode(dir_inode)?;
        let per_block = self.dirents_per_block() as u32;
        let block_size = self.superblock().block_size;
        let dirent_size = std::mem::size_of::<Dirent>() as u32;

        // file_size tracks the logical slot high-water mark, one
        // dirent_size per `add` regardless of whether the slot came from a
        // hole or a fresh block — it is only a multiple of block_size when
        // every already-allocated block has had its full quota of `add`
        // calls land in it.
        let needs_fresh_block = dinode.file_size % block_size == 0;
        let blocks = self.blocks_in_use(&dinode);

        if !needs_fresh_block {
            for b in 0..blocks {
                let mut entries = self.read_dirent_block(&dinode, b)?;
                if let Some(slot) = entries.iter().position(|e| e.is_free()) {
                    let mut entry = Dirent::new_zeroed();
                    entry.inode_num = child_inode;
                    entry.set_name(name)?;
                    entries[slot] = entry;
                    self.write_dirent_block(&mut dinode, b, &entries)?;
                    dinode.file_size += dirent_size;
                    self.write_inode(dir_inode, &dinode)?;
                    return Ok(());
                }
            }
        }

        let mut entries = vec![Dirent::new_zeroed(); per_block as usize];
        let mut entry = Dirent::new_zeroed();
        entry.inode_num = child_inode;
        entry.set_name(name)?;
        entries[0] = entry;
        self.write_dirent_block(&mut dinode, blocks, &entries)?;
        dinode.file_size += dirent_size;
        self.write_inode(dir_inode, &dinode)?;
        Ok(())
    }

    /// Removes the entry named `name` from `dir_inode`, leaving a hole for
    /// later reuse (the block itself is not freed or compacted).
    pub fn dir_remove(&mut self, dir_inode: InodeNumber, name: &str) -> Result<()> {
        let mut dinode = self.read_inode(dir_inode)?;
        let blocks = self.blocks_in_use(&dinode);
        for b in 0..blocks {
            let mut entries = self.read_dirent_block(&dinode, b)?;
            if let Some(slot) = entries
                .iter()
                .position(|e| !e.is_free() && e.name_str().map(|n| n == name).unwrap_or(false))
            {
                entries[slot] = Dirent::new_zeroed();
                self.write_dirent_block(&mut dinode, b, &entries)?;
                self.write_inode(dir_inode, &dinode)?;
                return Ok(());
            }
        }
        Err(Error::NotFound)
    }

    /// Lists every non-free `(name, inode_num)` entry in `dir_inode`.
    pub fn dir_list(&self, dir_inode: InodeNumber) -> Result<Vec<(String, InodeNumber)>> {
        let dinode = self.read_inode(dir_inode)?;
        if dinode.file_type()? != InodeType::Directory {
            return Err(Error::InodeOperation("not a directory"));
        }
        let blocks = self.blocks_in_use(&dinode);
        let mut out = Vec::new();
        for b in 0..blocks {
            for entry in self.read_dirent_block(&dinode, b)? {
                if !entry.is_free() {
                    out.push((entry.name_str()?.to_string(), entry.inode_num));
                }
            }
        }
        Ok(out)
    }

    /// Whether `dir_inode` has no children besides the structural `.`/`..`
    /// entries every directory carries.
    pub fn dir_is_empty(&self, dir_inode: InodeNumber) -> Result<bool> {
        Ok(self
            .dir_list(dir_inode)?
            .iter()
            .all(|(name, _)| name == "." || name == ".."))
    }

    /// Creates a new, empty subdirectory named `name` under `parent_inode`,
    /// with its single-indirect block pre-allocated and `.`/`..` entries
    /// already populated. Rolls back the inode allocation if any step
    /// fails.
    pub fn dir_create(&mut self, parent_inode: InodeNumber, name: &str) -> Result<InodeNumber> {
        let child = self.inode_alloc(InodeType::Directory)?;
        if let Err(e) = self.alloc_single_indirect(child) {
            self.inode_free(child).ok();
            return Err(e);
        }
        if let Err(e) = self.dir_add(child, "..", parent_inode) {
            self.inode_free(child).ok();
            return Err(e);
        }
        if let Err(e) = self.dir_add(child, ".", child) {
            self.inode_free(child).ok();
            return Err(e);
        }
        if let Err(e) = self.dir_add(parent_inode, name, child) {
            self.inode_free(child).ok();
            return Err(e);
        }
        Ok(child)
    }

    /// Unlinks `name` from `parent_inode` and frees its inode, provided it
    /// is an empty directory. Returns [`Error::InodeOperation`] if it
    /// isn't empty.
    pub fn dir_delete_empty(&mut self, parent_inode: InodeNumber, name: &str) -> Result<()> {
        let child = self.dir_lookup(parent_inode, name)?;
        if !self.dir_is_empty(child)? {
            return Err(Error::InodeOperation("directory not empty"));
        }
        self.dir_remove(parent_inode, name)?;
        self.inode_free(child)?;
        Ok(())
    }
}

/// Prepares a freshly allocated root inode: pre-allocates its
/// single-indirect block, then adds `.` and `..`, both pointing at the
/// root itself, since the root has no parent to point to.
pub fn init_root(fs: &mut FileSystem, root_inode: InodeNumber) -> Result<()> {
    fs.alloc_single_indirect(root_inode)?;
    fs.dir_add(root_inode, ".", root_inode)?;
    fs.dir_add(root_inode, "..", root_inode)?;
    Ok(())
}
