//! Mount state and the block/inode allocator layer.
//!
//! `FileSystem` owns the attached [`Disk`], the in-memory superblock
//! geometry, the two allocator bitmaps (each independently lockable so
//! inode and block allocation never serialize against each other), the
//! directory-mutation mutex, the open-file table, and the per-inode
//! generation counter used to invalidate stale handle caches.

use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::Mutex;

use zerocopy::{AsBytes, FromBytes};

use crate::bitmap::Bitmap;
use crate::disk::Disk;
use crate::error::{Error, Result};
use crate::handle::OpenFileTable;
use crate::inode::{Dinode, InodeType};
use crate::superblock::{RawSuperblock, Superblock};

/// An inode number. `0` never denotes a valid inode; the root directory
/// is always inode `1`.
pub type InodeNumber = u32;

/// Inode number of the filesystem's root directory.
pub const ROOT_INODE: InodeNumber = 1;

pub struct FileSystem {
    pub(crate) disk: Disk,
    pub(crate) superblock: Superblock,
    pub(crate) inode_bitmap: Mutex<Bitmap>,
    pub(crate) block_bitmap: Mutex<Bitmap>,
    pub(crate) dir_lock: Mutex<()>,
    pub(crate) inode_generation: Mutex<HashMap<InodeNumber, u64>>,
    pub(crate) open_files: Mutex<OpenFileTable>,
}

impl FileSystem {
    /// Lays out a fresh filesystem on a newly created image at `path` and
    /// mounts it. Inode 1 (the root) is created as an empty directory.
    /// `inode_count` is derived from `block_count`/`block_size`, not
    /// supplied separately: the inode table always claims a fixed 10% of
    /// the image's blocks (see [`Superblock::compute`]).
    pub fn format(path: &FsPath, block_count: u32, block_size: u32) -> Result<Self> {
        let superblock = Superblock::compute(block_count, block_size)?;
        let disk = Disk::create(path, block_count, block_size)?;

        // The block bitmap covers every block on the disk (1-based block n
        // maps to bit n-1), matching invariant I2 literally rather than a
        // data-region-relative reindexing. The metadata prefix — superblock,
        // both bitmaps, and the inode table — is pre-marked used here so the
        // allocator never has to special-case it.
        let mut block_bitmap = Bitmap::new(superblock.block_count);
        for index in 0..superblock.data_start - 1 {
            block_bitmap.set(index)?;
        }

        let mut fs = Self {
            disk,
            superblock,
            inode_bitmap: Mutex::new(Bitmap::new(superblock.inode_count)),
            block_bitmap: Mutex::new(block_bitmap),
            dir_lock: Mutex::new(()),
            inode_generation: Mutex::new(HashMap::new()),
            open_files: Mutex::new(OpenFileTable::new()),
        };

        fs.zero_inode_table()?;
        let root = fs.inode_alloc(InodeType::Directory)?;
        debug_assert_eq!(root, ROOT_INODE);
        crate::directory::init_root(&mut fs, root)?;
        fs.flush_superblock()?;
        fs.flush_bitmaps()?;
        log::info!(
            "formatted blockfs image: block_count={block_count} block_size={block_size} inode_count={}",
            fs.superblock.inode_count
        );
        Ok(fs)
    }

    /// Attaches to an existing image file and reconstructs in-memory
    /// allocator state from its superblock and bitmaps.
    pub fn mount(path: &FsPath) -> Result<Self> {
        // Superblocks are fixed at 512 bytes minimum; probe with that to
        // read the raw record, then reattach at the real block size.
        let probe = Disk::attach(path, crate::disk::MIN_BLOCK_SIZE)?;
        let mut raw_buf = vec![0u8; crate::disk::MIN_BLOCK_SIZE as usize];
        probe.read(1, &mut raw_buf)?;
        let raw = RawSuperblock::read_from_prefix(&raw_buf)
            .ok_or(Error::Attach("superblock record truncated"))?;
        let superblock = Superblock::from_raw(&raw)?;
        probe.detach()?;

        let disk = Disk::attach(path, superblock.block_size)?;
        if disk.blocks() != superblock.block_count {
            return Err(Error::Attach("image size disagrees with superblock"));
        }

        let inode_bitmap = read_bitmap(
            &disk,
            superblock.inode_bitmap_start,
            superblock.inode_bitmap_blocks,
            superblock.inode_count,
        )?;
        let block_bitmap = read_bitmap(
            &disk,
            superblock.block_bitmap_start,
            superblock.block_bitmap_blocks,
            superblock.block_count,
        )?;

        log::info!("mounted blockfs image at {path:?}");
        Ok(Self {
            disk,
            superblock,
            inode_bitmap: Mutex::new(inode_bitmap),
            block_bitmap: Mutex::new(block_bitmap),
            dir_lock: Mutex::new(()),
            inode_generation: Mutex::new(HashMap::new()),
            open_files: Mutex::new(OpenFileTable::new()),
        })
    }

    /// Flushes both allocator bitmaps and the superblock back to disk and
    /// detaches, making unmount the durability point for allocator state.
    pub fn unmount(self) -> Result<()> {
        self.flush_bitmaps()?;
        self.flush_superblock()?;
        self.disk.detach()?;
        log::info!("unmounted blockfs image");
        Ok(())
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    fn zero_inode_table(&mut self) -> Result<()> {
        let zero_block = vec![0u8; self.superblock.block_size as usize];
        for i in 0..self.superblock.inode_table_blocks {
            self.disk
                .write(self.superblock.inode_table_start + i, &zero_block)?;
        }
        Ok(())
    }

    /// Writes the superblock record, refreshing the advisory
    /// `free_inodes`/`free_blocks` counts from the current bitmap state.
    /// Per spec.md §4.3, these counts are advisory only — the allocator
    /// never reads them back; they exist for external inspection.
    fn flush_superblock(&self) -> Result<()> {
        let mut block = vec![0u8; self.superblock.block_size as usize];
        let mut raw = self.superblock.to_raw();
        raw.free_inodes = self.inode_bitmap.lock().unwrap().free_count();
        raw.free_blocks = self.block_bitmap.lock().unwrap().free_count();
        block[..std::mem::size_of::<RawSuperblock>()].copy_from_slice(raw.as_bytes());
        self.disk.write(1, &block)
    }

    fn flush_bitmaps(&self) -> Result<()> {
        write_bitmap(
            &self.disk,
            &self.inode_bitmap.lock().unwrap(),
            self.superblock.inode_bitmap_start,
            self.superblock.inode_bitmap_blocks,
        )?;
        write_bitmap(
            &self.disk,
            &self.block_bitmap.lock().unwrap(),
            self.superblock.block_bitmap_start,
            self.superblock.block_bitmap_blocks,
        )
    }

    // --- inode allocation -------------------------------------------------

    /// Allocates a free inode, initializes it to an empty record of the
    /// given type, and writes it back. Returns the new inode number.
    pub fn inode_alloc(&mut self, kind: InodeType) -> Result<InodeNumber> {
        let index = self.inode_bitmap.lock().unwrap().alloc_first_free()?;
        let inode_number = index + 1;
        let mut dinode = Dinode::empty();
        dinode.inode_number = inode_number;
        dinode.set_file_type(kind);
        if let Err(e) = self.write_inode(inode_number, &dinode) {
            self.inode_bitmap.lock().unwrap().unset(index).ok();
            return Err(e);
        }
        log::trace!("inode_alloc: allocated inode {inode_number} as {kind:?}");
        Ok(inode_number)
    }

    /// Frees every data block owned by `inode_number`, then frees the
    /// inode slot itself.
    pub fn inode_free(&mut self, inode_number: InodeNumber) -> Result<()> {
        let mut dinode = self.read_inode(inode_number)?;
        self.free_all_blocks(&mut dinode)?;
        dinode = Dinode::empty();
        self.write_inode(inode_number, &dinode)?;
        self.inode_bitmap
            .lock()
            .unwrap()
            .unset(inode_number - 1)
            .map_err(|_| Error::InodeOperation("inode number out of range"))?;
        log::trace!("inode_free: freed inode {inode_number}");
        Ok(())
    }

    pub fn read_inode(&self, inode_number: InodeNumber) -> Result<Dinode> {
        if inode_number == 0 || inode_number > self.superblock.inode_count {
            return Err(Error::InodeOperation("inode number out of range"));
        }
        let (block, offset) = self.superblock.inode_location(inode_number);
        let mut buf = vec![0u8; self.superblock.block_size as usize];
        self.disk.read(block, &mut buf)?;
        Dinode::read_from(&buf[offset..offset + std::mem::size_of::<Dinode>()])
            .ok_or(Error::InodeOperation("corrupt inode record"))
    }

    pub fn write_inode(&self, inode_number: InodeNumber, dinode: &Dinode) -> Result<()> {
        if inode_number == 0 || inode_number > self.superblock.inode_count {
            return Err(Error::InodeOperation("inode number out of range"));
        }
        let (block, offset) = self.superblock.inode_location(inode_number);
        let mut buf = vec![0u8; self.superblock.block_size as usize];
        self.disk.read(block, &mut buf)?;
        buf[offset..offset + std::mem::size_of::<Dinode>()].copy_from_slice(dinode.as_bytes());
        self.disk.write(block, &buf)?;
        self.bump_generation(inode_number);
        Ok(())
    }

    /// Bumps the generation counter for `inode_number`, invalidating any
    /// handle's cached copy read at an earlier generation.
    pub fn bump_generation(&self, inode_number: InodeNumber) {
        let mut gens = self.inode_generation.lock().unwrap();
        *gens.entry(inode_number).or_insert(0) += 1;
    }

    pub fn generation_of(&self, inode_number: InodeNumber) -> u64 {
        *self
            .inode_generation
            .lock()
            .unwrap()
            .get(&inode_number)
            .unwrap_or(&0)
    }

    // --- block allocation ---------------------------------------------

    /// Allocates the lowest-numbered free block on the whole disk. The
    /// metadata prefix (superblock, bitmaps, inode table) is pre-marked used
    /// in the bitmap at format time, so a first-fit scan naturally lands in
    /// the data region without the allocator special-casing it.
    pub fn block_alloc(&mut self) -> Result<u32> {
        let index = self.block_bitmap.lock().unwrap().alloc_first_free()?;
        let block_no = index + 1;
        let zero = vec![0u8; self.superblock.block_size as usize];
        self.disk.write(block_no, &zero)?;
        Ok(block_no)
    }

    /// Clears `block_no`'s bit in the whole-disk block bitmap. Does not
    /// zero the block's content (see [`FileSystem::block_alloc`], which
    /// zeroes on allocation instead).
    pub fn block_free(&mut self, block_no: u32) -> Result<()> {
        if block_no < self.superblock.data_start {
            return Err(Error::BadArgument("block number below data region"));
        }
        let index = block_no - 1;
        self.block_bitmap
            .lock()
            .unwrap()
            .unset(index)
            .map_err(|_| Error::BitmapOperation("block index out of range"))
    }

    // --- block map (direct + single-indirect) --------------------------

    fn indirect_pointers_per_block(&self) -> u32 {
        crate::inode::indirect_pointers_per_block(self.superblock.block_size)
    }

    fn read_indirect(&self, single_indirect: u32) -> Result<Vec<u32>> {
        let mut buf = vec![0u8; self.superblock.block_size as usize];
        self.disk.read(single_indirect, &mut buf)?;
        Ok(buf
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect())
    }

    fn write_indirect(&self, single_indirect: u32, pointers: &[u32]) -> Result<()> {
        let mut buf = vec![0u8; self.superblock.block_size as usize];
        for (i, p) in pointers.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&p.to_le_bytes());
        }
        self.disk.write(single_indirect, &buf)
    }

    /// Allocates and zeroes `inode_number`'s single-indirect block if it
    /// doesn't already have one. Directories get this eagerly at creation,
    /// ahead of their first directory-entry write; regular files still
    /// pick it up lazily through [`FileSystem::block_map_alloc`] once they
    /// grow past the direct pointers.
    pub fn alloc_single_indirect(&mut self, inode_number: InodeNumber) -> Result<()> {
        let mut dinode = self.read_inode(inode_number)?;
        if dinode.single_indirect == 0 {
            dinode.single_indirect = self.block_alloc()?;
            self.write_inode(inode_number, &dinode)?;
        }
        Ok(())
    }

    /// Returns the on-disk block number for logical block `index` within
    /// `dinode`, or `0` if it's a hole (never allocated).
    pub fn block_map_get(&self, dinode: &Dinode, index: u32) -> Result<u32> {
        if (index as usize) < crate::inode::NDIRECT {
            return Ok(dinode.direct_blocks[index as usize]);
        }
        if dinode.single_indirect == 0 {
            return Ok(0);
        }
        let rel = index as usize - crate::inode::NDIRECT;
        if rel as u32 >= self.indirect_pointers_per_block() {
            return Err(Error::BadArgument("logical block index exceeds max file size"));
        }
        let pointers = self.read_indirect(dinode.single_indirect)?;
        Ok(pointers[rel])
    }

    /// Ensures logical block `index` within `dinode` is backed by an
    /// allocated data block, allocating one (and, lazily, the
    /// single-indirect block itself past the 12th direct slot) if needed.
    /// Returns the block number.
    pub fn block_map_alloc(&mut self, dinode: &mut Dinode, index: u32) -> Result<u32> {
        if (index as usize) < crate::inode::NDIRECT {
            let existing = dinode.direct_blocks[index as usize];
            if existing != 0 {
                return Ok(existing);
            }
            let block_no = self.block_alloc()?;
            dinode.direct_blocks[index as usize] = block_no;
            return Ok(block_no);
        }

        let rel = index as usize - crate::inode::NDIRECT;
        if rel as u32 >= self.indirect_pointers_per_block() {
            return Err(Error::BadArgument("logical block index exceeds max file size"));
        }

        if dinode.single_indirect == 0 {
            let indirect_block = match self.block_alloc() {
                Ok(b) => b,
                Err(e) => return Err(e),
            };
            dinode.single_indirect = indirect_block;
        }

        let mut pointers = self.read_indirect(dinode.single_indirect)?;
        if pointers[rel] != 0 {
            return Ok(pointers[rel]);
        }
        let block_no = match self.block_alloc() {
            Ok(b) => b,
            Err(e) => return Err(e),
        };
        pointers[rel] = block_no;
        self.write_indirect(dinode.single_indirect, &pointers)?;
        Ok(block_no)
    }

    /// Frees every block owned by `dinode` (direct, the single-indirect
    /// table, and every block it points to) and zeroes all pointers.
    pub fn free_all_blocks(&mut self, dinode: &mut Dinode) -> Result<()> {
        for slot in dinode.direct_blocks.iter_mut() {
            if *slot != 0 {
                self.block_free(*slot)?;
                *slot = 0;
            }
        }
        if dinode.single_indirect != 0 {
            let pointers = self.read_indirect(dinode.single_indirect)?;
            for p in pointers {
                if p != 0 {
                    self.block_free(p)?;
                }
            }
            self.block_free(dinode.single_indirect)?;
            dinode.single_indirect = 0;
        }
        dinode.file_size = 0;
        Ok(())
    }

    /// Number of data blocks currently in use by `dinode`: direct pointers
    /// in use plus indirect-pointed blocks in use, not counting the
    /// indirect table block itself.
    pub fn block_count_of(&self, dinode: &Dinode) -> Result<u32> {
        let mut count = dinode.direct_blocks.iter().filter(|&&b| b != 0).count() as u32;
        if dinode.single_indirect != 0 {
            let pointers = self.read_indirect(dinode.single_indirect)?;
            count += pointers.iter().filter(|&&b| b != 0).count() as u32;
        }
        Ok(count)
    }
}

fn read_bitmap(disk: &Disk, start: u32, blocks: u32, bits: u32) -> Result<Bitmap> {
    let mut buf = vec![0u8; (blocks * disk.block_size()) as usize];
    for i in 0..blocks {
        let bs = disk.block_size() as usize;
        disk.read(start + i, &mut buf[i as usize * bs..(i as usize + 1) * bs])?;
    }
    Bitmap::from_bytes(&buf, bits)
}

fn write_bitmap(disk: &Disk, bitmap: &Bitmap, start: u32, blocks: u32) -> Result<()> {
    let bs = disk.block_size() as usize;
    let mut buf = vec![0u8; (blocks as usize) * bs];
    let raw = bitmap.as_bytes();
    buf[..raw.len().min(buf.len())].copy_from_slice(&raw[..raw.len().min(buf.len())]);
    for i in 0..blocks {
        disk.write(start + i, &buf[i as usize * bs..(i as usize + 1) * bs])?;
    }
    Ok(())
}
