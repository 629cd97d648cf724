//! Open file handles: flags, seek/read/write, and the open-file table.
//!
//! Each `open` call gets its own [`Handle`] and its own cursor; several
//! handles may refer to the same inode simultaneously. A handle caches
//! its inode record and the generation it was read at
//! ([`FileSystem::bump_generation`]); any access that finds its cached
//! generation stale re-reads the inode before proceeding, which is what
//! makes concurrent writers through different handles visible to each
//! other without a shared inode table.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::fs::{FileSystem, InodeNumber};
use crate::inode::{Dinode, InodeType};

bitflags! {
    /// Flags accepted by [`FileSystem::handle_open`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const RDONLY = 1 << 0;
        const WRONLY = 1 << 1;
        const RDWR   = 1 << 2;
        const CREATE = 1 << 3;
        const APPEND = 1 << 4;
        const TRUNC  = 1 << 5;
    }
}

impl OpenFlags {
    const ACCESS_MASK: OpenFlags = OpenFlags::RDONLY.union(OpenFlags::WRONLY).union(OpenFlags::RDWR);

    /// Validates that exactly one access mode is present and that no
    /// contradictory combination was requested (`RDONLY` with `APPEND` or
    /// `TRUNC`; `APPEND` with `TRUNC`).
    pub fn validate(self) -> Result<()> {
        if !OpenFlags::all().contains(self) {
            return Err(Error::InvalidFileFlags);
        }
        let access = self & Self::ACCESS_MASK;
        if access != OpenFlags::RDONLY && access != OpenFlags::WRONLY && access != OpenFlags::RDWR {
            return Err(Error::InvalidFileFlags);
        }
        if access == OpenFlags::RDONLY && (self.contains(OpenFlags::APPEND) || self.contains(OpenFlags::TRUNC)) {
            return Err(Error::InvalidFileFlags);
        }
        if self.contains(OpenFlags::APPEND) && self.contains(OpenFlags::TRUNC) {
            return Err(Error::InvalidFileFlags);
        }
        Ok(())
    }

    pub fn readable(self) -> bool {
        self.intersects(OpenFlags::RDONLY | OpenFlags::RDWR)
    }

    pub fn writable(self) -> bool {
        self.intersects(OpenFlags::WRONLY | OpenFlags::RDWR)
    }
}

/// Origin for a [`FileSystem::handle_seek`] offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

impl Whence {
    pub fn from_i32(v: i32) -> Result<Self> {
        match v {
            0 => Ok(Whence::Start),
            1 => Ok(Whence::Current),
            2 => Ok(Whence::End),
            _ => Err(Error::InvalidWhence),
        }
    }
}

/// An open-file-table slot identifier.
pub type Fd = u32;

/// Upper bound on simultaneously open handles, guarding against unbounded
/// table growth.
pub const MAX_OPEN_FILES: usize = 1024;

struct HandleState {
    offset: u64,
    cached_inode: Dinode,
    cached_generation: u64,
}

/// A single open file handle: an inode, the flags it was opened with, and
/// an independently lockable cursor/cache.
pub struct Handle {
    pub(crate) inode_number: InodeNumber,
    pub(crate) flags: OpenFlags,
    state: RwLock<HandleState>,
}

impl Handle {
    fn refresh_if_stale(&self, fs: &FileSystem) -> Result<()> {
        let current_gen = fs.generation_of(self.inode_number);
        let stale = self.state.read().unwrap().cached_generation != current_gen;
        if stale {
            let fresh = fs.read_inode(self.inode_number)?;
            let mut state = self.state.write().unwrap();
            state.cached_inode = fresh;
            state.cached_generation = current_gen;
        }
        Ok(())
    }
}

/// The mount-wide table of open handles.
pub struct OpenFileTable {
    slots: HashMap<Fd, Arc<Handle>>,
    next_fd: Fd,
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next_fd: 1,
        }
    }
}

impl Default for OpenFileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem {
    /// Opens `inode_number` for I/O with `flags`, returning a new file
    /// descriptor. `TRUNC` discards existing content immediately;
    /// `APPEND` starts the cursor at end-of-file.
    pub fn handle_open(&mut self, inode_number: InodeNumber, flags: OpenFlags) -> Result<Fd> {
        flags.validate()?;

        let mut dinode = self.read_inode(inode_number)?;
        if dinode.file_type()? != InodeType::File {
            return Err(Error::InodeOperation("not a regular file"));
        }

        if flags.contains(OpenFlags::TRUNC) {
            self.free_all_blocks(&mut dinode)?;
            self.write_inode(inode_number, &dinode)?;
        }

        let offset = if flags.contains(OpenFlags::APPEND) {
            dinode.file_size as u64
        } else {
            0
        };

        let handle = Arc::new(Handle {
            inode_number,
            flags,
            state: RwLock::new(HandleState {
                offset,
                cached_generation: self.generation_of(inode_number),
                cached_inode: dinode,
            }),
        });

        let mut table = self.open_files.lock().unwrap();
        if table.slots.len() >= MAX_OPEN_FILES {
            return Err(Error::TooManyOpenFiles);
        }
        let fd = table.next_fd;
        table.next_fd += 1;
        table.slots.insert(fd, handle);
        log::trace!("handle_open: inode {inode_number} -> fd {fd}");
        Ok(fd)
    }

    fn handle_of(&self, fd: Fd) -> Result<Arc<Handle>> {
        self.open_files
            .lock()
            .unwrap()
            .slots
            .get(&fd)
            .cloned()
            .ok_or(Error::BadArgument("no such open file descriptor"))
    }

    /// Closes `fd`. The handle's cached state is simply dropped; nothing
    /// further needs flushing since every write already went straight to
    /// disk.
    pub fn handle_close(&mut self, fd: Fd) -> Result<()> {
        self.open_files
            .lock()
            .unwrap()
            .slots
            .remove(&fd)
            .map(|_| ())
            .ok_or(Error::BadArgument("no such open file descriptor"))
    }

    /// Reads up to `buf.len()` bytes starting at the handle's current
    /// offset, stopping at end-of-file, and advances the offset by the
    /// number of bytes actually read.
    pub fn handle_read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let handle = self.handle_of(fd)?;
        if !handle.flags.readable() {
            return Err(Error::InvalidFileFlags);
        }
        handle.refresh_if_stale(self)?;

        let mut state = handle.state.write().unwrap();
        let file_size = state.cached_inode.file_size as u64;
        if state.offset >= file_size {
            return Ok(0);
        }

        let want = buf.len() as u64;
        let available = file_size - state.offset;
        let to_read = want.min(available) as usize;

        let block_size = self.superblock().block_size as u64;
        let mut bytes_read = 0usize;
        while bytes_read < to_read {
            let pos = state.offset + bytes_read as u64;
            let logical_block = (pos / block_size) as u32;
            let in_block_off = (pos % block_size) as usize;
            let chunk = ((block_size as usize - in_block_off)).min(to_read - bytes_read);

            let block_no = self.block_map_get(&state.cached_inode, logical_block)?;
            if block_no == 0 {
                buf[bytes_read..bytes_read + chunk].fill(0);
            } else {
                let mut block_buf = vec![0u8; block_size as usize];
                self.disk.read(block_no, &mut block_buf)?;
                buf[bytes_read..bytes_read + chunk]
                    .copy_from_slice(&block_buf[in_block_off..in_block_off + chunk]);
            }
            bytes_read += chunk;
        }

        state.offset += bytes_read as u64;
        Ok(bytes_read)
    }

    /// Writes `buf` at the handle's current offset, allocating new blocks
    /// (and zero-filling any hole left behind a forward seek) as needed,
    /// and advances the offset and file size accordingly. Rejects the call
    /// outright if it would grow the file past the geometry's maximum
    /// size; a short write (fewer bytes than requested) can still happen
    /// if the block allocator runs out of space partway through.
    pub fn handle_write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize> {
        let handle = self.handle_of(fd)?;
        if !handle.flags.writable() {
            return Err(Error::InvalidFileFlags);
        }
        handle.refresh_if_stale(self)?;

        let block_size = self.superblock().block_size as u64;
        let max_size = self.max_file_size();
        let mut state = handle.state.write().unwrap();

        if handle.flags.contains(OpenFlags::APPEND) {
            state.offset = state.cached_inode.file_size as u64;
        }

        let end = state
            .offset
            .checked_add(buf.len() as u64)
            .ok_or(Error::BadArgument("write size overflows offset"))?;
        if end > max_size {
            return Err(Error::BadArgument("write would exceed maximum file size"));
        }

        let mut dinode = state.cached_inode;

        let mut bytes_written = 0usize;
        while bytes_written < buf.len() {
            let pos = state.offset + bytes_written as u64;
            let logical_block = (pos / block_size) as u32;
            let in_block_off = (pos % block_size) as usize;
            let chunk = (block_size as usize - in_block_off).min(buf.len() - bytes_written);

            let block_no = match self.block_map_alloc(&mut dinode, logical_block) {
                Ok(b) => b,
                Err(Error::NoSpace) => {
                    log::warn!(
                        "handle_write: allocator exhausted after {bytes_written} bytes, returning short write"
                    );
                    break;
                }
                Err(e) => return Err(e),
            };

            let mut block_buf = vec![0u8; block_size as usize];
            if chunk < block_size as usize {
                self.disk.read(block_no, &mut block_buf)?;
            }
            block_buf[in_block_off..in_block_off + chunk]
                .copy_from_slice(&buf[bytes_written..bytes_written + chunk]);
            self.disk.write(block_no, &block_buf)?;

            bytes_written += chunk;
        }

        state.offset += bytes_written as u64;
        if state.offset > dinode.file_size as u64 {
            dinode.file_size = state.offset as u32;
        }
        self.write_inode(handle.inode_number, &dinode)?;
        state.cached_inode = dinode;
        state.cached_generation = self.generation_of(handle.inode_number);

        Ok(bytes_written)
    }

    fn max_file_size(&self) -> u64 {
        crate::inode::max_file_blocks(self.superblock().block_size) as u64
            * self.superblock().block_size as u64
    }

    /// Repositions the handle's cursor relative to `whence`. Negative
    /// results are rejected; seeking past end-of-file is allowed (the gap
    /// reads as zeros and is filled lazily on the next write).
    pub fn handle_seek(&self, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        let handle = self.handle_of(fd)?;
        handle.refresh_if_stale(self)?;
        let mut state = handle.state.write().unwrap();

        let base = match whence {
            Whence::Start => 0i64,
            Whence::Current => state.offset as i64,
            Whence::End => state.cached_inode.file_size as i64,
        };

        let new_offset = base
            .checked_add(offset)
            .ok_or(Error::BadArgument("seek overflow"))?;
        if new_offset < 0 {
            return Err(Error::BadArgument("seek before start of file"));
        }
        if new_offset as u64 > self.max_file_size() {
            return Err(Error::BadArgument("seek beyond maximum file size"));
        }

        state.offset = new_offset as u64;
        Ok(state.offset)
    }

    /// Current cursor position of `fd`.
    pub fn handle_tell(&self, fd: Fd) -> Result<u64> {
        let handle = self.handle_of(fd)?;
        Ok(handle.state.read().unwrap().offset)
    }

    /// Current size, in bytes, of the file behind `fd`.
    pub fn handle_size(&self, fd: Fd) -> Result<u64> {
        let handle = self.handle_of(fd)?;
        handle.refresh_if_stale(self)?;
        Ok(handle.state.read().unwrap().cached_inode.file_size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ROOT_INODE;
    use tempfile::NamedTempFile;

    fn fresh() -> (NamedTempFile, FileSystem) {
        let tmp = NamedTempFile::new().unwrap();
        let fs = FileSystem::format(tmp.path(), 512, 512).unwrap();
        (tmp, fs)
    }

    #[test]
    fn flags_reject_rdonly_with_append() {
        let flags = OpenFlags::RDONLY | OpenFlags::APPEND;
        assert!(flags.validate().is_err());
    }

    #[test]
    fn flags_reject_append_with_trunc() {
        let flags = OpenFlags::RDWR | OpenFlags::APPEND | OpenFlags::TRUNC;
        assert!(flags.validate().is_err());
    }

    #[test]
    fn flags_reject_ambiguous_access_mode() {
        let flags = OpenFlags::RDONLY | OpenFlags::WRONLY;
        assert!(flags.validate().is_err());
    }

    #[test]
    fn flags_accept_plain_rdwr() {
        assert!(OpenFlags::RDWR.validate().is_ok());
    }

    #[test]
    fn write_then_read_roundtrips() {
        let (_tmp, mut fs) = fresh();
        let ino = fs.inode_alloc(InodeType::File).unwrap();
        let fd = fs.handle_open(ino, OpenFlags::RDWR).unwrap();
        let n = fs.handle_write(fd, b"hello world").unwrap();
        assert_eq!(n, 11);

        fs.handle_seek(fd, 0, Whence::Start).unwrap();
        let mut buf = [0u8; 11];
        let read = fs.handle_read(fd, &mut buf).unwrap();
        assert_eq!(read, 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn read_past_eof_returns_zero() {
        let (_tmp, mut fs) = fresh();
        let ino = fs.inode_alloc(InodeType::File).unwrap();
        let fd = fs.handle_open(ino, OpenFlags::RDWR).unwrap();
        fs.handle_write(fd, b"abc").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(fs.handle_read(fd, &mut buf).unwrap(), 0);
    }

    #[test]
    fn seek_past_end_then_write_leaves_zero_hole() {
        let (_tmp, mut fs) = fresh();
        let ino = fs.inode_alloc(InodeType::File).unwrap();
        let fd = fs.handle_open(ino, OpenFlags::RDWR).unwrap();
        fs.handle_seek(fd, 10, Whence::Start).unwrap();
        fs.handle_write(fd, b"X").unwrap();

        fs.handle_seek(fd, 0, Whence::Start).unwrap();
        let mut buf = [0u8; 11];
        fs.handle_read(fd, &mut buf).unwrap();
        assert_eq!(&buf[0..10], &[0u8; 10]);
        assert_eq!(buf[10], b'X');
    }

    #[test]
    fn append_starts_cursor_at_end() {
        let (_tmp, mut fs) = fresh();
        let ino = fs.inode_alloc(InodeType::File).unwrap();
        let fd1 = fs.handle_open(ino, OpenFlags::RDWR).unwrap();
        fs.handle_write(fd1, b"abc").unwrap();
        fs.handle_close(fd1).unwrap();

        let fd2 = fs.handle_open(ino, OpenFlags::WRONLY | OpenFlags::APPEND).unwrap();
        assert_eq!(fs.handle_tell(fd2).unwrap(), 3);
        fs.handle_write(fd2, b"def").unwrap();

        let fd3 = fs.handle_open(ino, OpenFlags::RDONLY).unwrap();
        let mut buf = [0u8; 6];
        fs.handle_read(fd3, &mut buf).unwrap();
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn second_handle_observes_first_handles_write() {
        let (_tmp, mut fs) = fresh();
        let ino = fs.inode_alloc(InodeType::File).unwrap();
        let writer = fs.handle_open(ino, OpenFlags::WRONLY).unwrap();
        fs.handle_write(writer, b"fresh").unwrap();

        let reader = fs.handle_open(ino, OpenFlags::RDONLY).unwrap();
        let mut buf = [0u8; 5];
        fs.handle_read(reader, &mut buf).unwrap();
        assert_eq!(&buf, b"fresh");
    }

    #[test]
    fn trunc_discards_existing_content() {
        let (_tmp, mut fs) = fresh();
        let ino = fs.inode_alloc(InodeType::File).unwrap();
        let fd = fs.handle_open(ino, OpenFlags::RDWR).unwrap();
        fs.handle_write(fd, b"old content").unwrap();
        fs.handle_close(fd).unwrap();

        let fd2 = fs.handle_open(ino, OpenFlags::RDWR | OpenFlags::TRUNC).unwrap();
        assert_eq!(fs.handle_size(fd2).unwrap(), 0);
    }

    #[test]
    fn opening_a_directory_is_rejected() {
        let (_tmp, mut fs) = fresh();
        assert!(fs.handle_open(ROOT_INODE, OpenFlags::RDONLY).is_err());
    }

    #[test]
    fn write_at_max_file_size_boundary() {
        let (_tmp, mut fs) = fresh();
        let ino = fs.inode_alloc(InodeType::File).unwrap();
        let fd = fs.handle_open(ino, OpenFlags::RDWR).unwrap();
        let max_size = crate::inode::max_file_blocks(512) as u64 * 512;

        fs.handle_seek(fd, (max_size - 1) as i64, Whence::Start).unwrap();
        assert_eq!(fs.handle_write(fd, b"X").unwrap(), 1);
        assert_eq!(fs.handle_size(fd).unwrap(), max_size);

        fs.handle_seek(fd, max_size as i64, Whence::Start).unwrap();
        assert!(fs.handle_write(fd, b"Y").is_err());
    }

    #[test]
    fn seek_past_max_file_size_is_rejected() {
        let (_tmp, mut fs) = fresh();
        let ino = fs.inode_alloc(InodeType::File).unwrap();
        let fd = fs.handle_open(ino, OpenFlags::RDWR).unwrap();
        let max_size = crate::inode::max_file_blocks(512) as u64 * 512;
        assert!(fs.handle_seek(fd, (max_size + 1) as i64, Whence::Start).is_err());
    }

    #[test]
    fn append_reorients_offset_on_every_write_call() {
        let (_tmp, mut fs) = fresh();
        let ino = fs.inode_alloc(InodeType::File).unwrap();
        let writer1 = fs.handle_open(ino, OpenFlags::WRONLY).unwrap();
        fs.handle_write(writer1, b"abc").unwrap();
        fs.handle_close(writer1).unwrap();

        // Opened while the file is 3 bytes long...
        let appender = fs.handle_open(ino, OpenFlags::WRONLY | OpenFlags::APPEND).unwrap();

        // ...but another handle grows it to 6 bytes before the appender
        // writes anything.
        let writer2 = fs.handle_open(ino, OpenFlags::WRONLY).unwrap();
        fs.handle_seek(writer2, 0, Whence::End).unwrap();
        fs.handle_write(writer2, b"def").unwrap();
        fs.handle_close(writer2).unwrap();

        // The appender's write must land at the current end of file (6),
        // not the 3-byte offset it cached when it was opened.
        fs.handle_write(appender, b"ghi").unwrap();

        let reader = fs.handle_open(ino, OpenFlags::RDONLY).unwrap();
        let mut buf = [0u8; 9];
        fs.handle_read(reader, &mut buf).unwrap();
        assert_eq!(&buf, b"abcdefghi");
    }

    #[test]
    fn write_spanning_multiple_blocks() {
        let (_tmp, mut fs) = fresh();
        let ino = fs.inode_alloc(InodeType::File).unwrap();
        let fd = fs.handle_open(ino, OpenFlags::RDWR).unwrap();
        let data = vec![0x42u8; 512 * 3 + 17];
        fs.handle_write(fd, &data).unwrap();

        fs.handle_seek(fd, 0, Whence::Start).unwrap();
        let mut out = vec![0u8; data.len()];
        let n = fs.handle_read(fd, &mut out).unwrap();
        assert_eq!(n, data.len());
        assert_eq!(out, data);
    }
}
