//! High-level, path-based POSIX-like operations.
//!
//! Every mutating call here holds the mount's directory mutex for its
//! full duration, so two directory mutations never interleave, and rolls
//! back any partial allocation on failure so a call either succeeds
//! completely or leaves the filesystem as if it had never been made.

use crate::error::{Error, Result};
use crate::fs::{FileSystem, InodeNumber};
use crate::handle::OpenFlags;
use crate::inode::InodeType;
use crate::path::Path;

/// Metadata snapshot returned by [`FileSystem::stat`].
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub inode_number: InodeNumber,
    pub file_type: InodeType,
    pub file_size: u32,
    /// Data blocks currently in use: direct pointers plus indirect-pointed
    /// blocks, not counting the indirect table block itself.
    pub blocks: u32,
}

/// One entry yielded by [`FileSystem::ls`]: the `f`/`d` type marker, size,
/// and name per spec.md §4.8's `ls` contract, without requiring a separate
/// `stat` call per child.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub inode_number: InodeNumber,
    pub file_type: InodeType,
    pub file_size: u32,
}

impl FileSystem {
    /// Creates an empty regular file at `path`. Fails with
    /// [`Error::DirentExists`] if anything — file or directory — already
    /// exists there, and with [`Error::InvalidPath`] if `path` collapses to
    /// the root itself or ends in `/`.
    pub fn touch(&mut self, base: InodeNumber, path: &str) -> Result<InodeNumber> {
        let _guard = self.dir_lock.lock().unwrap();
        self.touch_locked(base, path)
    }

    fn touch_locked(&mut self, base: InodeNumber, path: &str) -> Result<InodeNumber> {
        if path.ends_with('/') {
            return Err(Error::InvalidPath);
        }
        let path = Path::parse(path)?;
        let (parent, name) = self.resolve_parent(base, &path)?;

        if self.dir_lookup(parent, &name).is_ok() {
            return Err(Error::DirentExists);
        }

        let child = self.inode_alloc(InodeType::File)?;
        if let Err(e) = self.dir_add(parent, &name, child) {
            self.inode_free(child).ok();
            return Err(e);
        }
        Ok(child)
    }

    /// Removes a regular file. Fails if `path` names a directory.
    pub fn unlink(&mut self, base: InodeNumber, path: &str) -> Result<()> {
        let _guard = self.dir_lock.lock().unwrap();
        let path = Path::parse(path)?;
        let (parent, name) = self.resolve_parent(base, &path)?;
        let target = self.dir_lookup(parent, &name)?;

        if self.read_inode(target)?.file_type()? != InodeType::File {
            return Err(Error::InvalidPath);
        }

        self.dir_remove(parent, &name)?;
        self.inode_free(target)?;
        Ok(())
    }

    /// Creates `path` as a directory. Interior components are created
    /// recursively if missing (like `mkdir -p`'s parent-creation, but not
    /// its idempotence) and must already be directories if present; the
    /// final component must not already exist, or the call fails with
    /// [`Error::DirentExists`].
    pub fn mkdir(&mut self, base: InodeNumber, path: &str) -> Result<InodeNumber> {
        let _guard = self.dir_lock.lock().unwrap();
        self.mkdir_locked(base, path)
    }

    fn mkdir_locked(&mut self, base: InodeNumber, path: &str) -> Result<InodeNumber> {
        let path = Path::parse(path)?;
        let (parent_components, name) = path.split_last().ok_or(Error::InvalidPath)?;

        let start = if path.absolute { crate::fs::ROOT_INODE } else { base };
        let mut current = start;
        for comp in parent_components {
            current = self.mkdir_step(current, comp)?;
        }

        if self.dir_lookup(current, name).is_ok() {
            return Err(Error::DirentExists);
        }
        self.dir_create(current, name)
    }

    /// Descends into (or creates) one interior path component during
    /// `mkdir`'s parent walk: an existing directory is reused, a missing
    /// name is created, and anything else already occupying it is an
    /// error.
    fn mkdir_step(&mut self, current: InodeNumber, name: &str) -> Result<InodeNumber> {
        match self.dir_lookup(current, name) {
            Ok(existing) => {
                if self.read_inode(existing)?.file_type()? != InodeType::Directory {
                    return Err(Error::InvalidPath);
                }
                Ok(existing)
            }
            Err(Error::NotFound) => self.dir_create(current, name),
            Err(e) => Err(e),
        }
    }

    /// Removes directory `path` and everything beneath it. Subdirectories
    /// are descended into depth-first and emptied before the directory
    /// itself is unlinked; unlike [`FileSystem::cp`], this recursion is
    /// full since removal has no "copy just the shell" scope limit.
    pub fn rmdir(&mut self, base: InodeNumber, path: &str) -> Result<()> {
        let _guard = self.dir_lock.lock().unwrap();
        let path = Path::parse(path)?;
        let (parent, name) = self.resolve_parent(base, &path)?;
        let target = self.dir_lookup(parent, &name)?;

        if self.read_inode(target)?.file_type()? != InodeType::Directory {
            return Err(Error::InvalidPath);
        }

        self.rmdir_recursive(target)?;
        self.dir_remove(parent, &name)?;
        self.inode_free(target)?;
        Ok(())
    }

    fn rmdir_recursive(&mut self, dir_inode: InodeNumber) -> Result<()> {
        for (child_name, child_inode) in self.dir_list(dir_inode)? {
            if child_name == "." || child_name == ".." {
                continue;
            }
            match self.read_inode(child_inode)?.file_type()? {
                InodeType::File => {
                    self.dir_remove(dir_inode, &child_name)?;
                    self.inode_free(child_inode)?;
                }
                InodeType::Directory => {
                    self.rmdir_recursive(child_inode)?;
                    self.dir_remove(dir_inode, &child_name)?;
                    self.inode_free(child_inode)?;
                }
                InodeType::Invalid => {
                    return Err(Error::Internal("directory entry points at a free inode"))
                }
            }
        }
        Ok(())
    }

    /// Lists every child of directory `path`, including the structural `.`
    /// and `..` entries, with enough per-entry metadata (type marker, size)
    /// to render spec.md §4.8's `f`/`d size name` line without a further
    /// `stat` call.
    pub fn ls(&self, base: InodeNumber, path: &str) -> Result<Vec<DirEntry>> {
        let path = Path::parse(path)?;
        let target = self.resolve(base, &path)?;
        if self.read_inode(target)?.file_type()? != InodeType::Directory {
            return Err(Error::InvalidPath);
        }
        self.dir_list(target)?
            .into_iter()
            .map(|(name, inode_number)| {
                let dinode = self.read_inode(inode_number)?;
                Ok(DirEntry {
                    name,
                    inode_number,
                    file_type: dinode.file_type()?,
                    file_size: dinode.file_size,
                })
            })
            .collect()
    }

    /// Reads the entire contents of regular file `path`.
    pub fn cat(&mut self, base: InodeNumber, path: &str) -> Result<Vec<u8>> {
        let path = Path::parse(path)?;
        let target = self.resolve(base, &path)?;
        let dinode = self.read_inode(target)?;
        if dinode.file_type()? != InodeType::File {
            return Err(Error::InvalidPath);
        }

        let fd = self.handle_open(target, OpenFlags::RDONLY)?;
        let mut buf = vec![0u8; dinode.file_size as usize];
        self.handle_read(fd, &mut buf)?;
        self.handle_close(fd)?;
        Ok(buf)
    }

    /// Copies `src` to `dst`. A regular file is copied one logical block at
    /// a time into a freshly created destination file, skipping any
    /// offset that's a hole in `src` rather than materializing it as an
    /// allocated zero block in `dst` — sparse files stay sparse across the
    /// copy. A directory is copied by creating an empty destination
    /// directory and stopping there — this does not recurse into the
    /// source's children, matching the scope this operation has always
    /// had.
    pub fn cp(&mut self, base: InodeNumber, src: &str, dst: &str) -> Result<()> {
        let _guard = self.dir_lock.lock().unwrap();
        let src_path = Path::parse(src)?;
        let src_inode = self.resolve(base, &src_path)?;
        let src_dinode = self.read_inode(src_inode)?;

        match src_dinode.file_type()? {
            InodeType::Directory => {
                self.mkdir_locked(base, dst)?;
                Ok(())
            }
            InodeType::File => {
                let dst_inode = self.touch_locked(base, dst)?;
                let mut dst_dinode = self.read_inode(dst_inode)?;

                let block_size = self.superblock().block_size as usize;
                let max_block_offset = crate::inode::max_file_blocks(self.superblock().block_size);
                let mut buf = vec![0u8; block_size];
                for index in 0..max_block_offset {
                    let src_block = self.block_map_get(&src_dinode, index)?;
                    if src_block == 0 {
                        continue;
                    }
                    self.disk.read(src_block, &mut buf)?;
                    let dst_block = self.block_map_alloc(&mut dst_dinode, index)?;
                    self.disk.write(dst_block, &buf)?;
                }
                dst_dinode.file_size = src_dinode.file_size;
                self.write_inode(dst_inode, &dst_dinode)?;
                Ok(())
            }
            InodeType::Invalid => Err(Error::Internal("source inode is unallocated")),
        }
    }

    /// Returns metadata for `path` without opening it.
    pub fn stat(&self, base: InodeNumber, path: &str) -> Result<Stat> {
        let path = Path::parse(path)?;
        let target = self.resolve(base, &path)?;
        let dinode = self.read_inode(target)?;
        Ok(Stat {
            inode_number: target,
            file_type: dinode.file_type()?,
            file_size: dinode.file_size,
            blocks: self.block_count_of(&dinode)?,
        })
    }

    /// Whether `path` resolves to anything at all.
    pub fn exists(&self, base: InodeNumber, path: &str) -> bool {
        Path::parse(path)
            .and_then(|p| self.resolve(base, &p))
            .is_ok()
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
    fn touch_creates_file() {
        let (_tmp, mut fs) = fresh();
        let a = fs.touch(ROOT_INODE, "/a.txt").unwrap();
        assert_eq!(fs.stat(ROOT_INODE, "/a.txt").unwrap().inode_number, a);
    }

    #[test]
    fn touch_on_existing_name_is_dirent_exists() {
        let (_tmp, mut fs) = fresh();
        fs.touch(ROOT_INODE, "/a.txt").unwrap();
        assert!(matches!(fs.touch(ROOT_INODE, "/a.txt"), Err(Error::DirentExists)));
    }

    #[test]
    fn touch_over_existing_directory_fails() {
        let (_tmp, mut fs) = fresh();
        fs.mkdir(ROOT_INODE, "/d").unwrap();
        assert!(matches!(fs.touch(ROOT_INODE, "/d"), Err(Error::DirentExists)));
    }

    #[test]
    fn touch_rejects_trailing_slash() {
        let (_tmp, mut fs) = fresh();
        assert!(matches!(fs.touch(ROOT_INODE, "/a.txt/"), Err(Error::InvalidPath)));
    }

    #[test]
    fn mkdir_creates_missing_parents() {
        let (_tmp, mut fs) = fresh();
        let leaf = fs.mkdir(ROOT_INODE, "/a/b/c").unwrap();
        assert!(fs.exists(ROOT_INODE, "/a"));
        assert!(fs.exists(ROOT_INODE, "/a/b"));
        assert_eq!(fs.stat(ROOT_INODE, "/a/b/c").unwrap().inode_number, leaf);
    }

    #[test]
    fn mkdir_on_existing_name_is_dirent_exists() {
        let (_tmp, mut fs) = fresh();
        fs.mkdir(ROOT_INODE, "/a").unwrap();
        assert!(matches!(fs.mkdir(ROOT_INODE, "/a"), Err(Error::DirentExists)));
    }

    #[test]
    fn unlink_removes_file_but_rejects_directory() {
        let (_tmp, mut fs) = fresh();
        fs.touch(ROOT_INODE, "/a.txt").unwrap();
        fs.unlink(ROOT_INODE, "/a.txt").unwrap();
        assert!(!fs.exists(ROOT_INODE, "/a.txt"));

        fs.mkdir(ROOT_INODE, "/d").unwrap();
        assert!(fs.unlink(ROOT_INODE, "/d").is_err());
    }

    #[test]
    fn rmdir_recursively_removes_contents() {
        let (_tmp, mut fs) = fresh();
        fs.mkdir(ROOT_INODE, "/a/b").unwrap();
        fs.touch(ROOT_INODE, "/a/f.txt").unwrap();
        fs.touch(ROOT_INODE, "/a/b/g.txt").unwrap();

        fs.rmdir(ROOT_INODE, "/a").unwrap();
        assert!(!fs.exists(ROOT_INODE, "/a"));
    }

    #[test]
    fn ls_lists_children_including_dot_entries() {
        let (_tmp, mut fs) = fresh();
        fs.touch(ROOT_INODE, "/a.txt").unwrap();
        fs.mkdir(ROOT_INODE, "/b").unwrap();
        let mut entries = fs.ls(ROOT_INODE, "/").unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec![".", "..", "a.txt", "b"]);
    }

    #[test]
    fn ls_reports_type_and_size_per_entry() {
        let (_tmp, mut fs) = fresh();
        let file_ino = fs.touch(ROOT_INODE, "/a.txt").unwrap();
        let fd = fs.handle_open(file_ino, OpenFlags::WRONLY).unwrap();
        fs.handle_write(fd, b"hello").unwrap();
        fs.handle_close(fd).unwrap();
        fs.mkdir(ROOT_INODE, "/b").unwrap();

        let entries = fs.ls(ROOT_INODE, "/").unwrap();
        let file_entry = entries.iter().find(|e| e.name == "a.txt").unwrap();
        assert_eq!(file_entry.file_type, InodeType::File);
        assert_eq!(file_entry.file_size, 5);

        let dir_entry = entries.iter().find(|e| e.name == "b").unwrap();
        assert_eq!(dir_entry.file_type, InodeType::Directory);
    }

    #[test]
    fn cat_reads_full_contents() {
        let (_tmp, mut fs) = fresh();
        let ino = fs.touch(ROOT_INODE, "/a.txt").unwrap();
        let fd = fs.handle_open(ino, OpenFlags::WRONLY).unwrap();
        fs.handle_write(fd, b"payload").unwrap();
        fs.handle_close(fd).unwrap();

        assert_eq!(fs.cat(ROOT_INODE, "/a.txt").unwrap(), b"payload");
    }

    #[test]
    fn cp_file_copies_content_into_new_inode() {
        let (_tmp, mut fs) = fresh();
        let src = fs.touch(ROOT_INODE, "/a.txt").unwrap();
        let fd = fs.handle_open(src, OpenFlags::WRONLY).unwrap();
        fs.handle_write(fd, b"copy me").unwrap();
        fs.handle_close(fd).unwrap();

        fs.cp(ROOT_INODE, "/a.txt", "/b.txt").unwrap();
        assert_eq!(fs.cat(ROOT_INODE, "/b.txt").unwrap(), b"copy me");

        let src_stat = fs.stat(ROOT_INODE, "/a.txt").unwrap();
        let dst_stat = fs.stat(ROOT_INODE, "/b.txt").unwrap();
        assert_ne!(src_stat.inode_number, dst_stat.inode_number);
    }

    #[test]
    fn cp_file_preserves_holes() {
        let (_tmp, mut fs) = fresh();
        let src = fs.touch(ROOT_INODE, "/sparse.bin").unwrap();
        let fd = fs.handle_open(src, OpenFlags::WRONLY).unwrap();
        fs.handle_seek(fd, 512 * 4, crate::handle::Whence::Start).unwrap();
        fs.handle_write(fd, b"tail").unwrap();
        fs.handle_close(fd).unwrap();

        let src_dinode = fs.read_inode(src).unwrap();
        assert_eq!(fs.block_map_get(&src_dinode, 0).unwrap(), 0);

        fs.cp(ROOT_INODE, "/sparse.bin", "/sparse-copy.bin").unwrap();
        assert_eq!(fs.cat(ROOT_INODE, "/sparse.bin").unwrap(), fs.cat(ROOT_INODE, "/sparse-copy.bin").unwrap());

        let dst = fs.stat(ROOT_INODE, "/sparse-copy.bin").unwrap().inode_number;
        let dst_dinode = fs.read_inode(dst).unwrap();
        assert_eq!(dst_dinode.file_size, src_dinode.file_size);
        assert_eq!(fs.block_map_get(&dst_dinode, 0).unwrap(), 0);
        assert_ne!(fs.block_map_get(&dst_dinode, 4).unwrap(), 0);
    }

    #[test]
    fn cp_directory_does_not_recurse() {
        let (_tmp, mut fs) = fresh();
        fs.mkdir(ROOT_INODE, "/src").unwrap();
        fs.touch(ROOT_INODE, "/src/inner.txt").unwrap();

        fs.cp(ROOT_INODE, "/src", "/dst").unwrap();
        assert!(fs.exists(ROOT_INODE, "/dst"));
        assert!(fs.dir_is_empty(fs.stat(ROOT_INODE, "/dst").unwrap().inode_number).unwrap());
    }

    #[test]
    fn stat_reports_block_count() {
        let (_tmp, mut fs) = fresh();
        let ino = fs.touch(ROOT_INODE, "/a.txt").unwrap();
        let fd = fs.handle_open(ino, OpenFlags::WRONLY).unwrap();
        fs.handle_write(fd, &vec![0u8; 512 * 2 + 1]).unwrap();
        fs.handle_close(fd).unwrap();

        let st = fs.stat(ROOT_INODE, "/a.txt").unwrap();
        assert_eq!(st.blocks, 3);
    }

    #[test]
    fn exists_is_false_for_missing_path() {
        let (_tmp, fs) = fresh();
        assert!(!fs.exists(ROOT_INODE, "/nope"));
    }

    #[test]
    fn dotdot_at_root_clamps_to_root() {
        let (_tmp, mut fs) = fresh();
        fs.mkdir(ROOT_INODE, "/a").unwrap();
        let via_dotdot = fs.stat(ROOT_INODE, "/a/../a").unwrap();
        let direct = fs.stat(ROOT_INODE, "/a").unwrap();
        assert_eq!(via_dotdot.inode_number, direct.inode_number);
    }
}
