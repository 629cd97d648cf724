//! Path parsing and component validation.
//!
//! Paths are `/`-separated sequences of names. `.` and `..` are collapsed
//! into the component stack during [`Path::parse`] itself: `.` is dropped,
//! and `..` pops the previous component (or is silently discarded if there
//! is nothing to pop). By the time a [`Path`] reaches
//! [`crate::fs::FileSystem::resolve`], its components are plain names —
//! `resolve` does a flat directory walk with no `.`/`..` special-casing.

use crate::error::{Error, Result};
use crate::fs::{FileSystem, InodeNumber, ROOT_INODE};

/// Maximum bytes in a single path component, including the terminating
/// `nul` reserved inside [`crate::directory::Dirent`]'s fixed-size name
/// field.
pub const MAX_FILENAME_LEN: usize = 252;

/// Usable characters in a component name, not counting the terminator.
pub const MAX_FILENAME_USABLE: usize = MAX_FILENAME_LEN - 1;

/// Maximum number of components resolvable in one path, guarding against
/// runaway `..` chains or pathological nesting.
pub const MAX_PATH_DEPTH: usize = 32;

/// A parsed path: whether it's anchored at the root, and its ordered,
/// validated component names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub absolute: bool,
    pub components: Vec<String>,
}

impl Path {
    /// Splits `raw` on `/` and folds each segment into a normalized
    /// component stack: empty segments are ignored (so `a//b` and a
    /// trailing slash behave like `a/b`), `.` is dropped, and `..` pops the
    /// last pushed component — or is dropped too, if the stack is already
    /// empty. The depth check applies only to components that actually get
    /// pushed, against the stack's current (post-collapse) size, so a long
    /// run of `name/..` pairs never trips it.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::InvalidPath);
        }
        let absolute = raw.starts_with('/');
        let mut components: Vec<String> = Vec::new();
        for part in raw.split('/') {
            if part.is_empty() || part == "." {
                continue;
            }
            if part == ".." {
                components.pop();
                continue;
            }
            validate_component(part)?;
            if components.len() >= MAX_PATH_DEPTH {
                return Err(Error::InvalidPath);
            }
            components.push(part.to_string());
        }
        Ok(Self {
            absolute,
            components,
        })
    }

    /// Re-renders the parsed path back to canonical `/`-separated text. An
    /// empty component stack renders as `/` if absolute, `.` otherwise.
    pub fn to_string_canonical(&self) -> String {
        if self.components.is_empty() {
            return if self.absolute { "/".to_string() } else { ".".to_string() };
        }
        let joined = self.components.join("/");
        if self.absolute {
            format!("/{joined}")
        } else {
            joined
        }
    }

    /// Splits off the final component (the "name" being created, removed,
    /// or looked up) from the rest (the "parent" to resolve first). Empty
    /// remainders mean "resolve from the base directory itself."
    pub fn split_last(&self) -> Option<(&[String], &str)> {
        let (last, rest) = self.components.split_last()?;
        Some((rest, last.as_str()))
    }

    /// Appends `relative`'s components onto `absolute`'s, producing a new
    /// absolute path. Both halves are assumed already normalized (as
    /// [`Path::parse`] always leaves them) — this does no further `.`/`..`
    /// collapsing of its own, matching the external cwd collaborator's
    /// contract in spec.md §4.6.
    pub fn merge(absolute: &Path, relative: &Path) -> Path {
        let mut components = absolute.components.clone();
        components.extend(relative.components.iter().cloned());
        Path {
            absolute: true,
            components,
        }
    }
}

/// A real (non-`.`/`..`) component must be nonempty, within the length
/// budget, and made up only of ASCII alphanumerics, `.`, `_`, and `-`.
fn validate_component(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_FILENAME_USABLE {
        return Err(Error::InvalidName);
    }
    let valid = name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-');
    if !valid {
        return Err(Error::InvalidName);
    }
    Ok(())
}

impl FileSystem {
    /// Resolves `path` to an inode number, starting from `base` for
    /// relative paths (absolute paths always start from the root). `path`'s
    /// components are already `.`/`..`-free by construction (see
    /// [`Path::parse`]), so this is a plain left-to-right directory walk.
    pub fn resolve(&self, base: InodeNumber, path: &Path) -> Result<InodeNumber> {
        let mut current = if path.absolute { ROOT_INODE } else { base };
        for name in &path.components {
            current = match self.dir_lookup(current, name) {
                Ok(n) => n,
                Err(Error::InodeOperation(_)) => return Err(Error::InvalidPath),
                Err(e) => return Err(e),
            };
        }
        Ok(current)
    }

    /// Resolves `path`'s parent directory and returns it along with the
    /// final component's name, without requiring that name to already
    /// exist — the usual split for `touch`/`mkdir`/`unlink`/`rmdir`.
    pub fn resolve_parent(&self, base: InodeNumber, path: &Path) -> Result<(InodeNumber, String)> {
        let (parent_components, name) = path
            .split_last()
            .ok_or(Error::InvalidPath)?;
        let parent_path = Path {
            absolute: path.absolute,
            components: parent_components.to_vec(),
        };
        let parent_inode = self.resolve(base, &parent_path)?;
        Ok((parent_inode, name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_path() {
        let p = Path::parse("/a/b/c").unwrap();
        assert!(p.absolute);
        assert_eq!(p.components, vec!["a", "b", "c"]);
    }

    #[test]
    fn parses_relative_path() {
        let p = Path::parse("a/b").unwrap();
        assert!(!p.absolute);
        assert_eq!(p.components, vec!["a", "b"]);
    }

    #[test]
    fn collapses_repeated_slashes_and_trailing_slash() {
        let p = Path::parse("/a//b/").unwrap();
        assert_eq!(p.components, vec!["a", "b"]);
    }

    #[test]
    fn rejects_empty_path() {
        assert!(Path::parse("").is_err());
    }

    #[test]
    fn rejects_bad_characters() {
        assert!(Path::parse("/a/b*c").is_err());
        assert!(Path::parse("/a/ b").is_err());
    }

    #[test]
    fn rejects_name_too_long() {
        let long = "x".repeat(MAX_FILENAME_USABLE + 1);
        assert!(Path::parse(&format!("/{long}")).is_err());
    }

    #[test]
    fn collapses_dot_and_dotdot_components() {
        let p = Path::parse("/a/../b/./c").unwrap();
        assert_eq!(p.components, vec!["b", "c"]);
    }

    #[test]
    fn dotdot_past_root_is_discarded_not_an_error() {
        let p = Path::parse("/../../a").unwrap();
        assert!(p.absolute);
        assert_eq!(p.components, vec!["a"]);
    }

    #[test]
    fn dotdot_through_never_pushed_component_still_collapses() {
        // the popped component never needs to exist on disk: collapsing is
        // purely syntactic, independent of any directory lookup.
        let p = Path::parse("/missing/../b").unwrap();
        assert_eq!(p.components, vec!["b"]);
    }

    #[test]
    fn interleaved_dotdot_never_trips_the_depth_limit() {
        let raw = "/a/..".repeat(MAX_PATH_DEPTH * 2);
        let p = Path::parse(&format!("{raw}/x")).unwrap();
        assert_eq!(p.components, vec!["x"]);
    }

    #[test]
    fn rejects_excessive_depth() {
        let raw = format!("/{}", vec!["a"; MAX_PATH_DEPTH + 1].join("/"));
        assert!(Path::parse(&raw).is_err());
    }

    #[test]
    fn split_last_separates_parent_from_name() {
        let p = Path::parse("/a/b/c").unwrap();
        let (rest, name) = p.split_last().unwrap();
        assert_eq!(rest, ["a".to_string(), "b".to_string()]);
        assert_eq!(name, "c");
    }

    #[test]
    fn merge_appends_relative_onto_absolute() {
        let base = Path::parse("/a/b").unwrap();
        let rel = Path::parse("c/d").unwrap();
        let merged = Path::merge(&base, &rel);
        assert!(merged.absolute);
        assert_eq!(merged.components, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn to_string_canonical_roundtrips() {
        let p = Path::parse("/a//b/").unwrap();
        assert_eq!(p.to_string_canonical(), "/a/b");
    }

    #[test]
    fn to_string_canonical_collapses_dotdot() {
        let p = Path::parse("/a/../b").unwrap();
        assert_eq!(p.to_string_canonical(), "/b");
    }

    #[test]
    fn to_string_canonical_of_empty_stack() {
        assert_eq!(Path::parse("/").unwrap().to_string_canonical(), "/");
        assert_eq!(Path::parse("/a/..").unwrap().to_string_canonical(), "/");
        assert_eq!(Path::parse("a/..").unwrap().to_string_canonical(), ".");
    }
}
