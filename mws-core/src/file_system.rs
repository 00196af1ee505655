//! Filesystem abstraction for the coordinator's metadata and instance directories.
//!
//! Production code goes through [`OsFileSystem`]. The in-memory implementation
//! behind the `test-helpers` feature lets tests control directory mtimes and
//! inject write failures without touching the real disk.

use std::fmt::Debug;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::SystemTime;

/// Minimal set of filesystem operations the coordinator needs.
pub trait FileSystem: Send + Sync + Debug {
    /// Read a whole file.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace `path` with `contents` so readers never observe a partial write.
    /// The parent directory must already exist.
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Recursively remove a directory. Returns `NotFound` if it is absent.
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Stat-based existence check.
    fn exists(&self, path: &Path) -> bool;

    /// Last modification time of a file or directory.
    fn modified(&self, path: &Path) -> io::Result<SystemTime>;
}

/// [`FileSystem`] backed by the host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no parent directory", path.display()),
            )
        })?;

        // Write to a unique sibling first, then rename over the target
        let mut temp_file = tempfile::Builder::new()
            .prefix(".mws-")
            .suffix(".tmp")
            .tempfile_in(parent)?;
        temp_file.write_all(contents)?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).is_ok()
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        fs::metadata(path)?.modified()
    }
}

#[cfg(feature = "test-helpers")]
mod memory {
    use super::FileSystem;
    use std::collections::BTreeMap;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, MutexGuard};
    use std::time::SystemTime;

    #[derive(Debug, Clone)]
    enum Node {
        Dir,
        File(Vec<u8>),
    }

    #[derive(Debug, Clone)]
    struct Entry {
        node: Node,
        modified: SystemTime,
    }

    /// In-memory [`FileSystem`] for tests.
    #[derive(Debug, Default)]
    pub struct MemoryFileSystem {
        entries: Mutex<BTreeMap<PathBuf, Entry>>,
        fail_writes: AtomicBool,
    }

    impl MemoryFileSystem {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent `write_atomic` fail until reset.
        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        /// Override the modification time of an existing entry.
        pub fn set_modified(&self, path: &Path, modified: SystemTime) -> io::Result<()> {
            let mut entries = self.entries()?;
            let entry = entries
                .get_mut(path)
                .ok_or_else(|| not_found(path))?;
            entry.modified = modified;
            Ok(())
        }

        pub fn is_dir(&self, path: &Path) -> bool {
            self.entries()
                .map(|entries| matches!(entries.get(path), Some(Entry { node: Node::Dir, .. })))
                .unwrap_or(false)
        }

        fn entries(&self) -> io::Result<MutexGuard<'_, BTreeMap<PathBuf, Entry>>> {
            self.entries
                .lock()
                .map_err(|_| io::Error::other("memory filesystem lock poisoned"))
        }
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} not found", path.display()),
        )
    }

    impl FileSystem for MemoryFileSystem {
        fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            match self.entries()?.get(path) {
                Some(Entry {
                    node: Node::File(data),
                    ..
                }) => Ok(data.clone()),
                Some(_) => Err(io::Error::other(format!(
                    "{} is a directory",
                    path.display()
                ))),
                None => Err(not_found(path)),
            }
        }

        fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(io::Error::other("injected write failure"));
            }

            let mut entries = self.entries()?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if !matches!(entries.get(parent), Some(Entry { node: Node::Dir, .. })) {
                    return Err(not_found(parent));
                }
            }
            entries.insert(
                path.to_path_buf(),
                Entry {
                    node: Node::File(contents.to_vec()),
                    modified: SystemTime::now(),
                },
            );
            Ok(())
        }

        fn create_dir_all(&self, path: &Path) -> io::Result<()> {
            let mut entries = self.entries()?;
            for ancestor in path.ancestors().filter(|p| !p.as_os_str().is_empty()) {
                match entries.get(ancestor) {
                    Some(Entry {
                        node: Node::File(_),
                        ..
                    }) => {
                        return Err(io::Error::new(
                            io::ErrorKind::AlreadyExists,
                            format!("{} is a file", ancestor.display()),
                        ))
                    }
                    Some(_) => {}
                    None => {
                        entries.insert(
                            ancestor.to_path_buf(),
                            Entry {
                                node: Node::Dir,
                                modified: SystemTime::now(),
                            },
                        );
                    }
                }
            }
            Ok(())
        }

        fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
            let mut entries = self.entries()?;
            if !entries.contains_key(path) {
                return Err(not_found(path));
            }
            entries.retain(|candidate, _| !candidate.starts_with(path));
            Ok(())
        }

        fn exists(&self, path: &Path) -> bool {
            self.entries()
                .map(|entries| entries.contains_key(path))
                .unwrap_or(false)
        }

        fn modified(&self, path: &Path) -> io::Result<SystemTime> {
            self.entries()?
                .get(path)
                .map(|entry| entry.modified)
                .ok_or_else(|| not_found(path))
        }
    }
}

#[cfg(feature = "test-helpers")]
pub use memory::MemoryFileSystem;
