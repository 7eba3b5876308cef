use std::collections::HashMap;
use std::fs::File;
use std::os::unix::io::AsRawFd as _;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use crate::log::debug;
use crate::log::trace;
use crate::util::fstat;
use crate::ErrorExt as _;
use crate::Result;


/// The identity of a file on disk.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
struct FileId {
    dev: libc::dev_t,
    inode: libc::ino_t,
}

impl FileId {
    fn new(stat: &libc::stat) -> Self {
        Self {
            dev: stat.st_dev,
            inode: stat.st_ino,
        }
    }
}


#[derive(Debug)]
struct Entry {
    file: Arc<File>,
    refs: usize,
}


/// A cache deduplicating open file descriptors across users.
///
/// Files are identified by device and inode number, not by path, so
/// that hard links or bind mounts of the same file share a single
/// descriptor. The cache is cheaply cloneable; all clones share the
/// same state and may be used from multiple threads.
#[derive(Clone, Debug, Default)]
pub struct FdCache {
    entries: Arc<Mutex<HashMap<FileId, Entry>>>,
}

impl FdCache {
    /// Create a new, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<FileId, Entry>> {
        // The map is always in a consistent state between statements,
        // so a panic while holding the lock does not invalidate it.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the file at `path` or share an already open descriptor for
    /// the same file.
    pub fn acquire(&self, path: &Path) -> Result<FdHandle> {
        let file =
            File::open(path).with_context(|| format!("failed to open `{}`", path.display()))?;
        let stat = fstat(file.as_raw_fd())
            .with_context(|| format!("failed to stat `{}`", path.display()))?;
        let id = FileId::new(&stat);

        let mut entries = self.lock();
        let file = if let Some(entry) = entries.get_mut(&id) {
            trace!("reusing descriptor for `{}`", path.display());
            entry.refs += 1;
            Arc::clone(&entry.file)
        } else {
            debug!("opened `{}`", path.display());
            let file = Arc::new(file);
            let entry = Entry {
                file: Arc::clone(&file),
                refs: 1,
            };
            let _prev = entries.insert(id, entry);
            file
        };

        let handle = FdHandle {
            cache: self.clone(),
            id,
            file,
            path: path.to_path_buf(),
        };
        Ok(handle)
    }

    /// Release a handle previously returned by [`FdCache::acquire`].
    ///
    /// This is equivalent to dropping the handle.
    #[inline]
    pub fn release(&self, handle: FdHandle) {
        debug_assert!(Arc::ptr_eq(&self.entries, &handle.cache.entries));
        drop(handle)
    }

    /// Retrieve the number of distinct files currently held open.
    pub fn open_count(&self) -> usize {
        self.lock().len()
    }

    fn put(&self, id: FileId) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(&id) {
            entry.refs -= 1;
            if entry.refs == 0 {
                let _entry = entries.remove(&id);
            }
        }
    }
}


/// A reference to a file descriptor owned by an [`FdCache`].
///
/// The reference is released when the handle is dropped; the
/// underlying file is closed once the last handle referencing it is
/// gone.
#[derive(Debug)]
pub struct FdHandle {
    cache: FdCache,
    id: FileId,
    file: Arc<File>,
    path: PathBuf,
}

impl FdHandle {
    /// Retrieve the open file.
    #[inline]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Retrieve the path the file was opened with.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FdHandle {
    fn drop(&mut self) {
        let () = self.cache.put(self.id);
    }
}
