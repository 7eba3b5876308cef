use std::fs::File;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap as Mapping;
use memmap2::MmapOptions;

use crate::Error;
use crate::ErrorExt as _;
use crate::Result;


/// A type encapsulating a read-only mapping of an entire file.
///
/// Clones share the underlying mapping.
#[derive(Clone, Debug)]
pub(crate) struct Mmap {
    /// The actual memory mapping; `None` for empty files.
    mapping: Option<Arc<Mapping>>,
}

impl Mmap {
    /// Memory map the file at the provided `path`.
    #[cfg(test)]
    pub(crate) fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open `{}`", path.display()))?;
        Self::map(&file)
    }

    /// Map the provided file into memory, in its entirety.
    pub(crate) fn map(file: &File) -> Result<Self> {
        let len = file.metadata()?.len();
        let _len = libc::size_t::try_from(len)
            .map_err(|_err| Error::with_invalid_argument("file is too large to mmap"))?;

        // The kernel does not allow mmap'ing a region of size 0. We
        // want to enable this case transparently, though.
        let mapping = if len == 0 {
            None
        } else {
            // SAFETY: The mapping is read-only. Concurrent truncation
            //         of the file by another process is outside of
            //         what we can guard against.
            let mapping = unsafe { MmapOptions::new().map(file) }
                .context("failed to memory map file")?;
            Some(Arc::new(mapping))
        };
        Ok(Self { mapping })
    }
}

impl Deref for Mmap {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        if let Some(mapping) = &self.mapping {
            mapping.deref()
        } else {
            &[]
        }
    }
}
