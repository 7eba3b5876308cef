//! Discovery and validation of separate debug information files.

mod build_id;
mod debug_link;

use std::ffi::OsStr;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::path::Path;
use std::rc::Rc;

use crate::elf::ElfParser;
use crate::fd_cache::FdCache;
use crate::fd_cache::FdHandle;
use crate::log::debug;
use crate::util::bytes_to_hex;
use crate::ErrorKind;
use crate::Result;

use self::build_id::build_id_path;
pub use self::debug_link::debug_link_crc32;
use self::debug_link::DebugFileIter;


/// A validated file carrying debug information.
pub(crate) struct DebugFile {
    /// The parser for the file's contents.
    pub parser: Rc<ElfParser>,
    /// Our reference to the open file.
    pub handle: FdHandle,
}

impl Debug for DebugFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct(stringify!(DebugFile))
            .field("path", &self.handle.path())
            .finish()
    }
}


/// Finds the companion file holding DWARF data for a binary.
///
/// A candidate that cannot be opened, is not a valid ELF file, fails
/// validation, or does not contain debug information is rejected and
/// the search continues. The only error reported is the exhaustion of
/// file descriptors.
#[derive(Debug)]
pub(crate) struct DebugInfoLocator<'ctx> {
    fd_cache: &'ctx FdCache,
    debug_root: &'ctx Path,
}

impl<'ctx> DebugInfoLocator<'ctx> {
    pub fn new(fd_cache: &'ctx FdCache, debug_root: &'ctx Path) -> Self {
        Self {
            fd_cache,
            debug_root,
        }
    }

    fn open(&self, path: &Path) -> Result<Option<DebugFile>> {
        let handle = match self.fd_cache.acquire(path) {
            Ok(handle) => handle,
            Err(err) if err.kind() == ErrorKind::ResourceExhausted => return Err(err),
            Err(err) => {
                debug!("debug file candidate `{}` is unavailable: {err}", path.display());
                return Ok(None)
            }
        };

        let parser = match ElfParser::open_file(handle.file()) {
            Ok(parser) => parser,
            Err(err) => {
                debug!("failed to map debug file candidate `{}`: {err}", path.display());
                return Ok(None)
            }
        };

        if let Err(err) = parser.validate() {
            debug!("debug file candidate `{}` is not a valid ELF file: {err}", path.display());
            return Ok(None)
        }

        let file = DebugFile {
            parser: Rc::new(parser),
            handle,
        };
        Ok(Some(file))
    }

    fn has_debug_info(file: &DebugFile) -> bool {
        match file.parser.has_debug_info() {
            Ok(true) => true,
            Ok(false) => {
                debug!(
                    "rejecting `{}`: file contains no debug information",
                    file.handle.path().display()
                );
                false
            }
            Err(err) => {
                debug!(
                    "rejecting `{}`: failed to check for debug information: {err}",
                    file.handle.path().display()
                );
                false
            }
        }
    }

    /// Find the debug file for `build_id` below the debug root.
    ///
    /// The candidate is only accepted if its own build ID matches
    /// `build_id` exactly.
    #[cfg_attr(
        feature = "tracing",
        crate::log::instrument(skip_all, fields(build_id = %bytes_to_hex(build_id)))
    )]
    pub fn find_by_build_id(&self, build_id: &[u8]) -> Result<Option<DebugFile>> {
        if build_id.is_empty() {
            return Ok(None)
        }

        let path = build_id_path(self.debug_root, build_id);
        let file = match self.open(&path)? {
            Some(file) => file,
            None => return Ok(None),
        };

        match file.parser.build_id() {
            Ok(Some(id)) if id == build_id => (),
            Ok(Some(id)) => {
                debug!(
                    "rejecting `{}`: build ID {} does not match",
                    path.display(),
                    bytes_to_hex(id)
                );
                return Ok(None)
            }
            Ok(None) => {
                debug!("rejecting `{}`: file has no build ID", path.display());
                return Ok(None)
            }
            Err(err) => {
                debug!("rejecting `{}`: failed to read build ID: {err}", path.display());
                return Ok(None)
            }
        }

        if !Self::has_debug_info(&file) {
            return Ok(None)
        }

        debug!("found debug file `{}` via build ID", path.display());
        Ok(Some(file))
    }

    /// Find the debug link target `linkee` of the binary at `binary`.
    ///
    /// The first candidate whose contents match `crc` wins.
    #[cfg_attr(feature = "tracing", crate::log::instrument(skip(self)))]
    pub fn find_by_debug_link(
        &self,
        binary: &Path,
        linkee: &OsStr,
        crc: u32,
    ) -> Result<Option<DebugFile>> {
        let binary_dir = binary.parent().unwrap_or_else(|| Path::new(""));

        for path in DebugFileIter::new(binary_dir, self.debug_root, linkee) {
            let file = match self.open(&path)? {
                Some(file) => file,
                None => continue,
            };

            let actual = debug_link_crc32(file.parser.mmap());
            if actual != crc {
                debug!(
                    "rejecting `{}`: checksum {actual:#010x} does not match expected {crc:#010x}",
                    path.display()
                );
                continue
            }

            if !Self::has_debug_info(&file) {
                continue
            }

            debug!("found debug file `{}` via debug link", path.display());
            return Ok(Some(file))
        }
        Ok(None)
    }
}
