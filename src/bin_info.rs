use std::ffi::OsStr;
use std::ffi::OsString;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::mem;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;

use crate::demangle::format_function_name;
use crate::dwarf::DwarfResolver;
use crate::elf::ElfParser;
use crate::fd_cache::FdCache;
use crate::fd_cache::FdHandle;
use crate::locate::DebugFile;
use crate::locate::DebugInfoLocator;
use crate::log::debug;
use crate::log::warn;
use crate::util::bytes_to_hex;
use crate::Addr;
use crate::Error;
use crate::ErrorExt as _;
use crate::Result;


/// The default root directory of separate debug information.
pub const DEFAULT_DEBUG_DIR: &str = "/usr/lib/debug";


/// Process wide state shared by all [`BinaryInfo`] objects.
///
/// A `Context` is meant to be created once and passed to every
/// [`BinaryInfo::create`] call. Clones share the same file descriptor
/// cache.
#[derive(Clone, Debug)]
pub struct Context {
    /// The cache of open files.
    fd_cache: FdCache,
    /// The default root directory of separate debug information.
    debug_dir: PathBuf,
}

impl Context {
    /// Create a new `Context` using [`DEFAULT_DEBUG_DIR`] as the debug
    /// information root.
    pub fn new() -> Self {
        Self {
            fd_cache: FdCache::new(),
            debug_dir: PathBuf::from(DEFAULT_DEBUG_DIR),
        }
    }

    /// Use `debug_dir` as the default root directory of separate debug
    /// information.
    pub fn with_debug_dir<P>(mut self, debug_dir: P) -> Self
    where
        P: Into<PathBuf>,
    {
        self.debug_dir = debug_dir.into();
        self
    }

    /// Retrieve the file descriptor cache.
    #[inline]
    pub fn fd_cache(&self) -> &FdCache {
        &self.fd_cache
    }

    /// Retrieve the default root directory of separate debug information.
    #[inline]
    pub fn debug_dir(&self) -> &Path {
        &self.debug_dir
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}


/// The description of a binary loaded into a process.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    /// The path of the binary, as seen by the traced process.
    pub path: PathBuf,
    /// The address at which the binary was loaded.
    pub load_address: Addr,
    /// The size of the binary's mapping.
    pub memory_size: u64,
    /// Whether the binary is position independent. Addresses in such
    /// binaries are relative to the load address.
    pub is_pie: bool,
    /// The root directory of separate debug information for this
    /// binary. Overrides [`Context::debug_dir`].
    pub debug_info_dir: Option<PathBuf>,
    /// A directory prefixed to `path` (and only `path`) before opening
    /// the binary, for analyzing traces recorded on another system.
    pub target_prefix: Option<PathBuf>,
    /// The struct is non-exhaustive and open to extension.
    #[doc(hidden)]
    pub _non_exhaustive: (),
}

impl Config {
    /// Create a `Config` for the binary at `path`, loaded at
    /// `load_address` and spanning `memory_size` bytes.
    pub fn new<P>(path: P, load_address: Addr, memory_size: u64) -> Self
    where
        P: Into<PathBuf>,
    {
        Self {
            path: path.into(),
            load_address,
            memory_size,
            ..Default::default()
        }
    }
}


/// A source code location.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SourceLocation {
    /// The source file, possibly joined with its compilation directory.
    pub filename: PathBuf,
    /// The line number.
    pub line_number: u64,
}


/// How a [`BinaryInfo`] resolves function names.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResolutionStrategy {
    /// DWARF debug information is available. ELF symbols are used for
    /// addresses not covered by it.
    Dwarf,
    /// Only ELF symbols are available; source locations cannot be
    /// resolved.
    ElfOnly,
}


/// The resolution progress of a [`BinaryInfo`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResolutionState {
    /// No file has been opened yet.
    Created,
    /// The binary itself has been opened.
    ElfResolved,
    /// The search for debug information has concluded.
    DwarfResolved(ResolutionStrategy),
}


/// The binary, opened.
struct ElfImage {
    parser: Rc<ElfParser>,
    _handle: FdHandle,
}

impl ElfImage {
    fn open(fd_cache: &FdCache, path: &Path) -> Result<Self> {
        let handle = fd_cache.acquire(path)?;
        let parser = ElfParser::open_file(handle.file())
            .with_context(|| format!("failed to open ELF file `{}`", path.display()))?;
        let () = parser
            .validate()
            .with_context(|| format!("`{}` is not a valid ELF file", path.display()))?;

        // Build the symbol index eagerly. A broken symbol table does
        // not keep us from using DWARF, though.
        if let Err(err) = parser.has_symbols() {
            warn!("failed to read symbols of `{}`: {err}", path.display());
        }

        let slf = Self {
            parser: Rc::new(parser),
            _handle: handle,
        };
        Ok(slf)
    }
}


enum DebugInfo {
    Dwarf {
        resolver: DwarfResolver,
        /// The separate debug file, if any.
        _file: Option<FdHandle>,
    },
    ElfOnly,
}

impl DebugInfo {
    fn strategy(&self) -> ResolutionStrategy {
        match self {
            Self::Dwarf { .. } => ResolutionStrategy::Dwarf,
            Self::ElfOnly => ResolutionStrategy::ElfOnly,
        }
    }

    fn from_debug_file(file: DebugFile) -> Option<Self> {
        let DebugFile { parser, handle } = file;
        match DwarfResolver::from_parser(parser) {
            Ok(resolver) => Some(Self::Dwarf {
                resolver,
                _file: Some(handle),
            }),
            Err(err) => {
                warn!(
                    "failed to parse DWARF of `{}`: {err}; ignoring...",
                    handle.path().display()
                );
                None
            }
        }
    }
}


enum State {
    Created,
    ElfResolved(ElfImage),
    DwarfResolved(ElfImage, DebugInfo),
}


/// Debug information about a single binary loaded into a process.
///
/// Files are opened lazily: the binary on the first lookup, and its
/// debug information right after. Both stay open until the object is
/// dropped.
pub struct BinaryInfo {
    fd_cache: FdCache,
    /// The path of the binary as configured.
    path: PathBuf,
    /// The path we open the binary at, with the target prefix applied.
    open_path: PathBuf,
    load_address: Addr,
    memory_size: u64,
    is_pie: bool,
    debug_root: PathBuf,
    build_id: Option<Box<[u8]>>,
    debug_link: Option<(OsString, u32)>,
    state: State,
}

impl BinaryInfo {
    /// Create a `BinaryInfo` for the binary described by `config`.
    ///
    /// No file is opened at this point.
    pub fn create(context: &Context, config: Config) -> Result<Self> {
        let Config {
            path,
            load_address,
            memory_size,
            is_pie,
            debug_info_dir,
            target_prefix,
            _non_exhaustive: (),
        } = config;

        if path.as_os_str().is_empty() {
            return Err(Error::with_invalid_argument("binary path is empty"))
        }
        if memory_size == 0 {
            return Err(Error::with_invalid_argument(format!(
                "memory size of `{}` is zero",
                path.display()
            )))
        }
        if load_address.checked_add(memory_size).is_none() {
            return Err(Error::with_invalid_argument(format!(
                "mapping of `{}` ({load_address:#x} + {memory_size:#x}) overflows the address space",
                path.display()
            )))
        }

        let open_path = match target_prefix {
            Some(prefix) => {
                // Strip the root so that joining appends instead of
                // replacing.
                let rel_path = path
                    .components()
                    .filter(|component| {
                        !matches!(component, Component::RootDir | Component::Prefix(..))
                    })
                    .collect::<PathBuf>();
                prefix.join(rel_path)
            }
            None => path.clone(),
        };

        let slf = Self {
            fd_cache: context.fd_cache().clone(),
            path,
            open_path,
            load_address,
            memory_size,
            is_pie,
            debug_root: debug_info_dir.unwrap_or_else(|| context.debug_dir().to_path_buf()),
            build_id: None,
            debug_link: None,
            state: State::Created,
        };
        Ok(slf)
    }

    fn ensure_hint_settable(&self, what: &str) -> Result<()> {
        if let State::DwarfResolved(..) = self.state {
            return Err(Error::with_invalid_argument(format!(
                "cannot set {what} of `{}`: debug information is already resolved",
                self.path.display()
            )))
        }
        Ok(())
    }

    /// Attach the build ID of the binary, used for finding separate
    /// debug information. It takes precedence over the build ID note
    /// contained in the binary, if any.
    ///
    /// The build ID can be set only once and only before debug
    /// information got resolved by a lookup.
    pub fn set_build_id(&mut self, build_id: &[u8]) -> Result<()> {
        if build_id.is_empty() {
            return Err(Error::with_invalid_argument("build ID is empty"))
        }
        if self.build_id.is_some() {
            return Err(Error::with_invalid_argument(format!(
                "build ID of `{}` is already set",
                self.path.display()
            )))
        }
        let () = self.ensure_hint_settable("build ID")?;

        debug!(
            "using build ID {} for `{}`",
            bytes_to_hex(build_id),
            self.path.display()
        );
        self.build_id = Some(Box::from(build_id));
        Ok(())
    }

    /// Attach the debug link of the binary, used for finding separate
    /// debug information. It takes precedence over the binary's
    /// `.gnu_debuglink` section, if any.
    ///
    /// The debug link can be set only once and only before debug
    /// information got resolved by a lookup.
    pub fn set_debug_link<F>(&mut self, filename: F, crc: u32) -> Result<()>
    where
        F: AsRef<OsStr>,
    {
        let filename = filename.as_ref();
        if filename.is_empty() {
            return Err(Error::with_invalid_argument("debug link file name is empty"))
        }
        if self.debug_link.is_some() {
            return Err(Error::with_invalid_argument(format!(
                "debug link of `{}` is already set",
                self.path.display()
            )))
        }
        let () = self.ensure_hint_settable("debug link")?;

        debug!(
            "using debug link {} ({crc:#010x}) for `{}`",
            filename.to_string_lossy(),
            self.path.display()
        );
        self.debug_link = Some((filename.to_os_string(), crc));
        Ok(())
    }

    /// Check whether `addr` lies within the binary's mapping.
    #[inline]
    pub fn has_address(&self, addr: Addr) -> bool {
        // `create` made sure that this addition cannot overflow.
        self.load_address <= addr && addr < self.load_address + self.memory_size
    }

    /// Retrieve the resolution progress.
    pub fn resolution_state(&self) -> ResolutionState {
        match &self.state {
            State::Created => ResolutionState::Created,
            State::ElfResolved(..) => ResolutionState::ElfResolved,
            State::DwarfResolved(_, debug) => ResolutionState::DwarfResolved(debug.strategy()),
        }
    }

    /// Retrieve the path of the binary as configured.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Translate a process address into an address as used in the
    /// binary's ELF and DWARF data.
    fn file_addr(&self, addr: Addr) -> Result<Addr> {
        if !self.has_address(addr) {
            return Err(Error::with_not_found(format!(
                "address {addr:#x} does not belong to `{}`",
                self.path.display()
            )))
        }

        if self.is_pie {
            Ok(addr - self.load_address)
        } else {
            Ok(addr)
        }
    }

    fn resolve_debug_info(&self, elf: &ElfImage) -> Result<DebugInfo> {
        match elf.parser.has_debug_info() {
            Ok(true) => match DwarfResolver::from_parser(Rc::clone(&elf.parser)) {
                Ok(resolver) => {
                    debug!("using DWARF embedded in `{}`", self.open_path.display());
                    return Ok(DebugInfo::Dwarf {
                        resolver,
                        _file: None,
                    })
                }
                Err(err) => warn!(
                    "failed to parse DWARF embedded in `{}`: {err}; ignoring...",
                    self.open_path.display()
                ),
            },
            Ok(false) => (),
            Err(err) => warn!(
                "failed to check `{}` for debug information: {err}",
                self.open_path.display()
            ),
        }

        // Attached hints take precedence over what the binary records
        // about itself.
        let build_id = match &self.build_id {
            Some(build_id) => Some(&**build_id),
            None => elf.parser.build_id().unwrap_or_else(|err| {
                warn!("failed to read build ID of `{}`: {err}", self.open_path.display());
                None
            }),
        };
        let debug_link = match &self.debug_link {
            Some((linkee, crc)) => Some((linkee.as_os_str(), *crc)),
            None => elf.parser.debug_link().unwrap_or_else(|err| {
                warn!("failed to read debug link of `{}`: {err}", self.open_path.display());
                None
            }),
        };

        let locator = DebugInfoLocator::new(&self.fd_cache, &self.debug_root);
        if let Some(build_id) = build_id {
            if let Some(file) = locator.find_by_build_id(build_id)? {
                if let Some(debug) = DebugInfo::from_debug_file(file) {
                    return Ok(debug)
                }
            }
        }

        if let Some((linkee, crc)) = debug_link {
            if let Some(file) = locator.find_by_debug_link(&self.open_path, linkee, crc)? {
                if let Some(debug) = DebugInfo::from_debug_file(file) {
                    return Ok(debug)
                }
            }
        }

        debug!(
            "no DWARF available for `{}`; falling back to ELF symbols",
            self.open_path.display()
        );
        Ok(DebugInfo::ElfOnly)
    }

    /// Advance the state machine up to `DwarfResolved`.
    ///
    /// A failure leaves the object in the last state successfully
    /// reached.
    #[cfg_attr(feature = "tracing", crate::log::instrument(skip_all, fields(path = %self.open_path.display())))]
    fn resolve(&mut self) -> Result<()> {
        let elf = match mem::replace(&mut self.state, State::Created) {
            State::Created => ElfImage::open(&self.fd_cache, &self.open_path)?,
            State::ElfResolved(elf) => elf,
            state @ State::DwarfResolved(..) => {
                self.state = state;
                return Ok(())
            }
        };

        match self.resolve_debug_info(&elf) {
            Ok(debug) => {
                self.state = State::DwarfResolved(elf, debug);
                Ok(())
            }
            Err(err) => {
                self.state = State::ElfResolved(elf);
                Err(err)
            }
        }
    }

    /// Retrieve the resolved state. Must only be called after a
    /// successful [`resolve`](Self::resolve).
    fn resolved(&self) -> (&ElfImage, &DebugInfo) {
        match &self.state {
            State::DwarfResolved(elf, debug) => (elf, debug),
            State::Created | State::ElfResolved(..) => {
                unreachable!("state machine did not reach DWARF resolution")
            }
        }
    }

    /// Look up the name of the function containing `addr`.
    ///
    /// The name is reported as `<name>+<offset>` if `addr` does not
    /// point to the very beginning of the function.
    pub fn lookup_function_name(&mut self, addr: Addr) -> Result<String> {
        let file_addr = self.file_addr(addr)?;
        let () = self.resolve()?;
        let (elf, debug) = self.resolved();

        if let DebugInfo::Dwarf { resolver, .. } = debug {
            match resolver.find_function(file_addr) {
                Ok(Some(function)) => {
                    return Ok(format_function_name(function.name, file_addr.saturating_sub(function.addr)))
                }
                Ok(None) => (),
                Err(err) => warn!(
                    "failed to look up DWARF function at {file_addr:#x}: {err}; falling back to ELF symbols"
                ),
            }
        }

        match elf.parser.find_sym(file_addr)? {
            Some((name, sym_addr)) => Ok(format_function_name(name, file_addr - sym_addr)),
            None => Err(Error::with_not_found(format!(
                "no function found for address {addr:#x} in `{}`",
                self.path.display()
            ))),
        }
    }

    /// Look up the source code location of `addr`.
    ///
    /// If `addr` belongs to an inlined function, the location of the
    /// innermost inlined call is reported.
    pub fn lookup_source_location(&mut self, addr: Addr) -> Result<SourceLocation> {
        let file_addr = self.file_addr(addr)?;
        let () = self.resolve()?;
        let (_elf, debug) = self.resolved();

        let resolver = match debug {
            DebugInfo::Dwarf { resolver, .. } => resolver,
            DebugInfo::ElfOnly => {
                return Err(Error::with_not_found(format!(
                    "no DWARF available for `{}`",
                    self.path.display()
                )))
            }
        };

        match resolver.find_source_location(file_addr)? {
            Some(location) => Ok(SourceLocation {
                filename: location.file.to_path_buf(),
                line_number: location.line,
            }),
            None => Err(Error::with_not_found(format!(
                "no source location found for address {addr:#x} in `{}`",
                self.path.display()
            ))),
        }
    }
}

impl Debug for BinaryInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct(stringify!(BinaryInfo))
            .field("path", &self.path)
            .field("load_address", &format_args!("{:#x}", self.load_address))
            .field("memory_size", &format_args!("{:#x}", self.memory_size))
            .field("is_pie", &self.is_pie)
            .field("state", &self.resolution_state())
            .finish()
    }
}
