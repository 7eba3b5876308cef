//! **bininfo** resolves runtime instruction addresses of an ELF binary
//! loaded into a process to function names and source code locations.
//!
//! Each loaded binary is described by a [`BinaryInfo`] object, created
//! from a process wide [`Context`] and a per binary [`Config`]. Files
//! are opened lazily on the first lookup. Debug information is taken
//! from the binary itself or, if it was stripped, from a separate debug
//! file located via build ID or debug link (see
//! [`BinaryInfo::set_build_id`] and [`BinaryInfo::set_debug_link`]).
//! Without any DWARF, function names are resolved via the ELF symbol
//! table.
//!
//! ```no_run
//! use bininfo::BinaryInfo;
//! use bininfo::Config;
//! use bininfo::Context;
//!
//! # fn main() -> bininfo::Result<()> {
//! let context = Context::new();
//! let config = Config {
//!     is_pie: true,
//!     ..Config::new("/usr/lib/libhello.so", 0x7f0000000000, 0x20000)
//! };
//! let mut bin = BinaryInfo::create(&context, config)?;
//! let name = bin.lookup_function_name(0x7f0000001234)?;
//! let location = bin.lookup_source_location(0x7f0000001234)?;
//! println!(
//!     "{name} at {}:{}",
//!     location.filename.display(),
//!     location.line_number
//! );
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]


mod bin_info;
pub mod compat;
mod demangle;
mod dwarf;
mod elf;
mod error;
mod fd_cache;
mod locate;
mod log;
mod mmap;
#[cfg(any(test, feature = "test"))]
mod test_helper;
mod util;


pub use crate::bin_info::BinaryInfo;
pub use crate::bin_info::Config;
pub use crate::bin_info::Context;
pub use crate::bin_info::ResolutionState;
pub use crate::bin_info::ResolutionStrategy;
pub use crate::bin_info::SourceLocation;
pub use crate::bin_info::DEFAULT_DEBUG_DIR;
pub use crate::error::Error;
pub use crate::error::ErrorExt;
pub use crate::error::ErrorKind;
pub use crate::error::IntoError;
pub use crate::fd_cache::FdCache;
pub use crate::fd_cache::FdHandle;
pub use crate::locate::debug_link_crc32;


/// A type representing addresses.
pub type Addr = u64;

/// A result type using our [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;


/// Functionality for internal testing and benchmarking. Not part of
/// the stable API.
#[cfg(feature = "test")]
#[doc(hidden)]
pub mod __private {
    pub use crate::test_helper::*;
}
