//! The legacy integer based calling convention.
//!
//! Callers ported from the old interface expect `1`/`0` for predicates
//! and `0`/`-1` for everything else, with results written through an
//! out-parameter only on success. The functions in this module map the
//! [`Error`](crate::Error) based interface of [`BinaryInfo`] onto that
//! convention. Errors are logged and otherwise discarded, so prefer
//! [`BinaryInfo`] directly in new code.

use std::ffi::OsStr;
use std::path::Path;

use crate::log::debug;
use crate::Addr;
use crate::BinaryInfo;
use crate::Config;
use crate::Context;
use crate::Result;
use crate::SourceLocation;


fn to_status(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            debug!("{err:#}");
            -1
        }
    }
}


/// Create a [`BinaryInfo`], returning `None` on any failure.
pub fn create(
    context: &Context,
    path: &Path,
    load_address: Addr,
    memory_size: u64,
    is_pie: bool,
    debug_info_dir: Option<&Path>,
    target_prefix: Option<&Path>,
) -> Option<BinaryInfo> {
    let config = Config {
        path: path.to_path_buf(),
        load_address,
        memory_size,
        is_pie,
        debug_info_dir: debug_info_dir.map(Path::to_path_buf),
        target_prefix: target_prefix.map(Path::to_path_buf),
        _non_exhaustive: (),
    };

    match BinaryInfo::create(context, config) {
        Ok(bin) => Some(bin),
        Err(err) => {
            debug!("{err:#}");
            None
        }
    }
}

/// Attach a build ID. Returns `0` on success and `-1` on failure.
pub fn set_build_id(bin: &mut BinaryInfo, build_id: &[u8]) -> i32 {
    to_status(bin.set_build_id(build_id))
}

/// Attach a debug link. Returns `0` on success and `-1` on failure.
pub fn set_debug_link(bin: &mut BinaryInfo, filename: &OsStr, crc: u32) -> i32 {
    to_status(bin.set_debug_link(filename, crc))
}

/// Returns `1` if `addr` belongs to `bin` and `0` otherwise.
pub fn has_address(bin: &BinaryInfo, addr: Addr) -> i32 {
    i32::from(bin.has_address(addr))
}

/// Look up the function name for `addr`, storing it in `name`.
///
/// Returns `0` on success and `-1` on failure, in which case `name` is
/// left untouched.
pub fn lookup_function_name(bin: &mut BinaryInfo, addr: Addr, name: &mut Option<String>) -> i32 {
    to_status(bin.lookup_function_name(addr).map(|found| {
        *name = Some(found);
    }))
}

/// Look up the source location for `addr`, storing it in `location`.
///
/// Returns `0` on success and `-1` on failure, in which case `location`
/// is left untouched.
pub fn lookup_source_location(
    bin: &mut BinaryInfo,
    addr: Addr,
    location: &mut Option<SourceLocation>,
) -> i32 {
    to_status(bin.lookup_source_location(addr).map(|found| {
        *location = Some(found);
    }))
}

/// Destroy `bin`, releasing all files it holds.
#[inline]
pub fn destroy(bin: BinaryInfo) {
    drop(bin)
}
