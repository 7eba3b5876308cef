use std::path::Path;
use std::path::PathBuf;

use crate::util::bytes_to_hex;


/// Construct the canonical location of the debug file for `build_id`
/// below `debug_root`: `<debug_root>/.build-id/<hh>/<rest>.debug`.
///
/// `build_id` must not be empty.
pub(crate) fn build_id_path(debug_root: &Path, build_id: &[u8]) -> PathBuf {
    debug_assert!(!build_id.is_empty());

    let (first, rest) = build_id.split_at(build_id.len().min(1));
    let dir = bytes_to_hex(first);
    let file = format!("{}.debug", bytes_to_hex(rest));
    debug_root.join(".build-id").join(dir).join(file)
}
