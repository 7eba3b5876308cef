use std::path::Path;


/// A source code location as recorded in DWARF.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Location<'dwarf> {
    /// The source file, joined with its directory.
    pub file: &'dwarf Path,
    /// The line number; zero if unknown.
    pub line: u64,
}
