//! Support for GNU debug links.
//!
//! From <https://sourceware.org/gdb/current/onlinedocs/gdb.html/Separate-Debug-Files.html>:
//!
//! A debug link is a special section of the executable file named
//! .gnu_debuglink. The section must contain:
//! - A filename, with any leading directory components removed, followed by a
//!   zero byte,
//! - zero to three bytes of padding, as needed to reach the next four-byte
//!   boundary within the section, and
//! - a four-byte CRC checksum, stored in the same endianness used for the
//!   executable file itself. The checksum is computed on the debugging
//!   information file’s full contents by the function given below, passing zero
//!   as the crc argument.

use std::ffi::OsStr;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;


/// The reflected CRC-32 polynomial.
const CRC32_POLY: u32 = 0xedb88320;

const fn crc32_table() -> [u32; 256] {
    let mut table = [0; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ CRC32_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC32_TABLE: [u32; 256] = crc32_table();


/// Calculate the debug link checksum of `data`.
pub fn debug_link_crc32(data: &[u8]) -> u32 {
    let crc = data.iter().fold(!0u32, |crc, byte| {
        CRC32_TABLE[usize::from((crc as u8) ^ byte)] ^ (crc >> 8)
    });
    !crc
}


enum State {
    BinaryDir,
    DotDebugDir,
    DebugRoot,
    Done,
}

/// An iterator over the candidate paths of a debug link target, in
/// search order:
/// 1. the directory containing the binary
/// 2. the `.debug` sub-directory of said directory
/// 3. said directory, relative to the debug root
pub(crate) struct DebugFileIter<'path> {
    /// The directory containing the file with the debug link.
    binary_dir: &'path Path,
    /// The root directory of separate debug information.
    debug_root: &'path Path,
    /// The debug link target file.
    linkee: &'path OsStr,
    /// The iteration state.
    state: State,
}

impl<'path> DebugFileIter<'path> {
    pub(crate) fn new(
        binary_dir: &'path Path,
        debug_root: &'path Path,
        linkee: &'path OsStr,
    ) -> Self {
        Self {
            binary_dir,
            debug_root,
            linkee,
            state: State::BinaryDir,
        }
    }
}

impl Iterator for DebugFileIter<'_> {
    type Item = PathBuf;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            State::BinaryDir => {
                self.state = State::DotDebugDir;
                Some(self.binary_dir.join(self.linkee))
            }
            State::DotDebugDir => {
                self.state = State::DebugRoot;
                Some(self.binary_dir.join(".debug").join(self.linkee))
            }
            State::DebugRoot => {
                self.state = State::Done;
                // Remove the root directory to make the path relative.
                // That allows for joining to work as expected.
                let rel_dir = self
                    .binary_dir
                    .components()
                    .filter(|component| {
                        !matches!(component, Component::RootDir | Component::Prefix(..))
                    })
                    .collect::<PathBuf>();
                Some(self.debug_root.join(rel_dir).join(self.linkee))
            }
            State::Done => None,
        }
    }
}
