// Based on gimli-rs/addr2line (https://github.com/gimli-rs/addr2line):
// > Copyright (c) 2016-2018 The gimli Developers
// >
// > Permission is hereby granted, free of charge, to any
// > person obtaining a copy of this software and associated
// > documentation files (the "Software"), to deal in the
// > Software without restriction, including without
// > limitation the rights to use, copy, modify, merge,
// > publish, distribute, sublicense, and/or sell copies of
// > the Software, and to permit persons to whom the Software
// > is furnished to do so, subject to the following
// > conditions:
// >
// > The above copyright notice and this permission notice
// > shall be included in all copies or substantial portions
// > of the Software.
// >
// > THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF
// > ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED
// > TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A
// > PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT
// > SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY
// > CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION
// > OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR
// > IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// > DEALINGS IN THE SOFTWARE.

use std::cmp::Ordering;
use std::ffi::OsStr;
use std::mem;
use std::num::NonZeroU64;
use std::os::unix::ffi::OsStrExt as _;
use std::path::Path;
use std::path::PathBuf;

use super::location::Location;
use super::reader::R;


fn bytes_to_path(bytes: &[u8]) -> &Path {
    Path::new(OsStr::from_bytes(bytes))
}

/// Join `dir` and `file`, leaving `file` untouched if it is absolute
/// or `dir` is empty.
fn join_path(dir: &Path, file: &Path) -> PathBuf {
    if dir.as_os_str().is_empty() {
        file.to_path_buf()
    } else {
        dir.join(file)
    }
}

fn render_file<'dwarf>(
    dwarf: &gimli::Dwarf<R<'dwarf>>,
    unit: &gimli::Unit<R<'dwarf>>,
    file: &gimli::FileEntry<R<'dwarf>, usize>,
    header: &gimli::LineProgramHeader<R<'dwarf>, usize>,
) -> gimli::Result<PathBuf> {
    let mut dir = if let Some(ref comp_dir) = unit.comp_dir {
        bytes_to_path(comp_dir.slice()).to_path_buf()
    } else {
        PathBuf::new()
    };

    // The directory index 0 is defined to correspond to the compilation unit
    // directory.
    if file.directory_index() != 0 {
        if let Some(directory) = file.directory(header) {
            let d = dwarf.attr_string(unit, directory)?;
            dir = join_path(&dir, bytes_to_path(d.slice()));
        }
    }

    let f = dwarf.attr_string(unit, file.path_name())?;
    Ok(join_path(&dir, bytes_to_path(f.slice())))
}


#[derive(Debug)]
pub(super) struct LineSequence {
    pub start: u64,
    pub end: u64,
    rows: Box<[LineRow]>,
}

#[derive(Debug)]
struct LineRow {
    address: u64,
    file_index: u64,
    line: u64,
}


/// The decoded line number program of a unit.
#[derive(Debug)]
pub(super) struct Lines {
    /// Source file paths, indexed by line program file index.
    files: Box<[PathBuf]>,
    /// Address sequences, sorted by start address.
    pub sequences: Box<[LineSequence]>,
}

impl Lines {
    pub fn parse<'dwarf>(
        dwarf: &gimli::Dwarf<R<'dwarf>>,
        unit: &gimli::Unit<R<'dwarf>>,
        ilnp: gimli::IncompleteLineProgram<R<'dwarf>, usize>,
    ) -> gimli::Result<Self> {
        let mut sequences = Vec::new();
        let mut sequence_rows = Vec::<LineRow>::new();
        let mut rows = ilnp.rows();
        while let Some((_, row)) = rows.next_row()? {
            if row.end_sequence() {
                if let Some(start) = sequence_rows.first().map(|x| x.address) {
                    let end = row.address();
                    let rows = mem::take(&mut sequence_rows);
                    sequences.push(LineSequence {
                        start,
                        end,
                        rows: rows.into_boxed_slice(),
                    });
                }
                continue
            }

            let address = row.address();
            let file_index = row.file_index();
            let line = row.line().map(NonZeroU64::get).unwrap_or(0);

            if let Some(last_row) = sequence_rows.last_mut() {
                if last_row.address == address {
                    last_row.file_index = file_index;
                    last_row.line = line;
                    continue
                }
            }

            sequence_rows.push(LineRow {
                address,
                file_index,
                line,
            });
        }
        sequences.sort_by_key(|x| x.start);

        let mut files = Vec::new();
        let header = rows.header();
        match header.file(0) {
            Some(file) => files.push(render_file(dwarf, unit, file, header)?),
            // DWARF version <= 4 does not have a 0th index.
            None => files.push(PathBuf::new()),
        }
        let mut index = 1;
        while let Some(file) = header.file(index) {
            files.push(render_file(dwarf, unit, file, header)?);
            index += 1;
        }

        Ok(Self {
            files: files.into_boxed_slice(),
            sequences: sequences.into_boxed_slice(),
        })
    }

    /// Retrieve the path of the file with the given index.
    #[inline]
    pub fn file(&self, index: u64) -> Option<&Path> {
        let index = usize::try_from(index).ok()?;
        self.files.get(index).map(PathBuf::as_path)
    }

    /// Find the location of the row with the greatest address not
    /// exceeding `probe`, within the sequence covering it.
    pub fn find_location(&self, probe: u64) -> Option<Location<'_>> {
        let seq_idx = self.sequences.binary_search_by(|sequence| {
            if probe < sequence.start {
                Ordering::Greater
            } else if probe >= sequence.end {
                Ordering::Less
            } else {
                Ordering::Equal
            }
        });
        let sequence = &self.sequences[seq_idx.ok()?];

        let idx = sequence
            .rows
            .binary_search_by(|row| row.address.cmp(&probe));
        let idx = match idx {
            Ok(x) => x,
            Err(0) => return None,
            Err(x) => x - 1,
        };
        let row = &sequence.rows[idx];
        let file = self.file(row.file_index)?;

        Some(Location {
            file,
            line: row.line,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;


    fn lines() -> Lines {
        Lines {
            files: vec![
                PathBuf::new(),
                PathBuf::from("./libhello.c"),
                PathBuf::from("./hello-tp.h"),
            ]
            .into_boxed_slice(),
            sequences: vec![LineSequence {
                start: 0x2277,
                end: 0x2477,
                rows: vec![
                    LineRow {
                        address: 0x2277,
                        file_index: 1,
                        line: 30,
                    },
                    LineRow {
                        address: 0x2300,
                        file_index: 2,
                        line: 80,
                    },
                    LineRow {
                        address: 0x2340,
                        file_index: 1,
                        line: 36,
                    },
                ]
                .into_boxed_slice(),
            }]
            .into_boxed_slice(),
        }
    }

    /// Check that path joining honors empty and absolute components.
    #[test]
    fn path_joining() {
        assert_eq!(
            join_path(Path::new(""), Path::new("./foo.c")),
            Path::new("./foo.c")
        );
        assert_eq!(
            join_path(Path::new("/src"), Path::new("foo.c")),
            Path::new("/src/foo.c")
        );
        assert_eq!(
            join_path(Path::new("/src"), Path::new("/usr/include/stdio.h")),
            Path::new("/usr/include/stdio.h")
        );
    }

    /// Check that we pick the last row not exceeding the probe.
    #[test]
    fn location_lookup() {
        let lines = lines();
        assert_ne!(format!("{lines:?}"), "");

        let loc = lines.find_location(0x2277).unwrap();
        assert_eq!(loc.file, Path::new("./libhello.c"));
        assert_eq!(loc.line, 30);

        let loc = lines.find_location(0x22ff).unwrap();
        assert_eq!(loc.line, 30);

        let loc = lines.find_location(0x2300).unwrap();
        assert_eq!(loc.file, Path::new("./hello-tp.h"));
        assert_eq!(loc.line, 80);

        let loc = lines.find_location(0x2367).unwrap();
        assert_eq!(loc.file, Path::new("./libhello.c"));
        assert_eq!(loc.line, 36);

        // Outside of any sequence.
        assert_eq!(lines.find_location(0x2276), None);
        assert_eq!(lines.find_location(0x2477), None);
    }
}
