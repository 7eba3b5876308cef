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

use std::cell::OnceCell;

use crate::log::debug;
use crate::log::warn;
use crate::util::get_or_try_init;
use crate::Error;
use crate::ErrorExt as _;
use crate::Result;

use super::function::Function;
use super::lines::Lines;
use super::location::Location;
use super::range::RangeAttributes;
use super::reader::R;
use super::unit::Unit;
use super::unit::UnitRange;


fn format_offset(offset: gimli::UnitSectionOffset<usize>) -> String {
    match offset {
        gimli::UnitSectionOffset::DebugInfoOffset(o) => {
            format!(".debug_info+0x{:08x}", o.0)
        }
        gimli::UnitSectionOffset::DebugTypesOffset(o) => {
            format!(".debug_types+0x{:08x}", o.0)
        }
    }
}


/// All compilation units of a DWARF object, indexed by address.
pub(crate) struct Units<'dwarf> {
    /// The DWARF data.
    dwarf: gimli::Dwarf<R<'dwarf>>,
    /// The ranges of the units encountered.
    unit_ranges: Box<[UnitRange]>,
    /// All units along with meta-data.
    units: Box<[Unit<'dwarf>]>,
}

impl<'dwarf> Units<'dwarf> {
    pub(crate) fn parse(sections: gimli::Dwarf<R<'dwarf>>) -> Result<Self> {
        // Find all the references to compilation units in .debug_aranges.
        // Note that we always also iterate through all of .debug_info to
        // find compilation units, because .debug_aranges may be missing some.
        let mut aranges = Vec::new();
        let mut headers = sections.debug_aranges.headers();
        while let Some(header) = headers.next()? {
            aranges.push((header.debug_info_offset(), header.offset()));
        }
        aranges.sort_by_key(|i| i.0);

        let mut unit_ranges = Vec::new();
        let mut res_units = Vec::new();
        let mut units = sections.units();
        while let Some(header) = units.next()? {
            let unit_id = res_units.len();
            let offset = match header.offset().as_debug_info_offset() {
                Some(offset) => offset,
                None => continue,
            };
            match header.type_() {
                gimli::UnitType::Type { .. } | gimli::UnitType::SplitType { .. } => continue,
                _ => {}
            }
            let dw_unit = sections.unit(header).map_err(Error::from).with_context(|| {
                format!(
                    "failed to retrieve DWARF unit for unit header @ {}",
                    format_offset(header.offset())
                )
            })?;

            let mut have_unit_range = false;
            {
                let mut entries = dw_unit.entries_raw(None)?;
                let abbrev = match entries.read_abbreviation()? {
                    Some(abbrev) => abbrev,
                    None => continue,
                };

                let mut ranges = RangeAttributes::default();
                for spec in abbrev.attributes() {
                    let attr = entries.read_attribute(*spec)?;
                    let _handled = ranges.handle_attr(&attr, &sections, &dw_unit)?;
                }

                // Find the address ranges for the CU, using in order of preference:
                // - DW_AT_ranges
                // - .debug_aranges
                // - DW_AT_low_pc/DW_AT_high_pc
                let i = match ranges.ranges_offset {
                    Some(_) => None,
                    None => aranges.binary_search_by_key(&offset, |x| x.0).ok(),
                };
                if let Some(mut i) = i {
                    // There should be only one set per CU, but in practice multiple
                    // sets have been observed.
                    while i > 0 && aranges[i - 1].0 == offset {
                        i -= 1;
                    }
                    for (_, aranges_offset) in aranges[i..].iter().take_while(|x| x.0 == offset) {
                        let aranges_header = sections.debug_aranges.header(*aranges_offset)?;
                        let mut aranges = aranges_header.entries();
                        while let Some(arange) = aranges.next()? {
                            if arange.length() != 0 {
                                unit_ranges.push(UnitRange {
                                    range: arange.range(),
                                    unit_id,
                                    max_end: 0,
                                });
                                have_unit_range = true;
                            }
                        }
                    }
                } else {
                    have_unit_range |= ranges.for_each_range(&sections, &dw_unit, |range| {
                        unit_ranges.push(UnitRange {
                            range,
                            unit_id,
                            max_end: 0,
                        });
                    })?;
                }
            }

            let lines = OnceCell::new();
            if !have_unit_range {
                // The unit did not declare any ranges.
                // Try to get some ranges from the line program sequences.
                if let Some(ref ilnp) = dw_unit.line_program {
                    if let Ok(lines) = get_or_try_init(&lines, || {
                        Lines::parse(&sections, &dw_unit, ilnp.clone())
                    }) {
                        for sequence in lines.sequences.iter() {
                            unit_ranges.push(UnitRange {
                                range: gimli::Range {
                                    begin: sequence.start,
                                    end: sequence.end,
                                },
                                unit_id,
                                max_end: 0,
                            })
                        }
                    }
                }
            }

            res_units.push(Unit::new(dw_unit, lines))
        }

        // Sort this for faster lookups.
        unit_ranges.sort_by_key(|i| i.range.begin);

        // Calculate the `max_end` field now that we've determined the order of
        // CUs.
        let mut max = 0;
        for i in unit_ranges.iter_mut() {
            max = max.max(i.range.end);
            i.max_end = max;
        }

        let slf = Self {
            dwarf: sections,
            unit_ranges: unit_ranges.into_boxed_slice(),
            units: res_units.into_boxed_slice(),
        };
        Ok(slf)
    }

    /// Finds the CUs for the function address given.
    ///
    /// There might be multiple CUs whose range contains this address.
    /// Weak symbols have shown up in the wild which cause this to happen
    /// but otherwise this can happen if the CU has non-contiguous functions
    /// but only reports a single range.
    ///
    /// Consequently we return an iterator for all CUs which may contain the
    /// address, and the caller must check if there is actually a function or
    /// location in the CU for that address.
    fn find_units(&self, probe: u64) -> impl Iterator<Item = &Unit<'dwarf>> {
        let probe_high = probe.saturating_add(1);
        // First up find the position in the array which could have our function
        // address.
        let pos = match self
            .unit_ranges
            .binary_search_by_key(&probe_high, |i| i.range.begin)
        {
            // Although unlikely, we could find an exact match.
            Ok(i) => i + 1,
            // No exact match was found, but this probe would fit at slot `i`.
            // This means that slot `i` is bigger than `probe`, along with all
            // indices greater than `i`, so we need to search all previous
            // entries.
            Err(i) => i,
        };

        // Once we have our index we iterate backwards from that position
        // looking for a matching CU.
        self.unit_ranges[..pos]
            .iter()
            .rev()
            // Each entry keeps track of the maximum end address seen so far,
            // starting from the beginning of the array of unit ranges. We're
            // iterating in reverse so if our probe is beyond the maximum range
            // of this entry, then it's guaranteed to not fit in any prior
            // entries, so we break out.
            .take_while(move |i| probe < i.max_end)
            .filter_map(move |i| {
                if probe >= i.range.end || probe_high <= i.range.begin {
                    return None
                }
                Some(&self.units[i.unit_id])
            })
    }

    /// Find the function containing `probe`.
    pub fn find_function(&self, probe: u64) -> Result<Option<&Function<'dwarf>>, gimli::Error> {
        for unit in self.find_units(probe) {
            if let Some(function) = unit.find_function(probe, &self.dwarf)? {
                return Ok(Some(function))
            }
        }
        Ok(None)
    }

    /// Find the call site of the innermost inlined subroutine covering
    /// `probe`, if any.
    ///
    /// Inlined subroutines without a usable `DW_AT_call_file` are
    /// skipped in favor of the next enclosing one.
    pub fn find_inlined_call_site(
        &self,
        probe: u64,
    ) -> Result<Option<Location<'_>>, gimli::Error> {
        for unit in self.find_units(probe) {
            let function = match unit.find_function(probe, &self.dwarf)? {
                Some(function) => function,
                None => continue,
            };

            let inlined_fns = function.parse_inlined_functions(&self.dwarf, unit.dw_unit())?;
            let chain = inlined_fns.find_inlined_functions(probe);
            if chain.is_empty() {
                return Ok(None)
            }

            let lines = match unit.parse_lines(&self.dwarf)? {
                Some(lines) => lines,
                None => return Ok(None),
            };

            for inlined_fn in chain.iter().rev() {
                let call_file = match inlined_fn.call_file {
                    Some(call_file) => call_file,
                    None => continue,
                };

                if let Some(file) = lines.file(call_file) {
                    debug!(
                        "attributing {probe:#x} to call site of inlined `{}` at {}:{}",
                        inlined_fn
                            .name
                            .and_then(|name| name.to_string().ok())
                            .unwrap_or("<unknown>"),
                        file.display(),
                        inlined_fn.call_line
                    );
                    return Ok(Some(Location {
                        file,
                        line: inlined_fn.call_line,
                    }))
                } else {
                    warn!(
                        "encountered invalid inlined function `call_file` index ({call_file}); ignoring..."
                    );
                }
            }
            return Ok(None)
        }
        Ok(None)
    }

    /// Find the source file and line corresponding to the given virtual memory
    /// address.
    pub fn find_location(&self, probe: u64) -> Result<Option<Location<'_>>, gimli::Error> {
        for unit in self.find_units(probe) {
            if let Some(location) = unit.find_location(probe, &self.dwarf)? {
                return Ok(Some(location))
            }
        }
        Ok(None)
    }

    /// Check whether any unit carries a line number program.
    #[cfg(test)]
    pub fn has_line_info(&self) -> bool {
        self.units
            .iter()
            .any(|unit| unit.dw_unit().line_program.is_some())
    }
}
