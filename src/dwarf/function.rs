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
use std::cmp::Ordering;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;

use gimli::Error;

use super::range::RangeAttributes;
use super::reader::R;


/// The maximum number of `DW_AT_abstract_origin` or
/// `DW_AT_specification` references we follow to find a name.
const NAME_RECURSION_LIMIT: usize = 16;


fn name_entry<'dwarf>(
    dwarf: &gimli::Dwarf<R<'dwarf>>,
    unit: &gimli::Unit<R<'dwarf>>,
    offset: gimli::UnitOffset<usize>,
    recursion_limit: usize,
) -> Result<Option<R<'dwarf>>, Error> {
    let mut entries = unit.entries_raw(Some(offset))?;
    let abbrev = if let Some(abbrev) = entries.read_abbreviation()? {
        abbrev
    } else {
        return Err(gimli::Error::NoEntryAtGivenOffset)
    };

    let mut name = None;
    let mut next = None;
    for spec in abbrev.attributes() {
        let attr = entries.read_attribute(*spec)?;
        match attr.name() {
            gimli::DW_AT_linkage_name | gimli::DW_AT_MIPS_linkage_name => {
                if let Ok(val) = dwarf.attr_string(unit, attr.value()) {
                    return Ok(Some(val))
                }
            }
            gimli::DW_AT_name => {
                if let Ok(val) = dwarf.attr_string(unit, attr.value()) {
                    name = Some(val);
                }
            }
            gimli::DW_AT_abstract_origin | gimli::DW_AT_specification => {
                next = Some(attr.value());
            }
            _ => {}
        }
    }

    if name.is_some() {
        return Ok(name)
    }

    if let Some(next) = next {
        return name_attr(dwarf, unit, next, recursion_limit - 1)
    }

    Ok(None)
}

fn name_attr<'dwarf>(
    dwarf: &gimli::Dwarf<R<'dwarf>>,
    unit: &gimli::Unit<R<'dwarf>>,
    attr: gimli::AttributeValue<R<'dwarf>>,
    recursion_limit: usize,
) -> Result<Option<R<'dwarf>>, Error> {
    if recursion_limit == 0 {
        return Ok(None)
    }

    match attr {
        gimli::AttributeValue::UnitRef(offset) => {
            name_entry(dwarf, unit, offset, recursion_limit)
        }
        // Cross-unit references are rare for the entries we care
        // about and are not followed.
        _ => Ok(None),
    }
}


/// The attributes of a subprogram or inlined subroutine DIE that we
/// care about.
#[derive(Default)]
struct DieAttributes<'dwarf> {
    name: Option<R<'dwarf>>,
    ranges: RangeAttributes,
    call_file: Option<u64>,
    call_line: u64,
}

impl<'dwarf> DieAttributes<'dwarf> {
    fn parse(
        entries: &mut gimli::EntriesRaw<'_, '_, R<'dwarf>>,
        abbrev: &gimli::Abbreviation,
        dwarf: &gimli::Dwarf<R<'dwarf>>,
        unit: &gimli::Unit<R<'dwarf>>,
    ) -> Result<Self, Error> {
        let mut slf = Self::default();
        for spec in abbrev.attributes() {
            let attr = entries.read_attribute(*spec)?;
            if slf.ranges.handle_attr(&attr, dwarf, unit)? {
                continue
            }

            match attr.name() {
                gimli::DW_AT_linkage_name | gimli::DW_AT_MIPS_linkage_name => {
                    if let Ok(val) = dwarf.attr_string(unit, attr.value()) {
                        slf.name = Some(val);
                    }
                }
                gimli::DW_AT_name => {
                    if slf.name.is_none() {
                        slf.name = dwarf.attr_string(unit, attr.value()).ok();
                    }
                }
                gimli::DW_AT_abstract_origin | gimli::DW_AT_specification => {
                    if slf.name.is_none() {
                        slf.name = name_attr(dwarf, unit, attr.value(), NAME_RECURSION_LIMIT)?;
                    }
                }
                gimli::DW_AT_call_file => {
                    // In DWARF 5 a file index of 0 is a valid index
                    // into the file table. Before, it meant "no file".
                    if let gimli::AttributeValue::FileIndex(fi) = attr.value() {
                        if fi > 0 || unit.header.version() >= 5 {
                            slf.call_file = Some(fi);
                        }
                    }
                }
                gimli::DW_AT_call_line => {
                    slf.call_line = attr.udata_value().unwrap_or(0);
                }
                _ => {}
            }
        }
        Ok(slf)
    }
}


/// A `DW_TAG_inlined_subroutine` entry.
pub(crate) struct InlinedFunction<'dwarf> {
    pub name: Option<R<'dwarf>>,
    /// The index of the file containing the call site.
    pub call_file: Option<u64>,
    /// The line of the call site.
    pub call_line: u64,
}

impl Debug for InlinedFunction<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let Self {
            name,
            call_file,
            call_line,
        } = self;

        f.debug_struct(stringify!(InlinedFunction))
            .field("name", &name.and_then(|r| r.to_string().ok()))
            .field("call_file", call_file)
            .field("call_line", call_line)
            .finish()
    }
}


#[derive(Debug)]
struct InlinedFunctionAddress {
    range: gimli::Range,
    call_depth: usize,
    /// An index into `InlinedFunctions::inlined_functions`.
    function: usize,
}


/// The inlined subroutines of a single function.
#[derive(Debug)]
pub(crate) struct InlinedFunctions<'dwarf> {
    /// List of all `DW_TAG_inlined_subroutine` details in this
    /// function.
    inlined_functions: Box<[InlinedFunction<'dwarf>]>,
    /// List of `DW_TAG_inlined_subroutine` address ranges in this
    /// function.
    inlined_addresses: Box<[InlinedFunctionAddress]>,
}

impl<'dwarf> InlinedFunctions<'dwarf> {
    fn parse(
        dw_die_offset: gimli::UnitOffset<usize>,
        dwarf: &gimli::Dwarf<R<'dwarf>>,
        unit: &gimli::Unit<R<'dwarf>>,
    ) -> Result<Self, Error> {
        let mut entries = unit.entries_raw(Some(dw_die_offset))?;
        let depth = entries.next_depth();
        // The DIE offset we get is the one of the function. But we are
        // interested in its children. So skip the necessary attributes.
        let abbrev = entries
            .read_abbreviation()?
            .ok_or(gimli::Error::NoEntryAtGivenOffset)?;
        debug_assert_eq!(abbrev.tag(), gimli::DW_TAG_subprogram);
        let () = entries.skip_attributes(abbrev.attributes())?;

        let mut inlined_functions = Vec::new();
        let mut inlined_addresses = Vec::new();
        let () = parse_children(
            &mut entries,
            depth,
            dwarf,
            unit,
            &mut inlined_functions,
            &mut inlined_addresses,
            0,
        )?;

        // Sort ranges in "breadth-first traversal order", i.e. first by
        // `call_depth` and then by `range.begin`. This allows finding
        // the range containing an address at a certain depth using
        // binary search.
        // Note: Using DFS order, i.e. ordering by `range.begin` first
        // and then by `call_depth`, would not work!
        // Consider the two examples "[0..10 at depth 0], [0..2 at depth 1],
        // [6..8 at depth 1]" and "[0..5 at depth 0], [0..2 at depth
        // 1], [5..10 at depth 0], [6..8 at depth 1]".
        // In this example, if you want to look up address 7 at depth 0,
        // and you encounter [0..2 at depth 1], are you before or after
        // the target range? You don't know.
        let () = inlined_addresses.sort_by(|r1, r2| {
            (r1.call_depth, r1.range.begin).cmp(&(r2.call_depth, r2.range.begin))
        });

        Ok(Self {
            inlined_functions: inlined_functions.into_boxed_slice(),
            inlined_addresses: inlined_addresses.into_boxed_slice(),
        })
    }

    /// Build the chain of inlined functions that contain `probe`,
    /// ordered from the outermost to the innermost one.
    pub fn find_inlined_functions(&self, probe: u64) -> Vec<&InlinedFunction<'dwarf>> {
        let mut inlined_functions = Vec::new();
        let mut inlined_addresses = &self.inlined_addresses[..];
        loop {
            let current_depth = inlined_functions.len();
            // Look up (probe, current_depth) in inline_ranges.
            // `inlined_addresses` is sorted in "breadth-first traversal order", i.e.
            // by `call_depth` first, and then by `range.begin`. See the comment at
            // the sort call for more information about why.
            let search = inlined_addresses.binary_search_by(|range| {
                if range.call_depth > current_depth {
                    Ordering::Greater
                } else if range.call_depth < current_depth {
                    Ordering::Less
                } else if range.range.begin > probe {
                    Ordering::Greater
                } else if range.range.end <= probe {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            });
            if let Ok(index) = search {
                let function_index = inlined_addresses[index].function;
                inlined_functions.push(&self.inlined_functions[function_index]);
                inlined_addresses = &inlined_addresses[index + 1..];
            } else {
                break
            }
        }
        inlined_functions
    }
}


/// Skip the DIE described by `abbrev` along with all of its children.
fn skip<'dwarf>(
    entries: &mut gimli::EntriesRaw<'_, '_, R<'dwarf>>,
    abbrev: &gimli::Abbreviation,
    depth: isize,
) -> Result<(), Error> {
    let () = entries.skip_attributes(abbrev.attributes())?;
    while entries.next_depth() > depth {
        if let Some(abbrev) = entries.read_abbreviation()? {
            let () = entries.skip_attributes(abbrev.attributes())?;
        }
    }
    Ok(())
}

fn parse_children<'dwarf>(
    entries: &mut gimli::EntriesRaw<'_, '_, R<'dwarf>>,
    depth: isize,
    dwarf: &gimli::Dwarf<R<'dwarf>>,
    unit: &gimli::Unit<R<'dwarf>>,
    inlined_functions: &mut Vec<InlinedFunction<'dwarf>>,
    inlined_addresses: &mut Vec<InlinedFunctionAddress>,
    inlined_depth: usize,
) -> Result<(), Error> {
    loop {
        let next_depth = entries.next_depth();
        if next_depth <= depth {
            return Ok(())
        }
        if let Some(abbrev) = entries.read_abbreviation()? {
            match abbrev.tag() {
                // Nested functions have their own inline information.
                gimli::DW_TAG_subprogram => {
                    let () = skip(entries, abbrev, next_depth)?;
                }
                gimli::DW_TAG_inlined_subroutine => {
                    let attrs = DieAttributes::parse(entries, abbrev, dwarf, unit)?;
                    let function_index = inlined_functions.len();
                    let () = inlined_functions.push(InlinedFunction {
                        name: attrs.name,
                        call_file: attrs.call_file,
                        call_line: attrs.call_line,
                    });

                    let _added = attrs.ranges.for_each_range(dwarf, unit, |range| {
                        inlined_addresses.push(InlinedFunctionAddress {
                            range,
                            call_depth: inlined_depth,
                            function: function_index,
                        });
                    })?;

                    let () = parse_children(
                        entries,
                        next_depth,
                        dwarf,
                        unit,
                        inlined_functions,
                        inlined_addresses,
                        inlined_depth + 1,
                    )?;
                }
                _ => {
                    let () = entries.skip_attributes(abbrev.attributes())?;
                }
            }
        }
    }
}


/// A single address range for a function.
///
/// It is possible for a function to have multiple address ranges; this
/// is handled by having multiple `FunctionAddress` entries with the same
/// `function` field.
#[derive(Debug)]
pub(crate) struct FunctionAddress {
    range: gimli::Range,
    /// An index into `Functions::functions`.
    pub function: usize,
}


/// A `DW_TAG_subprogram` entry with code attached.
pub(crate) struct Function<'dwarf> {
    pub dw_die_offset: gimli::UnitOffset<usize>,
    /// The function's name, if present.
    pub name: Option<R<'dwarf>>,
    /// The function's entry address: `DW_AT_low_pc` if present, the
    /// lowest address of its ranges otherwise.
    pub entry: u64,
    /// List of inlined function calls.
    inlined_functions: OnceCell<gimli::Result<InlinedFunctions<'dwarf>>>,
}

impl<'dwarf> Function<'dwarf> {
    /// Retrieve (and lazily parse) the inlined functions of this
    /// function.
    pub fn parse_inlined_functions(
        &self,
        dwarf: &gimli::Dwarf<R<'dwarf>>,
        unit: &gimli::Unit<R<'dwarf>>,
    ) -> Result<&InlinedFunctions<'dwarf>, Error> {
        self.inlined_functions
            .get_or_init(|| InlinedFunctions::parse(self.dw_die_offset, dwarf, unit))
            .as_ref()
            .map_err(|err| *err)
    }
}

impl Debug for Function<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let Self {
            dw_die_offset,
            name,
            entry,
            inlined_functions: _,
        } = self;

        f.debug_struct(stringify!(Function))
            .field("dw_die_offset", dw_die_offset)
            .field("name", &name.and_then(|r| r.to_string().ok()))
            .field("entry", &format_args!("{entry:#x}"))
            .finish()
    }
}


/// All functions of a unit.
#[derive(Debug)]
pub(crate) struct Functions<'dwarf> {
    /// List of all `DW_TAG_subprogram` details in the unit.
    pub functions: Box<[Function<'dwarf>]>,
    /// List of `DW_TAG_subprogram` address ranges in the unit.
    pub addresses: Box<[FunctionAddress]>,
}

impl<'dwarf> Functions<'dwarf> {
    pub fn parse(
        dwarf: &gimli::Dwarf<R<'dwarf>>,
        unit: &gimli::Unit<R<'dwarf>>,
    ) -> Result<Self, Error> {
        let mut functions = Vec::new();
        let mut addresses = Vec::new();
        let mut entries = unit.entries_raw(None)?;
        while !entries.is_empty() {
            let dw_die_offset = entries.next_offset();
            if let Some(abbrev) = entries.read_abbreviation()? {
                if abbrev.tag() == gimli::DW_TAG_subprogram {
                    let attrs = DieAttributes::parse(&mut entries, abbrev, dwarf, unit)?;

                    let function_index = functions.len();
                    let mut lowest = u64::MAX;
                    let added = attrs.ranges.for_each_range(dwarf, unit, |range| {
                        lowest = lowest.min(range.begin);
                        addresses.push(FunctionAddress {
                            range,
                            function: function_index,
                        });
                    })?;

                    if added {
                        let function = Function {
                            dw_die_offset,
                            name: attrs.name,
                            entry: attrs.ranges.low_pc.unwrap_or(lowest),
                            inlined_functions: OnceCell::new(),
                        };
                        functions.push(function);
                    }
                } else {
                    let () = entries.skip_attributes(abbrev.attributes())?;
                }
            }
        }

        // The binary search requires the addresses to be sorted.
        //
        // It also requires them to be non-overlapping.  In practice, overlapping
        // function ranges are unlikely, so we don't try to handle that yet.
        //
        // It's possible for multiple functions to have the same address range if the
        // compiler can detect and remove functions with identical code.  In that case
        // we'll nondeterministically return one of them.
        let () = addresses.sort_by_key(|x| x.range.begin);

        Ok(Functions {
            functions: functions.into_boxed_slice(),
            addresses: addresses.into_boxed_slice(),
        })
    }

    /// Find the function whose ranges cover `probe`.
    pub fn find_function(&self, probe: u64) -> Option<&Function<'dwarf>> {
        let idx = self
            .addresses
            .binary_search_by(|address| {
                if probe < address.range.begin {
                    Ordering::Greater
                } else if probe >= address.range.end {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
            .ok()?;
        let function_index = self.addresses[idx].function;
        self.functions.get(function_index)
    }
}
