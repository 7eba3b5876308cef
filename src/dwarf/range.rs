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

use super::reader::R;


/// The address range related attributes of a DIE.
#[derive(Debug, Default)]
pub(super) struct RangeAttributes {
    pub low_pc: Option<u64>,
    pub high_pc: Option<u64>,
    pub size: Option<u64>,
    pub ranges_offset: Option<gimli::RangeListsOffset<usize>>,
}

impl RangeAttributes {
    /// Record the value of a range related attribute.
    ///
    /// Returns `false` if `attr` does not describe an address range.
    pub fn handle_attr<'dwarf>(
        &mut self,
        attr: &gimli::Attribute<R<'dwarf>>,
        dwarf: &gimli::Dwarf<R<'dwarf>>,
        unit: &gimli::Unit<R<'dwarf>>,
    ) -> gimli::Result<bool> {
        match attr.name() {
            gimli::DW_AT_low_pc => match attr.value() {
                gimli::AttributeValue::Addr(val) => self.low_pc = Some(val),
                gimli::AttributeValue::DebugAddrIndex(index) => {
                    self.low_pc = Some(dwarf.address(unit, index)?);
                }
                _ => {}
            },
            gimli::DW_AT_high_pc => match attr.value() {
                gimli::AttributeValue::Addr(val) => self.high_pc = Some(val),
                gimli::AttributeValue::DebugAddrIndex(index) => {
                    self.high_pc = Some(dwarf.address(unit, index)?);
                }
                gimli::AttributeValue::Udata(val) => self.size = Some(val),
                _ => {}
            },
            gimli::DW_AT_ranges => {
                self.ranges_offset = dwarf.attr_ranges_offset(unit, attr.value())?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Invoke `f` for each non-empty range described by the attributes,
    /// returning whether any range was reported.
    pub fn for_each_range<'dwarf, F>(
        &self,
        dwarf: &gimli::Dwarf<R<'dwarf>>,
        unit: &gimli::Unit<R<'dwarf>>,
        mut f: F,
    ) -> gimli::Result<bool>
    where
        F: FnMut(gimli::Range),
    {
        let mut added_any = false;
        let mut add_range = |range: gimli::Range| {
            if range.begin < range.end {
                f(range);
                added_any = true
            }
        };
        if let Some(ranges_offset) = self.ranges_offset {
            let mut range_list = dwarf.ranges(unit, ranges_offset)?;
            while let Some(range) = range_list.next()? {
                add_range(range);
            }
        } else if let Some(range) = self.bounds() {
            add_range(range);
        }
        Ok(added_any)
    }

    /// Retrieve the contiguous range described by `DW_AT_low_pc` and
    /// `DW_AT_high_pc`, if any.
    pub fn bounds(&self) -> Option<gimli::Range> {
        match (self.low_pc, self.high_pc, self.size) {
            (Some(begin), Some(end), _) => Some(gimli::Range { begin, end }),
            (Some(begin), None, Some(size)) => Some(gimli::Range {
                begin,
                end: begin.saturating_add(size),
            }),
            _ => None,
        }
    }
}
