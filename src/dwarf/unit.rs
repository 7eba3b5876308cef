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

use super::function::Function;
use super::function::Functions;
use super::lines::Lines;
use super::location::Location;
use super::reader::R;


pub(super) struct UnitRange {
    pub unit_id: usize,
    pub max_end: u64,
    pub range: gimli::Range,
}


#[derive(Debug)]
pub(super) struct Unit<'dwarf> {
    dw_unit: gimli::Unit<R<'dwarf>>,
    lines: OnceCell<gimli::Result<Lines>>,
    funcs: OnceCell<gimli::Result<Functions<'dwarf>>>,
}

impl<'dwarf> Unit<'dwarf> {
    pub(super) fn new(unit: gimli::Unit<R<'dwarf>>, lines: OnceCell<Lines>) -> Self {
        Self {
            dw_unit: unit,
            lines: lines
                .into_inner()
                .map(Result::Ok)
                .map(OnceCell::from)
                .unwrap_or_default(),
            funcs: OnceCell::new(),
        }
    }

    pub(super) fn parse_lines(
        &self,
        dwarf: &gimli::Dwarf<R<'dwarf>>,
    ) -> gimli::Result<Option<&Lines>> {
        let ilnp = match self.dw_unit.line_program {
            Some(ref ilnp) => ilnp,
            None => return Ok(None),
        };
        let lines = self
            .lines
            .get_or_init(|| Lines::parse(dwarf, &self.dw_unit, ilnp.clone()))
            .as_ref()
            .map_err(|err| *err)?;
        Ok(Some(lines))
    }

    pub(super) fn parse_functions(
        &self,
        dwarf: &gimli::Dwarf<R<'dwarf>>,
    ) -> gimli::Result<&Functions<'dwarf>> {
        self.funcs
            .get_or_init(|| Functions::parse(dwarf, &self.dw_unit))
            .as_ref()
            .map_err(|err| *err)
    }

    pub(super) fn find_location(
        &self,
        probe: u64,
        dwarf: &gimli::Dwarf<R<'dwarf>>,
    ) -> gimli::Result<Option<Location<'_>>> {
        let location = self
            .parse_lines(dwarf)?
            .and_then(|lines| lines.find_location(probe));
        Ok(location)
    }

    pub(super) fn find_function(
        &self,
        probe: u64,
        dwarf: &gimli::Dwarf<R<'dwarf>>,
    ) -> gimli::Result<Option<&Function<'dwarf>>> {
        let functions = self.parse_functions(dwarf)?;
        Ok(functions.find_function(probe))
    }

    /// Retrieve the underlying [`gimli::Unit`] object.
    #[inline]
    pub(super) fn dw_unit(&self) -> &gimli::Unit<R<'dwarf>> {
        &self.dw_unit
    }
}
