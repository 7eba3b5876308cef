use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::mem;
use std::ops::Deref as _;
use std::rc::Rc;

use gimli::Dwarf;

use crate::elf::ElfParser;
use crate::log::debug;
use crate::Addr;
use crate::Result;

use super::location::Location;
use super::reader;
use super::units::Units;


/// A function as found in DWARF debug information.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct DwarfFunction<'dwarf> {
    /// The function's (possibly mangled) name.
    pub name: &'dwarf str,
    /// The function's entry address.
    pub addr: Addr,
}


/// `DwarfResolver` provides the means to query the DWARF information
/// of a single ELF file.
pub(crate) struct DwarfResolver {
    /// The lazily parsed compilation units of the DWARF file.
    /// SAFETY: We must not hand out references with a 'static lifetime to
    ///         this member. Rather, they should never outlive `self`.
    ///         Furthermore, this member has to be listed before `parser`
    ///         to make sure we never end up with a dangling reference.
    units: Units<'static>,
    parser: Rc<ElfParser>,
}

impl DwarfResolver {
    pub fn from_parser(parser: Rc<ElfParser>) -> Result<Self> {
        // SAFETY: We own the `ElfParser` and make sure that it stays
        //         around while the `Units` object uses it. As such, it
        //         is fine to conjure a 'static lifetime here.
        let static_parser =
            unsafe { mem::transmute::<&ElfParser, &'static ElfParser>(parser.deref()) };
        let mut load_section = |section| reader::load_section(static_parser, section);
        let dwarf = Dwarf::load(&mut load_section)?;
        let units = Units::parse(dwarf)?;
        let slf = Self { units, parser };
        Ok(slf)
    }

    /// Retrieve the ELF parser backing this resolver.
    #[cfg(test)]
    #[inline]
    pub fn parser(&self) -> &ElfParser {
        &self.parser
    }

    /// Check whether the DWARF data carries line number information.
    #[cfg(test)]
    #[inline]
    pub fn has_line_info(&self) -> bool {
        self.units.has_line_info()
    }

    /// Find the function containing `addr`.
    pub fn find_function(&self, addr: Addr) -> Result<Option<DwarfFunction<'_>>> {
        let function = match self.units.find_function(addr)? {
            Some(function) => function,
            None => return Ok(None),
        };

        let name = match function.name {
            Some(name) => name.to_string()?,
            None => {
                debug!("DWARF function at {:#x} has no name", function.entry);
                return Ok(None)
            }
        };

        let function = DwarfFunction {
            name,
            addr: function.entry,
        };
        Ok(Some(function))
    }

    /// Find the source location of `addr`.
    ///
    /// If `addr` is part of an inlined subroutine, the call site of the
    /// innermost inlined subroutine is reported instead of the line
    /// table entry. Line number 0 denotes code without a source line and
    /// is never reported.
    pub fn find_source_location(&self, addr: Addr) -> Result<Option<Location<'_>>> {
        if let Some(location) = self.units.find_inlined_call_site(addr)? {
            if location.line != 0 {
                return Ok(Some(location))
            }
        }

        let location = self
            .units
            .find_location(addr)?
            .filter(|location| location.line != 0);
        Ok(location)
    }
}

impl Debug for DwarfResolver {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct(stringify!(DwarfResolver))
            .field("parser", &self.parser)
            .finish()
    }
}
