use gimli::EndianSlice;
use gimli::SectionId;

use crate::elf::ElfParser;
use crate::ErrorExt as _;
use crate::Result;


#[cfg(target_endian = "little")]
type Endianess = gimli::LittleEndian;
#[cfg(target_endian = "big")]
type Endianess = gimli::BigEndian;

/// The gimli reader type we currently use. Could be made generic if
/// need be, but we keep things simple while we can.
pub(crate) type R<'dat> = EndianSlice<'dat, Endianess>;


/// Load the DWARF section `id` from the ELF file backing `parser`.
///
/// A missing section (or one compressed with an unsupported scheme) is
/// reported as empty data.
pub(super) fn load_section(parser: &ElfParser, id: SectionId) -> Result<R<'_>> {
    let data = parser
        .find_section_data(id.name())
        .with_context(|| format!("failed to load section `{}`", id.name()))?
        .unwrap_or(&[]);

    let reader = EndianSlice::new(data, Endianess::default());
    Ok(reader)
}
