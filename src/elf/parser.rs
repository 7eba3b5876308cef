use std::cell::OnceCell;
use std::ffi::OsStr;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::fs::File;
use std::mem;
use std::ops::Deref as _;
use std::os::unix::ffi::OsStrExt as _;
#[cfg(test)]
use std::path::Path;

use crate::log::debug;
use crate::log::warn;
use crate::mmap::Mmap;
use crate::util::find_match_or_lower_bound_by;
use crate::util::get_or_try_init;
use crate::util::ReadRaw as _;
use crate::Addr;
use crate::Error;
use crate::ErrorExt as _;
use crate::IntoError as _;
use crate::Result;

use super::types::Elf64_Chdr;
use super::types::Elf64_Ehdr;
use super::types::Elf64_Nhdr;
use super::types::Elf64_Shdr;
use super::types::Elf64_Sym;
use super::types::ELFCLASS64;
use super::types::ELFCOMPRESS_ZLIB;
use super::types::ELFDATA2LSB;
use super::types::NT_GNU_BUILD_ID;
use super::types::SHF_COMPRESSED;
use super::types::SHN_LORESERVE;
use super::types::SHN_UNDEF;
use super::types::SHN_XINDEX;
use super::types::SHT_NOBITS;
use super::types::SHT_NOTE;


fn symbol_name<'mmap>(strtab: &'mmap [u8], sym: &Elf64_Sym) -> Result<&'mmap str> {
    let name = strtab
        .get(sym.st_name as usize..)
        .ok_or_malformed(|| "string table index out of bounds")?
        .read_cstr()
        .ok_or_malformed(|| "no valid string found in string table")?
        .to_str()
        .map_err(Error::with_malformed_binary)
        .context("invalid symbol name")?;

    Ok(name)
}

/// Find the function symbol covering `addr`.
///
/// A symbol whose range contains the address is preferred. Failing
/// that, the closest preceding symbol is reported, provided that it
/// resides in the same section as the address.
fn find_sym<'mmap>(
    syms: &[&Elf64_Sym],
    strtab: &'mmap [u8],
    shdrs: &[Elf64_Shdr],
    addr: Addr,
) -> Result<Option<(&'mmap str, Addr)>> {
    let idx = match find_match_or_lower_bound_by(syms, addr, |sym| sym.st_value as Addr) {
        Some(idx) => idx,
        None => return Ok(None),
    };

    for sym in syms[idx..].iter() {
        if sym.st_value as Addr > addr {
            // Once we are seeing start addresses past the provided
            // address, we can no longer be dealing with a match and
            // stop the search.
            break
        }

        // In ELF, a symbol size of 0 indicates "no size or an unknown
        // size" (see elf(5)). We take our changes and report these on a
        // best-effort basis.
        if sym.st_size == 0 || addr < sym.st_value.saturating_add(sym.st_size) {
            let name = symbol_name(strtab, sym)?;
            return Ok(Some((name, sym.st_value as Addr)))
        }
    }

    // No symbol contains the address. Fall back to the nearest
    // preceding one, as long as it lives in the same section.
    let sym = syms[idx];
    if sym.st_shndx >= SHN_LORESERVE {
        return Ok(None)
    }

    let shdr = shdrs.get(usize::from(sym.st_shndx)).ok_or_malformed(|| {
        format!(
            "ELF section index ({}) of symbol at {:#x} out of bounds",
            sym.st_shndx, sym.st_value
        )
    })?;
    let section = shdr.sh_addr..shdr.sh_addr.saturating_add(shdr.sh_size);
    if section.contains(&addr) {
        let name = symbol_name(strtab, sym)?;
        Ok(Some((name, sym.st_value as Addr)))
    } else {
        Ok(None)
    }
}


#[derive(Clone, Copy, Debug)]
struct EhdrExt<'mmap> {
    /// The ELF header.
    ehdr: &'mmap Elf64_Ehdr,
    /// Override of `ehdr.e_shnum`, handling of which is special-cased by
    /// the ELF standard.
    shnum: usize,
}


#[derive(Debug)]
struct SymbolTable<'mmap> {
    /// Defined function symbols, in address order.
    syms: Box<[&'mmap Elf64_Sym]>,
    /// The string table the symbols reference.
    strs: &'mmap [u8],
}


struct Cache<'mmap> {
    /// A slice of the raw ELF data that we are about to parse.
    elf_data: &'mmap [u8],
    /// The cached ELF header.
    ehdr: OnceCell<EhdrExt<'mmap>>,
    /// The cached ELF section headers.
    shdrs: OnceCell<&'mmap [Elf64_Shdr]>,
    shstrtab: OnceCell<&'mmap [u8]>,
    /// The symbol table used for address lookups.
    symtab: OnceCell<SymbolTable<'mmap>>,
    /// Decompressed section contents, indexed by section.
    decompressed: OnceCell<Box<[OnceCell<Option<Box<[u8]>>>]>>,
}

impl<'mmap> Cache<'mmap> {
    /// Create a new `Cache` using the provided raw ELF object data.
    fn new(elf_data: &'mmap [u8]) -> Self {
        Self {
            elf_data,
            ehdr: OnceCell::new(),
            shdrs: OnceCell::new(),
            shstrtab: OnceCell::new(),
            symtab: OnceCell::new(),
            decompressed: OnceCell::new(),
        }
    }

    fn section_header(&self, idx: usize) -> Result<&'mmap Elf64_Shdr> {
        let shdrs = self.ensure_shdrs()?;
        let shdr = shdrs
            .get(idx)
            .ok_or_malformed(|| format!("ELF section index ({idx}) out of bounds"))?;
        Ok(shdr)
    }

    /// Retrieve the raw section data for the ELF section at index
    /// `idx`.
    fn section_data(&self, idx: usize) -> Result<&'mmap [u8]> {
        let section = self.section_header(idx)?;
        if section.sh_type == SHT_NOBITS {
            return Ok(&[])
        }

        let data = self
            .elf_data
            .get(section.sh_offset as usize..)
            .ok_or_malformed(|| "failed to read section data: invalid offset")?
            .read_slice(section.sh_size as usize)
            .ok_or_malformed(|| "failed to read section data: invalid size")?;
        Ok(data)
    }

    /// Read the very first section header.
    ///
    /// ELF contains a couple of clauses that special case data ranges
    /// of certain member variables to reference data from this header,
    /// which otherwise is zeroed out.
    #[inline]
    fn read_first_shdr(&self, ehdr: &Elf64_Ehdr) -> Result<Elf64_Shdr> {
        let shdr = self
            .elf_data
            .get(ehdr.e_shoff as usize..)
            .ok_or_malformed(|| "Elf64_Ehdr::e_shoff is invalid")?
            .read_pod::<Elf64_Shdr>()
            .ok_or_malformed(|| "failed to read Elf64_Shdr")?;
        Ok(shdr)
    }

    fn parse_ehdr(&self) -> Result<EhdrExt<'mmap>> {
        let mut elf_data = self.elf_data;
        let ehdr = elf_data
            .read_pod_slice_ref::<Elf64_Ehdr>(1)
            .and_then(|ehdrs| ehdrs.first())
            .ok_or_malformed(|| "failed to read Elf64_Ehdr")?;
        if !(ehdr.e_ident[0] == 0x7f
            && ehdr.e_ident[1] == b'E'
            && ehdr.e_ident[2] == b'L'
            && ehdr.e_ident[3] == b'F')
        {
            return Err(Error::with_malformed_binary(format!(
                "encountered unexpected e_ident: {:x?}",
                &ehdr.e_ident[0..4]
            )))
        }

        if ehdr.e_ident[4] != ELFCLASS64 || ehdr.e_ident[5] != ELFDATA2LSB {
            return Err(Error::with_malformed_binary(format!(
                "unsupported ELF class ({}) or data encoding ({})",
                ehdr.e_ident[4], ehdr.e_ident[5]
            )))
        }

        // "If the number of entries in the section header table is larger than
        // or equal to SHN_LORESERVE, e_shnum holds the value zero and the real
        // number of entries in the section header table is held in the sh_size
        // member of the initial entry in section header table."
        let shnum = if ehdr.e_shnum == 0 && ehdr.e_shoff != 0 {
            let shdr = self.read_first_shdr(ehdr)?;
            usize::try_from(shdr.sh_size).ok().ok_or_malformed(|| {
                format!(
                    "ELF file contains unsupported number of sections ({})",
                    shdr.sh_size
                )
            })?
        } else {
            ehdr.e_shnum.into()
        };

        let ehdr = EhdrExt { ehdr, shnum };
        Ok(ehdr)
    }

    fn ensure_ehdr(&self) -> Result<&EhdrExt<'mmap>> {
        get_or_try_init(&self.ehdr, || self.parse_ehdr())
    }

    fn parse_shdrs(&self) -> Result<&'mmap [Elf64_Shdr]> {
        let ehdr = self.ensure_ehdr()?;
        if ehdr.shnum == 0 {
            return Ok(&[])
        }

        let shdrs = self
            .elf_data
            .get(ehdr.ehdr.e_shoff as usize..)
            .ok_or_malformed(|| "Elf64_Ehdr::e_shoff is invalid")?
            .read_pod_slice_ref::<Elf64_Shdr>(ehdr.shnum)
            .ok_or_malformed(|| "failed to read Elf64_Shdr")?;
        Ok(shdrs)
    }

    fn ensure_shdrs(&self) -> Result<&'mmap [Elf64_Shdr]> {
        get_or_try_init(&self.shdrs, || self.parse_shdrs()).copied()
    }

    fn shstrndx(&self, ehdr: &Elf64_Ehdr) -> Result<usize> {
        // "If the index of section name string table section is larger
        // than or equal to SHN_LORESERVE (0xff00), this member holds
        // SHN_XINDEX (0xffff) and  the real index of the section name
        // string table section is held in the sh_link member of the
        // initial entry in section header table."
        let shstrndx = if ehdr.e_shstrndx == SHN_XINDEX {
            let shdr = self.read_first_shdr(ehdr)?;
            shdr.sh_link
        } else {
            u32::from(ehdr.e_shstrndx)
        };

        let shstrndx = usize::try_from(shstrndx).ok().ok_or_malformed(|| {
            format!("ELF file contains unsupported section name string table index ({shstrndx})")
        })?;
        Ok(shstrndx)
    }

    fn parse_shstrtab(&self) -> Result<&'mmap [u8]> {
        let ehdr = self.ensure_ehdr()?;
        let shstrndx = self.shstrndx(ehdr.ehdr)?;
        let shstrtab = self.section_data(shstrndx)?;
        Ok(shstrtab)
    }

    fn ensure_shstrtab(&self) -> Result<&'mmap [u8]> {
        get_or_try_init(&self.shstrtab, || self.parse_shstrtab()).copied()
    }

    /// Get the name of the section at a given index.
    fn section_name(&self, idx: usize) -> Result<&'mmap str> {
        let shstrtab = self.ensure_shstrtab()?;
        let sect = self.section_header(idx)?;
        let name = shstrtab
            .get(sect.sh_name as usize..)
            .ok_or_malformed(|| "string table index out of bounds")?
            .read_cstr()
            .ok_or_malformed(|| "no valid string found in string table")?
            .to_str()
            .map_err(Error::with_malformed_binary)
            .context("invalid section name")?;
        Ok(name)
    }

    /// Find the section of a given name.
    ///
    /// This function return the index of the section if found.
    fn find_section(&self, name: &str) -> Result<Option<usize>> {
        let shdrs = self.ensure_shdrs()?;
        for i in 1..shdrs.len() {
            if self.section_name(i)? == name {
                return Ok(Some(i))
            }
        }
        Ok(None)
    }

    fn parse_syms(&self, section: &str) -> Result<SymbolTable<'mmap>> {
        let idx = if let Some(idx) = self.find_section(section)? {
            idx
        } else {
            // The symbol table does not exists. Fake an empty one.
            return Ok(SymbolTable {
                syms: Box::default(),
                strs: &[],
            })
        };
        let mut syms = self.section_data(idx)?;

        if syms.len() % mem::size_of::<Elf64_Sym>() != 0 {
            return Err(Error::with_malformed_binary(
                "size of symbol table section is invalid",
            ))
        }

        let count = syms.len() / mem::size_of::<Elf64_Sym>();
        let mut syms = syms
            .read_pod_slice_ref::<Elf64_Sym>(count)
            .ok_or_malformed(|| "failed to read symbol table contents")?
            .iter()
            .filter(|sym| sym.is_function() && sym.st_shndx != SHN_UNDEF)
            .collect::<Vec<&Elf64_Sym>>();
        // Order symbols by address and those with equal address descending by
        // size.
        let () = syms.sort_by(|sym1, sym2| {
            sym1.st_value
                .cmp(&sym2.st_value)
                .then_with(|| sym1.st_size.cmp(&sym2.st_size).reverse())
        });

        // The associated string table is referenced by `sh_link`.
        let strndx = self.section_header(idx)?.sh_link as usize;
        let strs = self.section_data(strndx)?;

        let symtab = SymbolTable {
            syms: syms.into_boxed_slice(),
            strs,
        };
        Ok(symtab)
    }

    fn ensure_symtab(&self) -> Result<&SymbolTable<'mmap>> {
        get_or_try_init(&self.symtab, || {
            let symtab = self.parse_syms(".symtab")?;
            if !symtab.syms.is_empty() {
                return Ok(symtab)
            }

            debug!("no function symbols in .symtab; falling back to .dynsym");
            self.parse_syms(".dynsym")
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Option<Box<[u8]>>> {
        let mut data = data;
        let chdr = data
            .read_pod::<Elf64_Chdr>()
            .ok_or_malformed(|| "failed to read Elf64_Chdr")?;

        match chdr.ch_type {
            #[cfg(feature = "zlib")]
            ELFCOMPRESS_ZLIB => {
                let size = usize::try_from(chdr.ch_size).ok().ok_or_malformed(|| {
                    format!("compressed section size ({}) is too large", chdr.ch_size)
                })?;
                let decompressed =
                    miniz_oxide::inflate::decompress_to_vec_zlib_with_limit(data, size).map_err(
                        |err| {
                            Error::with_malformed_binary(format!(
                                "failed to inflate zlib compressed section: {:?}",
                                err.status
                            ))
                        },
                    )?;
                if decompressed.len() != size {
                    return Err(Error::with_malformed_binary(format!(
                        "decompressed section has unexpected size ({} vs. {size})",
                        decompressed.len()
                    )))
                }
                Ok(Some(decompressed.into_boxed_slice()))
            }
            #[cfg(not(feature = "zlib"))]
            ELFCOMPRESS_ZLIB => {
                warn!("zlib compressed section encountered but zlib support is disabled");
                Ok(None)
            }
            ty => {
                warn!("encountered unsupported section compression type {ty}");
                Ok(None)
            }
        }
    }

    /// Retrieve the contents of the section at `idx`, decompressing it
    /// if necessary.
    fn section_data_decompressed(&self, idx: usize) -> Result<Option<&[u8]>> {
        let shdr = self.section_header(idx)?;
        let data = self.section_data(idx)?;
        if shdr.sh_flags & SHF_COMPRESSED == 0 {
            return Ok(Some(data))
        }

        let cells = self.decompressed.get_or_init(|| {
            let count = self.ensure_shdrs().map(<[_]>::len).unwrap_or(0);
            (0..count).map(|_| OnceCell::new()).collect()
        });
        let cell = cells
            .get(idx)
            .ok_or_malformed(|| format!("ELF section index ({idx}) out of bounds"))?;
        let data = get_or_try_init(cell, || self.decompress(data))?;
        Ok(data.as_deref())
    }

    fn parse_build_id(&self) -> Result<Option<&'mmap [u8]>> {
        let shdrs = self.ensure_shdrs()?;
        for (idx, shdr) in shdrs.iter().enumerate() {
            if shdr.sh_type != SHT_NOTE {
                continue
            }

            let mut notes = self.section_data(idx)?;
            while !notes.is_empty() {
                let nhdr = notes
                    .read_pod::<Elf64_Nhdr>()
                    .ok_or_malformed(|| "failed to read Elf64_Nhdr")?;
                let namesz = nhdr.n_namesz as usize;
                let descsz = nhdr.n_descsz as usize;
                // Name and descriptor are each padded to four bytes.
                let name = notes
                    .read_slice(namesz.next_multiple_of(4))
                    .ok_or_malformed(|| "ELF note name is truncated")?;
                let desc = notes
                    .read_slice(descsz.next_multiple_of(4))
                    .ok_or_malformed(|| "ELF note descriptor is truncated")?;

                if nhdr.n_type == NT_GNU_BUILD_ID && &name[..namesz] == b"GNU\0" {
                    return Ok(Some(&desc[..descsz]))
                }
            }
        }
        Ok(None)
    }

    fn parse_debug_link(&self) -> Result<Option<(&'mmap OsStr, u32)>> {
        let idx = if let Some(idx) = self.find_section(".gnu_debuglink")? {
            idx
        } else {
            return Ok(None)
        };

        let mut data = self.section_data(idx)?;
        let name = data
            .read_cstr()
            .ok_or_malformed(|| "failed to read debug link file name")?;
        // The checksum is four byte aligned relative to the section
        // start.
        let consumed = name.to_bytes_with_nul().len();
        let _padding = data
            .read_slice(consumed.next_multiple_of(4) - consumed)
            .ok_or_malformed(|| "debug link section is truncated")?;
        let crc = data
            .read_u32()
            .ok_or_malformed(|| "failed to read debug link checksum")?;

        let name = OsStr::from_bytes(name.to_bytes());
        Ok(Some((name, crc)))
    }
}

impl Debug for Cache<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "Cache")
    }
}


/// A parser for ELF64 files.
#[derive(Debug)]
pub(crate) struct ElfParser {
    /// A cache for relevant parts of the ELF file.
    // SAFETY: We must not hand out references with a 'static lifetime to
    //         this member. Rather, they should never outlive `self`.
    //         Furthermore, this member has to be listed before `mmap`
    //         to make sure we never end up with a dangling reference.
    cache: Cache<'static>,
    /// The memory mapped file.
    mmap: Mmap,
}

impl ElfParser {
    /// Create an `ElfParser` from an open file.
    pub fn open_file(file: &File) -> Result<ElfParser> {
        Mmap::map(file)
            .map(Self::from_mmap)
            .context("failed to memory map file")
    }

    /// Create an `ElfParser` from mmap'ed data.
    pub fn from_mmap(mmap: Mmap) -> ElfParser {
        // We transmute the mmap's lifetime to static here as that is a
        // necessity for self-referentiality.
        // SAFETY: We never hand out any 'static references to cache
        //         data.
        let elf_data = unsafe { mem::transmute::<&[u8], &'static [u8]>(mmap.deref()) };

        ElfParser {
            cache: Cache::new(elf_data),
            mmap,
        }
    }

    /// Create an `ElfParser` for a path.
    #[cfg(test)]
    pub fn open(path: &Path) -> Result<ElfParser> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        Self::open_file(&file)
    }

    /// Retrieve the memory mapping backing this parser.
    pub fn mmap(&self) -> &Mmap {
        &self.mmap
    }

    /// Check the structural validity of the ELF and section headers.
    pub fn validate(&self) -> Result<()> {
        let _shdrs = self.cache.ensure_shdrs()?;
        let _shstrtab = self.cache.ensure_shstrtab()?;
        Ok(())
    }

    /// Find the section of a given name.
    ///
    /// This function return the index of the section if found.
    pub fn find_section(&self, name: &str) -> Result<Option<usize>> {
        self.cache.find_section(name)
    }

    /// Retrieve the raw data corresponding to the ELF section at index
    /// `idx`.
    #[cfg(test)]
    pub fn section_data(&self, idx: usize) -> Result<&[u8]> {
        self.cache.section_data(idx)
    }

    /// Retrieve the (possibly decompressed) contents of the section
    /// with the given name.
    ///
    /// `None` is returned if the section does not exist or uses an
    /// unsupported compression scheme.
    pub fn find_section_data(&self, name: &str) -> Result<Option<&[u8]>> {
        match self.cache.find_section(name)? {
            Some(idx) => self.cache.section_data_decompressed(idx),
            None => Ok(None),
        }
    }

    /// Check whether the file carries DWARF debug information itself.
    pub fn has_debug_info(&self) -> Result<bool> {
        let idx = match self.cache.find_section(".debug_info")? {
            Some(idx) => idx,
            None => return Ok(false),
        };
        let shdr = self.cache.section_header(idx)?;
        Ok(shdr.sh_type != SHT_NOBITS && shdr.sh_size != 0)
    }

    /// Retrieve the GNU build ID embedded in the file, if any.
    pub fn build_id(&self) -> Result<Option<&[u8]>> {
        self.cache.parse_build_id()
    }

    /// Retrieve the file name and checksum recorded in the
    /// `.gnu_debuglink` section, if any.
    pub fn debug_link(&self) -> Result<Option<(&OsStr, u32)>> {
        self.cache.parse_debug_link()
    }

    /// Find the function symbol covering the file virtual address
    /// `addr`, returning its name and start address.
    pub fn find_sym(&self, addr: Addr) -> Result<Option<(&str, Addr)>> {
        let shdrs = self.cache.ensure_shdrs()?;
        let symtab = self.cache.ensure_symtab()?;
        find_sym(&symtab.syms, symtab.strs, shdrs, addr)
    }

    /// Check whether the file has any function symbols at all.
    pub fn has_symbols(&self) -> Result<bool> {
        let symtab = self.cache.ensure_symtab()?;
        Ok(!symtab.syms.is_empty())
    }
}
