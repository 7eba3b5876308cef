//! Builders for synthetic ELF64 and DWARF 4 fixture files.

use std::mem::size_of;

use crate::elf::types::Elf64_Ehdr;
use crate::elf::types::Elf64_Shdr;
use crate::elf::types::Elf64_Sym;
use crate::elf::types::ELFCLASS64;
use crate::elf::types::ELFDATA2LSB;
use crate::elf::types::ET_DYN;
use crate::elf::types::NT_GNU_BUILD_ID;
use crate::elf::types::SHF_ALLOC;
use crate::elf::types::SHF_COMPRESSED;
use crate::elf::types::SHF_EXECINSTR;
use crate::elf::types::SHT_DYNSYM;
use crate::elf::types::SHT_NOTE;
use crate::elf::types::SHT_PROGBITS;
use crate::elf::types::SHT_STRTAB;
use crate::elf::types::SHT_SYMTAB;
use crate::elf::types::STB_GLOBAL;
use crate::elf::types::STT_FUNC;
use crate::Addr;

pub use crate::locate::debug_link_crc32;


/// The build ID of the `libhello` fixture.
pub const LIBHELLO_BUILD_ID: [u8; 20] = [
    0xcd, 0xd9, 0x8c, 0xdd, 0x87, 0xf7, 0xfe, 0x64, 0xc1, 0x3b, 0x6d, 0xaa, 0xd5, 0x53, 0x98, 0x7e,
    0xaf, 0xd4, 0x0c, 0xbb,
];
/// The name of the separate debug file of the `libhello` fixture.
pub const LIBHELLO_DEBUG_LINK: &str = "libhello_so.debug";

const SHN_ABS: u16 = 0xfff1;
const EM_X86_64: u16 = 62;
const STT_OBJECT: u8 = 1;
const SECTION_ALIGN: usize = 8;


fn align(data: &mut Vec<u8>, align_to: usize) {
    let len = data.len().next_multiple_of(align_to);
    let () = data.resize(len, 0);
}

fn write_uleb128(data: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            data.push(byte);
            break
        }
        data.push(byte | 0x80);
    }
}

fn write_sleb128(data: &mut Vec<u8>, mut value: i64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            data.push(byte);
            break
        }
        data.push(byte | 0x80);
    }
}

fn write_cstr(data: &mut Vec<u8>, s: &str) {
    data.extend_from_slice(s.as_bytes());
    data.push(0);
}


/// A section to include in an ELF file.
#[derive(Clone, Debug)]
pub struct Section {
    pub name: String,
    pub type_: u32,
    pub flags: u64,
    pub addr: Addr,
    pub data: Vec<u8>,
    link: u32,
    info: u32,
    entsize: u64,
}

impl Section {
    fn new(name: &str, type_: u32, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            type_,
            flags: 0,
            addr: 0,
            data,
            link: 0,
            info: 0,
            entsize: 0,
        }
    }

    /// Create a `SHT_PROGBITS` section with the given contents.
    pub fn progbits(name: &str, data: &[u8]) -> Self {
        Self::new(name, SHT_PROGBITS, data.to_vec())
    }

    /// Create a `SHF_COMPRESSED` section with the given (uncompressed)
    /// contents, deflated with zlib.
    #[cfg(feature = "zlib")]
    pub fn compressed(name: &str, data: &[u8]) -> Self {
        use crate::elf::types::ELFCOMPRESS_ZLIB;

        let payload = miniz_oxide::deflate::compress_to_vec_zlib(data, 6);
        Self::compressed_raw(name, ELFCOMPRESS_ZLIB, &payload, data.len() as u64)
    }

    /// Create a `SHF_COMPRESSED` section with an arbitrary compression
    /// type and payload.
    pub fn compressed_raw(name: &str, ch_type: u32, payload: &[u8], size: u64) -> Self {
        let mut data = Vec::new();
        data.extend_from_slice(&ch_type.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&size.to_le_bytes());
        data.extend_from_slice(&1u64.to_le_bytes());
        data.extend_from_slice(payload);

        let mut section = Self::new(name, SHT_PROGBITS, data);
        section.flags = SHF_COMPRESSED;
        section
    }

    /// Create a note section containing a single note.
    pub fn note(name: &str, n_type: u32, owner: &[u8], desc: &[u8]) -> Self {
        let mut data = Vec::new();
        data.extend_from_slice(&(owner.len() as u32).to_le_bytes());
        data.extend_from_slice(&(desc.len() as u32).to_le_bytes());
        data.extend_from_slice(&n_type.to_le_bytes());
        data.extend_from_slice(owner);
        let () = align(&mut data, 4);
        data.extend_from_slice(desc);
        let () = align(&mut data, 4);

        Self::new(name, SHT_NOTE, data)
    }

    fn contains(&self, addr: Addr) -> bool {
        self.flags & SHF_ALLOC != 0
            && (self.addr..self.addr + self.data.len() as u64).contains(&addr)
    }
}


/// A symbol to include in an ELF file's symbol table.
#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub addr: Addr,
    pub size: u64,
    type_: u8,
}

impl Symbol {
    /// Create a function symbol.
    pub fn func(name: &str, addr: Addr, size: u64) -> Self {
        Self {
            name: name.to_string(),
            addr,
            size,
            type_: STT_FUNC,
        }
    }

    /// Create a data symbol.
    pub fn object(name: &str, addr: Addr, size: u64) -> Self {
        Self {
            name: name.to_string(),
            addr,
            size,
            type_: STT_OBJECT,
        }
    }
}


/// A builder for little endian ELF64 files.
///
/// The resulting files contain section headers only. They are meant to be
/// parsed, not executed.
#[derive(Clone, Debug, Default)]
pub struct ElfBuilder {
    text: Option<Section>,
    symbols: Vec<Symbol>,
    dynamic: bool,
    sections: Vec<Section>,
}

impl ElfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `.text` section covering `[addr, addr + size)`.
    pub fn text(mut self, addr: Addr, size: u64) -> Self {
        let mut text = Section::new(".text", SHT_PROGBITS, vec![0xcc; size as usize]);
        text.flags = SHF_ALLOC | SHF_EXECINSTR;
        text.addr = addr;
        self.text = Some(text);
        self
    }

    /// Add a symbol.
    pub fn symbol(mut self, symbol: Symbol) -> Self {
        self.symbols.push(symbol);
        self
    }

    /// Emit symbols into `.dynsym` instead of `.symtab`.
    pub fn dynamic_symbols(mut self) -> Self {
        self.dynamic = true;
        self
    }

    /// Add a note section.
    pub fn note(self, name: &str, n_type: u32, owner: &[u8], desc: &[u8]) -> Self {
        self.section(Section::note(name, n_type, owner, desc))
    }

    /// Add a GNU build ID note.
    pub fn build_id(self, build_id: &[u8]) -> Self {
        self.note(".note.gnu.build-id", NT_GNU_BUILD_ID, b"GNU\0", build_id)
    }

    /// Add a `.gnu_debuglink` section.
    pub fn debug_link(self, name: &str, crc: u32) -> Self {
        let mut data = Vec::new();
        let () = write_cstr(&mut data, name);
        let () = align(&mut data, 4);
        data.extend_from_slice(&crc.to_le_bytes());
        self.section(Section::progbits(".gnu_debuglink", &data))
    }

    /// Add the sections produced by a [`DwarfBuilder`].
    pub fn dwarf(self, dwarf: &DwarfBuilder) -> Self {
        dwarf
            .sections()
            .into_iter()
            .fold(self, |builder, section| builder.section(section))
    }

    /// Add an arbitrary section.
    pub fn section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    fn symbol_table(&self, sections: &[Section]) -> [Section; 2] {
        let (symtab_name, strtab_name, type_) = if self.dynamic {
            (".dynsym", ".dynstr", SHT_DYNSYM)
        } else {
            (".symtab", ".strtab", SHT_SYMTAB)
        };

        let mut strtab = vec![0];
        let mut syms = vec![Elf64_Sym::default()];
        for symbol in &self.symbols {
            let st_name = strtab.len() as u32;
            let () = write_cstr(&mut strtab, &symbol.name);
            // Section indices are one-based, with zero being the null
            // section.
            let st_shndx = sections
                .iter()
                .position(|section| section.contains(symbol.addr))
                .map(|idx| idx as u16 + 1)
                .unwrap_or(SHN_ABS);

            syms.push(Elf64_Sym {
                st_name,
                st_info: (STB_GLOBAL << 4) | symbol.type_,
                st_other: 0,
                st_shndx,
                st_value: symbol.addr,
                st_size: symbol.size,
            });
        }

        let mut data = Vec::with_capacity(syms.len() * size_of::<Elf64_Sym>());
        for sym in syms {
            data.extend_from_slice(&sym.st_name.to_le_bytes());
            data.push(sym.st_info);
            data.push(sym.st_other);
            data.extend_from_slice(&sym.st_shndx.to_le_bytes());
            data.extend_from_slice(&sym.st_value.to_le_bytes());
            data.extend_from_slice(&sym.st_size.to_le_bytes());
        }

        let mut symtab = Section::new(symtab_name, type_, data);
        // The string table directly follows the symbol table.
        symtab.link = sections.len() as u32 + 2;
        symtab.info = 1;
        symtab.entsize = size_of::<Elf64_Sym>() as u64;

        let strtab = Section::new(strtab_name, SHT_STRTAB, strtab);
        [symtab, strtab]
    }

    /// Serialize the ELF file.
    pub fn build(&self) -> Vec<u8> {
        let mut sections = Vec::new();
        sections.extend(self.text.clone());
        sections.extend(self.sections.iter().cloned());
        if !self.symbols.is_empty() {
            let symtab = self.symbol_table(&sections);
            sections.extend(symtab);
        }

        let mut shstrtab = vec![0];
        let mut names = Vec::with_capacity(sections.len() + 1);
        for section in &sections {
            names.push(shstrtab.len() as u32);
            let () = write_cstr(&mut shstrtab, &section.name);
        }
        names.push(shstrtab.len() as u32);
        let () = write_cstr(&mut shstrtab, ".shstrtab");
        sections.push(Section::new(".shstrtab", SHT_STRTAB, shstrtab));

        let mut data = vec![0; size_of::<Elf64_Ehdr>()];
        let mut shdrs = vec![Elf64_Shdr::default()];
        for (section, sh_name) in sections.iter().zip(names) {
            let () = align(&mut data, SECTION_ALIGN);
            shdrs.push(Elf64_Shdr {
                sh_name,
                sh_type: section.type_,
                sh_flags: section.flags,
                sh_addr: section.addr,
                sh_offset: data.len() as u64,
                sh_size: section.data.len() as u64,
                sh_link: section.link,
                sh_info: section.info,
                sh_addralign: SECTION_ALIGN as u64,
                sh_entsize: section.entsize,
            });
            data.extend_from_slice(&section.data);
        }

        let () = align(&mut data, SECTION_ALIGN);
        let shoff = data.len() as u64;
        for shdr in &shdrs {
            data.extend_from_slice(&shdr.sh_name.to_le_bytes());
            data.extend_from_slice(&shdr.sh_type.to_le_bytes());
            data.extend_from_slice(&shdr.sh_flags.to_le_bytes());
            data.extend_from_slice(&shdr.sh_addr.to_le_bytes());
            data.extend_from_slice(&shdr.sh_offset.to_le_bytes());
            data.extend_from_slice(&shdr.sh_size.to_le_bytes());
            data.extend_from_slice(&shdr.sh_link.to_le_bytes());
            data.extend_from_slice(&shdr.sh_info.to_le_bytes());
            data.extend_from_slice(&shdr.sh_addralign.to_le_bytes());
            data.extend_from_slice(&shdr.sh_entsize.to_le_bytes());
        }

        let ehdr = Elf64_Ehdr {
            e_ident: [
                0x7f,
                b'E',
                b'L',
                b'F',
                ELFCLASS64,
                ELFDATA2LSB,
                1,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
            ],
            e_type: ET_DYN,
            e_machine: EM_X86_64,
            e_version: 1,
            e_shoff: shoff,
            e_ehsize: size_of::<Elf64_Ehdr>() as u16,
            e_shentsize: size_of::<Elf64_Shdr>() as u16,
            e_shnum: shdrs.len() as u16,
            e_shstrndx: shdrs.len() as u16 - 1,
            ..Default::default()
        };

        let mut header = Vec::with_capacity(size_of::<Elf64_Ehdr>());
        header.extend_from_slice(&ehdr.e_ident);
        header.extend_from_slice(&ehdr.e_type.to_le_bytes());
        header.extend_from_slice(&ehdr.e_machine.to_le_bytes());
        header.extend_from_slice(&ehdr.e_version.to_le_bytes());
        header.extend_from_slice(&ehdr.e_entry.to_le_bytes());
        header.extend_from_slice(&ehdr.e_phoff.to_le_bytes());
        header.extend_from_slice(&ehdr.e_shoff.to_le_bytes());
        header.extend_from_slice(&ehdr.e_flags.to_le_bytes());
        header.extend_from_slice(&ehdr.e_ehsize.to_le_bytes());
        header.extend_from_slice(&ehdr.e_phentsize.to_le_bytes());
        header.extend_from_slice(&ehdr.e_phnum.to_le_bytes());
        header.extend_from_slice(&ehdr.e_shentsize.to_le_bytes());
        header.extend_from_slice(&ehdr.e_shnum.to_le_bytes());
        header.extend_from_slice(&ehdr.e_shstrndx.to_le_bytes());
        debug_assert_eq!(header.len(), size_of::<Elf64_Ehdr>());

        let () = data[..header.len()].copy_from_slice(&header);
        data
    }
}


const DW_TAG_COMPILE_UNIT: u64 = 0x11;
const DW_TAG_SUBPROGRAM: u64 = 0x2e;
const DW_TAG_INLINED_SUBROUTINE: u64 = 0x1d;

const DW_AT_NAME: u64 = 0x03;
const DW_AT_STMT_LIST: u64 = 0x10;
const DW_AT_LOW_PC: u64 = 0x11;
const DW_AT_HIGH_PC: u64 = 0x12;
const DW_AT_LANGUAGE: u64 = 0x13;
const DW_AT_INLINE: u64 = 0x20;
const DW_AT_ABSTRACT_ORIGIN: u64 = 0x31;
const DW_AT_DECL_FILE: u64 = 0x3a;
const DW_AT_DECL_LINE: u64 = 0x3b;
const DW_AT_CALL_FILE: u64 = 0x58;
const DW_AT_CALL_LINE: u64 = 0x59;

const DW_FORM_ADDR: u64 = 0x01;
const DW_FORM_DATA2: u64 = 0x05;
const DW_FORM_DATA4: u64 = 0x06;
const DW_FORM_DATA8: u64 = 0x07;
const DW_FORM_STRING: u64 = 0x08;
const DW_FORM_REF4: u64 = 0x13;
const DW_FORM_SEC_OFFSET: u64 = 0x17;

const DW_LANG_C99: u16 = 0x0c;
const DW_INL_DECLARED_INLINED: u32 = 3;

const DW_LNS_COPY: u8 = 0x01;
const DW_LNS_ADVANCE_PC: u8 = 0x02;
const DW_LNS_ADVANCE_LINE: u8 = 0x03;
const DW_LNS_SET_FILE: u8 = 0x04;
const DW_LNE_END_SEQUENCE: u8 = 0x01;
const DW_LNE_SET_ADDRESS: u8 = 0x02;

const ABBREV_CU: u64 = 1;
const ABBREV_SUBPROGRAM: u64 = 2;
const ABBREV_ABSTRACT_SUBPROGRAM: u64 = 3;
const ABBREV_INLINED: u64 = 4;

/// The size of a 32 bit DWARF 4 compilation unit header.
const CU_HEADER_SIZE: usize = 11;


/// An inlined subroutine within a [`Function`].
#[derive(Clone, Debug)]
pub struct Inlined {
    pub name: String,
    pub addr: Addr,
    pub size: u64,
    /// The index of the calling file in the line program's file table.
    pub call_file: u32,
    pub call_line: u32,
    pub children: Vec<Inlined>,
}

impl Inlined {
    pub fn new(name: &str, addr: Addr, size: u64, call_file: u32, call_line: u32) -> Self {
        Self {
            name: name.to_string(),
            addr,
            size,
            call_file,
            call_line,
            children: Vec::new(),
        }
    }

    /// Nest another inlined subroutine inside this one.
    pub fn inlined(mut self, inlined: Inlined) -> Self {
        self.children.push(inlined);
        self
    }
}


/// A `DW_TAG_subprogram` with a contiguous address range.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub addr: Addr,
    pub size: u64,
    pub decl_file: u32,
    pub decl_line: u32,
    pub inlined: Vec<Inlined>,
}

impl Function {
    pub fn new(name: &str, addr: Addr, size: u64) -> Self {
        Self {
            name: name.to_string(),
            addr,
            size,
            decl_file: 1,
            decl_line: 0,
            inlined: Vec::new(),
        }
    }

    /// Attach an inlined subroutine.
    pub fn inlined(mut self, inlined: Inlined) -> Self {
        self.inlined.push(inlined);
        self
    }
}


#[derive(Clone, Debug)]
struct Sequence {
    rows: Vec<(Addr, u32, u64)>,
    end: Addr,
}


/// A builder for a single DWARF 4 compilation unit, emitting
/// `.debug_abbrev`, `.debug_info` and `.debug_line`.
#[derive(Clone, Debug)]
pub struct DwarfBuilder {
    name: String,
    files: Vec<String>,
    functions: Vec<Function>,
    sequences: Vec<Sequence>,
}

impl DwarfBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            files: Vec::new(),
            functions: Vec::new(),
            sequences: Vec::new(),
        }
    }

    /// Add a file to the line program's file table. Files are indexed
    /// starting at one.
    pub fn file(mut self, path: &str) -> Self {
        self.files.push(path.to_string());
        self
    }

    pub fn function(mut self, function: Function) -> Self {
        self.functions.push(function);
        self
    }

    /// Add a line sequence made up of `(address, file, line)` rows and
    /// ending at `end`.
    pub fn sequence(mut self, rows: &[(Addr, u32, u64)], end: Addr) -> Self {
        self.sequences.push(Sequence {
            rows: rows.to_vec(),
            end,
        });
        self
    }

    fn debug_abbrev() -> Vec<u8> {
        let abbrevs: [(u64, u64, bool, &[(u64, u64)]); 4] = [
            (
                ABBREV_CU,
                DW_TAG_COMPILE_UNIT,
                true,
                &[
                    (DW_AT_NAME, DW_FORM_STRING),
                    (DW_AT_LANGUAGE, DW_FORM_DATA2),
                    (DW_AT_LOW_PC, DW_FORM_ADDR),
                    (DW_AT_HIGH_PC, DW_FORM_DATA8),
                    (DW_AT_STMT_LIST, DW_FORM_SEC_OFFSET),
                ],
            ),
            (
                ABBREV_SUBPROGRAM,
                DW_TAG_SUBPROGRAM,
                true,
                &[
                    (DW_AT_NAME, DW_FORM_STRING),
                    (DW_AT_DECL_FILE, DW_FORM_DATA4),
                    (DW_AT_DECL_LINE, DW_FORM_DATA4),
                    (DW_AT_LOW_PC, DW_FORM_ADDR),
                    (DW_AT_HIGH_PC, DW_FORM_DATA8),
                ],
            ),
            (
                ABBREV_ABSTRACT_SUBPROGRAM,
                DW_TAG_SUBPROGRAM,
                false,
                &[(DW_AT_NAME, DW_FORM_STRING), (DW_AT_INLINE, DW_FORM_DATA4)],
            ),
            (
                ABBREV_INLINED,
                DW_TAG_INLINED_SUBROUTINE,
                true,
                &[
                    (DW_AT_ABSTRACT_ORIGIN, DW_FORM_REF4),
                    (DW_AT_LOW_PC, DW_FORM_ADDR),
                    (DW_AT_HIGH_PC, DW_FORM_DATA8),
                    (DW_AT_CALL_FILE, DW_FORM_DATA4),
                    (DW_AT_CALL_LINE, DW_FORM_DATA4),
                ],
            ),
        ];

        let mut data = Vec::new();
        for (code, tag, children, attrs) in abbrevs {
            let () = write_uleb128(&mut data, code);
            let () = write_uleb128(&mut data, tag);
            data.push(u8::from(children));
            for (name, form) in attrs {
                let () = write_uleb128(&mut data, *name);
                let () = write_uleb128(&mut data, *form);
            }
            data.extend_from_slice(&[0, 0]);
        }
        data.push(0);
        data
    }

    fn collect_inlined<'slf>(inlined: &'slf [Inlined], names: &mut Vec<&'slf str>) {
        for inlined in inlined {
            if !names.contains(&inlined.name.as_str()) {
                names.push(&inlined.name);
            }
            let () = Self::collect_inlined(&inlined.children, names);
        }
    }

    fn write_inlined(data: &mut Vec<u8>, inlined: &[Inlined], origins: &[(&str, u32)]) {
        for inlined in inlined {
            let origin = origins
                .iter()
                .find(|(name, _)| *name == inlined.name)
                .map(|(_, offset)| *offset)
                .unwrap_or_default();

            let () = write_uleb128(data, ABBREV_INLINED);
            data.extend_from_slice(&origin.to_le_bytes());
            data.extend_from_slice(&inlined.addr.to_le_bytes());
            data.extend_from_slice(&inlined.size.to_le_bytes());
            data.extend_from_slice(&inlined.call_file.to_le_bytes());
            data.extend_from_slice(&inlined.call_line.to_le_bytes());
            let () = Self::write_inlined(data, &inlined.children, origins);
            data.push(0);
        }
    }

    fn debug_info(&self) -> Vec<u8> {
        let low_pc = self.functions.iter().map(|f| f.addr).min().unwrap_or(0);
        let high_pc = self
            .functions
            .iter()
            .map(|f| f.addr + f.size)
            .max()
            .unwrap_or(0);

        // The DIEs, with offsets relative to the start of the unit header.
        let mut dies = Vec::new();
        let () = write_uleb128(&mut dies, ABBREV_CU);
        let () = write_cstr(&mut dies, &self.name);
        dies.extend_from_slice(&DW_LANG_C99.to_le_bytes());
        dies.extend_from_slice(&low_pc.to_le_bytes());
        dies.extend_from_slice(&(high_pc - low_pc).to_le_bytes());
        dies.extend_from_slice(&0u32.to_le_bytes());

        let mut names = Vec::new();
        for function in &self.functions {
            let () = Self::collect_inlined(&function.inlined, &mut names);
        }

        let mut origins = Vec::with_capacity(names.len());
        for name in names {
            origins.push((name, (CU_HEADER_SIZE + dies.len()) as u32));
            let () = write_uleb128(&mut dies, ABBREV_ABSTRACT_SUBPROGRAM);
            let () = write_cstr(&mut dies, name);
            dies.extend_from_slice(&DW_INL_DECLARED_INLINED.to_le_bytes());
        }

        for function in &self.functions {
            let () = write_uleb128(&mut dies, ABBREV_SUBPROGRAM);
            let () = write_cstr(&mut dies, &function.name);
            dies.extend_from_slice(&function.decl_file.to_le_bytes());
            dies.extend_from_slice(&function.decl_line.to_le_bytes());
            dies.extend_from_slice(&function.addr.to_le_bytes());
            dies.extend_from_slice(&function.size.to_le_bytes());
            let () = Self::write_inlined(&mut dies, &function.inlined, &origins);
            dies.push(0);
        }
        // End of the compilation unit's children.
        dies.push(0);

        let mut data = Vec::with_capacity(CU_HEADER_SIZE + dies.len());
        // The unit length does not include the length field itself.
        let unit_length = (CU_HEADER_SIZE - 4 + dies.len()) as u32;
        data.extend_from_slice(&unit_length.to_le_bytes());
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.push(8);
        debug_assert_eq!(data.len(), CU_HEADER_SIZE);
        data.extend_from_slice(&dies);
        data
    }

    fn debug_line(&self) -> Vec<u8> {
        let mut header = Vec::new();
        // minimum_instruction_length
        header.push(1);
        // maximum_operations_per_instruction
        header.push(1);
        // default_is_stmt
        header.push(1);
        // line_base
        header.push(-5i8 as u8);
        // line_range
        header.push(14);
        // opcode_base
        header.push(13);
        header.extend_from_slice(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
        // No include directories.
        header.push(0);
        for file in &self.files {
            let () = write_cstr(&mut header, file);
            // Directory index, modification time, and file length.
            header.extend_from_slice(&[0, 0, 0]);
        }
        header.push(0);

        let mut program = Vec::new();
        for sequence in &self.sequences {
            let start = sequence.rows.first().map(|row| row.0).unwrap_or(sequence.end);
            program.push(0);
            let () = write_uleb128(&mut program, 9);
            program.push(DW_LNE_SET_ADDRESS);
            program.extend_from_slice(&start.to_le_bytes());

            let mut addr = start;
            let mut file = 1;
            let mut line = 1;
            for (row_addr, row_file, row_line) in &sequence.rows {
                if *row_addr > addr {
                    program.push(DW_LNS_ADVANCE_PC);
                    let () = write_uleb128(&mut program, row_addr - addr);
                    addr = *row_addr;
                }
                if *row_file != file {
                    program.push(DW_LNS_SET_FILE);
                    let () = write_uleb128(&mut program, (*row_file).into());
                    file = *row_file;
                }
                if *row_line != line {
                    program.push(DW_LNS_ADVANCE_LINE);
                    let () = write_sleb128(&mut program, *row_line as i64 - line as i64);
                    line = *row_line;
                }
                program.push(DW_LNS_COPY);
            }

            if sequence.end > addr {
                program.push(DW_LNS_ADVANCE_PC);
                let () = write_uleb128(&mut program, sequence.end - addr);
            }
            program.push(0);
            let () = write_uleb128(&mut program, 1);
            program.push(DW_LNE_END_SEQUENCE);
        }

        let mut data = Vec::new();
        // unit_length covers everything after the length field: the
        // version, the header_length field, the header, and the program.
        let unit_length = (2 + 4 + header.len() + program.len()) as u32;
        data.extend_from_slice(&unit_length.to_le_bytes());
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend_from_slice(&(header.len() as u32).to_le_bytes());
        data.extend_from_slice(&header);
        data.extend_from_slice(&program);
        data
    }

    /// Produce the DWARF sections.
    pub fn sections(&self) -> Vec<Section> {
        vec![
            Section::progbits(".debug_abbrev", &Self::debug_abbrev()),
            Section::progbits(".debug_info", &self.debug_info()),
            Section::progbits(".debug_line", &self.debug_line()),
        ]
    }
}


/// The DWARF information of the `libhello` fixture.
///
/// `foo` calls an inlined tracepoint function declared in `hello-tp.h`
/// from line 35 of `libhello.c`.
pub fn libhello_dwarf() -> DwarfBuilder {
    DwarfBuilder::new("libhello.c")
        .file("./libhello.c")
        .file("./hello-tp.h")
        .function(Function {
            decl_line: 20,
            ..Function::new("bar", 0x2000, 0x100)
        })
        .function(Function {
            decl_line: 28,
            ..Function::new("foo", 0x2277, 0x200).inlined(Inlined::new(
                "__tracepoint_cb_my_provider___my_first_tracepoint",
                0x2300,
                0x40,
                1,
                35,
            ))
        })
        .sequence(&[(0x2000, 1, 20), (0x2080, 1, 22)], 0x2100)
        .sequence(
            &[
                (0x2277, 1, 30),
                (0x2300, 2, 80),
                (0x2340, 1, 36),
                (0x2400, 1, 38),
            ],
            0x2477,
        )
}

/// The stripped `libhello` shared object: code, symbols, and a build ID,
/// but no DWARF.
pub fn libhello_elf() -> ElfBuilder {
    ElfBuilder::new()
        .text(0x2000, 0x477)
        .symbol(Symbol::func("bar", 0x2000, 0x100))
        .symbol(Symbol::func("foo", 0x2277, 0x200))
        .build_id(&LIBHELLO_BUILD_ID)
}

/// The `libhello` shared object with embedded DWARF.
pub fn libhello_with_dwarf() -> ElfBuilder {
    libhello_elf().dwarf(&libhello_dwarf())
}

/// The separate debug file of `libhello`: DWARF and the build ID, but
/// no symbols.
pub fn libhello_debug_info() -> ElfBuilder {
    ElfBuilder::new()
        .text(0x2000, 0x477)
        .build_id(&LIBHELLO_BUILD_ID)
        .dwarf(&libhello_dwarf())
}
