use std::path::Path;
use std::path::PathBuf;
use std::thread;

use bininfo::BinaryInfo;
use bininfo::Config;
use bininfo::Context;
use bininfo::ErrorKind;
use bininfo::ResolutionState;
use bininfo::ResolutionStrategy;
use bininfo::SourceLocation;
#[cfg(feature = "zlib")]
use bininfo::__private::libhello_dwarf;
use bininfo::__private::libhello_elf;
use bininfo::__private::libhello_with_dwarf;
use bininfo::__private::DwarfBuilder;
use bininfo::__private::ElfBuilder;
use bininfo::__private::Function;
#[cfg(feature = "zlib")]
use bininfo::__private::Section;
use bininfo::__private::Symbol;

use test_log::test;

use crate::suite::common::assert_compiled_dwarf_lookups;
use crate::suite::common::assert_compiled_elf_lookups;
use crate::suite::common::data_file;
use crate::suite::common::pie_binary;
use crate::suite::common::pie_config;
use crate::suite::common::Fixture;
use crate::suite::common::FOO_ADDR;
use crate::suite::common::LOAD_ADDRESS;
use crate::suite::common::MEMORY_SIZE;
use crate::suite::common::TRACEPOINT_ADDR;


/// Check that we resolve names and locations using embedded DWARF.
#[test]
fn lookup_embedded_dwarf() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("libhello.so", &libhello_with_dwarf());
    let context = Context::new();
    let mut bin = pie_binary(&context, &path);

    let name = bin.lookup_function_name(FOO_ADDR).unwrap();
    assert_eq!(name, "foo+0xf0");
    let location = bin.lookup_source_location(FOO_ADDR).unwrap();
    assert_eq!(
        location,
        SourceLocation {
            filename: PathBuf::from("./libhello.c"),
            line_number: 36,
        }
    );
    assert_eq!(
        bin.resolution_state(),
        ResolutionState::DwarfResolved(ResolutionStrategy::Dwarf)
    );

    // Function entries are reported without offset.
    assert_eq!(bin.lookup_function_name(0x402277).unwrap(), "foo");
    assert_eq!(bin.lookup_function_name(0x402000).unwrap(), "bar");
    let location = bin.lookup_source_location(0x402090).unwrap();
    assert_eq!(location.line_number, 22);
}

/// Check that an address inside an inlined call resolves to the line of
/// the call instead of the line table entry of the inlined code.
#[test]
fn lookup_inlined_call_site() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("libhello.so", &libhello_with_dwarf());
    let context = Context::new();
    let mut bin = pie_binary(&context, &path);

    let location = bin.lookup_source_location(TRACEPOINT_ADDR).unwrap();
    assert_eq!(location.filename, Path::new("./libhello.c"));
    assert_eq!(location.line_number, 35);

    // The name is the one of the enclosing function.
    let name = bin.lookup_function_name(TRACEPOINT_ADDR).unwrap();
    assert_eq!(name, "foo+0x89");
}

/// Check lookups on a compiler generated DWARF 5 shared object.
#[test]
fn lookup_compiled_dwarf() {
    let context = Context::new();
    let mut bin = pie_binary(&context, &data_file("libhello.so"));
    let () = assert_compiled_dwarf_lookups(&mut bin);

    // The second, out of line, range of the inlined `hello_tp` is
    // described via `DW_AT_ranges`.
    assert_eq!(bin.lookup_function_name(LOAD_ADDRESS + 0x1150).unwrap(), "foo+0x30");
    let location = bin.lookup_source_location(LOAD_ADDRESS + 0x1150).unwrap();
    assert_eq!(location.filename, Path::new("./libhello.c"));
    assert_eq!(location.line_number, 16);

    // Directly past either range we are back in `foo` proper.
    assert_eq!(bin.lookup_source_location(LOAD_ADDRESS + 0x113b).unwrap().line_number, 17);
    assert_eq!(bin.lookup_source_location(LOAD_ADDRESS + 0x1140).unwrap().line_number, 18);
    assert_eq!(bin.lookup_source_location(LOAD_ADDRESS + 0x1154).unwrap().line_number, 17);

    // Past the end of `foo` and its compile unit, `_fini` starts. It
    // is only known to the symbol table.
    assert_eq!(bin.lookup_function_name(LOAD_ADDRESS + 0x115c).unwrap(), "_fini");
}

/// Check that a compiled shared object without debug information and
/// without reachable debug files is resolved via its symbols.
#[test]
fn lookup_compiled_stripped() {
    let fixture = Fixture::new();
    let path = fixture.copy_data("libhello-stripped.so", "lib/libhello.so");
    let context = Context::new();
    let config = Config {
        debug_info_dir: Some(fixture.root().join("debug")),
        ..pie_config(&path)
    };
    let mut bin = BinaryInfo::create(&context, config).unwrap();
    let () = assert_compiled_elf_lookups(&mut bin);
}

/// Check that we fall back to ELF symbols if no DWARF is available.
#[test]
fn lookup_elf_only() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("libhello.so", &libhello_elf());
    let context = Context::new();
    let mut bin = pie_binary(&context, &path);

    let name = bin.lookup_function_name(FOO_ADDR).unwrap();
    assert_eq!(name, "foo+0xf0");
    let name = bin.lookup_function_name(0x402277).unwrap();
    assert_eq!(name, "foo");

    let err = bin.lookup_source_location(FOO_ADDR).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(
        bin.resolution_state(),
        ResolutionState::DwarfResolved(ResolutionStrategy::ElfOnly)
    );
}

/// Check that symbols only present in `.dynsym` are found as well.
#[test]
fn lookup_dynamic_symbols() {
    let fixture = Fixture::new();
    let elf = ElfBuilder::new()
        .text(0x1000, 0x100)
        .symbol(Symbol::func("exported", 0x1000, 0x80))
        .symbol(Symbol::object("some_data", 0x1080, 0x10))
        .dynamic_symbols();
    let path = fixture.write_elf("libdyn.so", &elf);
    let context = Context::new();
    let mut bin = pie_binary(&context, &path);

    let name = bin.lookup_function_name(LOAD_ADDRESS + 0x1010).unwrap();
    assert_eq!(name, "exported+0x10");

    // Data symbols are ignored; the closest preceding function in the
    // same section is reported instead.
    let name = bin.lookup_function_name(LOAD_ADDRESS + 0x1084).unwrap();
    assert_eq!(name, "exported+0x84");

    // Past the end of `.text`.
    let err = bin.lookup_function_name(LOAD_ADDRESS + 0x1100).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

/// Check that a symbol with a bogus size does not break name lookup.
#[test]
fn lookup_symbol_huge_size() {
    let fixture = Fixture::new();
    let elf = ElfBuilder::new()
        .text(0x1000, 0x100)
        .symbol(Symbol::func("big", 0x1000, u64::MAX));
    let path = fixture.write_elf("libbig.so", &elf);
    let context = Context::new();
    let mut bin = pie_binary(&context, &path);

    let name = bin.lookup_function_name(LOAD_ADDRESS + 0x1010).unwrap();
    assert_eq!(name, "big+0x10");
}

/// Check that DWARF not covering an address falls back to ELF symbols
/// for function names.
#[test]
fn lookup_dwarf_gap() {
    let fixture = Fixture::new();
    let dwarf = DwarfBuilder::new("partial.c")
        .file("./partial.c")
        .function(Function::new("covered", 0x1000, 0x40))
        .sequence(&[(0x1000, 1, 10)], 0x1040);
    let elf = ElfBuilder::new()
        .text(0x1000, 0x100)
        .symbol(Symbol::func("covered", 0x1000, 0x40))
        .symbol(Symbol::func("uncovered", 0x1040, 0x40))
        .dwarf(&dwarf);
    let path = fixture.write_elf("libpartial.so", &elf);
    let context = Context::new();
    let mut bin = pie_binary(&context, &path);

    let name = bin.lookup_function_name(LOAD_ADDRESS + 0x1008).unwrap();
    assert_eq!(name, "covered+0x8");
    let name = bin.lookup_function_name(LOAD_ADDRESS + 0x1048).unwrap();
    assert_eq!(name, "uncovered+0x8");

    let err = bin
        .lookup_source_location(LOAD_ADDRESS + 0x1048)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

/// Check that addresses outside of the mapping and addresses without
/// data are reported as not found.
#[test]
fn lookup_not_found() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("libhello.so", &libhello_with_dwarf());
    let context = Context::new();
    let mut bin = pie_binary(&context, &path);

    for addr in [0, LOAD_ADDRESS - 1, LOAD_ADDRESS + MEMORY_SIZE, u64::MAX] {
        let err = bin.lookup_function_name(addr).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{addr:#x}");
        let err = bin.lookup_source_location(addr).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{addr:#x}");
    }

    let err = bin.lookup_function_name(LOAD_ADDRESS).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = bin.lookup_source_location(LOAD_ADDRESS).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

/// Check `has_address` at the boundaries of the mapping.
#[test]
fn address_boundaries() {
    let context = Context::new();
    let bin = BinaryInfo::create(
        &context,
        Config::new("/does/not/exist", LOAD_ADDRESS, MEMORY_SIZE),
    )
    .unwrap();

    assert!(!bin.has_address(LOAD_ADDRESS - 1));
    assert!(bin.has_address(LOAD_ADDRESS));
    assert!(bin.has_address(LOAD_ADDRESS + MEMORY_SIZE - 1));
    assert!(!bin.has_address(LOAD_ADDRESS + MEMORY_SIZE));

    let bin = BinaryInfo::create(&context, Config::new("/does/not/exist", u64::MAX - 1, 1))
        .unwrap();
    assert!(bin.has_address(u64::MAX - 1));
    assert!(!bin.has_address(u64::MAX));
}

/// Check that failing to open the binary is distinguishable from an
/// address without symbol.
#[test]
fn unopenable_binary() {
    let fixture = Fixture::new();
    let context = Context::new();

    let path = fixture.root().join("missing.so");
    let mut bin = pie_binary(&context, &path);
    let err = bin.lookup_function_name(FOO_ADDR).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    let err = bin.lookup_source_location(FOO_ADDR).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);

    let path = fixture.write("garbage.so", b"this is not an ELF file");
    let mut bin = pie_binary(&context, &path);
    let err = bin.lookup_function_name(FOO_ADDR).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedBinary);
}

/// Check that the target prefix is applied to the binary path only.
#[test]
fn target_prefix() {
    let fixture = Fixture::new();
    let _path = fixture.write_elf("target/usr/lib/libhello.so", &libhello_with_dwarf());
    let context = Context::new();

    let config = Config {
        is_pie: true,
        target_prefix: Some(fixture.root().join("target")),
        ..Config::new("/usr/lib/libhello.so", LOAD_ADDRESS, MEMORY_SIZE)
    };
    let mut bin = BinaryInfo::create(&context, config).unwrap();
    assert_eq!(bin.path(), Path::new("/usr/lib/libhello.so"));
    assert_eq!(bin.lookup_function_name(FOO_ADDR).unwrap(), "foo+0xf0");
    assert_eq!(bin.lookup_source_location(FOO_ADDR).unwrap().line_number, 36);
}

/// Check that zlib compressed debug sections are inflated transparently.
#[cfg(feature = "zlib")]
#[test]
fn compressed_debug_sections() {
    let fixture = Fixture::new();
    let mut elf = libhello_elf();
    for section in libhello_dwarf().sections() {
        elf = elf.section(Section::compressed(&section.name, &section.data));
    }
    let path = fixture.write_elf("libhello.so", &elf);
    let context = Context::new();
    let mut bin = pie_binary(&context, &path);

    assert_eq!(bin.lookup_function_name(FOO_ADDR).unwrap(), "foo+0xf0");
    let location = bin.lookup_source_location(TRACEPOINT_ADDR).unwrap();
    assert_eq!(location.line_number, 35);
}

/// Check that multiple threads can work on the same binary using a
/// shared context.
#[test]
fn concurrent_lookups() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("libhello.so", &libhello_with_dwarf());
    let context = Context::new();

    let () = thread::scope(|scope| {
        let handles = (0..4)
            .map(|_| {
                let context = context.clone();
                let path = path.clone();
                scope.spawn(move || {
                    let mut bin = pie_binary(&context, &path);
                    for _ in 0..16 {
                        assert_eq!(bin.lookup_function_name(FOO_ADDR).unwrap(), "foo+0xf0");
                        assert_eq!(
                            bin.lookup_source_location(TRACEPOINT_ADDR)
                                .unwrap()
                                .line_number,
                            35
                        );
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            let () = handle.join().unwrap();
        }
    });

    assert_eq!(context.fd_cache().open_count(), 0);
}

/// Check that files are shared between objects and closed once the last
/// user is gone.
#[test]
fn file_sharing() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("libhello.so", &libhello_with_dwarf());
    let link = fixture.root().join("libhello-link.so");
    let () = std::fs::hard_link(&path, &link).unwrap();
    let context = Context::new();

    let mut bin1 = pie_binary(&context, &path);
    let mut bin2 = pie_binary(&context, &link);
    assert_eq!(context.fd_cache().open_count(), 0);

    let _name = bin1.lookup_function_name(FOO_ADDR).unwrap();
    let _name = bin2.lookup_function_name(FOO_ADDR).unwrap();
    // Hard links refer to the same file.
    assert_eq!(context.fd_cache().open_count(), 1);

    drop(bin1);
    assert_eq!(context.fd_cache().open_count(), 1);
    drop(bin2);
    assert_eq!(context.fd_cache().open_count(), 0);
}
