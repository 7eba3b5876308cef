use std::fs::read;
use std::path::Path;

use bininfo::debug_link_crc32;
use bininfo::BinaryInfo;
use bininfo::Config;
use bininfo::Context;
use bininfo::ErrorKind;
use bininfo::ResolutionState;
use bininfo::ResolutionStrategy;
use bininfo::__private::libhello_debug_info;
use bininfo::__private::libhello_dwarf;
use bininfo::__private::libhello_elf;
use bininfo::__private::libhello_with_dwarf;
use bininfo::__private::ElfBuilder;
use bininfo::__private::Symbol;
use bininfo::__private::LIBHELLO_BUILD_ID;
use bininfo::__private::LIBHELLO_DEBUG_LINK;

use test_log::test;

use crate::suite::common::assert_compiled_dwarf_lookups;
use crate::suite::common::assert_compiled_elf_lookups;
use crate::suite::common::data_file;
use crate::suite::common::pie_config;
use crate::suite::common::Fixture;
use crate::suite::common::COMPILED_BUILD_ID;
use crate::suite::common::COMPILED_DEBUG_LINK;
use crate::suite::common::COMPILED_DEBUG_LINK_CRC;
use crate::suite::common::FOO_ADDR;
use crate::suite::common::TRACEPOINT_ADDR;


/// The path of the `libhello` debug file below a debug root, as
/// derived from its build ID.
const BUILD_ID_PATH: &str = ".build-id/cd/d98cdd87f7fe64c13b6daad553987eafd40cbb.debug";
/// The path of the compiled `libhello` debug file below a debug root.
const COMPILED_BUILD_ID_PATH: &str = ".build-id/4f/10c8ad179e85acc86e7f39014366bf424fede9.debug";


/// Create a `BinaryInfo` for the stripped `libhello` at `path` that
/// looks for separate debug information below `debug_root`.
fn stripped_binary(context: &Context, path: &Path, debug_root: &Path) -> BinaryInfo {
    let config = Config {
        debug_info_dir: Some(debug_root.to_path_buf()),
        ..pie_config(path)
    };
    BinaryInfo::create(context, config).unwrap()
}

/// Check that lookups behave as if DWARF were embedded in the binary.
fn assert_dwarf_lookups(bin: &mut BinaryInfo) {
    assert_eq!(bin.lookup_function_name(FOO_ADDR).unwrap(), "foo+0xf0");
    let location = bin.lookup_source_location(FOO_ADDR).unwrap();
    assert_eq!(location.filename, Path::new("./libhello.c"));
    assert_eq!(location.line_number, 36);
    let location = bin.lookup_source_location(TRACEPOINT_ADDR).unwrap();
    assert_eq!(location.line_number, 35);
    assert_eq!(
        bin.resolution_state(),
        ResolutionState::DwarfResolved(ResolutionStrategy::Dwarf)
    );
}

/// Check that lookups behave as if no DWARF were available.
fn assert_elf_lookups(bin: &mut BinaryInfo) {
    assert_eq!(bin.lookup_function_name(FOO_ADDR).unwrap(), "foo+0xf0");
    let err = bin.lookup_source_location(FOO_ADDR).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(
        bin.resolution_state(),
        ResolutionState::DwarfResolved(ResolutionStrategy::ElfOnly)
    );
}


/// Check that we find separate debug information via build ID.
#[test]
fn build_id_match() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("lib/libhello.so", &libhello_elf());
    let _debug = fixture.write_elf(Path::new("debug").join(BUILD_ID_PATH), &libhello_debug_info());
    let context = Context::new();

    let mut bin = stripped_binary(&context, &path, &fixture.root().join("debug"));
    let () = bin.set_build_id(&LIBHELLO_BUILD_ID).unwrap();
    let () = assert_dwarf_lookups(&mut bin);
    // The binary and its debug file.
    assert_eq!(context.fd_cache().open_count(), 2);

    drop(bin);
    assert_eq!(context.fd_cache().open_count(), 0);
}

/// Check that the debug root of the context is used by default.
#[test]
fn build_id_context_debug_dir() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("lib/libhello.so", &libhello_elf());
    let _debug = fixture.write_elf(Path::new("debug").join(BUILD_ID_PATH), &libhello_debug_info());
    let context = Context::new().with_debug_dir(fixture.root().join("debug"));

    let mut bin = BinaryInfo::create(&context, pie_config(&path)).unwrap();
    let () = bin.set_build_id(&LIBHELLO_BUILD_ID).unwrap();
    let () = assert_dwarf_lookups(&mut bin);
}

/// Check that a debug file with a different build ID is ignored.
#[test]
fn build_id_mismatch() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("lib/libhello.so", &libhello_elf());

    let mut build_id = LIBHELLO_BUILD_ID;
    build_id[0] ^= 0x01;
    let debug = ElfBuilder::new()
        .text(0x2000, 0x477)
        .build_id(&build_id)
        .dwarf(&libhello_dwarf());
    let _debug = fixture.write_elf(Path::new("debug").join(BUILD_ID_PATH), &debug);
    let context = Context::new();

    let mut bin = stripped_binary(&context, &path, &fixture.root().join("debug"));
    let () = bin.set_build_id(&LIBHELLO_BUILD_ID).unwrap();
    let () = assert_elf_lookups(&mut bin);
    assert_eq!(context.fd_cache().open_count(), 1);
}

/// Check that a missing debug file is no error.
#[test]
fn build_id_missing() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("lib/libhello.so", &libhello_elf());
    let context = Context::new();

    let mut bin = stripped_binary(&context, &path, &fixture.root().join("debug"));
    let () = bin.set_build_id(&LIBHELLO_BUILD_ID).unwrap();
    let () = assert_elf_lookups(&mut bin);
}

/// Check that we find separate debug information via debug link.
#[test]
fn debug_link_match() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("lib/libhello.so", &libhello_elf());
    let debug_data = libhello_debug_info().build();
    let _debug = fixture.write(Path::new("lib/.debug").join(LIBHELLO_DEBUG_LINK), &debug_data);
    let context = Context::new();

    let mut bin = stripped_binary(&context, &path, &fixture.root().join("debug"));
    let () = bin
        .set_debug_link(LIBHELLO_DEBUG_LINK, debug_link_crc32(&debug_data))
        .unwrap();
    let () = assert_dwarf_lookups(&mut bin);
}

/// Check that debug link targets are searched below the debug root.
#[test]
fn debug_link_debug_root() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("lib/libhello.so", &libhello_elf());
    let debug_data = libhello_debug_info().build();
    let debug_root = fixture.root().join("debug");
    let rel_dir = path.parent().unwrap().strip_prefix("/").unwrap();
    let _debug = fixture.write(
        debug_root.join(rel_dir).join(LIBHELLO_DEBUG_LINK),
        &debug_data,
    );
    let context = Context::new();

    let mut bin = stripped_binary(&context, &path, &debug_root);
    let () = bin
        .set_debug_link(LIBHELLO_DEBUG_LINK, debug_link_crc32(&debug_data))
        .unwrap();
    let () = assert_dwarf_lookups(&mut bin);
}

/// Check that a debug link target with a mismatching checksum is
/// ignored.
#[test]
fn debug_link_checksum_mismatch() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("lib/libhello.so", &libhello_elf());
    let debug_data = libhello_debug_info().build();
    let _debug = fixture.write(Path::new("lib").join(LIBHELLO_DEBUG_LINK), &debug_data);
    let context = Context::new();

    let mut bin = stripped_binary(&context, &path, &fixture.root().join("debug"));
    let () = bin
        .set_debug_link(LIBHELLO_DEBUG_LINK, !debug_link_crc32(&debug_data))
        .unwrap();
    let () = assert_elf_lookups(&mut bin);
}

/// Check that the debug link is used if the build ID yields nothing.
#[test]
fn build_id_then_debug_link() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("lib/libhello.so", &libhello_elf());
    let debug_data = libhello_debug_info().build();
    let _debug = fixture.write(Path::new("lib").join(LIBHELLO_DEBUG_LINK), &debug_data);
    let context = Context::new();

    let mut bin = stripped_binary(&context, &path, &fixture.root().join("debug"));
    let () = bin.set_build_id(&LIBHELLO_BUILD_ID).unwrap();
    let () = bin
        .set_debug_link(LIBHELLO_DEBUG_LINK, debug_link_crc32(&debug_data))
        .unwrap();
    let () = assert_dwarf_lookups(&mut bin);
}

/// Check that the build ID recorded in the binary is used if none got
/// attached.
#[test]
fn recorded_build_id() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("lib/libhello.so", &libhello_elf());
    let _debug = fixture.write_elf(Path::new("debug").join(BUILD_ID_PATH), &libhello_debug_info());
    let context = Context::new();

    let mut bin = stripped_binary(&context, &path, &fixture.root().join("debug"));
    let () = assert_dwarf_lookups(&mut bin);
}

/// Check that the binary's `.gnu_debuglink` section is used if no debug
/// link got attached.
#[test]
fn recorded_debug_link() {
    let fixture = Fixture::new();
    let debug_data = libhello_debug_info().build();
    let elf = ElfBuilder::new()
        .text(0x2000, 0x477)
        .symbol(Symbol::func("foo", 0x2277, 0x200))
        .debug_link(LIBHELLO_DEBUG_LINK, debug_link_crc32(&debug_data));
    let path = fixture.write_elf("lib/libhello.so", &elf);
    let _debug = fixture.write(Path::new("lib").join(LIBHELLO_DEBUG_LINK), &debug_data);
    let context = Context::new();

    let mut bin = stripped_binary(&context, &path, &fixture.root().join("debug"));
    let () = assert_dwarf_lookups(&mut bin);
}

/// Check that an attached debug link overrides the recorded one.
#[test]
fn attached_debug_link_precedence() {
    let fixture = Fixture::new();
    let debug_data = libhello_debug_info().build();
    let elf = ElfBuilder::new()
        .text(0x2000, 0x477)
        .symbol(Symbol::func("foo", 0x2277, 0x200))
        .debug_link("other.debug", debug_link_crc32(&debug_data));
    let path = fixture.write_elf("lib/libhello.so", &elf);
    let _debug = fixture.write(Path::new("lib").join(LIBHELLO_DEBUG_LINK), &debug_data);
    let _other = fixture.write(Path::new("lib").join("other.debug"), &debug_data);
    let context = Context::new();

    let mut bin = stripped_binary(&context, &path, &fixture.root().join("debug"));
    // The attached checksum does not match; the recorded link is not
    // consulted.
    let () = bin
        .set_debug_link(LIBHELLO_DEBUG_LINK, !debug_link_crc32(&debug_data))
        .unwrap();
    let () = assert_elf_lookups(&mut bin);
}

/// Check that embedded DWARF takes precedence over any hint.
#[test]
fn embedded_dwarf_precedence() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("lib/libhello.so", &libhello_with_dwarf());
    let context = Context::new();

    let mut bin = stripped_binary(&context, &path, &fixture.root().join("debug"));
    let () = bin.set_build_id(&[0xff; 20]).unwrap();
    let () = assert_dwarf_lookups(&mut bin);
    assert_eq!(context.fd_cache().open_count(), 1);
}

/// Check that hints cannot be changed once debug information got
/// resolved.
#[test]
fn hints_after_resolution() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("lib/libhello.so", &libhello_elf());
    let context = Context::new();

    let mut bin = stripped_binary(&context, &path, &fixture.root().join("debug"));
    let () = assert_elf_lookups(&mut bin);

    let err = bin.set_build_id(&LIBHELLO_BUILD_ID).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = bin.set_debug_link(LIBHELLO_DEBUG_LINK, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

/// Check that we find the `objcopy --only-keep-debug` companion of a
/// compiled shared object via its debug link.
#[test]
fn compiled_debug_link() {
    let fixture = Fixture::new();
    let path = fixture.copy_data("libhello-stripped.so", "lib/libhello.so");
    let _debug = fixture.copy_data(
        "libhello.so.debug",
        Path::new("lib/.debug").join(COMPILED_DEBUG_LINK),
    );
    let context = Context::new();

    let data = read(data_file("libhello.so.debug")).unwrap();
    assert_eq!(debug_link_crc32(&data), COMPILED_DEBUG_LINK_CRC);

    let mut bin = stripped_binary(&context, &path, &fixture.root().join("debug"));
    let () = bin
        .set_debug_link(COMPILED_DEBUG_LINK, COMPILED_DEBUG_LINK_CRC)
        .unwrap();
    let () = assert_compiled_dwarf_lookups(&mut bin);
}

/// Check that the debug link recorded by `objcopy --add-gnu-debuglink`
/// is honored without being attached.
#[test]
fn compiled_recorded_debug_link() {
    let fixture = Fixture::new();
    let path = fixture.copy_data("libhello-stripped.so", "lib/libhello.so");
    let _debug = fixture.copy_data("libhello.so.debug", Path::new("lib").join(COMPILED_DEBUG_LINK));
    let context = Context::new();

    let mut bin = stripped_binary(&context, &path, &fixture.root().join("debug"));
    let () = assert_compiled_dwarf_lookups(&mut bin);
}

/// Check that we find the companion of a compiled shared object in a
/// build ID tree.
#[test]
fn compiled_build_id() {
    let fixture = Fixture::new();
    let path = fixture.copy_data("libhello-stripped.so", "lib/libhello.so");
    let _debug = fixture.copy_data(
        "libhello.so.debug",
        Path::new("debug").join(COMPILED_BUILD_ID_PATH),
    );
    let context = Context::new();

    let mut bin = stripped_binary(&context, &path, &fixture.root().join("debug"));
    let () = bin.set_build_id(&COMPILED_BUILD_ID).unwrap();
    let () = assert_compiled_dwarf_lookups(&mut bin);
    assert_eq!(context.fd_cache().open_count(), 2);
}

/// Check that a companion with the wrong checksum is rejected for a
/// compiled shared object.
#[test]
fn compiled_debug_link_mismatch() {
    let fixture = Fixture::new();
    let path = fixture.copy_data("libhello-stripped.so", "lib/libhello.so");
    let _debug = fixture.copy_data("libhello.so.debug", Path::new("lib").join(COMPILED_DEBUG_LINK));
    let context = Context::new();

    let mut bin = stripped_binary(&context, &path, &fixture.root().join("debug"));
    let () = bin
        .set_debug_link(COMPILED_DEBUG_LINK, !COMPILED_DEBUG_LINK_CRC)
        .unwrap();
    let () = assert_compiled_elf_lookups(&mut bin);
}
