use std::ffi::OsStr;
use std::path::Path;

use bininfo::compat;
use bininfo::debug_link_crc32;
use bininfo::Context;
use bininfo::__private::libhello_debug_info;
use bininfo::__private::libhello_elf;
use bininfo::__private::LIBHELLO_DEBUG_LINK;

use test_log::test;

use crate::suite::common::Fixture;
use crate::suite::common::FOO_ADDR;
use crate::suite::common::LOAD_ADDRESS;
use crate::suite::common::MEMORY_SIZE;
use crate::suite::common::TRACEPOINT_ADDR;


/// Drive a full debug link scenario through the legacy interface.
#[test]
fn legacy_debug_link() {
    let fixture = Fixture::new();
    let path = fixture.write_elf("lib/libhello.so", &libhello_elf());
    let debug_data = libhello_debug_info().build();
    let _debug = fixture.write(Path::new("lib").join(LIBHELLO_DEBUG_LINK), &debug_data);
    let debug_root = fixture.root().join("debug");
    let context = Context::new();

    let mut bin = compat::create(
        &context,
        &path,
        LOAD_ADDRESS,
        MEMORY_SIZE,
        true,
        Some(&debug_root),
        None,
    )
    .unwrap();
    let crc = debug_link_crc32(&debug_data);
    assert_eq!(compat::set_debug_link(&mut bin, OsStr::new(LIBHELLO_DEBUG_LINK), crc), 0);
    // Only once.
    assert_eq!(compat::set_debug_link(&mut bin, OsStr::new(LIBHELLO_DEBUG_LINK), crc), -1);

    assert_eq!(compat::has_address(&bin, FOO_ADDR), 1);
    assert_eq!(compat::has_address(&bin, 0), 0);

    let mut location = None;
    assert_eq!(compat::lookup_source_location(&mut bin, TRACEPOINT_ADDR, &mut location), 0);
    let location = location.unwrap();
    assert_eq!(location.filename, Path::new("./libhello.c"));
    assert_eq!(location.line_number, 35);

    // Failure is reported the same way no matter the cause.
    let mut name = None;
    assert_eq!(compat::lookup_function_name(&mut bin, 0, &mut name), -1);
    assert_eq!(name, None);

    let () = compat::destroy(bin);
    assert_eq!(context.fd_cache().open_count(), 0);

    let mut bin = compat::create(
        &context,
        &fixture.root().join("missing.so"),
        LOAD_ADDRESS,
        MEMORY_SIZE,
        true,
        None,
        None,
    )
    .unwrap();
    assert_eq!(compat::lookup_function_name(&mut bin, FOO_ADDR, &mut name), -1);
    assert_eq!(name, None);
}
