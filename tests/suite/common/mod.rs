use std::fs::create_dir_all;
use std::fs::read;
use std::fs::write;
use std::path::Path;
use std::path::PathBuf;

use bininfo::BinaryInfo;
use bininfo::Config;
use bininfo::Context;
use bininfo::ErrorKind;
use bininfo::ResolutionState;
use bininfo::ResolutionStrategy;
use bininfo::__private::ElfBuilder;

use tempfile::tempdir;
use tempfile::TempDir;


/// The load address used for fixture binaries.
pub const LOAD_ADDRESS: u64 = 0x400000;
/// The mapping size used for fixture binaries.
pub const MEMORY_SIZE: u64 = 0x400000;
/// An address inside `foo`, past the inlined tracepoint call.
pub const FOO_ADDR: u64 = 0x402367;
/// An address inside the inlined tracepoint call in `foo`.
pub const TRACEPOINT_ADDR: u64 = FOO_ADDR - 0x67;

/// The build ID of the compiled `data/libhello.so`.
pub const COMPILED_BUILD_ID: [u8; 20] = [
    0x4f, 0x10, 0xc8, 0xad, 0x17, 0x9e, 0x85, 0xac, 0xc8, 0x6e, 0x7f, 0x39, 0x01, 0x43, 0x66,
    0xbf, 0x42, 0x4f, 0xed, 0xe9,
];
/// The debug link recorded in `data/libhello-stripped.so`.
pub const COMPILED_DEBUG_LINK: &str = "libhello.so.debug";
/// The checksum of `data/libhello.so.debug`.
pub const COMPILED_DEBUG_LINK_CRC: u32 = 0x5d02c7d6;
/// An address inside the inlined `hello_tp` call in the compiled `foo`.
pub const COMPILED_INLINED_ADDR: u64 = LOAD_ADDRESS + 0x1130;


/// A temporary file system tree holding fixture files.
pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempdir().unwrap(),
        }
    }

    /// The root directory of the tree.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `data` to `rel_path` below the root, creating directories as
    /// necessary.
    pub fn write(&self, rel_path: impl AsRef<Path>, data: &[u8]) -> PathBuf {
        let path = self.root().join(rel_path);
        let () = create_dir_all(path.parent().unwrap()).unwrap();
        let () = write(&path, data).unwrap();
        path
    }

    /// Copy the file `name` from the `data/` directory to `rel_path`.
    pub fn copy_data(&self, name: &str, rel_path: impl AsRef<Path>) -> PathBuf {
        let data = read(data_file(name)).unwrap();
        self.write(rel_path, &data)
    }

    /// Write the ELF file produced by `builder` to `rel_path`.
    pub fn write_elf(&self, rel_path: impl AsRef<Path>, builder: &ElfBuilder) -> PathBuf {
        self.write(rel_path, &builder.build())
    }
}


/// Create a `Config` for a PIE binary at `path` mapped at the fixture
/// load address.
pub fn pie_config(path: &Path) -> Config {
    Config {
        is_pie: true,
        ..Config::new(path, LOAD_ADDRESS, MEMORY_SIZE)
    }
}

/// Create a `BinaryInfo` for a PIE binary at `path`.
pub fn pie_binary(context: &Context, path: &Path) -> BinaryInfo {
    BinaryInfo::create(context, pie_config(path)).unwrap()
}


/// Retrieve the path of the file `name` in the `data/` directory.
pub fn data_file(name: &str) -> PathBuf {
    Path::new(&env!("CARGO_MANIFEST_DIR")).join("data").join(name)
}

/// Check the lookup results for the compiled `libhello`, which are
/// expected to be backed by DWARF.
pub fn assert_compiled_dwarf_lookups(bin: &mut BinaryInfo) {
    assert_eq!(bin.lookup_function_name(LOAD_ADDRESS + 0x1110).unwrap(), "bar");
    let location = bin.lookup_source_location(LOAD_ADDRESS + 0x1110).unwrap();
    assert_eq!(location.filename, Path::new("./libhello.c"));
    assert_eq!(location.line_number, 8);

    assert_eq!(bin.lookup_function_name(LOAD_ADDRESS + 0x1124).unwrap(), "foo+0x4");
    assert_eq!(bin.lookup_source_location(LOAD_ADDRESS + 0x1124).unwrap().line_number, 14);

    // `hello_tp` is inlined into `foo` from `hello-tp.h`, but gets
    // attributed to its call site.
    assert_eq!(bin.lookup_function_name(COMPILED_INLINED_ADDR).unwrap(), "foo+0x10");
    let location = bin.lookup_source_location(COMPILED_INLINED_ADDR).unwrap();
    assert_eq!(location.filename, Path::new("./libhello.c"));
    assert_eq!(location.line_number, 16);

    assert_eq!(
        bin.resolution_state(),
        ResolutionState::DwarfResolved(ResolutionStrategy::Dwarf)
    );
}

/// Check the lookup results for the compiled `libhello` without any
/// DWARF.
pub fn assert_compiled_elf_lookups(bin: &mut BinaryInfo) {
    assert_eq!(bin.lookup_function_name(COMPILED_INLINED_ADDR).unwrap(), "foo+0x10");
    let err = bin.lookup_source_location(COMPILED_INLINED_ADDR).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(
        bin.resolution_state(),
        ResolutionState::DwarfResolved(ResolutionStrategy::ElfOnly)
    );
}
