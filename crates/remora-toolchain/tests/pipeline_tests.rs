//! Hermetic pipeline tests.
//!
//! The cross-toolchain is stubbed with shell scripts: "compiling" writes a
//! placeholder object, "linking" copies a synthesized ELF fixture into
//! place. Everything around the subprocess boundary (discovery, wrapper
//! generation, script generation, extraction, padding, validation, entry
//! lookup) runs for real.

#![cfg(unix)]

use remora_toolchain::config::ToolchainConfig;
use remora_toolchain::testelf::TestElf;
use remora_toolchain::{BuildError, BuildOptions, Builder};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;

const BASE: u32 = 0x4800_0000;

struct StubToolchain {
    _dir: TempDir,
    config: ToolchainConfig,
}

fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
}

/// A stub compiler/linker driver: `-c` writes a dummy object; a link run
/// copies `fixture` to the output path.
fn stub_toolchain(fixture: &Path) -> StubToolchain {
    let dir = tempfile::tempdir().unwrap();
    let body = format!(
        "#!/bin/sh\n\
         out=\"\"\n\
         compile=0\n\
         prev=\"\"\n\
         for a in \"$@\"; do\n\
         \tif [ \"$prev\" = \"-o\" ]; then out=\"$a\"; fi\n\
         \tif [ \"$a\" = \"-c\" ]; then compile=1; fi\n\
         \tprev=\"$a\"\n\
         done\n\
         if [ \"$compile\" = \"1\" ]; then\n\
         \techo object > \"$out\"\n\
         else\n\
         \tcp \"{}\" \"$out\"\n\
         fi\n",
        fixture.display()
    );
    write_script(dir.path(), "cc", &body);

    let mut config = ToolchainConfig::default();
    config.toolchain.path = dir.path().to_path_buf();
    config.toolchain.compilers = BTreeMap::from([
        ("gcc".to_owned(), "cc".to_owned()),
        ("gxx".to_owned(), "cc".to_owned()),
        ("as".to_owned(), "cc".to_owned()),
    ]);
    StubToolchain { _dir: dir, config }
}

fn source_tree(code: &str) -> (TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.c");
    fs::write(&path, code).unwrap();
    (dir, path)
}

fn fixture_elf(dir: &Path) -> std::path::PathBuf {
    let bytes = TestElf::new(BASE)
        .progbits(
            ".text",
            BASE,
            vec![0x97, 0x02, 0x00, 0x00, 0x67, 0x80, 0x82, 0x00, 0x13, 0x05, 0x40, 0x01],
        )
        .progbits(".rodata", BASE + 12, vec![0xDE, 0xAD, 0xBE, 0xEF])
        .nobits(".bss", BASE + 16, 8)
        .func("call_remote", BASE, 12)
        .func("add", BASE + 8, 4)
        .build();
    let path = dir.join("fixture.elf");
    fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn test_full_pipeline_produces_padded_artifact() {
    let (src_dir, src) = source_tree("int add(int a, int b) { return a + b; }\n");
    let fixture = fixture_elf(src_dir.path());
    let stub = stub_toolchain(&fixture);
    let builder = Builder::new(stub.config.clone()).unwrap();

    let image = builder
        .build(&src, "add", BASE, BASE + 0x1000, &BuildOptions::default())
        .unwrap();

    // 16 file-backed bytes (already 4-aligned) + 8 BSS bytes.
    assert_eq!(image.artifact.total_size(), 24);
    assert!(image.artifact.data[16..].iter().all(|&b| b == 0));
    assert_eq!(image.artifact.base_address, BASE);
    assert_eq!(image.artifact.entry_address, BASE);
    assert_eq!(image.artifact.sections[".bss"].size, 8);
    assert!(image.artifact.symbol("add").is_some());

    assert_eq!(image.signature.params.len(), 2);
    assert_eq!(image.frame.args_address, BASE + 0x1000);
    assert_eq!(image.frame.frame_bytes(), 128);
}

#[test]
fn test_pipeline_is_deterministic() {
    let (src_dir, src) = source_tree("int add(int a, int b) { return a + b; }\n");
    let fixture = fixture_elf(src_dir.path());
    let stub = stub_toolchain(&fixture);
    let builder = Builder::new(stub.config.clone()).unwrap();

    let opts = BuildOptions::default();
    let first = builder.build(&src, "add", BASE, BASE + 0x1000, &opts).unwrap();
    let second = builder.build(&src, "add", BASE, BASE + 0x1000, &opts).unwrap();
    assert_eq!(first.artifact.data, second.artifact.data);
    assert_eq!(first.artifact.entry_address, second.artifact.entry_address);
}

#[test]
fn test_missing_entry_symbol_lists_alternatives() {
    let (src_dir, src) = source_tree("int add(int a, int b) { return a + b; }\n");
    // Fixture with no call_remote symbol.
    let bytes = TestElf::new(BASE)
        .progbits(".text", BASE, vec![0u8; 8])
        .func("add", BASE, 8)
        .func("helper", BASE + 4, 4)
        .build();
    let fixture = src_dir.path().join("fixture.elf");
    fs::write(&fixture, bytes).unwrap();

    let stub = stub_toolchain(&fixture);
    let builder = Builder::new(stub.config.clone()).unwrap();
    let err = builder
        .build(&src, "add", BASE, BASE + 0x1000, &BuildOptions::default())
        .unwrap_err();

    match err {
        BuildError::EntryNotFound { entry, available } => {
            assert_eq!(entry, "call_remote");
            assert_eq!(available, vec!["add".to_owned(), "helper".to_owned()]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_oversize_image_rejected() {
    let (src_dir, src) = source_tree("int add(int a, int b) { return a + b; }\n");
    let fixture = fixture_elf(src_dir.path());
    let mut stub = stub_toolchain(&fixture);
    stub.config.memory.max_size = "16".to_owned();

    let builder = Builder::new(stub.config.clone()).unwrap();
    let err = builder
        .build(&src, "add", BASE, BASE + 0x1000, &BuildOptions::default())
        .unwrap_err();
    assert!(matches!(err, BuildError::TooLarge { size: 24, max: 16 }));
}

#[test]
fn test_compiler_failure_carries_stderr() {
    let (_src_dir, src) = source_tree("int add(int a, int b) { return a + b; }\n");
    let dir = tempfile::tempdir().unwrap();
    write_script(
        dir.path(),
        "cc",
        "#!/bin/sh\necho 'main.c:1:1: error: something broke' >&2\nexit 1\n",
    );
    let mut config = ToolchainConfig::default();
    config.toolchain.path = dir.path().to_path_buf();
    config.toolchain.compilers = BTreeMap::from([
        ("gcc".to_owned(), "cc".to_owned()),
        ("gxx".to_owned(), "cc".to_owned()),
        ("as".to_owned(), "cc".to_owned()),
    ]);

    let builder = Builder::new(config).unwrap();
    let err = builder
        .build(&src, "add", BASE, BASE + 0x1000, &BuildOptions::default())
        .unwrap_err();
    match err {
        BuildError::Tool { stderr, .. } => assert!(stderr.contains("something broke")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_unresolved_symbol_detected_at_link() {
    let (_src_dir, src) = source_tree("int add(int a, int b) { return a + b; }\n");
    let dir = tempfile::tempdir().unwrap();
    // Compiles succeed; the link run reports an undefined reference.
    write_script(
        dir.path(),
        "cc",
        "#!/bin/sh\n\
         for a in \"$@\"; do\n\
         \tif [ \"$a\" = \"-c\" ]; then\n\
         \t\tprev=\"\"\n\
         \t\tfor b in \"$@\"; do\n\
         \t\t\tif [ \"$prev\" = \"-o\" ]; then echo object > \"$b\"; fi\n\
         \t\t\tprev=\"$b\"\n\
         \t\tdone\n\
         \t\texit 0\n\
         \tfi\n\
         done\n\
         echo \"remora_wrapper.c:(.text+0x4): undefined reference to \\`printf'\" >&2\n\
         exit 1\n",
    );
    let mut config = ToolchainConfig::default();
    config.toolchain.path = dir.path().to_path_buf();
    config.toolchain.compilers = BTreeMap::from([
        ("gcc".to_owned(), "cc".to_owned()),
        ("gxx".to_owned(), "cc".to_owned()),
        ("as".to_owned(), "cc".to_owned()),
    ]);

    let builder = Builder::new(config).unwrap();
    let err = builder
        .build(&src, "add", BASE, BASE + 0x1000, &BuildOptions::default())
        .unwrap_err();
    match err {
        BuildError::UnresolvedSymbol { symbol } => assert_eq!(symbol, "printf"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_firmware_elf_must_exist_when_bridging() {
    let (src_dir, src) = source_tree("int add(int a, int b) { return a + b; }\n");
    let fixture = fixture_elf(src_dir.path());
    let mut stub = stub_toolchain(&fixture);
    stub.config.linker.firmware_elf = Some(src_dir.path().join("no-such-firmware.elf"));

    let builder = Builder::new(stub.config.clone()).unwrap();
    let opts = BuildOptions {
        resolve_firmware: true,
        ..BuildOptions::default()
    };
    let err = builder.build(&src, "add", BASE, BASE + 0x1000, &opts).unwrap_err();
    assert!(matches!(err, BuildError::FirmwareElfMissing(_)));

    // With the firmware image present, the build goes through.
    let firmware = src_dir.path().join("firmware.elf");
    fs::write(&firmware, TestElf::new(0x4000_0000).build()).unwrap();
    let mut config = stub.config.clone();
    config.linker.firmware_elf = Some(firmware);
    let builder = Builder::new(config).unwrap();
    builder.build(&src, "add", BASE, BASE + 0x1000, &opts).unwrap();
}

#[test]
fn test_multi_file_source_set_is_discovered() {
    let (src_dir, src) = source_tree("int add(int a, int b) { return helper(a) + b; }\n");
    fs::write(src_dir.path().join("helper.c"), "int helper(int x) { return x; }\n").unwrap();
    fs::write(src_dir.path().join("notes.txt"), "not code").unwrap();
    let fixture = fixture_elf(src_dir.path());
    let stub = stub_toolchain(&fixture);
    let builder = Builder::new(stub.config.clone()).unwrap();

    let sources = builder.discover_sources(src_dir.path()).unwrap();
    let names: Vec<_> = sources
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["helper.c", "main.c"]);

    builder
        .build(&src, "add", BASE, BASE + 0x1000, &BuildOptions::default())
        .unwrap();
}
