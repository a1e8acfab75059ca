//! Linker script generation.
//!
//! One read-write-execute region pinned at the requested base address. The
//! entry function's own section is placed first so the entry address equals
//! the base address, which is what the loader uploads to and executes.

use std::fmt::Write;

const TEMPLATE: &str = r#"/* Generated position-specific layout. */
ENTRY({ENTRY_POINT})

MEMORY
{
    LOAD (rwx) : ORIGIN = {BASE_ADDRESS}, LENGTH = {MEMORY_SIZE}
}

SECTIONS
{
    .text : ALIGN(4)
    {
        KEEP(*(.text.{ENTRY_POINT}))
        *(.text)
        *(.text.*)
        *(.literal)
        *(.literal.*)
    } > LOAD

    .rodata : ALIGN(4)
    {
        *(.rodata)
        *(.rodata.*)
        *(.srodata*)
    } > LOAD

    .data : ALIGN(4)
    {
        *(.data)
        *(.data.*)
        *(.sdata*)
    } > LOAD

    .bss : ALIGN(4)
    {
        __bss_start = .;
        *(.bss)
        *(.bss.*)
        *(.sbss*)
        *(COMMON)
        __bss_end = .;
    } > LOAD

    __binary_end = .;

    /DISCARD/ :
    {
        *(.comment)
        *(.note*)
        *(.eh_frame*)
        *(.debug*)
        *(.riscv.attributes)
    }
}
"#;

/// Render the linker script for one build.
pub fn generate(entry_point: &str, base_address: u32, memory_size: usize) -> String {
    let mut base = String::new();
    let _ = write!(base, "0x{:08x}", base_address);
    TEMPLATE
        .replace("{ENTRY_POINT}", entry_point)
        .replace("{BASE_ADDRESS}", &base)
        .replace("{MEMORY_SIZE}", &memory_size.to_string())
}
