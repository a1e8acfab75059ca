//! Section, symbol, and raw-image extraction from the linked ELF.
//!
//! Replaces the readelf/nm/objcopy trio with direct parsing: loadable
//! PROGBITS sections are concatenated in ascending address order into the
//! upload image, the four tracked section kinds and all function/object
//! symbols are recorded, and BSS size comes from the NOBITS sections.

use crate::error::BuildError;
use goblin::elf::section_header::{SHF_ALLOC, SHT_NOBITS, SHT_PROGBITS};
use goblin::elf::sym::{STT_FUNC, STT_OBJECT};
use goblin::elf::Elf;
use std::collections::BTreeMap;

/// Section names carried into the artifact's section table.
const TRACKED_SECTIONS: &[&str] = &[".text", ".rodata", ".data", ".bss"];

/// One tracked section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub address: u32,
    pub size: u32,
    /// True for NOBITS sections (BSS): no file bytes, zero-filled at load
    pub zero_fill: bool,
}

/// Symbol kinds kept in the artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Object,
}

/// One function or data symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub name: String,
    pub address: u32,
    pub size: u32,
    pub kind: SymbolKind,
}

/// Everything the pipeline needs out of a linked ELF
#[derive(Debug)]
pub struct ParsedElf {
    /// Tracked sections by name
    pub sections: BTreeMap<String, Section>,
    /// Function and object symbols
    pub symbols: Vec<SymbolInfo>,
    /// Loadable bytes in ascending address order, gaps zero-filled,
    /// starting at the base address. BSS is not yet appended.
    pub raw: Vec<u8>,
}

impl ParsedElf {
    /// Total BSS bytes reported by the section table.
    pub fn bss_size(&self) -> u32 {
        self.sections
            .values()
            .filter(|s| s.zero_fill)
            .map(|s| s.size)
            .sum()
    }

    /// The upload image: raw bytes aligned to 4 and extended with zeros
    /// covering the BSS.
    pub fn padded_image(&self) -> Vec<u8> {
        let mut image = self.raw.clone();
        let align_pad = (4 - image.len() % 4) % 4;
        image.resize(image.len() + align_pad + self.bss_size() as usize, 0);
        image
    }

    /// Address of a function symbol.
    pub fn function_address(&self, name: &str) -> Option<u32> {
        self.symbols
            .iter()
            .find(|s| s.kind == SymbolKind::Function && s.name == name)
            .map(|s| s.address)
    }

    /// Names of every function symbol, address order.
    pub fn function_names(&self) -> Vec<String> {
        let mut funcs: Vec<&SymbolInfo> = self
            .symbols
            .iter()
            .filter(|s| s.kind == SymbolKind::Function)
            .collect();
        funcs.sort_by_key(|s| s.address);
        funcs.iter().map(|s| s.name.clone()).collect()
    }
}

/// Parse a linked image and extract its loadable bytes relative to `base`.
pub fn parse_image(data: &[u8], base: u32) -> Result<ParsedElf, BuildError> {
    let elf = Elf::parse(data).map_err(|e| BuildError::Elf(e.to_string()))?;

    let mut sections = BTreeMap::new();
    let mut loadable: Vec<(u32, usize, usize)> = Vec::new(); // (addr, file_off, size)

    for sh in &elf.section_headers {
        let name = elf.shdr_strtab.get_at(sh.sh_name).unwrap_or_default();
        let alloc = sh.sh_flags & u64::from(SHF_ALLOC) != 0;

        if TRACKED_SECTIONS.contains(&name) {
            sections.insert(
                name.to_owned(),
                Section {
                    address: sh.sh_addr as u32,
                    size: sh.sh_size as u32,
                    zero_fill: sh.sh_type == SHT_NOBITS,
                },
            );
        }

        if alloc && sh.sh_type == SHT_PROGBITS && sh.sh_size > 0 {
            if (sh.sh_addr as u32) < base {
                return Err(BuildError::SectionBelowBase {
                    section: name.to_owned(),
                    address: sh.sh_addr as u32,
                    base,
                });
            }
            loadable.push((sh.sh_addr as u32, sh.sh_offset as usize, sh.sh_size as usize));
        }
    }

    loadable.sort_unstable();
    let mut raw = Vec::new();
    for (addr, offset, size) in loadable {
        let image_offset = (addr - base) as usize;
        if raw.len() < image_offset {
            raw.resize(image_offset, 0);
        }
        let end = offset
            .checked_add(size)
            .filter(|&e| e <= data.len())
            .ok_or_else(|| BuildError::Elf(format!("section data out of file bounds at {:#X}", offset)))?;
        raw.extend_from_slice(&data[offset..end]);
    }

    let mut symbols = Vec::new();
    for sym in elf.syms.iter() {
        let kind = match sym.st_type() {
            STT_FUNC => SymbolKind::Function,
            STT_OBJECT => SymbolKind::Object,
            _ => continue,
        };
        let Some(name) = elf.strtab.get_at(sym.st_name) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        symbols.push(SymbolInfo {
            name: name.to_owned(),
            address: sym.st_value as u32,
            size: sym.st_size as u32,
            kind,
        });
    }

    Ok(ParsedElf {
        sections,
        symbols,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testelf::TestElf;

    #[test]
    fn test_sections_and_symbols_extracted() {
        let base = 0x4800_0000;
        let elf = TestElf::new(base)
            .progbits(".text", base, vec![0x13, 0x00, 0x00, 0x00, 0x67, 0x80, 0x00, 0x00])
            .progbits(".rodata", base + 8, vec![1, 2, 3, 4])
            .progbits(".data", base + 12, vec![9, 9])
            .nobits(".bss", base + 16, 12)
            .func("call_remote", base, 8)
            .func("add", base + 4, 4)
            .object("lookup_table", base + 8, 4)
            .build();

        let parsed = parse_image(&elf, base).unwrap();

        assert_eq!(parsed.sections.len(), 4);
        assert_eq!(parsed.sections[".text"].address, base);
        assert_eq!(parsed.sections[".text"].size, 8);
        assert!(!parsed.sections[".text"].zero_fill);
        assert!(parsed.sections[".bss"].zero_fill);
        assert_eq!(parsed.bss_size(), 12);

        assert_eq!(parsed.function_address("call_remote"), Some(base));
        assert_eq!(parsed.function_address("add"), Some(base + 4));
        assert_eq!(parsed.function_address("lookup_table"), None);
        assert_eq!(parsed.function_names(), vec!["call_remote", "add"]);
    }

    #[test]
    fn test_raw_image_concatenates_in_address_order() {
        let base = 0x4800_0000;
        let elf = TestElf::new(base)
            // Declared out of order; extraction must sort by address.
            .progbits(".data", base + 8, vec![7, 8])
            .progbits(".text", base, vec![1, 2, 3, 4])
            .build();

        let parsed = parse_image(&elf, base).unwrap();
        // Gap between .text end (4) and .data start (8) zero-filled.
        assert_eq!(parsed.raw, vec![1, 2, 3, 4, 0, 0, 0, 0, 7, 8]);
    }

    #[test]
    fn test_padded_image_covers_alignment_and_bss() {
        let base = 0x4800_0000;
        let elf = TestElf::new(base)
            .progbits(".text", base, vec![1, 2, 3, 4, 5, 6])
            .nobits(".bss", base + 8, 10)
            .build();

        let parsed = parse_image(&elf, base).unwrap();
        let image = parsed.padded_image();
        // 6 raw bytes -> align to 8, plus 10 BSS bytes.
        assert_eq!(image.len(), 8 + 10);
        assert!(image[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_section_below_base_rejected() {
        let base = 0x4800_1000;
        let elf = TestElf::new(base)
            .progbits(".text", base - 0x100, vec![1, 2, 3, 4])
            .build();

        assert!(matches!(
            parse_image(&elf, base),
            Err(BuildError::SectionBelowBase { .. })
        ));
    }

    #[test]
    fn test_garbage_is_an_elf_error() {
        assert!(matches!(
            parse_image(&[0u8; 16], 0),
            Err(BuildError::Elf(_))
        ));
    }
}
