//! Minimal ELF32 image builder.
//!
//! Test fixture support: synthesizes little-endian RISC-V executables with
//! arbitrary sections and symbols so the extraction and pipeline tests can
//! run without a cross-toolchain installed. Kept in the crate (rather than
//! per-test) because both the unit tests and the hermetic pipeline suite
//! link fixtures out of it.

const EHSIZE: usize = 52;
const SHENTSIZE: usize = 40;
const SYMSIZE: usize = 16;

const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_NOBITS: u32 = 8;
const SHF_ALLOC: u32 = 2;
const EM_RISCV: u16 = 243;

struct TestSection {
    name: String,
    sh_type: u32,
    addr: u32,
    data: Vec<u8>,
    size: u32,
}

struct TestSymbol {
    name: String,
    addr: u32,
    size: u32,
    func: bool,
}

/// Builder for a synthetic linked image
pub struct TestElf {
    entry: u32,
    sections: Vec<TestSection>,
    symbols: Vec<TestSymbol>,
}

impl TestElf {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            sections: Vec::new(),
            symbols: Vec::new(),
        }
    }

    /// Add an allocatable PROGBITS section with file-backed bytes.
    pub fn progbits(mut self, name: &str, addr: u32, data: Vec<u8>) -> Self {
        self.sections.push(TestSection {
            name: name.to_owned(),
            sh_type: SHT_PROGBITS,
            addr,
            size: data.len() as u32,
            data,
        });
        self
    }

    /// Add an allocatable NOBITS (BSS-like) section.
    pub fn nobits(mut self, name: &str, addr: u32, size: u32) -> Self {
        self.sections.push(TestSection {
            name: name.to_owned(),
            sh_type: SHT_NOBITS,
            addr,
            data: Vec::new(),
            size,
        });
        self
    }

    /// Add a global function symbol.
    pub fn func(mut self, name: &str, addr: u32, size: u32) -> Self {
        self.symbols.push(TestSymbol {
            name: name.to_owned(),
            addr,
            size,
            func: true,
        });
        self
    }

    /// Add a global object symbol.
    pub fn object(mut self, name: &str, addr: u32, size: u32) -> Self {
        self.symbols.push(TestSymbol {
            name: name.to_owned(),
            addr,
            size,
            func: false,
        });
        self
    }

    /// Serialize the image.
    pub fn build(self) -> Vec<u8> {
        // Section header order: null, user sections, .symtab, .strtab,
        // .shstrtab.
        let user_count = self.sections.len();
        let symtab_idx = 1 + user_count;
        let strtab_idx = symtab_idx + 1;
        let shstrtab_idx = strtab_idx + 1;
        let shnum = shstrtab_idx + 1;

        // String tables.
        let mut strtab = vec![0u8];
        let mut sym_name_offs = Vec::new();
        for sym in &self.symbols {
            sym_name_offs.push(strtab.len() as u32);
            strtab.extend_from_slice(sym.name.as_bytes());
            strtab.push(0);
        }

        let mut shstrtab = vec![0u8];
        let mut sh_name_offs = vec![0u32]; // null section
        for section in &self.sections {
            sh_name_offs.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(section.name.as_bytes());
            shstrtab.push(0);
        }
        for name in [".symtab", ".strtab", ".shstrtab"] {
            sh_name_offs.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(name.as_bytes());
            shstrtab.push(0);
        }

        // Symbol table: null entry plus one global per symbol.
        let mut symtab = vec![0u8; SYMSIZE];
        for (sym, &name_off) in self.symbols.iter().zip(&sym_name_offs) {
            symtab.extend_from_slice(&name_off.to_le_bytes());
            symtab.extend_from_slice(&sym.addr.to_le_bytes());
            symtab.extend_from_slice(&sym.size.to_le_bytes());
            let st_type: u8 = if sym.func { 2 } else { 1 };
            symtab.push(0x10 | st_type); // STB_GLOBAL << 4 | type
            symtab.push(0);
            symtab.extend_from_slice(&1u16.to_le_bytes()); // first user section
        }

        // Lay out file contents after the header.
        let mut body: Vec<u8> = Vec::new();
        let mut offsets = Vec::new();
        for section in &self.sections {
            offsets.push(EHSIZE + body.len());
            body.extend_from_slice(&section.data);
        }
        let symtab_off = EHSIZE + body.len();
        body.extend_from_slice(&symtab);
        let strtab_off = EHSIZE + body.len();
        body.extend_from_slice(&strtab);
        let shstrtab_off = EHSIZE + body.len();
        body.extend_from_slice(&shstrtab);
        let shoff = EHSIZE + body.len();

        // ELF header.
        let mut out = Vec::with_capacity(shoff + shnum * SHENTSIZE);
        out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1]);
        out.resize(16, 0);
        out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        out.extend_from_slice(&EM_RISCV.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes()); // version
        out.extend_from_slice(&self.entry.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // phoff
        out.extend_from_slice(&(shoff as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // flags
        out.extend_from_slice(&(EHSIZE as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // phentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // phnum
        out.extend_from_slice(&(SHENTSIZE as u16).to_le_bytes());
        out.extend_from_slice(&(shnum as u16).to_le_bytes());
        out.extend_from_slice(&(shstrtab_idx as u16).to_le_bytes());
        debug_assert_eq!(out.len(), EHSIZE);

        out.extend_from_slice(&body);

        // Section header table.
        let mut shdr = |name_off: u32,
                        sh_type: u32,
                        flags: u32,
                        addr: u32,
                        offset: u32,
                        size: u32,
                        link: u32,
                        info: u32,
                        entsize: u32| {
            out.extend_from_slice(&name_off.to_le_bytes());
            out.extend_from_slice(&sh_type.to_le_bytes());
            out.extend_from_slice(&flags.to_le_bytes());
            out.extend_from_slice(&addr.to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
            out.extend_from_slice(&link.to_le_bytes());
            out.extend_from_slice(&info.to_le_bytes());
            out.extend_from_slice(&4u32.to_le_bytes()); // addralign
            out.extend_from_slice(&entsize.to_le_bytes());
        };

        shdr(0, 0, 0, 0, 0, 0, 0, 0, 0); // null

        for (i, section) in self.sections.iter().enumerate() {
            let file_size = if section.sh_type == SHT_NOBITS {
                section.size
            } else {
                section.data.len() as u32
            };
            shdr(
                sh_name_offs[1 + i],
                section.sh_type,
                SHF_ALLOC,
                section.addr,
                offsets[i] as u32,
                file_size,
                0,
                0,
                0,
            );
        }

        let sym_count = 1 + self.symbols.len();
        shdr(
            sh_name_offs[1 + user_count],
            SHT_SYMTAB,
            0,
            0,
            symtab_off as u32,
            (sym_count * SYMSIZE) as u32,
            strtab_idx as u32,
            1, // first global symbol index
            SYMSIZE as u32,
        );
        shdr(
            sh_name_offs[2 + user_count],
            SHT_STRTAB,
            0,
            0,
            strtab_off as u32,
            strtab.len() as u32,
            0,
            0,
            0,
        );
        shdr(
            sh_name_offs[3 + user_count],
            SHT_STRTAB,
            0,
            0,
            shstrtab_off as u32,
            shstrtab.len() as u32,
            0,
            0,
            0,
        );

        out
    }
}
