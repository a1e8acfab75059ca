//! Toolchain configuration (remora.toml).
//!
//! One file declares everything the pipeline needs to know about the
//! cross-toolchain and the target: tool locations, per-extension compiler
//! selection, ISA/ABI strings, flag lists, the optional firmware ELF used
//! for symbol bridging, memory limits, and the wrapper's entry name and
//! slot count.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Unparseable size string like "128K"
    #[error("Invalid size string: {0:?}")]
    BadSize(String),

    /// An extension maps to a compiler missing from [toolchain.compilers]
    #[error("Extension {ext:?} maps to unknown compiler {compiler:?}")]
    UnknownCompiler { ext: String, compiler: String },

    /// A typedef target is not a known fixed-width type
    #[error("Typedef {name:?} maps to unknown type {target:?}")]
    BadTypedef { name: String, target: String },
}

/// Complete toolchain configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolchainConfig {
    pub toolchain: ToolchainSection,
    /// Extension to compiler-name map, e.g. `".c" = "gcc"`
    pub extensions: BTreeMap<String, String>,
    pub compiler: CompilerSection,
    pub linker: LinkerSection,
    pub memory: MemorySection,
    pub wrapper: WrapperSection,
    /// Extra typedefs visible in signatures, mapped to fixed-width names,
    /// e.g. `err_t = "int32_t"`
    pub typedefs: BTreeMap<String, String>,
}

/// Tool locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolchainSection {
    /// Directory holding the cross tools
    pub path: PathBuf,
    /// Tool name prefix, e.g. "riscv32-esp-elf"
    pub prefix: String,
    /// Compiler-name to executable map, e.g. `gcc = "riscv32-esp-elf-gcc"`
    pub compilers: BTreeMap<String, String>,
}

/// Compile-stage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompilerSection {
    /// Target ISA string passed as -march
    pub arch: String,
    /// Target ABI string passed as -mabi
    pub abi: String,
    /// Default optimization level ("O0".."O3", "Os")
    pub optimization: String,
    /// Extra flags appended to every compile
    pub flags: Vec<String>,
}

/// Link-stage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkerSection {
    /// Extra flags appended to every link
    pub flags: Vec<String>,
    /// Pass --gc-sections to drop unreferenced input sections
    pub garbage_collection: bool,
    /// Firmware image used for symbol bridging (absolute-address
    /// resolution only, not dynamic linking)
    pub firmware_elf: Option<PathBuf>,
}

/// Memory limits for loaded images
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemorySection {
    /// Maximum image size; accepts "131072", "128K", or "1M"
    pub max_size: String,
    /// Instruction-fetch alignment required of base addresses
    pub alignment: u32,
}

/// Wrapper generation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WrapperSection {
    /// Name of the synthesized entry function
    pub entry: String,
    /// Argument-frame slot count. Fixed by the wire ABI; changing it
    /// changes what both sides must agree on.
    pub slots: usize,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            toolchain: ToolchainSection::default(),
            extensions: BTreeMap::from([
                (".c".to_owned(), "gcc".to_owned()),
                (".cpp".to_owned(), "gxx".to_owned()),
                (".S".to_owned(), "as".to_owned()),
            ]),
            compiler: CompilerSection::default(),
            linker: LinkerSection::default(),
            memory: MemorySection::default(),
            wrapper: WrapperSection::default(),
            typedefs: BTreeMap::new(),
        }
    }
}

impl Default for ToolchainSection {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            prefix: "riscv32-esp-elf".to_owned(),
            compilers: BTreeMap::from([
                ("gcc".to_owned(), "riscv32-esp-elf-gcc".to_owned()),
                ("gxx".to_owned(), "riscv32-esp-elf-g++".to_owned()),
                ("as".to_owned(), "riscv32-esp-elf-as".to_owned()),
            ]),
        }
    }
}

impl Default for CompilerSection {
    fn default() -> Self {
        Self {
            arch: "rv32imafc_zicsr_zifencei".to_owned(),
            abi: "ilp32f".to_owned(),
            optimization: "O3".to_owned(),
            flags: vec![
                "-ffreestanding".to_owned(),
                "-fno-builtin".to_owned(),
                "-ffunction-sections".to_owned(),
                "-fdata-sections".to_owned(),
                "-flto".to_owned(),
            ],
        }
    }
}

impl Default for LinkerSection {
    fn default() -> Self {
        Self {
            flags: vec![
                "-nostartfiles".to_owned(),
                "-nostdlib".to_owned(),
                "-flto".to_owned(),
            ],
            garbage_collection: true,
            firmware_elf: None,
        }
    }
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_size: "128K".to_owned(),
            alignment: 4,
        }
    }
}

impl Default for WrapperSection {
    fn default() -> Self {
        Self {
            entry: "call_remote".to_owned(),
            slots: remora_proto::SLOT_COUNT,
        }
    }
}

impl ToolchainConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-references inside the config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.max_size_bytes()?;
        for (ext, compiler) in &self.extensions {
            if !self.toolchain.compilers.contains_key(compiler) {
                return Err(ConfigError::UnknownCompiler {
                    ext: ext.clone(),
                    compiler: compiler.clone(),
                });
            }
        }
        Ok(())
    }

    /// Maximum image size in bytes.
    pub fn max_size_bytes(&self) -> Result<usize, ConfigError> {
        parse_size(&self.memory.max_size)
    }

    /// Absolute path of a named compiler executable.
    pub fn compiler_path(&self, name: &str) -> Option<PathBuf> {
        self.toolchain
            .compilers
            .get(name)
            .map(|exe| self.toolchain.path.join(exe))
    }
}

/// Parse "131072", "128K", or "1M" into bytes.
pub fn parse_size(text: &str) -> Result<usize, ConfigError> {
    let trimmed = text.trim().to_ascii_uppercase();
    let bad = || ConfigError::BadSize(text.to_owned());
    if let Some(kilo) = trimmed.strip_suffix('K') {
        return kilo
            .parse::<usize>()
            .map(|n| n * 1024)
            .map_err(|_| bad());
    }
    if let Some(mega) = trimmed.strip_suffix('M') {
        return mega
            .parse::<usize>()
            .map(|n| n * 1024 * 1024)
            .map_err(|_| bad());
    }
    trimmed.parse::<usize>().map_err(|_| bad())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ToolchainConfig::default();
        config.validate().unwrap();
        assert_eq!(config.wrapper.entry, "call_remote");
        assert_eq!(config.wrapper.slots, 32);
        assert_eq!(config.max_size_bytes().unwrap(), 128 * 1024);
    }

    #[test]
    fn test_parse_size_suffixes() {
        assert_eq!(parse_size("131072").unwrap(), 131072);
        assert_eq!(parse_size("128K").unwrap(), 128 * 1024);
        assert_eq!(parse_size("128k").unwrap(), 128 * 1024);
        assert_eq!(parse_size("2M").unwrap(), 2 * 1024 * 1024);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("12Q").is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ToolchainConfig = toml::from_str(
            r#"
            [toolchain]
            path = "/opt/cross/bin"

            [memory]
            max_size = "64K"
            "#,
        )
        .unwrap();
        assert_eq!(config.toolchain.path, PathBuf::from("/opt/cross/bin"));
        assert_eq!(config.max_size_bytes().unwrap(), 64 * 1024);
        // untouched sections keep their defaults
        assert_eq!(config.compiler.optimization, "O3");
        assert_eq!(config.extensions.get(".c").unwrap(), "gcc");
    }

    #[test]
    fn test_unknown_compiler_rejected() {
        let mut config = ToolchainConfig::default();
        config
            .extensions
            .insert(".zig".to_owned(), "zigcc".to_owned());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownCompiler { .. })
        ));
    }

    #[test]
    fn test_typedefs_parse() {
        let config: ToolchainConfig = toml::from_str(
            r#"
            [typedefs]
            err_t = "int32_t"
            sample_t = "int16_t"
            "#,
        )
        .unwrap();
        assert_eq!(config.typedefs.get("err_t").unwrap(), "int32_t");
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = ToolchainConfig::default();
        let text = toml::to_string(&config).unwrap();
        let reparsed: ToolchainConfig = toml::from_str(&text).unwrap();
        assert_eq!(reparsed, config);
    }
}
