//! Build pipeline errors.
//!
//! Each failure mode of the pipeline is a distinct kind so callers can
//! report where a load fell over without string matching.

use crate::config::ConfigError;
use crate::signature::SignatureError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building a loadable image
#[derive(Debug, Error)]
pub enum BuildError {
    /// Entry source file does not exist
    #[error("Source file not found: {0}")]
    SourceMissing(PathBuf),

    /// No compilable files found next to the entry source
    #[error("No compilable sources in {dir} (supported extensions: {extensions:?})")]
    NoSources {
        dir: PathBuf,
        extensions: Vec<String>,
    },

    /// Entry function name is not a valid C identifier
    #[error("Invalid entry function name: {0:?}")]
    InvalidFunctionName(String),

    /// A source unit's extension has no configured compiler
    #[error("No compiler configured for {path} (supported extensions: {supported:?})")]
    UnknownExtension {
        path: PathBuf,
        supported: Vec<String>,
    },

    /// Signature extraction or classification failed
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// Configuration failed to load or validate
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Filesystem error in the build tree
    #[error("Build I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A toolchain subprocess exited nonzero
    #[error("{tool} failed:\n{stderr}")]
    Tool { tool: String, stderr: String },

    /// The linker reported an unresolved external reference
    #[error("Unresolved symbol: {symbol}")]
    UnresolvedSymbol { symbol: String },

    /// Symbol bridging requested but the firmware image is absent
    #[error("Firmware ELF not found: {0} (update [linker] firmware_elf in the toolchain config)")]
    FirmwareElfMissing(PathBuf),

    /// The linked ELF could not be parsed
    #[error("ELF parse error: {0}")]
    Elf(String),

    /// Padded image exceeds the configured maximum
    #[error("Image is {size} bytes, exceeding the configured maximum of {max}")]
    TooLarge { size: usize, max: usize },

    /// A loadable section landed below the requested base address
    #[error("Section {section} at {address:#010X} lies below base address {base:#010X}")]
    SectionBelowBase {
        section: String,
        address: u32,
        base: u32,
    },

    /// Entry symbol missing from the linked image
    #[error("Entry point '{entry}' not found; available functions: {available:?}")]
    EntryNotFound {
        entry: String,
        available: Vec<String>,
    },
}
