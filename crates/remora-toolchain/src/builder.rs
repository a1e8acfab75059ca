//! Build orchestration.
//!
//! One public operation: [`Builder::build`], which runs the whole pipeline
//! for a target function at a pair of addresses. The two-pass load flow
//! calls it twice: once with placeholder addresses to measure the image,
//! once with the allocated addresses to produce the final bytes. Both runs
//! take the identical path; determinism is what makes the probe size
//! binding.

use crate::artifact::{Artifact, FrameLayout, FunctionImage};
use crate::config::ToolchainConfig;
use crate::elf;
use crate::error::BuildError;
use crate::linker_script;
use crate::signature::{is_valid_identifier, parse_signature, Signature, TypeTable};
use crate::tools::Toolchain;
use crate::wrapper;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Per-build options
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Optimization level override; defaults to the configured level
    pub optimization: Option<String>,
    /// Link against the firmware image so loaded code can call runtime
    /// services at fixed addresses
    pub resolve_firmware: bool,
}

/// The build pipeline
pub struct Builder {
    config: ToolchainConfig,
    types: TypeTable,
}

impl Builder {
    pub fn new(config: ToolchainConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let types = TypeTable::with_typedefs(&config.typedefs)?;
        Ok(Self { config, types })
    }

    pub fn from_config_file(path: &Path) -> Result<Self, BuildError> {
        Self::new(ToolchainConfig::load(path)?)
    }

    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    /// Parse the target function's signature out of a source file.
    pub fn parse_function(&self, source: &Path, function: &str) -> Result<Signature, BuildError> {
        if !source.exists() {
            return Err(BuildError::SourceMissing(source.to_path_buf()));
        }
        let text = std::fs::read_to_string(source)?;
        let signature = parse_signature(&text, function, &self.types)?;
        signature.validate_slot_budget(self.config.wrapper.slots)?;
        Ok(signature)
    }

    /// Enumerate compilable files next to the entry source, sorted for
    /// deterministic build order.
    pub fn discover_sources(&self, dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
        let mut sources = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let ext = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            if self.config.extensions.contains_key(&ext) {
                sources.push(path);
            }
        }
        sources.sort();
        if sources.is_empty() {
            return Err(BuildError::NoSources {
                dir: dir.to_path_buf(),
                extensions: self.config.extensions.keys().cloned().collect(),
            });
        }
        Ok(sources)
    }

    /// Run the full pipeline: parse, generate, compile, link, extract,
    /// pad, validate.
    ///
    /// # Arguments
    /// * `source` - entry source file; its directory defines the source set
    /// * `function` - target function defined in `source`
    /// * `base_address` - where the image will live on the device
    /// * `args_address` - where the argument frame will live
    /// * `opts` - optimization and symbol-bridging selection
    pub fn build(
        &self,
        source: &Path,
        function: &str,
        base_address: u32,
        args_address: u32,
        opts: &BuildOptions,
    ) -> Result<FunctionImage, BuildError> {
        if !is_valid_identifier(function) {
            return Err(BuildError::InvalidFunctionName(function.to_owned()));
        }
        let signature = self.parse_function(source, function)?;

        let alignment = self.config.memory.alignment.max(1);
        debug_assert!(
            base_address % alignment == 0,
            "base address {:#010X} not {}-aligned",
            base_address,
            alignment
        );

        let source_dir = source
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let sources = self.discover_sources(&source_dir)?;
        info!(
            "building '{}' at {:#010X} from {} source file(s)",
            function,
            base_address,
            sources.len()
        );

        // Resolve symbol bridging before any subprocess runs: a missing
        // firmware image should fail fast, not after a full compile.
        let firmware_elf = if opts.resolve_firmware {
            match &self.config.linker.firmware_elf {
                Some(path) if path.exists() => Some(path.as_path()),
                Some(path) => return Err(BuildError::FirmwareElfMissing(path.clone())),
                None => return Err(BuildError::FirmwareElfMissing(PathBuf::from("<unset>"))),
            }
        } else {
            None
        };

        let build_dir = tempfile::Builder::new()
            .prefix("remora-build-")
            .tempdir()?;

        // Generated wrapper and declaration header.
        let entry = self.config.wrapper.entry.clone();
        let slots = self.config.wrapper.slots;
        let header_path = build_dir.path().join(wrapper::HEADER_FILE);
        std::fs::write(
            &header_path,
            wrapper::generate_header(&signature, &self.config.typedefs),
        )?;
        let wrapper_path = build_dir.path().join(wrapper::WRAPPER_FILE);
        std::fs::write(
            &wrapper_path,
            wrapper::generate_wrapper(&signature, args_address, &entry, slots),
        )?;

        // Compile every discovered unit plus the wrapper.
        let toolchain = Toolchain::new(&self.config);
        let optimization = opts
            .optimization
            .as_deref()
            .unwrap_or(&self.config.compiler.optimization);
        let mut objects = Vec::new();
        for (index, unit) in sources.iter().chain([&wrapper_path]).enumerate() {
            let stem = unit
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unit".to_owned());
            let object = build_dir.path().join(format!("{:02}_{}.o", index, stem));
            debug!("compiling {}", unit.display());
            toolchain.compile(unit, &object, optimization, &[source_dir.as_path()])?;
            objects.push(object);
        }

        // Linker script pinned at the base address.
        let max_size = self.config.max_size_bytes()?;
        let script_path = build_dir.path().join("remora.ld");
        std::fs::write(
            &script_path,
            linker_script::generate(&entry, base_address, max_size),
        )?;

        // Link, with optional symbol bridging against the firmware image.
        let elf_path = build_dir.path().join("image.elf");
        info!("linking {} object file(s)", objects.len());
        toolchain.link(&objects, &script_path, &elf_path, firmware_elf)?;

        // Extract, pad, validate.
        let elf_bytes = std::fs::read(&elf_path)?;
        let parsed = elf::parse_image(&elf_bytes, base_address)?;
        let data = parsed.padded_image();
        if data.len() > max_size {
            return Err(BuildError::TooLarge {
                size: data.len(),
                max: max_size,
            });
        }
        let entry_address =
            parsed
                .function_address(&entry)
                .ok_or_else(|| BuildError::EntryNotFound {
                    entry: entry.clone(),
                    available: parsed.function_names(),
                })?;

        info!(
            "image ready: {} bytes, entry {:#010X}",
            data.len(),
            entry_address
        );
        Ok(FunctionImage {
            artifact: Artifact {
                data,
                base_address,
                entry_address,
                sections: parsed.sections,
                symbols: parsed.symbols,
            },
            signature,
            frame: FrameLayout {
                args_address,
                slot_count: slots,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn builder() -> Builder {
        Builder::new(ToolchainConfig::default()).unwrap()
    }

    #[test]
    fn test_missing_source_rejected() {
        let b = builder();
        let err = b
            .parse_function(Path::new("/nonexistent/code.c"), "f")
            .unwrap_err();
        assert!(matches!(err, BuildError::SourceMissing(_)));
    }

    #[test]
    fn test_invalid_function_name_rejected() {
        let b = builder();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("code.c");
        fs::write(&src, "int f(void) { return 0; }").unwrap();
        let err = b
            .build(&src, "not a name", 0x1000, 0x2000, &BuildOptions::default())
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidFunctionName(_)));
    }

    #[test]
    fn test_discovery_is_sorted_and_filtered() {
        let b = builder();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("zeta.c"), "").unwrap();
        fs::write(dir.path().join("alpha.c"), "").unwrap();
        fs::write(dir.path().join("middle.cpp"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::write(dir.path().join("header.h"), "").unwrap();

        let sources = b.discover_sources(dir.path()).unwrap();
        let names: Vec<_> = sources
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["alpha.c", "middle.cpp", "zeta.c"]);
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let b = builder();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.md"), "").unwrap();
        assert!(matches!(
            b.discover_sources(dir.path()),
            Err(BuildError::NoSources { .. })
        ));
    }

    #[test]
    fn test_firmware_bridging_requires_configured_elf() {
        let b = builder();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("code.c");
        fs::write(&src, "int f(void) { return 0; }").unwrap();

        let opts = BuildOptions {
            resolve_firmware: true,
            ..BuildOptions::default()
        };
        let err = b.build(&src, "f", 0x1000, 0x2000, &opts).unwrap_err();
        // No firmware_elf configured at all.
        assert!(matches!(err, BuildError::FirmwareElfMissing(_)));
    }
}
