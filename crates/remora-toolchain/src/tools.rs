//! Cross-toolchain subprocess driver.
//!
//! Compilers and the linker driver are opaque subprocesses; a nonzero exit
//! is a build error carrying the captured stderr. The linker's stderr is
//! additionally scanned for unresolved references so symbol-bridging
//! failures surface as their own error kind.

use crate::config::ToolchainConfig;
use crate::error::BuildError;
use log::{debug, error};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Resolved tool paths plus the flag policy from configuration.
pub struct Toolchain<'a> {
    config: &'a ToolchainConfig,
}

impl<'a> Toolchain<'a> {
    pub fn new(config: &'a ToolchainConfig) -> Self {
        Self { config }
    }

    /// Compile one source unit to an object file.
    ///
    /// Compiler selection is by file extension through the config map; the
    /// include path is the unit's own directory plus any extra dirs (the
    /// generated-header directory).
    pub fn compile(
        &self,
        source: &Path,
        output: &Path,
        optimization: &str,
        extra_includes: &[&Path],
    ) -> Result<(), BuildError> {
        let ext = source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let compiler_name = self.config.extensions.get(&ext).ok_or_else(|| {
            BuildError::UnknownExtension {
                path: source.to_path_buf(),
                supported: self.config.extensions.keys().cloned().collect(),
            }
        })?;
        let compiler = self.tool_path(compiler_name);

        let mut cmd = Command::new(&compiler);
        if compiler_name == "as" {
            // Plain assembler: no codegen flags.
            cmd.arg(source).arg("-o").arg(output);
        } else {
            cmd.arg(format!("-march={}", self.config.compiler.arch))
                .arg(format!("-mabi={}", self.config.compiler.abi))
                .arg(format!("-{}", optimization))
                .arg("-c")
                .arg(source)
                .arg("-o")
                .arg(output);
            if let Some(dir) = source.parent() {
                cmd.arg(format!("-I{}", dir.display()));
            }
            for dir in extra_includes {
                cmd.arg(format!("-I{}", dir.display()));
            }
            cmd.args(&self.config.compiler.flags);
        }

        run(&compiler, cmd)
    }

    /// Link object files with the generated script.
    ///
    /// `firmware_elf` enables symbol bridging: the linker reads the
    /// firmware image for symbol resolution only and inlines its absolute
    /// addresses. This is not dynamic linking.
    pub fn link(
        &self,
        objects: &[PathBuf],
        script: &Path,
        output: &Path,
        firmware_elf: Option<&Path>,
    ) -> Result<(), BuildError> {
        let linker = self.tool_path("gcc");
        let mut cmd = Command::new(&linker);
        cmd.arg(format!("-march={}", self.config.compiler.arch))
            .arg(format!("-mabi={}", self.config.compiler.abi))
            .arg(format!("-T{}", script.display()));

        if let Some(elf) = firmware_elf {
            if !elf.exists() {
                return Err(BuildError::FirmwareElfMissing(elf.to_path_buf()));
            }
            cmd.arg(format!("-Wl,--just-symbols={}", elf.display()));
        }

        cmd.args(objects).arg("-o").arg(output);
        if self.config.linker.garbage_collection {
            cmd.arg("-Wl,--gc-sections");
        }
        cmd.args(&self.config.linker.flags);

        run(&linker, cmd).map_err(|err| match err {
            BuildError::Tool { tool, stderr } => match find_unresolved(&stderr) {
                Some(symbol) => BuildError::UnresolvedSymbol { symbol },
                None => BuildError::Tool { tool, stderr },
            },
            other => other,
        })
    }

    fn tool_path(&self, name: &str) -> PathBuf {
        self.config
            .compiler_path(name)
            .unwrap_or_else(|| self.config.toolchain.path.join(name))
    }
}

fn run(tool: &Path, mut cmd: Command) -> Result<(), BuildError> {
    debug!("running: {:?}", cmd);
    let output = cmd.output().map_err(|e| BuildError::Tool {
        tool: tool.display().to_string(),
        stderr: format!("failed to spawn: {}", e),
    })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    error!("{} exited {}: {}", tool.display(), output.status, stderr);
    Err(BuildError::Tool {
        tool: tool
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| tool.display().to_string()),
        stderr,
    })
}

/// Pull the first unresolved symbol name out of linker stderr, if any.
fn find_unresolved(stderr: &str) -> Option<String> {
    let marker = "undefined reference to `";
    let start = stderr.find(marker)? + marker.len();
    let rest = &stderr[start..];
    let end = rest.find('\'')?;
    Some(rest[..end].to_owned())
}
