//! Position-specific build pipeline.
//!
//! Turns a C/C++ source directory and a target function name into a raw
//! binary image linked for a caller-chosen base address, with the entry
//! point set to a synthesized wrapper that bridges the shared argument
//! frame to the function's calling convention.
//!
//! The pipeline is deliberately deterministic: building the same source set
//! at the same addresses twice yields byte-identical images. The two-pass
//! load flow depends on this; the probe pass measures the image, the final
//! pass relinks it at the allocated address, and the sizes must agree.
//!
//! Compilers and the linker driver are opaque subprocesses configured
//! through [`config::ToolchainConfig`]; section and symbol extraction read
//! the linked ELF directly.

pub mod artifact;
pub mod builder;
pub mod config;
pub mod elf;
pub mod error;
pub mod linker_script;
pub mod signature;
pub mod testelf;
pub mod tools;
pub mod wrapper;

pub use artifact::{Artifact, FrameLayout, FunctionImage};
pub use builder::{BuildOptions, Builder};
pub use config::ToolchainConfig;
pub use error::BuildError;
pub use signature::{ParamKind, Signature};
