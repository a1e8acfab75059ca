//! The two-pass load flow.
//!
//! `load` ties the build pipeline to the device: a probe build at
//! placeholder addresses measures the image, the device reserves the two
//! regions, a final build relinks at the allocated addresses, and the
//! bytes go up. Build determinism guarantees the final image fits the
//! probe-sized reservation; the slack absorbs nothing more than paranoia.

use crate::client::DeviceClient;
use crate::error::{ClientError, LoadError, LoadStage};
use crate::function::LoadedFunction;
use log::{info, warn};
use remora_proto::caps;
use remora_proto::command::{DeviceInfo, HeapInfo};
use remora_proto::link::Link;
use remora_toolchain::{BuildOptions, Builder};
use std::path::Path;

/// Extra bytes reserved beyond the probe-pass image size.
const CODE_SLACK: u32 = 64;

/// Per-load options
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Optimization level override for both passes
    pub optimization: Option<String>,
    /// Resolve external references against the firmware image
    pub resolve_firmware: bool,
    /// Capabilities for the code region
    pub code_caps: u32,
    /// Capabilities for the argument frame
    pub data_caps: u32,
    /// Alignment for both regions; at least the instruction-fetch
    /// alignment
    pub alignment: u32,
    /// Read mutated arrays back after each call
    pub sync_arrays: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            optimization: None,
            resolve_firmware: false,
            code_caps: caps::CODE_CAPS,
            data_caps: caps::DATA_CAPS,
            alignment: 16,
            sync_arrays: true,
        }
    }
}

/// A connected device plus the build pipeline.
///
/// Not thread-safe: one request is in flight at a time and loaded
/// functions share their argument frames.
pub struct Session<L: Link> {
    client: DeviceClient<L>,
    builder: Builder,
    probe_base: u32,
    probe_args: u32,
}

impl<L: Link> Session<L> {
    pub fn new(link: L, builder: Builder) -> Self {
        Self {
            client: DeviceClient::new(link),
            builder,
            probe_base: 0x4800_0000,
            probe_args: 0x4800_8000,
        }
    }

    /// Placeholder addresses used by the probe pass. Only the image size
    /// is taken from that pass, but the addresses must satisfy the
    /// configured alignment.
    pub fn set_probe_addresses(&mut self, base: u32, args: u32) {
        self.probe_base = base;
        self.probe_args = args;
    }

    /// Run the version handshake.
    pub fn connect(&mut self) -> Result<DeviceInfo, ClientError> {
        self.client.connect()
    }

    pub fn client(&self) -> &DeviceClient<L> {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut DeviceClient<L> {
        &mut self.client
    }

    pub fn builder(&self) -> &Builder {
        &self.builder
    }

    /// Device heap statistics.
    pub fn heap_stats(&mut self) -> Result<HeapInfo, ClientError> {
        self.client.heap_info()
    }

    /// Build, allocate, rebuild, and upload a function.
    pub fn load(
        &mut self,
        source: &Path,
        function: &str,
        opts: &LoadOptions,
    ) -> Result<LoadedFunction, LoadError> {
        let build_opts = BuildOptions {
            optimization: opts.optimization.clone(),
            resolve_firmware: opts.resolve_firmware,
        };

        // Pass 1: measure.
        info!("probe build of '{}'", function);
        let probe = self
            .builder
            .build(source, function, self.probe_base, self.probe_args, &build_opts)
            .map_err(|source| LoadError::Build {
                stage: LoadStage::Probe,
                source,
            })?;
        let probe_size = probe.artifact.total_size() as u32;
        let frame_bytes = probe.frame.frame_bytes() as u32;
        let reserved = probe_size + CODE_SLACK;

        // Reserve both regions.
        let code_address = self
            .client
            .allocate(reserved, opts.code_caps, opts.alignment)
            .map_err(|source| LoadError::Client {
                stage: LoadStage::Allocate,
                source,
            })?;
        let args_address = match self.client.allocate(frame_bytes, opts.data_caps, opts.alignment)
        {
            Ok(address) => address,
            Err(source) => {
                self.release_quietly(code_address);
                return Err(LoadError::Client {
                    stage: LoadStage::Allocate,
                    source,
                });
            }
        };
        info!(
            "reserved code {:#010X} ({} bytes) and args {:#010X} ({} bytes)",
            code_address, reserved, args_address, frame_bytes
        );

        // Pass 2: relink at the real addresses and upload. Release the
        // reservations if anything goes wrong.
        let result = (|| {
            let image = self
                .builder
                .build(source, function, code_address, args_address, &build_opts)
                .map_err(|source| LoadError::Build {
                    stage: LoadStage::Final,
                    source,
                })?;

            let final_size = image.artifact.total_size();
            if final_size > reserved as usize {
                return Err(LoadError::SizeRegression {
                    final_size,
                    reserved: reserved as usize,
                });
            }

            self.client
                .write_memory(code_address, &image.artifact.data)
                .map_err(|source| LoadError::Client {
                    stage: LoadStage::Upload,
                    source,
                })?;
            Ok(image)
        })();

        match result {
            Ok(image) => {
                info!(
                    "loaded '{}': {} bytes at {:#010X}, entry {:#010X}",
                    function,
                    image.artifact.total_size(),
                    code_address,
                    image.artifact.entry_address
                );
                Ok(LoadedFunction::from_parts(
                    image,
                    code_address,
                    opts.sync_arrays,
                ))
            }
            Err(err) => {
                warn!("load failed, releasing reservations: {}", err);
                self.release_quietly(args_address);
                self.release_quietly(code_address);
                Err(err)
            }
        }
    }

    fn release_quietly(&mut self, address: u32) {
        if let Err(e) = self.client.free(address) {
            warn!("failed to release {:#010X}: {}", address, e);
        }
    }
}
