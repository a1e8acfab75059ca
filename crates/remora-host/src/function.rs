//! Loaded-function handles.

use crate::args;
use crate::client::DeviceClient;
use crate::error::{CallError, ClientError};
use crate::value::{ReturnValue, Value};
use log::debug;
use remora_proto::link::Link;
use remora_toolchain::artifact::FunctionImage;
use remora_toolchain::Signature;

/// A function resident on the device.
///
/// Binds the built image to the two device regions it occupies. Calls
/// share the function's single argument frame, so a handle supports one
/// call at a time (`&mut self`); concurrent calls into the same loaded
/// function are not supported.
#[derive(Debug)]
pub struct LoadedFunction {
    image: FunctionImage,
    code_address: u32,
    sync_arrays: bool,
    valid: bool,
}

impl LoadedFunction {
    /// Bind an image to its device regions.
    pub fn from_parts(image: FunctionImage, code_address: u32, sync_arrays: bool) -> Self {
        Self {
            image,
            code_address,
            sync_arrays,
            valid: true,
        }
    }

    /// Base address of the code region.
    pub fn code_address(&self) -> u32 {
        self.code_address
    }

    /// Address of the argument frame.
    pub fn args_address(&self) -> u32 {
        self.image.frame.args_address
    }

    /// Address the device jumps to.
    pub fn entry_address(&self) -> u32 {
        self.image.artifact.entry_address
    }

    /// The target function's parsed signature.
    pub fn signature(&self) -> &Signature {
        &self.image.signature
    }

    /// Upload size of the image in bytes.
    pub fn code_size(&self) -> usize {
        self.image.artifact.total_size()
    }

    /// Whether mutated arrays are read back after each call.
    pub fn sync_arrays(&self) -> bool {
        self.sync_arrays
    }

    /// Enable or disable post-call array sync.
    pub fn set_sync_arrays(&mut self, sync: bool) {
        self.sync_arrays = sync;
    }

    /// False once the handle has been freed.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Call the function with typed arguments.
    ///
    /// Arrays are staged into transient device regions and (with sync
    /// enabled) copied back into `args` after the call returns.
    pub fn call<L: Link>(
        &mut self,
        client: &mut DeviceClient<L>,
        args: &mut [Value],
    ) -> Result<ReturnValue, CallError> {
        if !self.valid {
            return Err(CallError::FunctionFreed);
        }
        args::invoke(
            client,
            &self.image.signature,
            &self.image.frame,
            self.image.artifact.entry_address,
            self.sync_arrays,
            args,
        )
    }

    /// Release both device regions and invalidate the handle.
    ///
    /// Both frees are attempted even if the first fails; the first error
    /// wins.
    pub fn free<L: Link>(&mut self, client: &mut DeviceClient<L>) -> Result<(), ClientError> {
        if !self.valid {
            return Ok(());
        }
        self.valid = false;
        debug!(
            "freeing function '{}' (code {:#010X}, args {:#010X})",
            self.image.signature.name,
            self.code_address,
            self.args_address()
        );
        let args_result = client.free(self.image.frame.args_address);
        let code_result = client.free(self.code_address);
        args_result.and(code_result)
    }
}
