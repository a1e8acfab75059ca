//! Host-side error taxonomy.
//!
//! Three origins, three enums: transport/protocol/device failures
//! ([`ClientError`]), argument marshalling failures ([`CallError`]), and
//! load pipeline failures tagged with the stage that fell over
//! ([`LoadError`]).

use remora_proto::command::WireError;
use remora_proto::frame::FrameError;
use remora_proto::link::LinkError;
use remora_proto::wire::DecodeError;
use remora_toolchain::BuildError;
use thiserror::Error;

/// Transport, protocol, and device-reported errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Byte transport failed (timeout, closed, I/O)
    #[error("transport: {0}")]
    Link(#[from] LinkError),

    /// Response frame was malformed
    #[error("bad response frame: {0}")]
    Frame(#[from] FrameError),

    /// Response payload did not decode
    #[error("bad response payload: {0}")]
    Decode(#[from] DecodeError),

    /// The device answered with an error frame
    #[error("device error: {0}")]
    Device(WireError),

    /// Response arrived for a different command than requested
    #[error("response command {got:#04X} does not match request {expected:#04X}")]
    CommandMismatch { expected: u8, got: u8 },

    /// Device speaks an incompatible protocol major version
    #[error("protocol major version mismatch: device {device}, host {host}")]
    VersionMismatch { device: u8, host: u8 },

    /// The allocator on the device refused the request
    #[error("device allocation of {size} bytes refused")]
    AllocRefused { size: u32 },

    /// Access rejected by the host shadow table before transmission
    #[error("{op} at {address:#010X}+{size} is outside every tracked allocation")]
    OutOfBounds {
        op: &'static str,
        address: u32,
        size: u32,
    },

    /// Free of an address the shadow table does not track
    #[error("address {0:#010X} is not a tracked allocation")]
    UntrackedAllocation(u32),
}

/// Argument marshalling and call failures
#[derive(Debug, Error)]
pub enum CallError {
    /// Wrong number of arguments
    #[error("expected {expected} argument(s), got {got}")]
    ArgCount { expected: usize, got: usize },

    /// Argument value does not satisfy the parameter's classification
    /// or width
    #[error("argument {index} ({name}): expected {expected}, got {got}")]
    ArgType {
        index: usize,
        name: String,
        expected: String,
        got: String,
    },

    /// Array element type does not match the declared pointee type
    #[error("argument {index} ({name}): array element type {got} does not match {expected}")]
    DtypeMismatch {
        index: usize,
        name: String,
        expected: String,
        got: String,
    },

    /// The handle was already freed
    #[error("function handle is no longer valid")]
    FunctionFreed,

    /// Underlying client failure
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Which step of the two-pass load flow failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Probe,
    Allocate,
    Final,
    Upload,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadStage::Probe => "probe build",
            LoadStage::Allocate => "device allocation",
            LoadStage::Final => "final build",
            LoadStage::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// Load pipeline failures, tagged with the stage
#[derive(Debug, Error)]
pub enum LoadError {
    /// A build pass failed
    #[error("{stage} failed: {source}")]
    Build {
        stage: LoadStage,
        #[source]
        source: BuildError,
    },

    /// A device interaction failed
    #[error("{stage} failed: {source}")]
    Client {
        stage: LoadStage,
        #[source]
        source: ClientError,
    },

    /// The final image outgrew the probe-pass reservation
    #[error("final image is {final_size} bytes but only {reserved} were reserved")]
    SizeRegression { final_size: usize, reserved: usize },
}
