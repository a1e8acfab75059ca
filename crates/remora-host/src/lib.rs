//! Host runtime: the driver side of the remora dynamic code loader.
//!
//! Layered bottom-up:
//!
//! - [`client`] - framed transport client with version handshake and a
//!   shadow allocation table that validates every memory access before the
//!   packet leaves the host
//! - [`value`] - typed host-side argument values and n-dimensional arrays
//! - [`args`] - the per-call argument marshaller: frame packing, transient
//!   array regions, post-call sync-back, deterministic cleanup
//! - [`function`] - loaded-function handles
//! - [`session`] - the two-pass load flow tying the build pipeline to the
//!   device
//!
//! The facade is single-threaded by construction: one request is in flight
//! at a time, and a loaded function's argument frame is a singleton, so
//! concurrent calls into the same function are not supported.

pub mod args;
pub mod client;
pub mod error;
pub mod function;
pub mod session;
pub mod shadow;
pub mod value;

pub use client::DeviceClient;
pub use error::{CallError, ClientError, LoadError};
pub use function::LoadedFunction;
pub use session::{LoadOptions, Session};
pub use value::{ElemType, NdArray, ReturnValue, Value};
