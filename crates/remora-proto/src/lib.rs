//! Wire protocol shared by the remora host and device.
//!
//! Both sides of the link speak the same magic-framed, checksummed
//! request/response protocol over an ordered reliable byte pipe. This crate
//! owns everything that must agree bit-for-bit on both ends:
//!
//! - [`frame`] - the packet framing (magic, header, additive checksum)
//! - [`command`] - command ids and request/response payload codecs
//! - [`wire`] - the little-endian writer/reader the codecs are built on
//! - [`caps`] - memory capability bits passed through to the target allocator
//! - [`link`] - the byte-pipe abstraction, plus an in-memory duplex pair
//!   used by tests and the loopback harness
//!
//! All multi-byte fields are little-endian. Protocol versioning is
//! major/minor: a major mismatch is incompatible, a minor bump is additive.

pub mod caps;
pub mod command;
pub mod frame;
pub mod link;
pub mod wire;

/// Current protocol major version. Incompatible across bumps.
pub const PROTOCOL_MAJOR: u8 = 1;

/// Current protocol minor version. Additive across bumps.
pub const PROTOCOL_MINOR: u8 = 0;

/// Slot count of the argument frame. Slot `SLOT_COUNT - 1` holds the return
/// value. Structurally fixed: changing it changes the wire ABI between the
/// generated wrapper and the host marshaller.
pub const SLOT_COUNT: usize = 32;

/// Byte size of the argument frame.
pub const FRAME_BYTES: usize = SLOT_COUNT * 4;

pub use command::{CommandId, WireError};
pub use frame::{Frame, FrameError, FrameKind};
pub use link::{Link, LinkError};
