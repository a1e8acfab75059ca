//! Device-side server core.
//!
//! A single cooperative protocol loop reads framed commands off the
//! transport, dispatches them against a bounded allocation table, and
//! answers each request with exactly one response. The loop runs for the
//! lifetime of the firmware; a runaway user function called through
//! `execute` blocks it until the function returns, by design.
//!
//! The platform collaborators (heap primitives, cache maintenance, the
//! actual jump into loaded code) sit behind the [`bus::MemoryBus`] trait.
//! Firmware supplies the real SoC implementation; [`sim`] supplies an
//! arena-backed one for tests and host-side loopback.

pub mod bus;
pub mod dispatch;
pub mod region;
pub mod server;
pub mod sim;

pub use bus::{BusFault, MemoryBus};
pub use dispatch::{Dispatcher, ServerConfig};
pub use region::{RegionTable, REGION_CAPACITY};
pub use server::Server;
