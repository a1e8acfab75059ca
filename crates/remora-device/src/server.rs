//! The protocol loop.
//!
//! Synchronizes on the magic bytes one byte at a time, reads header,
//! payload, and checksum into a reused RX buffer, verifies, dispatches, and
//! emits exactly one response per verified request. Oversize payloads are
//! drained (payload plus checksum) so the stream stays framed; the host
//! observes a timeout for that request. A checksum mismatch is answered
//! with an error frame carrying the received command id so the host can
//! attribute the failure.

use crate::bus::MemoryBus;
use crate::dispatch::{Dispatcher, ServerConfig};
use log::{error, info, warn};
use remora_proto::command::WireError;
use remora_proto::frame::{additive_checksum, FrameKind, MAGIC0, MAGIC1};
use remora_proto::link::{Link, LinkError};

/// Device-side protocol server
pub struct Server<L: Link, M: MemoryBus> {
    link: L,
    dispatcher: Dispatcher<M>,
    rx: Vec<u8>,
    tx: Vec<u8>,
}

impl<L: Link, M: MemoryBus> Server<L, M> {
    pub fn new(link: L, bus: M, config: ServerConfig) -> Self {
        Self {
            link,
            dispatcher: Dispatcher::new(bus, config),
            rx: Vec::new(),
            tx: Vec::new(),
        }
    }

    /// The dispatcher (tests assert allocation-table state through it).
    pub fn dispatcher(&self) -> &Dispatcher<M> {
        &self.dispatcher
    }

    /// Run the protocol loop until the link closes.
    ///
    /// This is the firmware's control task body: it blocks in transport
    /// reads and never returns under normal operation on real hardware.
    pub fn run(&mut self) -> Result<(), LinkError> {
        info!(
            "protocol loop started (max_payload={})",
            self.dispatcher.config().max_payload
        );
        loop {
            match self.serve_one() {
                Ok(()) => {}
                Err(LinkError::Closed) => {
                    info!("link closed, protocol loop exiting");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Receive, verify, dispatch, and answer a single frame.
    pub fn serve_one(&mut self) -> Result<(), LinkError> {
        // Resynchronize on the magic, one byte at a time.
        let mut byte = [0u8; 1];
        loop {
            self.link.recv(&mut byte)?;
            if byte[0] != MAGIC0 {
                continue;
            }
            self.link.recv(&mut byte)?;
            if byte[0] == MAGIC1 {
                break;
            }
        }

        // Rest of the header: cmd, kind, payload length.
        let mut rest = [0u8; 6];
        self.link.recv(&mut rest)?;
        let cmd = rest[0];
        let kind = rest[1];
        let len = u32::from_le_bytes([rest[2], rest[3], rest[4], rest[5]]);

        let max_payload = self.dispatcher.config().max_payload;
        if len > max_payload {
            // Drain payload and checksum to stay framed; no response, the
            // host will observe a timeout for this request.
            error!("payload too large: {} (max {})", len, max_payload);
            self.drain(u64::from(len) + 2)?;
            warn!("drained {} bytes to resync", u64::from(len) + 2);
            return Ok(());
        }

        self.rx.resize(len as usize, 0);
        self.link.recv(&mut self.rx)?;

        let mut ck = [0u8; 2];
        self.link.recv(&mut ck)?;
        let received = u16::from_le_bytes(ck);

        let header = [MAGIC0, MAGIC1, cmd, kind, rest[2], rest[3], rest[4], rest[5]];
        let computed =
            additive_checksum(&header).wrapping_add(additive_checksum(&self.rx));
        if computed != received {
            error!(
                "checksum mismatch: computed {:#06X}, received {:#06X}",
                computed, received
            );
            return self.send_error(cmd, WireError::Checksum);
        }

        let mut tx = std::mem::take(&mut self.tx);
        let result = self.dispatcher.handle(cmd, &self.rx, &mut tx);
        self.tx = tx;
        match result {
            Ok(()) => self.send_response(cmd, FrameKind::Ok),
            Err(code) => self.send_error(cmd, code),
        }
    }

    fn drain(&mut self, mut remaining: u64) -> Result<(), LinkError> {
        let mut chunk = [0u8; 256];
        while remaining > 0 {
            let take = remaining.min(chunk.len() as u64) as usize;
            self.link.recv(&mut chunk[..take])?;
            remaining -= take as u64;
        }
        Ok(())
    }

    fn send_error(&mut self, cmd: u8, code: WireError) -> Result<(), LinkError> {
        self.tx.clear();
        self.tx.extend_from_slice(&code.code().to_le_bytes());
        self.send_response(cmd, FrameKind::Error)
    }

    fn send_response(&mut self, cmd: u8, kind: FrameKind) -> Result<(), LinkError> {
        let len = (self.tx.len() as u32).to_le_bytes();
        let header = [
            MAGIC0,
            MAGIC1,
            cmd,
            kind as u8,
            len[0],
            len[1],
            len[2],
            len[3],
        ];
        let checksum =
            additive_checksum(&header).wrapping_add(additive_checksum(&self.tx));

        self.link.send(&header)?;
        if !self.tx.is_empty() {
            let tx = std::mem::take(&mut self.tx);
            self.link.send(&tx)?;
            self.tx = tx;
        }
        self.link.send(&checksum.to_le_bytes())
    }
}
