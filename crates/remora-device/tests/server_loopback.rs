//! End-to-end tests of the protocol loop over an in-memory link.
//!
//! A server runs on its own thread against the simulated bus; the test side
//! plays host, writing raw frames and decoding what comes back.

use remora_device::dispatch::ServerConfig;
use remora_device::sim::{SimBus, SimConfig};
use remora_device::Server;
use remora_proto::command::{
    AllocRequest, AllocResponse, DeviceInfo, ExecRequest, ExecResponse, FreeRequest, MemFlags,
    ReadRequest, WireError, WriteRequest, WriteResponse,
};
use remora_proto::frame::{Frame, FrameKind, CHECKSUM_LEN, HEADER_LEN};
use remora_proto::link::{memory_link_pair, Link, MemoryLink};
use remora_proto::caps;
use std::thread::JoinHandle;
use std::time::Duration;

struct Harness {
    link: MemoryLink,
    bus: SimBus,
    server: Option<JoinHandle<()>>,
}

impl Harness {
    fn start() -> Self {
        Self::start_with(ServerConfig::default())
    }

    fn start_with(config: ServerConfig) -> Self {
        let (host_link, device_link) = memory_link_pair();
        let bus = SimBus::new(SimConfig::default());
        let server_bus = bus.clone();
        let server = std::thread::spawn(move || {
            let mut server = Server::new(device_link, server_bus, config);
            server.run().expect("server loop failed");
        });
        let mut link = host_link;
        link.set_read_timeout(Some(Duration::from_secs(2)));
        Self {
            link,
            bus,
            server: Some(server),
        }
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.link.send(bytes).unwrap();
    }

    fn read_frame(&mut self) -> Frame {
        let mut header = [0u8; HEADER_LEN];
        self.link.recv(&mut header).unwrap();
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let mut rest = vec![0u8; len + CHECKSUM_LEN];
        self.link.recv(&mut rest).unwrap();

        let mut whole = header.to_vec();
        whole.extend_from_slice(&rest);
        Frame::decode(&whole).unwrap()
    }

    fn request(&mut self, cmd: u8, payload: Vec<u8>) -> Frame {
        self.send_raw(&Frame::request(cmd, payload).encode());
        self.read_frame()
    }

    fn expect_ok(&mut self, cmd: u8, payload: Vec<u8>) -> Vec<u8> {
        let frame = self.request(cmd, payload);
        assert_eq!(frame.kind, FrameKind::Ok, "cmd {:#04X} errored", cmd);
        assert_eq!(frame.cmd, cmd);
        frame.payload
    }

    fn expect_error(&mut self, cmd: u8, payload: Vec<u8>) -> WireError {
        let frame = self.request(cmd, payload);
        assert_eq!(frame.kind, FrameKind::Error, "cmd {:#04X} succeeded", cmd);
        assert_eq!(frame.cmd, cmd);
        let code = u32::from_le_bytes(frame.payload[..4].try_into().unwrap());
        WireError::from_code(code).unwrap()
    }

    fn alloc(&mut self, size: u32, caps: u32, alignment: u32) -> u32 {
        let payload = AllocRequest {
            size,
            caps,
            alignment,
        }
        .encode();
        let resp = AllocResponse::decode(&self.expect_ok(0x10, payload)).unwrap();
        assert_eq!(resp.error, 0, "allocation refused");
        resp.address
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.link.discard_input().ok();
        // Closing our end wakes the server out of its blocking read.
        let (dead, _) = memory_link_pair();
        let _ = std::mem::replace(&mut self.link, dead);
        if let Some(handle) = self.server.take() {
            handle.join().unwrap();
        }
    }
}

#[test]
fn test_ping_echo() {
    let mut h = Harness::start();
    let echoed = h.expect_ok(0x01, vec![0xCA, 0xFE, 0xBA, 0xBE]);
    assert_eq!(echoed, vec![0xCA, 0xFE, 0xBA, 0xBE]);
}

#[test]
fn test_version_handshake() {
    let mut h = Harness::start();
    let info = DeviceInfo::decode(&h.expect_ok(0x02, vec![])).unwrap();
    assert_eq!(info.protocol_major, 1);
    assert!(info.max_payload >= 131072);
    assert!(info.firmware_version.is_ascii());
}

#[test]
fn test_allocate_write_read_free() {
    let mut h = Harness::start();
    let addr = h.alloc(64, caps::DATA_CAPS, 16);

    let data: Vec<u8> = (0u8..0x40).collect();
    let write = WriteRequest {
        address: addr,
        flags: MemFlags::CHECKED,
    };
    let resp = WriteResponse::decode(&h.expect_ok(0x20, write.encode(&data))).unwrap();
    assert_eq!(resp.bytes_written, 64);

    let read = ReadRequest {
        address: addr,
        size: 64,
        flags: MemFlags::CHECKED,
    };
    assert_eq!(h.expect_ok(0x21, read.encode()), data);

    h.expect_ok(0x11, FreeRequest { address: addr }.encode());

    // Reads from a freed region bounce with invalid-address.
    assert_eq!(
        h.expect_error(0x21, read.encode()),
        WireError::InvalidAddress
    );
}

#[test]
fn test_out_of_bounds_write_rejected_without_corruption() {
    let mut h = Harness::start();
    let addr = h.alloc(16, caps::DATA_CAPS, 16);

    let write = WriteRequest {
        address: addr,
        flags: MemFlags::CHECKED,
    };
    assert_eq!(
        h.expect_error(0x20, write.encode(&[0xFFu8; 32])),
        WireError::InvalidAddress
    );

    // The region itself was never touched.
    let read = ReadRequest {
        address: addr,
        size: 16,
        flags: MemFlags::CHECKED,
    };
    assert_eq!(h.expect_ok(0x21, read.encode()), vec![0u8; 16]);
}

#[test]
fn test_checksum_error_carries_command_id() {
    let mut h = Harness::start();
    let mut bytes = Frame::request(0x10, AllocRequest {
        size: 64,
        caps: caps::DATA_CAPS,
        alignment: 16,
    }
    .encode())
    .encode();
    // Corrupt one payload byte; the stored checksum no longer matches.
    bytes[HEADER_LEN] ^= 0xFF;
    h.send_raw(&bytes);

    let frame = h.read_frame();
    assert_eq!(frame.kind, FrameKind::Error);
    assert_eq!(frame.cmd, 0x10);
    let code = u32::from_le_bytes(frame.payload[..4].try_into().unwrap());
    assert_eq!(code, WireError::Checksum.code());
}

#[test]
fn test_garbage_before_magic_is_skipped() {
    let mut h = Harness::start();
    h.send_raw(&[0x00, 0x13, 0xA5, 0x00, 0x37]); // noise, incl. a lone MAGIC0
    let echoed = h.expect_ok(0x01, vec![1, 2, 3]);
    assert_eq!(echoed, vec![1, 2, 3]);
}

#[test]
fn test_oversize_payload_drained_no_response() {
    let mut h = Harness::start_with(ServerConfig {
        max_payload: 1024,
        ..ServerConfig::default()
    });

    // Claimed length is over budget: the device drains payload + checksum
    // and stays silent for that frame.
    let oversize = Frame::request(0x01, vec![0xAB; 2048]).encode();
    h.send_raw(&oversize);

    // The very next request still works: the stream never desynchronized.
    let echoed = h.expect_ok(0x01, vec![9, 9, 9]);
    assert_eq!(echoed, vec![9, 9, 9]);
}

#[test]
fn test_unknown_command_errors() {
    let mut h = Harness::start();
    assert_eq!(h.expect_error(0x7E, vec![]), WireError::BadCommand);
}

#[test]
fn test_execute_round_trip() {
    let mut h = Harness::start();
    let addr = h.alloc(128, caps::CODE_CAPS, 16);
    h.bus.install_exec_hook(addr, |_| 0x1234_5678);

    let resp = ExecResponse::decode(
        &h.expect_ok(0x30, ExecRequest { address: addr }.encode()),
    )
    .unwrap();
    assert_eq!(resp.return_value, 0x1234_5678);

    // Outside any live region: refused before the jump.
    assert_eq!(
        h.expect_error(0x30, ExecRequest { address: 0x0666_0000 }.encode()),
        WireError::InvalidAddress
    );
}

#[test]
fn test_heap_info_reports_both_regions() {
    let mut h = Harness::start();
    let payload = h.expect_ok(0x40, vec![]);
    let info = remora_proto::command::HeapInfo::decode(&payload).unwrap();
    assert!(info.total_external > 0);
    assert!(info.total_internal > 0);
    assert!(info.free_external <= info.total_external);

    let before = info.free_external;
    let _addr = h.alloc(4096, caps::DATA_CAPS, 16);
    let payload = h.expect_ok(0x40, vec![]);
    let after = remora_proto::command::HeapInfo::decode(&payload).unwrap();
    assert!(after.free_external < before);
}

#[test]
fn test_write_before_execute_is_cache_synced() {
    let mut h = Harness::start();
    let addr = h.alloc(256, caps::CODE_CAPS, 16);

    let write = WriteRequest {
        address: addr,
        flags: MemFlags::CHECKED,
    };
    h.expect_ok(0x20, write.encode(&[0x13u8; 100]));

    let line = 128;
    let log = h.bus.sync_log();
    let (start, len) = *log.last().unwrap();
    assert_eq!(start % line, 0);
    assert_eq!(len % line, 0);
    assert!(start <= addr && addr + 100 <= start + len);
}
