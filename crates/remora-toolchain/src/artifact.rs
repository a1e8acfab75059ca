//! Build outputs: the binary artifact and the function image.

use crate::elf::{Section, SymbolInfo};
use crate::signature::Signature;
use std::collections::BTreeMap;

/// A linked, extracted, padded binary ready for upload.
#[derive(Debug)]
pub struct Artifact {
    /// Image bytes: code and initialized data, zero padding to 4-byte
    /// alignment, then zeros covering the BSS. This is the transport
    /// upload size.
    pub data: Vec<u8>,
    /// Address the image was linked for
    pub base_address: u32,
    /// Address of the synthesized entry function
    pub entry_address: u32,
    /// Tracked sections (.text/.rodata/.data/.bss)
    pub sections: BTreeMap<String, Section>,
    /// Function and object symbols of the linked image
    pub symbols: Vec<SymbolInfo>,
}

impl Artifact {
    /// Upload size in bytes.
    pub fn total_size(&self) -> usize {
        self.data.len()
    }

    /// Look up a symbol by name.
    pub fn symbol(&self, name: &str) -> Option<&SymbolInfo> {
        self.symbols.iter().find(|s| s.name == name)
    }
}

/// Argument frame geometry bound at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Device address the wrapper was compiled against
    pub args_address: u32,
    /// Slot count; the last slot carries the return value
    pub slot_count: usize,
}

impl FrameLayout {
    /// Frame size in bytes.
    pub fn frame_bytes(&self) -> usize {
        self.slot_count * 4
    }

    /// Device address of slot `index`.
    pub fn slot_address(&self, index: usize) -> u32 {
        self.args_address + (index as u32) * 4
    }

    /// Device address of the return-value slot.
    pub fn return_slot_address(&self) -> u32 {
        self.slot_address(self.slot_count - 1)
    }
}

/// A built function: artifact plus the signature and frame it was
/// generated for.
#[derive(Debug)]
pub struct FunctionImage {
    pub artifact: Artifact,
    pub signature: Signature,
    pub frame: FrameLayout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout_addresses() {
        let frame = FrameLayout {
            args_address: 0x4801_0000,
            slot_count: 32,
        };
        assert_eq!(frame.frame_bytes(), 128);
        assert_eq!(frame.slot_address(0), 0x4801_0000);
        assert_eq!(frame.slot_address(1), 0x4801_0004);
        assert_eq!(frame.return_slot_address(), 0x4801_0000 + 124);
    }
}
