//! ISO15765-2 (ISO-TP) frame construction
//!
//! Every diagnostic payload sent by the responder is wrapped in one of the
//! three transmit-side ISO-TP frame types. The PCI (protocol control
//! information) type lives in the upper nibble of the first data byte:
//!
//! * `0x0` - Single Frame, length in the lower nibble, up to 7 payload bytes
//! * `0x1` - First Frame, 12 bit total length across the first 2 bytes, 6 payload bytes
//! * `0x2` - Consecutive Frame, 4 bit sequence number in the lower nibble, up to 7 payload bytes
//! * `0x3` - Flow Control (receive side only, see [crate::flow_control])

use crate::channel::{CanFrame, CAN_MAX_DLC};

/// PCI upper nibble of a Single Frame
pub const PCI_SINGLE_FRAME: u8 = 0x00;
/// PCI upper nibble of a First Frame
pub const PCI_FIRST_FRAME: u8 = 0x10;
/// PCI upper nibble of a Consecutive Frame
pub const PCI_CONSECUTIVE_FRAME: u8 = 0x20;
/// PCI upper nibble of a Flow Control frame
pub const PCI_FLOW_CONTROL: u8 = 0x30;

/// Number of payload bytes carried by a First Frame
pub const FIRST_FRAME_DATA_LEN: usize = 6;
/// Maximum number of payload bytes carried by a Consecutive Frame
pub const CONSECUTIVE_FRAME_DATA_LEN: usize = 7;
/// Largest payload that can be announced by a First Frame (12 bit length field)
pub const MAX_SEGMENTED_PAYLOAD: usize = 0xFFF;

/// Fill byte for padded frames
const PADDING_BYTE: u8 = 0xCC;

/// Builder for the ISO-TP frames produced by the responder
#[derive(Debug, Copy, Clone)]
pub struct FrameBuilder {
    pad_frame: bool,
}

impl FrameBuilder {
    /// Creates a new frame builder.
    ///
    /// ## Parameters
    /// * pad_frame - Pad every frame to 8 data bytes with 0xCC. Most CAN
    ///   networks require this
    pub fn new(pad_frame: bool) -> Self {
        Self { pad_frame }
    }

    fn finish(&self, addr: u32, mut data: Vec<u8>) -> CanFrame {
        if self.pad_frame {
            data.resize(CAN_MAX_DLC, PADDING_BYTE);
        }
        CanFrame::new(addr, &data)
    }

    /// Builds a Single Frame carrying up to 7 payload bytes
    pub fn single_frame(&self, addr: u32, payload: &[u8]) -> CanFrame {
        debug_assert!(payload.len() <= CAN_MAX_DLC - 1);
        let mut data = Vec::with_capacity(CAN_MAX_DLC);
        data.push(PCI_SINGLE_FRAME | (payload.len() & 0x0F) as u8);
        data.extend_from_slice(payload);
        self.finish(addr, data)
    }

    /// Builds a First Frame announcing `total_len` payload bytes and carrying
    /// the first 6 of them
    pub fn first_frame(&self, addr: u32, total_len: usize, chunk: &[u8]) -> CanFrame {
        debug_assert!(total_len <= MAX_SEGMENTED_PAYLOAD);
        debug_assert!(chunk.len() == FIRST_FRAME_DATA_LEN);
        let mut data = Vec::with_capacity(CAN_MAX_DLC);
        data.push(PCI_FIRST_FRAME | ((total_len >> 8) & 0x0F) as u8);
        data.push((total_len & 0xFF) as u8);
        data.extend_from_slice(chunk);
        self.finish(addr, data)
    }

    /// Builds a Consecutive Frame tagged with the 4 bit sequence number `sn`
    pub fn consecutive_frame(&self, addr: u32, sn: u8, chunk: &[u8]) -> CanFrame {
        debug_assert!(chunk.len() <= CONSECUTIVE_FRAME_DATA_LEN);
        let mut data = Vec::with_capacity(CAN_MAX_DLC);
        data.push(PCI_CONSECUTIVE_FRAME | (sn & 0x0F));
        data.extend_from_slice(chunk);
        self.finish(addr, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_encoding() {
        let b = FrameBuilder::new(false);
        let f = b.single_frame(0x7E8, &[0x01, 0x08, 0x00, 0x01]);
        assert_eq!(f.get_data(), &[0x04, 0x01, 0x08, 0x00, 0x01]);
    }

    #[test]
    fn single_frame_padding() {
        let b = FrameBuilder::new(true);
        let f = b.single_frame(0x7E8, &[0x01, 0x08, 0x00, 0x01]);
        assert_eq!(f.get_data(), &[0x04, 0x01, 0x08, 0x00, 0x01, 0xCC, 0xCC, 0xCC]);
    }

    #[test]
    fn first_frame_carries_12_bit_length() {
        let b = FrameBuilder::new(false);
        let f = b.first_frame(0x7E8, 0x123, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(f.get_data(), &[0x11, 0x23, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn consecutive_frame_masks_sequence_number() {
        let b = FrameBuilder::new(false);
        let f = b.consecutive_frame(0x7E8, 0x12, &[0xAA]);
        assert_eq!(f.get_data(), &[0x22, 0xAA]);
    }
}
