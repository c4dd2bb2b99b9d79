//! Module for the physical communication channel between the ECU and the tester
//!
//! The responder core only ever talks to a [CanChannel], so any CAN backend
//! (SocketCAN, a vendor API, or the in-memory simulation channel) can sit
//! underneath it.

/// Communication channel result
pub type ChannelResult<T> = Result<T, ChannelError>;

#[derive(Debug)]
/// Error produced by a communication channel
pub enum ChannelError {
    /// Underlying IO Error with channel
    IOError(std::io::Error),
    /// Timeout when writing data to the channel
    WriteTimeout,
    /// Timeout when reading from the channel
    ReadTimeout,
    /// The channel's Rx buffer is empty. Only applies when read timeout is 0
    BufferEmpty,
    /// The interface is not open
    InterfaceNotOpen,
    /// Underlying API error with hardware
    APIError {
        /// Name of the API EG: 'socketCAN'
        api_name: String,
        /// API error description
        desc: String,
    },
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::IOError(e) => write!(f, "IO error: {e}"),
            ChannelError::WriteTimeout => write!(f, "timeout writing to channel"),
            ChannelError::ReadTimeout => write!(f, "timeout reading from channel"),
            ChannelError::BufferEmpty => write!(f, "channel's Receive buffer is empty"),
            ChannelError::InterfaceNotOpen => write!(f, "channel's interface is not open"),
            ChannelError::APIError { api_name, desc } => {
                write!(f, "underlying {api_name} API error: {desc}")
            }
        }
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        Self::IOError(e)
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Self::IOError(io_err) = self {
            Some(io_err)
        } else {
            None
        }
    }
}

/// Maximum data length of a classic CAN frame
pub const CAN_MAX_DLC: usize = 8;

/// A classic CAN frame (up to 8 data bytes)
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct CanFrame {
    addr: u32,
    dlc: u8,
    data: [u8; CAN_MAX_DLC],
}

impl CanFrame {
    /// Creates a new CAN frame for a given address.
    /// Data longer than 8 bytes is truncated
    pub fn new(addr: u32, data: &[u8]) -> Self {
        let dlc = std::cmp::min(data.len(), CAN_MAX_DLC);
        let mut buf = [0u8; CAN_MAX_DLC];
        buf[..dlc].copy_from_slice(&data[..dlc]);
        Self {
            addr,
            dlc: dlc as u8,
            data: buf,
        }
    }

    /// Returns the CAN address (ID) of the frame
    pub fn get_address(&self) -> u32 {
        self.addr
    }

    /// Returns the data of the frame
    pub fn get_data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }
}

impl std::fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanFrame")
            .field("addr", &format_args!("0x{:04X}", self.addr))
            .field("data", &format_args!("{:02X?}", self.get_data()))
            .finish()
    }
}

/// Capability trait for a raw CAN interface.
///
/// Implementations only have to move whole frames; all ISO-TP segmentation
/// and flow control logic lives in the responder core
pub trait CanChannel: Send + Sync {
    /// Opens the interface
    fn open(&mut self) -> ChannelResult<()>;

    /// Closes and destroys the channel
    fn close(&mut self) -> ChannelResult<()>;

    /// Sends a single CAN frame on the interface
    fn send(&mut self, frame: CanFrame) -> ChannelResult<()>;

    /// Attempts to receive a single CAN frame from the interface.
    ///
    /// ## Parameters
    /// * timeout_ms - Timeout for reading the frame. If a value of 0 is used,
    ///   the channel returns immediately with whatever is in its receive buffer,
    ///   or [ChannelError::BufferEmpty] if there is nothing
    fn receive(&mut self, timeout_ms: u32) -> ChannelResult<CanFrame>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_truncates_oversized_data() {
        let f = CanFrame::new(0x7E8, &[0u8; 12]);
        assert_eq!(f.get_data().len(), CAN_MAX_DLC);
    }

    #[test]
    fn frame_keeps_addr_and_data() {
        let f = CanFrame::new(0x712, &[0x02, 0x19, 0x01]);
        assert_eq!(f.get_address(), 0x712);
        assert_eq!(f.get_data(), &[0x02, 0x19, 0x01]);
    }
}
