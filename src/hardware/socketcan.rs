//! SocketCAN backed [CanChannel]
//!
//! The interface is pre-configured (bitrate, up/down state) by the OS
//! kernel, so opening the channel is just opening the socket.

use std::time::Duration;

use socketcan::{CanSocket, EmbeddedFrame, ExtendedId, Frame, Id, Socket, StandardId};

use crate::channel::{CanChannel, CanFrame, ChannelError, ChannelResult};

/// Largest valid 11 bit CAN ID
const STANDARD_ID_MAX: u32 = 0x7FF;

/// A [CanChannel] over a SocketCAN interface such as `can0` or `vcan0`
pub struct SocketCanChannel {
    if_name: String,
    socket: Option<CanSocket>,
}

impl std::fmt::Debug for SocketCanChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketCanChannel")
            .field("if_name", &self.if_name)
            .field("open", &self.socket.is_some())
            .finish()
    }
}

impl SocketCanChannel {
    /// Creates a channel for the named interface. The socket is not opened
    /// until [CanChannel::open] is called
    pub fn new(if_name: &str) -> Self {
        Self {
            if_name: if_name.to_string(),
            socket: None,
        }
    }

    fn socket(&mut self) -> ChannelResult<&mut CanSocket> {
        self.socket.as_mut().ok_or(ChannelError::InterfaceNotOpen)
    }
}

fn make_id(addr: u32) -> ChannelResult<Id> {
    if addr <= STANDARD_ID_MAX {
        StandardId::new(addr as u16).map(Id::Standard)
    } else {
        ExtendedId::new(addr).map(Id::Extended)
    }
    .ok_or_else(|| ChannelError::APIError {
        api_name: "socketCAN".into(),
        desc: format!("0x{addr:08X} is not a valid CAN ID"),
    })
}

impl CanChannel for SocketCanChannel {
    fn open(&mut self) -> ChannelResult<()> {
        if self.socket.is_some() {
            return Ok(()); // Already open!
        }
        let socket = CanSocket::open(&self.if_name)?;
        self.socket = Some(socket);
        log::debug!("SocketCAN interface {} opened", self.if_name);
        Ok(())
    }

    fn close(&mut self) -> ChannelResult<()> {
        self.socket = None;
        Ok(())
    }

    fn send(&mut self, frame: CanFrame) -> ChannelResult<()> {
        let id = make_id(frame.get_address())?;
        let cf = socketcan::CanFrame::new(id, frame.get_data()).ok_or_else(|| {
            ChannelError::APIError {
                api_name: "socketCAN".into(),
                desc: "could not construct CAN frame".into(),
            }
        })?;
        self.socket()?.write_frame(&cf)?;
        Ok(())
    }

    fn receive(&mut self, timeout_ms: u32) -> ChannelResult<CanFrame> {
        let timeout = Duration::from_millis(std::cmp::max(1, timeout_ms) as u64);
        match self.socket()?.read_frame_timeout(timeout) {
            Ok(f) => Ok(CanFrame::new(f.raw_id(), f.data())),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(ChannelError::ReadTimeout)
            }
            Err(e) => Err(ChannelError::IOError(e)),
        }
    }
}

impl Drop for SocketCanChannel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
