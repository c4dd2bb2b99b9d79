//! Simulation channel for unit testing the responder without CAN hardware
//!
//! Clones share their queues, so a test can hand one handle to the responder
//! and keep another to script incoming frames and inspect what was sent.

use std::{
    collections::VecDeque,
    sync::{Arc, RwLock},
};

use crate::channel::{CanChannel, CanFrame, ChannelError, ChannelResult};

/// An in-memory [CanChannel] fed by scripted frames
#[derive(Debug, Clone, Default)]
pub struct SimulationCanChannel {
    rx_queue: Arc<RwLock<VecDeque<CanFrame>>>,
    tx_frames: Arc<RwLock<Vec<CanFrame>>>,
}

impl SimulationCanChannel {
    /// Creates an empty simulation channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a frame to be handed out by the next [CanChannel::receive] call
    pub fn queue_frame(&mut self, addr: u32, data: &[u8]) {
        self.rx_queue
            .write()
            .unwrap()
            .push_back(CanFrame::new(addr, data));
    }

    /// Returns every frame sent over the channel so far, in order
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.tx_frames.read().unwrap().clone()
    }

    /// Forgets all scripted and sent frames
    pub fn reset(&mut self) {
        self.rx_queue.write().unwrap().clear();
        self.tx_frames.write().unwrap().clear();
    }
}

impl CanChannel for SimulationCanChannel {
    fn open(&mut self) -> ChannelResult<()> {
        Ok(())
    }

    fn close(&mut self) -> ChannelResult<()> {
        Ok(())
    }

    fn send(&mut self, frame: CanFrame) -> ChannelResult<()> {
        self.tx_frames.write().unwrap().push(frame);
        Ok(())
    }

    fn receive(&mut self, timeout_ms: u32) -> ChannelResult<CanFrame> {
        if let Some(f) = self.rx_queue.write().unwrap().pop_front() {
            return Ok(f);
        }
        // No scripted frame left. The simulation never actually sleeps
        if timeout_ms == 0 {
            Err(ChannelError::BufferEmpty)
        } else {
            Err(ChannelError::ReadTimeout)
        }
    }
}
