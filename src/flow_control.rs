//! Receive side of the ISO-TP flow control handshake
//!
//! After the responder sends a First Frame (and after every completed block
//! of Consecutive Frames when a block size is in force), the tester answers
//! with a Flow Control frame telling the responder whether and how to carry
//! on. This module waits for that frame and drives the small state machine
//! around it, so the abort and timeout paths can be tested without hardware.

use std::time::{Duration, Instant};

use crate::channel::{CanChannel, ChannelError};
use crate::frame::PCI_FLOW_CONTROL;
use crate::{ResponderError, ResponderResult};

/// Flow control status: continue to send
const FC_CONTINUE_TO_SEND: u8 = 0x0;
/// Flow control status: wait, do not send yet
const FC_WAIT: u8 = 0x1;
/// Flow control status: receiver overflow, abort the transfer
const FC_OVERFLOW: u8 = 0x2;

/// Transmission parameters granted by a ContinueToSend frame
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FlowControl {
    /// Number of Consecutive Frames that may be sent before waiting for the
    /// next flow control frame. 0 means the whole remainder may be sent
    pub block_size: u8,
    /// Minimum separation time between Consecutive Frames, in milliseconds
    pub st_min: u8,
}

/// State of the flow control handshake
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlowControlState {
    /// Waiting for a flow control frame from the tester
    WaitingForFlowControl,
    /// Tester granted transmission
    ClearToSend(FlowControl),
    /// Tester signalled an overflow. Terminal
    Aborted,
    /// No usable flow control frame arrived in time. Terminal
    TimedOut,
}

/// Waits for and validates the tester's flow control frames during a
/// segmented transmission
#[derive(Debug, Copy, Clone)]
pub struct FlowControlReceiver {
    state: FlowControlState,
}

impl Default for FlowControlReceiver {
    fn default() -> Self {
        Self {
            state: FlowControlState::WaitingForFlowControl,
        }
    }
}

impl FlowControlReceiver {
    /// Creates a new receiver in the waiting state
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current handshake state
    pub fn state(&self) -> FlowControlState {
        self.state
    }

    /// Blocks until the tester at address `id` grants transmission, or the
    /// handshake terminates.
    ///
    /// A Wait frame restarts the timeout without any data being sent in the
    /// meantime. Frames from other addresses are skipped. An Overflow frame,
    /// a malformed frame from `id`, or `timeout_ms` elapsing without any
    /// frame terminate the handshake with the corresponding error
    pub fn await_clear_to_send<C: CanChannel + ?Sized>(
        &mut self,
        channel: &mut C,
        id: u32,
        timeout_ms: u32,
    ) -> ResponderResult<FlowControl> {
        self.state = FlowControlState::WaitingForFlowControl;
        let mut deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        loop {
            // Skipped frames from other addresses must not extend the wait,
            // so the deadline is checked on every pass
            let remaining = deadline
                .saturating_duration_since(Instant::now())
                .as_millis() as u32;
            if remaining == 0 {
                self.state = FlowControlState::TimedOut;
                return Err(ResponderError::FlowControlTimeout(timeout_ms));
            }
            let frame = match channel.receive(remaining) {
                Ok(f) => f,
                Err(ChannelError::ReadTimeout) | Err(ChannelError::BufferEmpty) => {
                    self.state = FlowControlState::TimedOut;
                    return Err(ResponderError::FlowControlTimeout(timeout_ms));
                }
                Err(e) => return Err(e.into()),
            };
            if frame.get_address() != id {
                log::debug!(
                    "ignoring frame from 0x{:04X} while waiting for flow control",
                    frame.get_address()
                );
                continue;
            }
            let data = frame.get_data();
            let pci = match data.first() {
                Some(p) if p & 0xF0 == PCI_FLOW_CONTROL => *p,
                _ => {
                    log::error!("expected flow control frame, got {data:02X?}");
                    self.state = FlowControlState::TimedOut;
                    return Err(ResponderError::FlowControlTimeout(timeout_ms));
                }
            };
            match pci & 0x0F {
                FC_CONTINUE_TO_SEND => {
                    let fc = FlowControl {
                        block_size: data.get(1).copied().unwrap_or(0),
                        st_min: data.get(2).copied().unwrap_or(0),
                    };
                    log::debug!(
                        "clear to send. BS: {}, STmin: {} ms",
                        fc.block_size,
                        fc.st_min
                    );
                    self.state = FlowControlState::ClearToSend(fc);
                    return Ok(fc);
                }
                FC_WAIT => {
                    // Each Wait restarts the timeout. No data goes out until
                    // the tester grants transmission
                    log::debug!("tester asked to wait, re-polling for flow control");
                    self.state = FlowControlState::WaitingForFlowControl;
                    deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
                }
                FC_OVERFLOW => {
                    log::error!("tester signalled flow control overflow, aborting transfer");
                    self.state = FlowControlState::Aborted;
                    return Err(ResponderError::FlowControlAborted);
                }
                x => {
                    log::error!("invalid flow control status 0x{x:X}");
                    self.state = FlowControlState::TimedOut;
                    return Err(ResponderError::FlowControlTimeout(timeout_ms));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulationCanChannel;

    const TESTER_ID: u32 = 0x7E0;

    #[test]
    fn continue_to_send_reports_parameters() {
        let mut chan = SimulationCanChannel::new();
        chan.queue_frame(TESTER_ID, &[0x30, 0x08, 0x14]);
        let mut fc = FlowControlReceiver::new();
        let res = fc.await_clear_to_send(&mut chan, TESTER_ID, 100).unwrap();
        assert_eq!(
            res,
            FlowControl {
                block_size: 8,
                st_min: 20
            }
        );
        assert_eq!(fc.state(), FlowControlState::ClearToSend(res));
    }

    #[test]
    fn wait_loops_back_to_waiting() {
        let mut chan = SimulationCanChannel::new();
        chan.queue_frame(TESTER_ID, &[0x31, 0x00, 0x00]);
        chan.queue_frame(TESTER_ID, &[0x31, 0x00, 0x00]);
        chan.queue_frame(TESTER_ID, &[0x30, 0x00, 0x00]);
        let mut fc = FlowControlReceiver::new();
        let res = fc.await_clear_to_send(&mut chan, TESTER_ID, 100).unwrap();
        assert_eq!(res.block_size, 0);
    }

    #[test]
    fn overflow_aborts() {
        let mut chan = SimulationCanChannel::new();
        chan.queue_frame(TESTER_ID, &[0x32, 0x00, 0x00]);
        let mut fc = FlowControlReceiver::new();
        let res = fc.await_clear_to_send(&mut chan, TESTER_ID, 100);
        assert!(matches!(res, Err(ResponderError::FlowControlAborted)));
        assert_eq!(fc.state(), FlowControlState::Aborted);
    }

    #[test]
    fn no_frame_times_out() {
        let mut chan = SimulationCanChannel::new();
        let mut fc = FlowControlReceiver::new();
        let res = fc.await_clear_to_send(&mut chan, TESTER_ID, 50);
        assert!(matches!(res, Err(ResponderError::FlowControlTimeout(50))));
        assert_eq!(fc.state(), FlowControlState::TimedOut);
    }

    #[test]
    fn non_flow_control_frame_times_out() {
        let mut chan = SimulationCanChannel::new();
        chan.queue_frame(TESTER_ID, &[0x02, 0x19, 0x01]);
        let mut fc = FlowControlReceiver::new();
        assert!(fc.await_clear_to_send(&mut chan, TESTER_ID, 50).is_err());
        assert_eq!(fc.state(), FlowControlState::TimedOut);
    }

    #[test]
    fn frames_from_other_ids_are_skipped() {
        let mut chan = SimulationCanChannel::new();
        chan.queue_frame(0x123, &[0x32, 0x00, 0x00]);
        chan.queue_frame(TESTER_ID, &[0x30, 0x00, 0x00]);
        let mut fc = FlowControlReceiver::new();
        assert!(fc.await_clear_to_send(&mut chan, TESTER_ID, 100).is_ok());
    }

    #[test]
    fn elapsed_deadline_times_out_despite_queued_frames() {
        let mut chan = SimulationCanChannel::new();
        // Frames are waiting, but the deadline has already passed
        chan.queue_frame(0x123, &[0x30, 0x00, 0x00]);
        chan.queue_frame(TESTER_ID, &[0x30, 0x00, 0x00]);
        let mut fc = FlowControlReceiver::new();
        let res = fc.await_clear_to_send(&mut chan, TESTER_ID, 0);
        assert!(matches!(res, Err(ResponderError::FlowControlTimeout(0))));
        assert_eq!(fc.state(), FlowControlState::TimedOut);
    }

    #[test]
    fn invalid_status_nibble_times_out() {
        let mut chan = SimulationCanChannel::new();
        chan.queue_frame(TESTER_ID, &[0x37, 0x00, 0x00]);
        let mut fc = FlowControlReceiver::new();
        assert!(matches!(
            fc.await_clear_to_send(&mut chan, TESTER_ID, 50),
            Err(ResponderError::FlowControlTimeout(_))
        ));
    }
}
