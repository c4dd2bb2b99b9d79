//! The ReadDTCInformation (0x19) service responder
//!
//! [DtcResponder] owns the DTC store and the CAN channel for one diagnostic
//! session. Requests are serviced one at a time, including the full
//! multi-frame handshake, matching the half-duplex request/response
//! semantics of the protocol: the tester will not issue another request
//! until flow control for the current one completes or times out.

use std::time::Duration;

use strum_macros::FromRepr;

use crate::channel::CanChannel;
use crate::dtc::DtcStore;
use crate::flow_control::FlowControlReceiver;
use crate::frame::{
    FrameBuilder, CONSECUTIVE_FRAME_DATA_LEN, FIRST_FRAME_DATA_LEN, MAX_SEGMENTED_PAYLOAD,
};
use crate::{ResponderError, ResponderResult};

/// NRC: sub-function not supported
pub const NRC_SUB_FUNCTION_NOT_SUPPORTED: u8 = 0x12;
/// NRC: incorrect message length or invalid format
pub const NRC_INCORRECT_MESSAGE_LENGTH: u8 = 0x13;
/// NRC: response too long for the transport protocol
pub const NRC_RESPONSE_TOO_LONG: u8 = 0x14;

/// The ReadDTCInformation sub-functions implemented by this responder
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum DtcSubFunction {
    /// Report the number of DTCs matching a 1 byte DTCStatusMask
    ReportNumberOfDtcByStatusMask = 0x01,
    /// Report every DTC matching a 1 byte DTCStatusMask
    ReportDtcByStatusMask = 0x02,
}

/// Handler for events the responder raises but does not act on itself.
///
/// The negative response message is built and transmitted by the generic
/// service dispatcher that owns this responder; the responder only reports
/// the reason code
pub trait ResponderEventHandler {
    /// A request was rejected with the given NRC. `id` is the CAN address
    /// the request arrived from
    fn on_negative_response(&mut self, id: u32, nrc: u8);
}

/// Event handler that discards everything
#[derive(Debug, Copy, Clone)]
pub struct VoidResponderEventHandler;

impl ResponderEventHandler for VoidResponderEventHandler {
    #[inline(always)]
    fn on_negative_response(&mut self, _id: u32, _nrc: u8) {}
}

#[derive(Debug, Copy, Clone)]
/// DTC responder options
pub struct ResponderOptions {
    /// CAN ID the responder transmits its responses with
    pub send_id: u32,
    /// Timeout for each flow control wait in ms
    pub fc_timeout_ms: u32,
    /// Pad transmitted frames to 8 bytes
    pub pad_frame: bool,
}

impl Default for ResponderOptions {
    fn default() -> Self {
        Self {
            send_id: 0x7E8,
            fc_timeout_ms: 1000,
            pad_frame: true,
        }
    }
}

/// UDS service 0x19 responder core
#[derive(Debug)]
pub struct DtcResponder<C: CanChannel, E: ResponderEventHandler> {
    options: ResponderOptions,
    channel: C,
    store: DtcStore,
    builder: FrameBuilder,
    flow_control: FlowControlReceiver,
    event_handler: E,
}

impl<C: CanChannel, E: ResponderEventHandler> DtcResponder<C, E> {
    /// Creates a new responder over an already configured CAN channel.
    ///
    /// ## Parameters
    /// * options - Responder options
    /// * channel - CAN channel shared with the tester
    /// * store - The ECU's DTC store, loaded at startup
    /// * event_handler - Receives the negative response triggers. Use
    ///   [VoidResponderEventHandler] if you don't need them
    pub fn new(options: ResponderOptions, channel: C, store: DtcStore, event_handler: E) -> Self {
        Self {
            options,
            channel,
            builder: FrameBuilder::new(options.pad_frame),
            flow_control: FlowControlReceiver::new(),
            store,
            event_handler,
        }
    }

    /// Returns the responder's DTC store
    pub fn store(&self) -> &DtcStore {
        &self.store
    }

    /// Services one ReadDTCInformation request.
    ///
    /// ## Parameters
    /// * id - CAN address the request arrived from. Flow control frames for a
    ///   segmented response are expected from this address
    /// * data - Service payload: `data[0]` is the sub-function, `data[1]` the
    ///   DTC status mask
    pub fn handle_request(&mut self, id: u32, data: &[u8]) -> ResponderResult<()> {
        if data.len() < 2 {
            log::warn!("ReadDTCInformation request from 0x{id:04X} too short: {data:02X?}");
            self.event_handler
                .on_negative_response(id, NRC_INCORRECT_MESSAGE_LENGTH);
            return Err(ResponderError::IncorrectMessageLength(data.len()));
        }
        let status_mask = data[1];
        match DtcSubFunction::from_repr(data[0]) {
            Some(DtcSubFunction::ReportNumberOfDtcByStatusMask) => {
                self.report_number_of_dtcs(status_mask)
            }
            Some(DtcSubFunction::ReportDtcByStatusMask) => self.report_dtcs(id, status_mask),
            None => {
                log::warn!(
                    "unsupported ReadDTCInformation sub-function 0x{:02X} from 0x{id:04X}",
                    data[0]
                );
                self.event_handler
                    .on_negative_response(id, NRC_SUB_FUNCTION_NOT_SUPPORTED);
                Err(ResponderError::UnsupportedSubFunction(data[0]))
            }
        }
    }

    /// Sub-function 0x01. The 4 byte payload always fits a Single Frame
    fn report_number_of_dtcs(&mut self, status_mask: u8) -> ResponderResult<()> {
        let count = self.store.count(status_mask);
        log::debug!("{count} DTCs match status mask 0x{status_mask:02X}");
        let payload = [
            DtcSubFunction::ReportNumberOfDtcByStatusMask as u8,
            status_mask,
            (count >> 8) as u8,
            (count & 0xFF) as u8,
        ];
        let frame = self.builder.single_frame(self.options.send_id, &payload);
        self.channel.send(frame).map_err(Into::into)
    }

    /// Sub-function 0x02. The payload grows 4 bytes per matching DTC, so it
    /// usually needs segmentation
    fn report_dtcs(&mut self, id: u32, status_mask: u8) -> ResponderResult<()> {
        let records = self.store.query(status_mask);
        log::debug!(
            "reporting {} DTCs for status mask 0x{status_mask:02X}",
            records.len()
        );
        let mut payload = Vec::with_capacity(2 + records.len() * 4);
        payload.push(DtcSubFunction::ReportDtcByStatusMask as u8);
        payload.push(status_mask);
        for rec in records {
            payload.extend_from_slice(&rec.code_bytes());
            payload.push(rec.status);
        }

        if payload.len() <= FIRST_FRAME_DATA_LEN {
            let frame = self.builder.single_frame(self.options.send_id, &payload);
            self.channel.send(frame).map_err(Into::into)
        } else if payload.len() > MAX_SEGMENTED_PAYLOAD {
            // A First Frame can only announce 12 bits of length. Nothing is
            // sent; the tester must narrow the status mask
            log::error!(
                "report of {} bytes cannot be announced by a First Frame",
                payload.len()
            );
            self.event_handler
                .on_negative_response(id, NRC_RESPONSE_TOO_LONG);
            Err(ResponderError::ResponseTooLong(payload.len()))
        } else {
            self.send_segmented(id, &payload)
        }
    }

    /// Sends `payload` as a First Frame plus Consecutive Frames, gated by the
    /// tester's flow control. A failed handshake fails the whole response;
    /// the error is propagated and nothing more is sent
    fn send_segmented(&mut self, tester_id: u32, payload: &[u8]) -> ResponderResult<()> {
        log::debug!("segmenting {} byte response: {payload:02X?}", payload.len());
        let first = self.builder.first_frame(
            self.options.send_id,
            payload.len(),
            &payload[..FIRST_FRAME_DATA_LEN],
        );
        self.channel.send(first)?;

        let mut fc = self.flow_control.await_clear_to_send(
            &mut self.channel,
            tester_id,
            self.options.fc_timeout_ms,
        )?;

        let mut pos = FIRST_FRAME_DATA_LEN;
        // Sequence numbers start at 1 after the First Frame and wrap 15 -> 0
        let mut sn: u8 = 1;
        let mut frames_in_block: u8 = 0;
        while pos < payload.len() {
            let chunk_len = std::cmp::min(CONSECUTIVE_FRAME_DATA_LEN, payload.len() - pos);
            let frame =
                self.builder
                    .consecutive_frame(self.options.send_id, sn, &payload[pos..pos + chunk_len]);
            self.channel.send(frame)?;
            pos += chunk_len;
            sn = (sn + 1) & 0x0F;
            frames_in_block += 1;

            if pos < payload.len() {
                if fc.block_size != 0 && frames_in_block == fc.block_size {
                    // Block exhausted, the tester must grant the next one
                    fc = self.flow_control.await_clear_to_send(
                        &mut self.channel,
                        tester_id,
                        self.options.fc_timeout_ms,
                    )?;
                    frames_in_block = 0;
                }
                if fc.st_min > 0 {
                    std::thread::sleep(Duration::from_millis(fc.st_min as u64));
                }
            }
        }
        log::debug!("segmented response complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtc::DtcStore;
    use crate::simulation::SimulationCanChannel;
    use std::io::Cursor;
    use std::sync::{Arc, RwLock};

    const TESTER_ID: u32 = 0x7E0;

    #[derive(Debug, Clone, Default)]
    struct RecordingHandler {
        nrcs: Arc<RwLock<Vec<(u32, u8)>>>,
    }

    impl ResponderEventHandler for RecordingHandler {
        fn on_negative_response(&mut self, id: u32, nrc: u8) {
            self.nrcs.write().unwrap().push((id, nrc));
        }
    }

    fn make_responder(
        src: &str,
    ) -> (
        DtcResponder<SimulationCanChannel, RecordingHandler>,
        SimulationCanChannel,
        RecordingHandler,
    ) {
        let chan = SimulationCanChannel::new();
        let handler = RecordingHandler::default();
        let store = DtcStore::from_reader(Cursor::new(src.to_string()));
        let responder = DtcResponder::new(
            ResponderOptions {
                send_id: 0x7E8,
                fc_timeout_ms: 100,
                pad_frame: false,
            },
            chan.clone(),
            store,
            handler.clone(),
        );
        (responder, chan, handler)
    }

    #[test]
    fn short_request_triggers_nrc_0x13() {
        let (mut responder, chan, handler) = make_responder("123456:08\n");
        let res = responder.handle_request(TESTER_ID, &[0x01]);
        assert!(matches!(res, Err(ResponderError::IncorrectMessageLength(1))));
        assert_eq!(
            handler.nrcs.read().unwrap().as_slice(),
            &[(TESTER_ID, NRC_INCORRECT_MESSAGE_LENGTH)]
        );
        assert!(chan.sent_frames().is_empty());
    }

    #[test]
    fn unsupported_sub_function_triggers_nrc_0x12() {
        let (mut responder, chan, handler) = make_responder("123456:08\n");
        let res = responder.handle_request(TESTER_ID, &[0x05, 0xFF]);
        assert!(matches!(res, Err(ResponderError::UnsupportedSubFunction(0x05))));
        assert_eq!(
            handler.nrcs.read().unwrap().as_slice(),
            &[(TESTER_ID, NRC_SUB_FUNCTION_NOT_SUPPORTED)]
        );
        // No positive response goes out
        assert!(chan.sent_frames().is_empty());
    }

    #[test]
    fn number_of_dtcs_is_a_single_frame() {
        let (mut responder, chan, _) = make_responder("123456:08\n789ABC:01\n");
        responder.handle_request(TESTER_ID, &[0x01, 0x08]).unwrap();
        let sent = chan.sent_frames();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].get_address(), 0x7E8);
        assert_eq!(sent[0].get_data(), &[0x04, 0x01, 0x08, 0x00, 0x01]);
    }

    #[test]
    fn empty_store_reports_zero_count() {
        let (mut responder, chan, _) = make_responder("");
        responder.handle_request(TESTER_ID, &[0x01, 0xFF]).unwrap();
        assert_eq!(chan.sent_frames()[0].get_data(), &[0x04, 0x01, 0xFF, 0x00, 0x00]);
    }

    #[test]
    fn single_dtc_report_fits_one_frame() {
        let (mut responder, chan, _) = make_responder("123456:08\n");
        responder.handle_request(TESTER_ID, &[0x02, 0x08]).unwrap();
        let sent = chan.sent_frames();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].get_data(), &[0x06, 0x02, 0x08, 0x12, 0x34, 0x56, 0x08]);
    }

    #[test]
    fn report_too_large_for_first_frame_is_rejected() {
        // 1024 matching DTCs give a 4098 byte payload, past the 12 bit
        // First Frame length field (4095)
        let src: String = (0..1024)
            .map(|i| format!("{:06X}:01\n", 0x100000 + i))
            .collect();
        let (mut responder, chan, handler) = make_responder(&src);
        let res = responder.handle_request(TESTER_ID, &[0x02, 0xFF]);
        assert!(matches!(res, Err(ResponderError::ResponseTooLong(4098))));
        assert!(chan.sent_frames().is_empty(), "nothing may be sent");
        assert_eq!(
            handler.nrcs.read().unwrap().as_slice(),
            &[(TESTER_ID, NRC_RESPONSE_TOO_LONG)]
        );
    }

    #[test]
    fn flow_control_timeout_sends_no_consecutive_frames() {
        let (mut responder, chan, _) = make_responder("123456:08\n789ABC:01\n");
        // Nothing scripted on the channel, so the FC wait times out
        let res = responder.handle_request(TESTER_ID, &[0x02, 0xFF]);
        assert!(matches!(res, Err(ResponderError::FlowControlTimeout(_))));
        let sent = chan.sent_frames();
        assert_eq!(sent.len(), 1); // Only the First Frame
        assert_eq!(sent[0].get_data()[0] & 0xF0, 0x10);
    }
}
