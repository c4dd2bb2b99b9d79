#![warn(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications,
    clippy::uninlined_format_args
)]

//! ECU-side responder core for the UDS (ISO14229) ReadDTCInformation service (0x19)
//! over a CAN transport.
//!
//! This crate answers a diagnostic tester's request to enumerate the
//! Diagnostic trouble codes (DTCs) stored on an ECU. Two sub-functions are
//! implemented:
//!
//! * `0x01` - ReportNumberOfDTCByStatusMask. Replies with the number of stored
//!   DTCs whose status byte matches the requested status mask
//! * `0x02` - ReportDTCByStatusMask. Replies with every matching DTC and its
//!   status byte, segmenting the response over multiple CAN frames
//!   (ISO15765-2 style) when it does not fit in a single frame, including the
//!   flow control handshake with the tester
//!
//! The DTCs themselves are loaded once at startup from a text record file
//! (see [dtc]), and the CAN interface is abstracted behind the
//! [channel::CanChannel] trait so the whole protocol core can be exercised
//! against [simulation::SimulationCanChannel] without real hardware.

use channel::ChannelError;

pub mod channel;
pub mod dtc;
pub mod filter;
pub mod flow_control;
pub mod frame;
pub mod hardware;
pub mod responder;
pub mod simulation;

/// Responder operation result
pub type ResponderResult<T> = Result<T, ResponderError>;

#[derive(Debug, thiserror::Error)]
/// Error produced by the DTC responder core
pub enum ResponderError {
    /// The request did not carry both a sub-function byte and a status mask byte
    #[error("request too short ({0} bytes), expected sub-function and status mask")]
    IncorrectMessageLength(usize),
    /// The requested ReadDTCInformation sub-function is not implemented.
    /// A negative response with NRC 0x12 is triggered for these requests
    #[error("ReadDTCInformation sub-function 0x{0:02X} is not supported")]
    UnsupportedSubFunction(u8),
    /// A line of the DTC record source failed to parse
    #[error("malformed DTC record on line {line}: {reason}")]
    MalformedRecord {
        /// 1-based line number within the record source
        line: usize,
        /// Description of the parse failure
        reason: String,
    },
    /// The DTC record source could not be opened
    #[error("DTC record source could not be opened")]
    StoreUnavailable(#[source] std::io::Error),
    /// The report response would not fit the 12 bit First Frame length
    /// field, so a segmented transfer cannot announce it
    #[error("response payload of {0} bytes exceeds the segmented transfer limit")]
    ResponseTooLong(usize),
    /// No valid flow control frame arrived within the configured timeout
    #[error("no flow control frame received within {0} ms")]
    FlowControlTimeout(u32),
    /// The tester signalled a flow control overflow, aborting the transfer
    #[error("transmission aborted by flow control overflow")]
    FlowControlAborted,
    /// Error with the underlying CAN channel
    #[error("CAN channel error")]
    Channel(
        #[from]
        #[source]
        ChannelError,
    ),
}
