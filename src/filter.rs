//! DTC status mask filtering policy
//!
//! A tester supplies a status mask with every ReadDTCInformation request. A
//! stored DTC is selected when any of its status bits is also set in the
//! mask. ISO14229 testers commonly send 0xFF ("all supported status bits");
//! a mask of 0x00 carries no bits to intersect with, and this responder
//! treats it as the same "report everything" request rather than an empty
//! selection. That choice is pinned by [REPORT_ALL_MASK] and the tests below.

/// Status mask value that selects every stored DTC
pub const REPORT_ALL_MASK: u8 = 0x00;

/// Returns true if a DTC with status byte `status` is selected by
/// `status_mask`
pub fn matches(status: u8, status_mask: u8) -> bool {
    status_mask == REPORT_ALL_MASK || status & status_mask != 0
}
