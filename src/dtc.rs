//! Module for the ECU's stored Diagnostic trouble codes (DTCs)
//!
//! DTCs are loaded once at responder startup from a text record file
//! (format version 1, a controlled convention with whatever populates the
//! file):
//!
//! ```text
//! # one record per line, '#' starts a comment
//! <hex DTC digits>:<hex status byte>
//! 123456:08
//! 789ABC          # status omitted, reads as 0x00
//! ```
//!
//! The DTC token is the three DTC bytes written as a base-16 number. A line
//! whose token contains a non-hex digit, or which has more than two fields,
//! is malformed; malformed lines are skipped with a warning and never abort
//! the load. The store is immutable after loading, so it can be shared
//! freely between diagnostic sessions.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::filter;
use crate::{ResponderError, ResponderResult};

bitflags::bitflags! {
    /// The standard ISO14229 DTC status bits carried in each record's
    /// status byte
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct DtcStatus: u8 {
        /// Result of the most recently performed test was failed
        const TEST_FAILED = 0x01;
        /// Test failed at some point during the current operation cycle
        const TEST_FAILED_THIS_OPERATION_CYCLE = 0x02;
        /// DTC is pending confirmation
        const PENDING = 0x04;
        /// DTC is confirmed and stored in non volatile memory
        const CONFIRMED = 0x08;
        /// Test has not run to completion since the last code clear
        const TEST_NOT_COMPLETED_SINCE_LAST_CLEAR = 0x10;
        /// Test failed at least once since the last code clear
        const TEST_FAILED_SINCE_LAST_CLEAR = 0x20;
        /// Test has not run to completion during the current operation cycle
        const TEST_NOT_COMPLETED_THIS_OPERATION_CYCLE = 0x40;
        /// DTC requests the warning indicator (MIL) to be lit
        const WARNING_INDICATOR_REQUESTED = 0x80;
    }
}

/// One stored Diagnostic trouble code
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DtcRecord {
    /// The raw 24 bit DTC value (the three DTC bytes in big endian numeric form)
    pub code: u32,
    /// The ISO14229 status byte of the DTC. See [DtcStatus]
    pub status: u8,
}

impl DtcRecord {
    /// Returns the three DTC bytes in transmission (big endian) order
    pub fn code_bytes(&self) -> [u8; 3] {
        [
            ((self.code >> 16) & 0xFF) as u8,
            ((self.code >> 8) & 0xFF) as u8,
            (self.code & 0xFF) as u8,
        ]
    }
}

/// The set of DTCs known to the ECU, in record source order
#[derive(Debug, Clone, Default)]
pub struct DtcStore {
    records: Vec<DtcRecord>,
}

/// Field delimiter between the DTC digits and the status byte
const RECORD_DELIMITER: char = ':';

impl DtcStore {
    /// Loads the store from the DTC record file at `path`.
    ///
    /// If the file cannot be opened the store starts empty (the responder
    /// must still answer count requests with 0 rather than die), and a
    /// warning is logged. Malformed lines are skipped with a warning
    pub fn load(path: &Path) -> Self {
        match File::open(path) {
            Ok(f) => Self::from_reader(BufReader::new(f)),
            Err(e) => {
                log::warn!(
                    "DTC record source {path:?} unavailable ({}), starting with an empty store",
                    ResponderError::StoreUnavailable(e)
                );
                Self::default()
            }
        }
    }

    /// Loads the store from any line-oriented reader
    pub fn from_reader<R: BufRead>(reader: R) -> Self {
        let mut records: Vec<DtcRecord> = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    log::warn!("stopping DTC record read after IO error: {e}");
                    break;
                }
            };
            match parse_record_line(idx + 1, &line) {
                Ok(Some(rec)) => {
                    if records.iter().any(|r| r.code == rec.code) {
                        log::warn!(
                            "duplicate DTC 0x{:06X} on line {}, keeping first occurrence",
                            rec.code,
                            idx + 1
                        );
                    } else {
                        records.push(rec);
                    }
                }
                Ok(None) => {} // Blank line or comment
                Err(e) => log::warn!("skipping DTC record: {e}"),
            }
        }
        log::debug!("DTC store loaded with {} records", records.len());
        Self { records }
    }

    /// Returns the number of stored DTCs whose status matches `status_mask`
    pub fn count(&self, status_mask: u8) -> u16 {
        self.records
            .iter()
            .filter(|r| filter::matches(r.status, status_mask))
            .count() as u16
    }

    /// Returns the stored DTCs whose status matches `status_mask`, in record
    /// source order
    pub fn query(&self, status_mask: u8) -> Vec<DtcRecord> {
        self.records
            .iter()
            .filter(|r| filter::matches(r.status, status_mask))
            .copied()
            .collect()
    }

    /// Returns the total number of records in the store, ignoring any filter
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the store holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Parses one line of the record source. Returns `Ok(None)` for blank lines
/// and comments
fn parse_record_line(line_no: usize, line: &str) -> ResponderResult<Option<DtcRecord>> {
    let content = match line.split_once('#') {
        Some((before, _)) => before,
        None => line,
    }
    .trim();
    if content.is_empty() {
        return Ok(None);
    }

    let malformed = |reason: &str| ResponderError::MalformedRecord {
        line: line_no,
        reason: reason.to_string(),
    };

    let (code_token, status_token) = match content.split_once(RECORD_DELIMITER) {
        Some((c, s)) => (c.trim(), Some(s.trim())),
        None => (content, None),
    };
    if let Some(s) = status_token {
        if s.contains(RECORD_DELIMITER) {
            return Err(malformed("too many fields"));
        }
    }

    let code = u32::from_str_radix(code_token, 16)
        .map_err(|_| malformed("DTC token is not a hexadecimal number"))?;
    if code > 0xFF_FFFF {
        return Err(malformed("DTC value does not fit in 24 bits"));
    }
    // Status defaults to 0 when the field is absent
    let status = match status_token {
        Some(s) if !s.is_empty() => u8::from_str_radix(s, 16)
            .map_err(|_| malformed("status byte is not a hexadecimal number"))?,
        _ => 0,
    };

    Ok(Some(DtcRecord { code, status }))
}
