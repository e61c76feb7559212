//! Bitwise pattern verification and error accounting.
//!
//! Received row data is compared word-by-word against a byte-broadcast
//! expected pattern; mismatching words are walked bit-by-bit with a mask
//! starting at bit 0 and shifting left. The traversal order is stable across
//! passes, because two-pass experiments correlate failures by bit position.

use crate::receiver::RowData;
use serde::Serialize;

/// Replicates a byte across all eight lanes of a 64-bit word.
pub fn broadcast_pattern(pattern: u8) -> u64 {
    u64::from_le_bytes([pattern; 8])
}

/// Accumulated bit-error statistics for one test run.
///
/// Created per run, updated incrementally as rows are verified, finalized
/// once into a percentage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ErrorTally {
    errors: u64,
    reference_matches: u64,
    words: u64,
}

impl ErrorTally {
    /// Creates an empty tally.
    pub fn new() -> Self {
        ErrorTally::default()
    }

    /// Verifies a row of words against the expected 64-bit pattern.
    ///
    /// Counts every bit position where the observed word differs from
    /// `expected`. All words of the row, matching or not, count toward the
    /// observed-bits denominator.
    pub fn verify(&mut self, row: &[u64], expected: u64) {
        self.words += row.len() as u64;
        for &word in row {
            if word == expected {
                continue;
            }
            let mut mask = 1u64;
            for _ in 0..64 {
                if word & mask != expected & mask {
                    self.errors += 1;
                }
                mask <<= 1;
            }
        }
    }

    /// Verifies a row against the expected pattern while correlating with a
    /// reference pass.
    ///
    /// `reference` holds raw words captured in an earlier pass (for example a
    /// reduced-tRCD timing pass) over the same row. Every mismatching bit
    /// counts as an error; when the reference word's bit at the same
    /// position was also wrong, the reference-match counter increments too.
    /// This measures how many retention failures coincide with
    /// timing-marginal cells.
    pub fn verify_with_reference(&mut self, row: &[u64], expected: u64, reference: &[u64]) {
        debug_assert_eq!(row.len(), reference.len());
        self.words += row.len() as u64;
        for (&word, &reference) in row.iter().zip(reference) {
            if word == expected {
                continue;
            }
            let mut mask = 1u64;
            for _ in 0..64 {
                if word & mask != expected & mask {
                    self.errors += 1;
                    if reference & mask != expected & mask {
                        self.reference_matches += 1;
                    }
                }
                mask <<= 1;
            }
        }
    }

    /// Total bit mismatches recorded so far.
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Mismatches that coincided with a reference-pass mismatch.
    pub fn reference_matches(&self) -> u64 {
        self.reference_matches
    }

    /// Words observed so far.
    pub fn words(&self) -> u64 {
        self.words
    }

    /// Errors as a fraction of all observed bits, in percent.
    pub fn error_percentage(&self) -> f64 {
        if self.words == 0 {
            return 0.0;
        }
        self.errors as f64 / (self.words as f64 * 64.0) * 100.0
    }

    /// Reference matches as a fraction of all errors, in percent.
    pub fn matched_percentage(&self) -> f64 {
        if self.errors == 0 {
            return 0.0;
        }
        self.reference_matches as f64 / self.errors as f64 * 100.0
    }
}

/// A single mismatching byte located within a row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ByteFault {
    /// Column word index within the row
    pub col: usize,
    /// Byte lane within the word (0 = least significant)
    pub lane: usize,
    /// The byte actually observed
    pub observed: u8,
}

/// Scans a row byte-by-byte for deviations from the pattern byte.
///
/// Used for fine-grained fault localization; the caller attaches bank/row
/// context when logging.
pub fn locate_byte_faults(row: &RowData, pattern: u8) -> Vec<ByteFault> {
    let mut faults = vec![];
    for col in 0..row.len() {
        for lane in 0..8 {
            let observed = row.byte(col, lane);
            if observed != pattern {
                faults.push(ByteFault {
                    col,
                    lane,
                    observed,
                });
            }
        }
    }
    faults
}
