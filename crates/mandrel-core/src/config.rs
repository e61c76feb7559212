//! Device geometry and fixed protocol timing.

use serde::Serialize;

/// Capacity of the hardware instruction buffer (8192 entries).
///
/// Sequences longer than this cannot be accepted by the device in a single
/// transaction.
pub const INSTR_BUFFER_CAPACITY: usize = 8192;

/// Precharge-to-activate recovery time (tRP) in controller cycles.
///
/// One cycle has already elapsed when the next instruction issues, so 5
/// yields 6 cycles of latency (~15 ns at the default clock).
pub const TRP_CYCLES: u32 = 5;

/// CAS latency plus the 4-cycle double-data-rate burst, in controller cycles.
pub const TCL_BURST_CYCLES: u32 = 6 + 4;

/// Extra settle cycles appended after a full-row burst sequence.
pub const SETTLE_CYCLES: u32 = 3;

/// Default activate-to-read/write delay (tRCD) in controller cycles.
pub const DEFAULT_TRCD: u32 = 5;

/// Number of column positions covered by a single RD/WR burst.
///
/// Each command transfers an 8-word (64-byte) burst, so column offsets in
/// full-row sequences advance in steps of 8.
pub const BURST_COLS: usize = 8;

/// DRAM geometry the sequencer operates against.
///
/// One column corresponds to one 64-bit word of row data. The struct is
/// immutable and passed explicitly into the experiment controllers; there is
/// no process-wide geometry state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DramConfig {
    /// Number of 64-bit column words per row
    pub num_cols: usize,
    /// Number of rows per bank
    pub num_rows: usize,
    /// Number of banks
    pub num_banks: usize,
}

impl Default for DramConfig {
    fn default() -> Self {
        DramConfig {
            num_cols: 1024,
            num_rows: 32768,
            num_banks: 8,
        }
    }
}

impl DramConfig {
    /// Number of RD/WR bursts needed to cover one full row.
    pub fn bursts_per_row(&self) -> usize {
        self.num_cols / BURST_COLS
    }

    /// Total number of rows across all banks.
    pub fn total_rows(&self) -> usize {
        self.num_rows * self.num_banks
    }
}
