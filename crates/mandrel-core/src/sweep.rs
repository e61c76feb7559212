//! Experiment controllers.
//!
//! The controllers in this module orchestrate the write / wait-retention /
//! turn-bus / read-and-verify cycle over a configured parameter space. They
//! own the two protocol invariants the lower layers deliberately do not
//! check: the bus direction is switched before every batch of writes and
//! again before every batch of reads, and the retention delay is enforced
//! against a monotonic clock so that work performed while waiting never
//! shortens it.
//!
//! Coverage is banked: the row index advances first and wraps into a bank
//! increment, and a sweep terminates once the last bank is exhausted.

use crate::config::DramConfig;
use crate::instruction::BusDirection;
use crate::ops::{
    OpError, read_row, send_row_column_read, set_clock_speed, turn_bus, write_row,
};
use crate::receiver::{RowData, receive_row};
use crate::report::{Field, ReportWriter};
use crate::sequence::InstructionSequence;
use crate::transport::DeviceTransport;
use crate::verify::{ErrorTally, broadcast_pattern};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use itertools::iproduct;
use log::{info, warn};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Phase of the experiment cycle a failure occurred in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// Writing the data pattern
    Write,
    /// Enforcing the retention delay
    WaitRetention,
    /// Switching the bus direction
    TurnBus,
    /// Reading back and verifying
    ReadVerify,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Write => write!(f, "write"),
            Phase::WaitRetention => write!(f, "wait-retention"),
            Phase::TurnBus => write!(f, "turn-bus"),
            Phase::ReadVerify => write!(f, "read-and-verify"),
        }
    }
}

/// A sweep failure with enough context to locate the affected sample.
#[derive(Debug, Error)]
#[error("{phase} failed at bank {bank}, row {row}")]
pub struct SweepError {
    /// Phase the failure occurred in
    pub phase: Phase,
    /// Bank being processed
    pub bank: usize,
    /// Row being processed
    pub row: usize,
    /// Underlying failure
    #[source]
    pub source: OpError,
}

impl SweepError {
    fn at(phase: Phase, bank: usize, row: usize) -> impl FnOnce(OpError) -> SweepError {
        move |source| SweepError {
            phase,
            bank,
            row,
            source,
        }
    }
}

/// Data pattern selection for experiments.
#[derive(Clone, Copy, Debug, Serialize)]
pub enum PatternKind {
    /// All zeros (0x00)
    Zero,
    /// All ones (0xFF)
    One,
    /// A fixed caller-chosen byte
    Fixed(u8),
    /// A random byte, drawn once per run
    Random,
}

impl PatternKind {
    /// Resolves the pattern to its byte value.
    pub fn byte(&self) -> u8 {
        match self {
            PatternKind::Zero => 0x00,
            PatternKind::One => 0xFF,
            PatternKind::Fixed(byte) => *byte,
            PatternKind::Random => rand::random(),
        }
    }
}

/// Position of a banked-coverage cursor.
///
/// Advancing moves to the next row, wrapping the row back to 0 and
/// incrementing the bank when a bank's row range is exhausted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RowCursor {
    /// Current row within the bank
    pub row: usize,
    /// Current bank
    pub bank: usize,
}

impl RowCursor {
    /// Advances to the next position.
    ///
    /// Returns `false` once the bank index reaches the configured bank
    /// count; the sweep is exhausted at that point regardless of any rows
    /// still scheduled in the current batch.
    pub fn advance(&mut self, dram: &DramConfig) -> bool {
        self.row += 1;
        if self.row == dram.num_rows {
            self.row = 0;
            self.bank += 1;
        }
        self.bank < dram.num_banks
    }
}

/// Blocks until `retention` has elapsed since `start`.
///
/// The check runs against the monotonic clock, so writes or bus switches
/// performed between `start` and this call count toward the delay without
/// ever shortening it.
pub fn wait_for_retention(start: Instant, retention: Duration) {
    loop {
        let elapsed = start.elapsed();
        if elapsed >= retention {
            return;
        }
        std::thread::sleep((retention - elapsed).min(Duration::from_millis(50)));
    }
}

/// Configuration for a whole-device retention sweep.
#[derive(Clone, Debug)]
pub struct SweepConfig {
    /// Data pattern written to every row
    pub pattern: PatternKind,
    /// Retention delay between writing a group and reading it back
    pub retention: Duration,
    /// Activate-to-read delay used during verification
    pub trcd: u32,
    /// Rows written per group before waiting; `None` derives it from the
    /// retention time (writing one row takes roughly 5 ms)
    pub group_size: Option<usize>,
    /// Times a row read is retried on a transport error before the sweep
    /// aborts
    pub max_row_retries: u32,
    /// Device geometry
    pub dram: DramConfig,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            pattern: PatternKind::One,
            retention: Duration::from_millis(64),
            trcd: crate::config::DEFAULT_TRCD,
            group_size: None,
            max_row_retries: 1,
            dram: DramConfig::default(),
        }
    }
}

impl SweepConfig {
    fn effective_group_size(&self) -> usize {
        match self.group_size {
            Some(size) => size.max(1),
            // writing an entire row takes approximately 5 ms
            None => ((self.retention.as_millis() as f64 / 5.0).ceil() as usize).max(1),
        }
    }
}

/// Verification result for one row.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct RowSample {
    /// Bank the row belongs to
    pub bank: usize,
    /// Row index within the bank
    pub row: usize,
    /// Bit errors observed in this row
    pub errors: u64,
}

/// Results of a completed retention sweep.
#[derive(Debug, Serialize)]
pub struct SweepData {
    /// ISO 8601 timestamp of when the sweep ran
    pub date: String,
    /// Resolved pattern byte
    pub pattern: u8,
    /// Retention delay in milliseconds
    pub retention_ms: u64,
    /// Per-row verification results in coverage order
    pub samples: Vec<RowSample>,
    /// Total bit errors across the sweep
    pub errors: u64,
    /// Errors as a fraction of all observed bits, in percent
    pub error_percentage: f64,
}

impl SweepData {
    /// Dumps the sweep record as pretty-printed JSON.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(std::io::Error::from)
    }
}

fn sweep_bar(progress: Option<&MultiProgress>, name: &str, len: u64) -> Option<ProgressBar> {
    progress.map(|p| {
        let bar = p.add(ProgressBar::new(len));
        let template = format!(
            "{:<24} {{wide_bar:40.cyan/blue}} {{pos:>6}}/{{len:<6}} [{{elapsed_precise}}]",
            name
        );
        bar.set_style(
            ProgressStyle::default_bar()
                .template(&template)
                .unwrap_or(ProgressStyle::default_bar()),
        );
        bar
    })
}

/// Whole-device retention sweep.
///
/// Writes groups of rows, enforces the retention delay, then reads each row
/// back and verifies it bit-by-bit, advancing write and read cursors through
/// the banked coverage order. Transport errors during verification are
/// retried at row granularity; a row that keeps failing aborts the sweep
/// with full context, leaving already-reported samples intact.
pub struct RetentionSweep {
    config: SweepConfig,
    progress: Option<MultiProgress>,
}

impl RetentionSweep {
    /// Creates a sweep from its configuration.
    pub fn new(config: SweepConfig) -> Self {
        RetentionSweep {
            config,
            progress: None,
        }
    }

    /// Attaches progress reporting.
    pub fn progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Runs the sweep to completion.
    ///
    /// When `report` is given, one row per verified sample is appended (and
    /// flushed) as the sweep progresses.
    pub fn run<T: DeviceTransport + ?Sized>(
        &self,
        dev: &mut T,
        mut report: Option<&mut ReportWriter>,
    ) -> Result<SweepData, SweepError> {
        let pattern = self.config.pattern.byte();
        let expected = broadcast_pattern(pattern);
        let dram = self.config.dram;
        let group_size = self.config.effective_group_size();
        let mut seq = InstructionSequence::new();
        let mut tally = ErrorTally::new();
        let mut samples = vec![];

        if let Some(report) = report.as_deref_mut() {
            if let Err(e) = report.header(&["bank", "row", "errors"]) {
                warn!("failed to write report header: {}", e);
            }
        }

        let bar = sweep_bar(
            self.progress.as_ref(),
            "Rows verified",
            dram.total_rows() as u64,
        );

        info!(
            "starting retention sweep: pattern {:#04x}, retention {:?}, group size {}",
            pattern, self.config.retention, group_size
        );

        let mut write_cur = RowCursor::default();
        let mut read_cur = RowCursor::default();
        let mut exhausted = false;

        while !exhausted {
            turn_bus(dev, BusDirection::Write, &mut seq)
                .map_err(SweepError::at(Phase::TurnBus, write_cur.bank, write_cur.row))?;

            let write_start = Instant::now();
            let mut written = 0usize;
            for _ in 0..group_size {
                write_row(
                    dev,
                    write_cur.bank as u8,
                    write_cur.row as u32,
                    pattern,
                    &dram,
                    &mut seq,
                )
                .map_err(SweepError::at(Phase::Write, write_cur.bank, write_cur.row))?;
                written += 1;
                if !write_cur.advance(&dram) {
                    exhausted = true;
                    break;
                }
            }

            turn_bus(dev, BusDirection::Read, &mut seq)
                .map_err(SweepError::at(Phase::TurnBus, read_cur.bank, read_cur.row))?;

            wait_for_retention(write_start, self.config.retention);

            for _ in 0..written {
                let row_data =
                    self.read_row_with_retries(dev, &mut seq, &dram, read_cur)?;
                let before = tally.errors();
                tally.verify(row_data.words(), expected);
                let row_errors = tally.errors() - before;
                if row_errors > 0 {
                    warn!(
                        "{} bit error(s) at bank {}, row {}",
                        row_errors, read_cur.bank, read_cur.row
                    );
                }
                samples.push(RowSample {
                    bank: read_cur.bank,
                    row: read_cur.row,
                    errors: row_errors,
                });
                if let Some(report) = report.as_deref_mut() {
                    let _ = report.row(&[
                        Field::Dec(read_cur.bank as u64),
                        Field::Dec(read_cur.row as u64),
                        Field::Dec(row_errors),
                    ]);
                }
                if let Some(bar) = &bar {
                    bar.inc(1);
                }
                if !read_cur.advance(&dram) {
                    break;
                }
            }
        }
        if let Some(bar) = &bar {
            bar.finish();
        }

        info!(
            "retention sweep done: {} error(s), {:.4}%",
            tally.errors(),
            tally.error_percentage()
        );

        Ok(SweepData {
            date: chrono::Local::now().to_rfc3339(),
            pattern,
            retention_ms: self.config.retention.as_millis() as u64,
            samples,
            errors: tally.errors(),
            error_percentage: tally.error_percentage(),
        })
    }

    fn read_row_with_retries<T: DeviceTransport + ?Sized>(
        &self,
        dev: &mut T,
        seq: &mut InstructionSequence,
        dram: &DramConfig,
        cur: RowCursor,
    ) -> Result<RowData, SweepError> {
        let mut attempt = 0;
        loop {
            match read_row(dev, cur.bank as u8, cur.row as u32, self.config.trcd, dram, seq) {
                Ok(row) => return Ok(row),
                Err(e) if attempt < self.config.max_row_retries => {
                    attempt += 1;
                    warn!(
                        "read-and-verify at bank {}, row {} failed ({}), retry {}/{}",
                        cur.bank, cur.row, e, attempt, self.config.max_row_retries
                    );
                }
                Err(e) => {
                    return Err(SweepError::at(Phase::ReadVerify, cur.bank, cur.row)(e));
                }
            }
        }
    }
}

/// Results of a cell-matching experiment.
#[derive(Debug, Serialize)]
pub struct MatchData {
    /// ISO 8601 timestamp of when the experiment ran
    pub date: String,
    /// Retention-induced bit errors in the second pass
    pub errors: u64,
    /// Errors that coincide with a timing-pass failure at the same bit
    pub matches: u64,
    /// Coinciding errors as a fraction of all errors, in percent
    pub matched_percentage: f64,
}

/// Two-pass timing-vs-retention coincidence experiment.
///
/// Pass one reads every tested row with a deliberately short tRCD and keeps
/// the raw words as the timing-marginal reference. Pass two writes the
/// pattern again, waits out the retention delay, reads at nominal tRCD and
/// counts how many retention failures hit bits that were already wrong in
/// the timing pass. The bit traversal order is identical in both passes, so
/// coincidences are bit-position exact.
pub struct CellMatching {
    /// Number of rows tested, starting at row 0
    pub rows: usize,
    /// Bank under test
    pub bank: u8,
    /// Data pattern
    pub pattern: u8,
    /// Reduced tRCD for the timing pass
    pub timing_trcd: u32,
    /// Nominal tRCD for the retention pass
    pub trcd: u32,
    /// Retention delay for the second pass
    pub retention: Duration,
    /// Device geometry
    pub dram: DramConfig,
}

impl CellMatching {
    /// Runs both passes and correlates their failures.
    pub fn run<T: DeviceTransport + ?Sized>(&self, dev: &mut T) -> Result<MatchData, SweepError> {
        let expected = broadcast_pattern(self.pattern);
        let bank = self.bank as usize;
        let mut seq = InstructionSequence::new();

        info!("cell matching: capturing timing reference at tRCD {}", self.timing_trcd);
        let mut reference: Vec<RowData> = Vec::with_capacity(self.rows);
        for row in 0..self.rows {
            turn_bus(dev, BusDirection::Write, &mut seq)
                .map_err(SweepError::at(Phase::TurnBus, bank, row))?;
            write_row(dev, self.bank, row as u32, self.pattern, &self.dram, &mut seq)
                .map_err(SweepError::at(Phase::Write, bank, row))?;
            turn_bus(dev, BusDirection::Read, &mut seq)
                .map_err(SweepError::at(Phase::TurnBus, bank, row))?;
            // one short-tRCD activation per burst so every access sees the
            // reduced timing
            for col in (0..self.dram.num_cols).step_by(crate::config::BURST_COLS) {
                send_row_column_read(
                    dev,
                    self.bank,
                    row as u32,
                    col as u16,
                    self.timing_trcd,
                    &mut seq,
                )
                .map_err(SweepError::at(Phase::ReadVerify, bank, row))?;
            }
            let data = receive_row(dev, self.dram.num_cols)
                .map_err(|e| SweepError::at(Phase::ReadVerify, bank, row)(e.into()))?;
            reference.push(data);
        }

        info!("cell matching: writing retention pass");
        turn_bus(dev, BusDirection::Write, &mut seq)
            .map_err(SweepError::at(Phase::TurnBus, bank, 0))?;
        let write_start = Instant::now();
        for row in 0..self.rows {
            write_row(dev, self.bank, row as u32, self.pattern, &self.dram, &mut seq)
                .map_err(SweepError::at(Phase::Write, bank, row))?;
        }

        info!("cell matching: waiting {:?} retention", self.retention);
        wait_for_retention(write_start, self.retention);

        turn_bus(dev, BusDirection::Read, &mut seq)
            .map_err(SweepError::at(Phase::TurnBus, bank, 0))?;
        let mut tally = ErrorTally::new();
        for (row, reference) in reference.iter().enumerate() {
            let data = read_row(dev, self.bank, row as u32, self.trcd, &self.dram, &mut seq)
                .map_err(SweepError::at(Phase::ReadVerify, bank, row))?;
            tally.verify_with_reference(data.words(), expected, reference.words());
        }

        info!(
            "cell matching done: {} match(es), {} error(s)",
            tally.reference_matches(),
            tally.errors()
        );
        Ok(MatchData {
            date: chrono::Local::now().to_rfc3339(),
            errors: tally.errors(),
            matches: tally.reference_matches(),
            matched_percentage: tally.matched_percentage(),
        })
    }
}

/// One sampled point of a systematic sweep.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SystematicSample {
    /// Fabric clock in MHz the point was sampled at
    pub clock_mhz: u32,
    /// Retention delay in milliseconds
    pub retention_ms: u64,
    /// Effective tRCD in nanoseconds at the sampled clock
    pub trcd_ns: f64,
    /// Bit errors across the point's row block
    pub errors: u64,
    /// Errors as a fraction of the block's bits, in percent
    pub error_percentage: f64,
}

/// Cartesian sweep over clock multiplier, retention delay and tRCD.
///
/// For every clock setting the controller writes one contiguous block of
/// rows per (retention, tRCD) cell, then reads the blocks back as their
/// retention deadlines pass. Results stream into the report artifact as
/// they are produced.
pub struct SystematicSweep {
    /// Data pattern
    pub pattern: u8,
    /// Clock multipliers to sweep (DDR speed = mult x 100 MHz)
    pub clock_mults: Vec<u8>,
    /// Number of retention steps
    pub retention_steps: usize,
    /// Delay added per retention step
    pub retention_step: Duration,
    /// tRCD values to sweep, in cycles
    pub trcds: Vec<u32>,
    /// Rows per sampled cell
    pub rows_per_cell: usize,
    /// Bank under test
    pub bank: u8,
    /// Device geometry
    pub dram: DramConfig,
}

impl SystematicSweep {
    /// Rows written per clock setting.
    fn rows_per_clock(&self) -> usize {
        self.rows_per_cell * self.trcds.len() * self.retention_steps
    }

    /// Runs the sweep, appending one report row per sampled cell.
    pub fn run<T: DeviceTransport + ?Sized>(
        &self,
        dev: &mut T,
        report: &mut ReportWriter,
    ) -> Result<Vec<SystematicSample>, SweepError> {
        let expected = broadcast_pattern(self.pattern);
        let bank = self.bank as usize;
        let rows_per_clock = self.rows_per_clock();
        debug_assert!(rows_per_clock <= self.dram.num_rows);
        let mut seq = InstructionSequence::new();
        let mut samples = vec![];

        if let Err(e) = report.header(&["tRCD in ns", "retention ms", "errors", "error percentage"])
        {
            warn!("failed to write report header: {}", e);
        }

        for &mult in &self.clock_mults {
            let fabric_mhz = 200 * mult as u32 / 4;
            info!("systematic sweep: clock {} MHz", fabric_mhz);
            set_clock_speed(dev, mult, 1, 4, &mut seq)
                .map_err(SweepError::at(Phase::Write, bank, 0))?;
            // let the reprogrammed clock settle before issuing commands
            std::thread::sleep(Duration::from_secs(1));

            turn_bus(dev, BusDirection::Write, &mut seq)
                .map_err(SweepError::at(Phase::TurnBus, bank, 0))?;
            for row in 0..rows_per_clock {
                write_row(dev, self.bank, row as u32, self.pattern, &self.dram, &mut seq)
                    .map_err(SweepError::at(Phase::Write, bank, row))?;
            }
            let write_done = Instant::now();

            turn_bus(dev, BusDirection::Read, &mut seq)
                .map_err(SweepError::at(Phase::TurnBus, bank, 0))?;

            let mut row_offset = 0usize;
            for (step, trcd_idx) in iproduct!(0..self.retention_steps, 0..self.trcds.len()) {
                let trcd = self.trcds[trcd_idx];
                if trcd_idx == 0 {
                    wait_for_retention(write_done, self.retention_step * step as u32);
                }
                let mut tally = ErrorTally::new();
                for r in 0..self.rows_per_cell {
                    let row = (row_offset + r) as u32;
                    let data = read_row(dev, self.bank, row, trcd, &self.dram, &mut seq)
                        .map_err(SweepError::at(Phase::ReadVerify, bank, row as usize))?;
                    tally.verify(data.words(), expected);
                }
                row_offset += self.rows_per_cell;

                let trcd_ns = trcd as f64 * 1000.0 / fabric_mhz as f64;
                let retention_ms = (self.retention_step * step as u32).as_millis() as u64;
                let sample = SystematicSample {
                    clock_mhz: fabric_mhz,
                    retention_ms,
                    trcd_ns,
                    errors: tally.errors(),
                    error_percentage: tally.error_percentage(),
                };
                let _ = report.row(&[
                    Field::Float(sample.trcd_ns),
                    Field::Dec(sample.retention_ms),
                    Field::Dec(sample.errors),
                    Field::Float(sample.error_percentage),
                ]);
                samples.push(sample);
            }
        }
        Ok(samples)
    }
}
