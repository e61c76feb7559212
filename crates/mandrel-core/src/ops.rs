//! Row-level command routines.
//!
//! These functions assemble the canonical protocol idioms (precharge,
//! activate, burst loop, settle, precharge) into a caller-owned
//! [`InstructionSequence`], submit them, and where applicable pull the
//! response data. The sequence is cleared and rebuilt on every call so tight
//! experiment loops never allocate.
//!
//! Bus-direction correctness is the caller's invariant: a batch of writes
//! must be preceded by [`turn_bus`] to [`BusDirection::Write`] and a batch
//! of reads by a switch to [`BusDirection::Read`]. The builders do not check
//! this; issuing against the wrong direction is undefined hardware behavior.

use crate::config::{DEFAULT_TRCD, DramConfig};
use crate::executor::ExecuteError;
use crate::instruction::{BusDirection, Instruction, RefreshRegister};
use crate::receiver::{RowData, receive_row};
use crate::sequence::{InstructionSequence, SequenceError};
use crate::transport::{CMD_CHANNEL, DeviceTransport, TransportError};
use log::debug;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by row-level command routines.
#[derive(Debug, Error)]
pub enum OpError {
    /// Building the sequence violated a builder contract
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    /// Submitting the sequence failed
    #[error(transparent)]
    Execute(#[from] ExecuteError),
    /// Receiving response data failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Switches the data-bus direction.
pub fn turn_bus<T: DeviceTransport + ?Sized>(
    dev: &mut T,
    dir: BusDirection,
    seq: &mut InstructionSequence,
) -> Result<(), OpError> {
    seq.clear();
    seq.bus_dir_wait(dir)?;
    seq.terminate()?;
    seq.execute(dev)?;
    Ok(())
}

/// Writes `pattern` across an entire row.
///
/// Precharges the target bank first in case it was left activated, then
/// activates the row, bursts the pattern across all columns, settles, and
/// precharges again. The bus must already be in write direction.
pub fn write_row<T: DeviceTransport + ?Sized>(
    dev: &mut T,
    bank: u8,
    row: u32,
    pattern: u8,
    cfg: &DramConfig,
    seq: &mut InstructionSequence,
) -> Result<(), OpError> {
    seq.clear();
    seq.precharge_wait(bank)?;
    seq.activate_wait(bank, row, DEFAULT_TRCD)?;
    seq.full_row_write(bank, pattern, cfg.num_cols)?;
    seq.drain()?;
    seq.precharge_wait(bank)?;
    seq.terminate()?;
    seq.execute(dev)?;
    Ok(())
}

/// Issues a full-row read with a caller-supplied tRCD.
///
/// Does not receive the resulting bursts; follow up with
/// [`receive_row`] (or use [`read_row`]).
pub fn send_row_read<T: DeviceTransport + ?Sized>(
    dev: &mut T,
    bank: u8,
    row: u32,
    trcd: u32,
    cfg: &DramConfig,
    seq: &mut InstructionSequence,
) -> Result<(), OpError> {
    seq.clear();
    seq.precharge_wait(bank)?;
    seq.activate_wait(bank, row, trcd)?;
    seq.full_row_read(bank, cfg.num_cols)?;
    seq.drain()?;
    seq.precharge_wait(bank)?;
    seq.terminate()?;
    seq.execute(dev)?;
    Ok(())
}

/// Issues a single-burst read at `col` with a caller-supplied tRCD.
///
/// Activates the row for every burst so the sense amplifiers see the reduced
/// tRCD on each access; the row is deliberately not precharged afterwards.
pub fn send_row_column_read<T: DeviceTransport + ?Sized>(
    dev: &mut T,
    bank: u8,
    row: u32,
    col: u16,
    trcd: u32,
    seq: &mut InstructionSequence,
) -> Result<(), OpError> {
    seq.clear();
    seq.precharge_wait(bank)?;
    seq.activate_wait(bank, row, trcd)?;
    seq.burst_read(bank, col)?;
    seq.drain()?;
    seq.terminate()?;
    seq.execute(dev)?;
    Ok(())
}

/// Reads back an entire row: submits the read sequence and assembles the
/// response bursts into [`RowData`].
pub fn read_row<T: DeviceTransport + ?Sized>(
    dev: &mut T,
    bank: u8,
    row: u32,
    trcd: u32,
    cfg: &DramConfig,
    seq: &mut InstructionSequence,
) -> Result<RowData, OpError> {
    send_row_read(dev, bank, row, trcd, cfg, seq)?;
    Ok(receive_row(dev, cfg.num_cols)?)
}

/// Reprograms the clock generator.
///
/// DDR speed = `mult` x 100 MHz with `div_in` = 1 and `div_out` = 4.
pub fn set_clock_speed<T: DeviceTransport + ?Sized>(
    dev: &mut T,
    mult: u8,
    div_in: u8,
    div_out: u8,
    seq: &mut InstructionSequence,
) -> Result<(), OpError> {
    seq.clear();
    seq.push(Instruction::Clock {
        mult,
        div_in,
        div_out,
    })?;
    seq.terminate()?;
    seq.execute(dev)?;
    Ok(())
}

/// Base clock of the generator in MHz.
const BASE_CLK_MHZ: u32 = 400;

/// Reads back the effective fabric clock in MHz.
///
/// The device streams its clock configuration as a burst after a clock
/// reprogram; lanes 0, 1 and 2 of the 32-bit receive words carry the
/// multiplier and dividers.
pub fn get_clock_speed<T: DeviceTransport + ?Sized>(dev: &mut T) -> Result<u32, OpError> {
    let burst = dev.receive_burst(CMD_CHANNEL, None)?;
    let bytes = burst.bytes();
    let mult = bytes[0] as u32;
    let div_in = bytes[4] as u32;
    let div_out = bytes[8] as u32;
    if div_in == 0 || div_out == 0 {
        return Err(OpError::Transport(TransportError::Link(format!(
            "invalid clock readback: mult={mult} div_in={div_in} div_out={div_out}"
        ))));
    }
    let ddr_clk = (BASE_CLK_MHZ * mult) / (div_in * div_out);
    Ok(ddr_clk / 2)
}

/// Writes the refresh configuration registers.
///
/// Writes tRFC first, then tREFI. Provide `trefi` = 0 to disable
/// auto-refresh (it is disabled by default after a device reset).
pub fn set_refresh_config<T: DeviceTransport + ?Sized>(
    dev: &mut T,
    trefi: u32,
    trfc: u32,
    seq: &mut InstructionSequence,
) -> Result<(), OpError> {
    seq.clear();
    seq.refresh_config(RefreshRegister::Trfc, trfc)?;
    seq.refresh_config(RefreshRegister::Trefi, trefi)?;
    seq.terminate()?;
    seq.execute(dev)?;
    Ok(())
}

/// Number of receive attempts a FIFO flush performs.
const FLUSH_ATTEMPTS: usize = 200;

/// Timeout per receive attempt during a FIFO flush.
const FLUSH_TIMEOUT: Duration = Duration::from_millis(5);

/// Drains stale bursts left in the device's read FIFO.
///
/// Receives with a short timeout a bounded number of times, discarding data
/// and ignoring timeouts. Run after a reset, before the first experiment.
pub fn flush_read_fifo<T: DeviceTransport + ?Sized>(dev: &mut T) {
    debug!("flushing read FIFO");
    let mut drained = 0usize;
    for _ in 0..FLUSH_ATTEMPTS {
        if dev.receive_burst(CMD_CHANNEL, Some(FLUSH_TIMEOUT)).is_ok() {
            drained += 1;
        }
    }
    debug!("read FIFO flush drained {} stale burst(s)", drained);
}
