//! # Mandrel
//!
//! Mandrel is a modular framework for DRAM direct-command experiments. It
//! builds cycle-accurate instruction sequences for a memory-controller
//! command channel, streams them through a device transport, and verifies
//! the data coming back bit-by-bit. It is the machinery behind
//! retention-time, timing-margin and sense-amplifier studies.
//!
//! ## Quickstart guide
//!
//! ```sh
//! # Run the experiment controllers against the software device model
//! cargo run --release -p mandrel-bin --bin retention_eval -- \
//!     --pattern 0x66 --retention-ms 64 --rows 64 --banks 2
//! ```
//!
//! For real hardware, implement
//! [`transport::DeviceTransport`](mandrel_core::transport::DeviceTransport)
//! for your channel and hand it to the controllers in
//! [`sweep`](mandrel_core::sweep).
//!
//! ## Modules
//!
//! - `instruction`: The closed DRAM instruction sum type and its wire codec.
//! - `sequence`: Reusable, capacity-bounded instruction sequences.
//! - `executor` / `receiver`: Sequence submission and burst reassembly.
//! - `verify`: Bitwise pattern verification and error accounting.
//! - `ops` / `sweep`: Row-level command routines and experiment controllers.
//! - `report`: Tabular result artifacts.
//!
//! The optional `loopback` feature re-exports the software DRAM model from
//! `mandrel-loopback`.

#![warn(missing_docs)]

pub use mandrel_core::{
    config, executor, instruction, ops, receiver, report, sequence, sweep, transport, verify,
};

pub use mandrel_core::{
    Burst, BusDirection, DeviceTransport, DramConfig, ErrorTally, ExecuteError, Instruction,
    InstructionSequence, PrechargeScope, RefreshRegister, RowData, SequenceError, TransportError,
    broadcast_pattern, execute, receive_row,
};

#[cfg(feature = "loopback")]
pub use mandrel_loopback::LoopbackDevice;
