//! # Mandrel Core
//!
//! `mandrel-core` is the foundational library for the Mandrel DRAM
//! direct-command sequencer framework. It builds cycle-accurate instruction
//! sequences for a memory-controller command channel, streams them to a
//! device, reassembles the returned data bursts, and verifies data integrity
//! bit-by-bit. It is the kernel behind retention-time, timing-margin and
//! sense-amplifier experiments.
//!
//! ## Architecture Overview
//!
//! The framework is layered around one seam trait:
//!
//! - [`transport::DeviceTransport`] - Defines the hardware channel: accept an
//!   ordered instruction buffer, stream back fixed-size data bursts. Concrete
//!   transports live in their own crates (see `mandrel-loopback` for the
//!   software DRAM model used in tests and simulation).
//!
//! ## Main Components
//!
//! - [`instruction`] module - The closed [`instruction::Instruction`] sum
//!   type over the DRAM protocol operations and its 32-bit wire codec.
//!
//! - [`sequence`] module - [`sequence::InstructionSequence`], a reusable,
//!   capacity-bounded instruction buffer with composition helpers for the
//!   standard protocol idioms (precharge-then-wait, full-row burst
//!   read/write).
//!
//! - [`executor`], [`receiver`] modules - Submission of terminated sequences
//!   and reassembly of response bursts into per-row word arrays.
//!
//! - [`verify`] module - Bitwise pattern verification with
//!   [`verify::ErrorTally`] accumulation and two-pass coincidence counting.
//!
//! - [`ops`], [`sweep`] modules - Row-level command routines and the
//!   experiment controllers (retention sweep, cell matching, systematic
//!   parameter sweep) that orchestrate bus turns and enforced retention
//!   waits.
//!
//! - [`report`] module - Tabular result artifacts with explicit per-field
//!   radix.
//!
//! ## Concurrency Model
//!
//! Single-threaded, synchronous and blocking: one exclusively-owned device
//! channel, sequential submit and receive calls, no internal parallelism and
//! no cancellation. A submitted sequence cannot be aborted mid-flight;
//! experiments size their row batches so an interrupted run leaves the
//! hardware recoverable (every write sequence begins with an unconditional
//! precharge).

#![warn(missing_docs)]

pub mod config;
pub mod executor;
pub mod instruction;
pub mod ops;
pub mod receiver;
pub mod report;
pub mod sequence;
pub mod sweep;
pub mod transport;
pub mod verify;

pub use crate::config::DramConfig;
pub use crate::executor::{ExecuteError, execute};
pub use crate::instruction::{BusDirection, Instruction, PrechargeScope, RefreshRegister};
pub use crate::receiver::{RowData, receive_row};
pub use crate::sequence::{InstructionSequence, SequenceError};
pub use crate::transport::{Burst, DeviceTransport, TransportError};
pub use crate::verify::{ErrorTally, broadcast_pattern};
