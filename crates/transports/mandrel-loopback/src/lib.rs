//! Loopback device model for testing and simulation.
//!
//! This crate provides a software DRAM model behind the
//! [`mandrel_core::transport::DeviceTransport`] trait. Submitted instruction
//! buffers are encoded to wire words, decoded back and interpreted against
//! an in-memory storage array; READ instructions produce response bursts
//! exactly as the hardware channel would.
//!
//! # Use Cases
//!
//! - Integration testing of the Mandrel framework
//! - Running experiment controllers without device access
//! - Simulating retention failures via bit-flip injection

#![warn(missing_docs)]

mod loopback;

pub use loopback::LoopbackDevice;
