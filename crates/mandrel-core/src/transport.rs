//! The device-transport seam.
//!
//! This module defines the [`DeviceTransport`] trait that all hardware
//! channels must implement. The sequencer core never talks to a device
//! directly; it submits instruction buffers and pulls fixed-size response
//! bursts through this trait. Concrete implementations live in their own
//! crates (see `mandrel-loopback` for the software model).

use crate::instruction::Instruction;
use std::time::Duration;
use thiserror::Error;

/// Size of one hardware receive unit in bytes (16 machine words).
pub const BURST_BYTES: usize = 64;

/// Number of 64-bit data words in one burst.
pub const BURST_WORDS: usize = 8;

/// Channel carrying command and data traffic.
pub const CMD_CHANNEL: usize = 0;

/// One fixed-size block of streamed response data.
///
/// A burst is 64 bytes, interpretable either as eight 64-bit words for
/// aggregate pattern comparison or as sixty-four bytes for fine-grained
/// fault localization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Burst {
    raw: [u8; BURST_BYTES],
}

impl Burst {
    /// Wraps 64 raw bytes as a burst.
    pub fn new(raw: [u8; BURST_BYTES]) -> Self {
        Burst { raw }
    }

    /// An all-zero burst.
    pub fn zeroed() -> Self {
        Burst {
            raw: [0; BURST_BYTES],
        }
    }

    /// Builds a burst from eight 64-bit words in column order.
    pub fn from_words(words: [u64; BURST_WORDS]) -> Self {
        let mut raw = [0u8; BURST_BYTES];
        for (chunk, word) in raw.chunks_exact_mut(8).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Burst { raw }
    }

    /// The burst as eight 64-bit words, little-endian, in column order.
    pub fn words(&self) -> [u64; BURST_WORDS] {
        let mut words = [0u64; BURST_WORDS];
        for (word, chunk) in words.iter_mut().zip(self.raw.chunks_exact(8)) {
            *word = u64::from_le_bytes(chunk.try_into().unwrap());
        }
        words
    }

    /// The burst as raw bytes.
    pub fn bytes(&self) -> &[u8; BURST_BYTES] {
        &self.raw
    }
}

/// Errors reported by a device transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No device with the requested id could be opened
    #[error("device {0} unavailable")]
    DeviceUnavailable(usize),
    /// The transport delivered fewer bytes than one full burst
    #[error("short burst: expected {expected} bytes, received {received}")]
    ShortBurst {
        /// Bytes requested
        expected: usize,
        /// Bytes actually delivered
        received: usize,
    },
    /// No burst arrived within the receive timeout
    #[error("receive timed out after {0:?}")]
    Timeout(Duration),
    /// The instruction buffer exceeds the hardware limit
    #[error("instruction buffer overflow: {len} instructions, capacity {capacity}")]
    Overflow {
        /// Instructions submitted
        len: usize,
        /// Hardware buffer capacity
        capacity: usize,
    },
    /// Link-level failure
    #[error("link error: {0}")]
    Link(String),
}

/// Trait for hardware channels that execute instruction buffers and stream
/// back data bursts.
///
/// A transport is a single exclusively-owned resource: one submitter, one
/// sequential stream of bursts. Bursts are consumed strictly in the order
/// the corresponding READ instructions were submitted.
///
/// Opening and closing a device are implementation-specific constructors and
/// drops on the concrete type; a failed open reports
/// [`TransportError::DeviceUnavailable`].
pub trait DeviceTransport {
    /// Resets the device, recovering it from an unknown state.
    ///
    /// Clears any pending response data; the bus direction and activated
    /// rows become undefined until reprogrammed.
    fn reset(&mut self) -> Result<(), TransportError>;

    /// Submits an instruction buffer for encoding and streaming.
    ///
    /// Returns once the transport has accepted the buffer; it does not wait
    /// for the transaction to produce data.
    ///
    /// # Errors
    ///
    /// [`TransportError::Overflow`] when the buffer exceeds the hardware
    /// instruction-buffer capacity, or a link error.
    fn send(&mut self, channel: usize, instructions: &[Instruction]) -> Result<(), TransportError>;

    /// Blocks until one full burst is available on `channel`.
    ///
    /// # Errors
    ///
    /// [`TransportError::Timeout`] when no data arrives within `timeout`
    /// (or, for `None`, the implementation's default), or
    /// [`TransportError::ShortBurst`] when the link delivers a truncated
    /// block.
    fn receive_burst(
        &mut self,
        channel: usize,
        timeout: Option<Duration>,
    ) -> Result<Burst, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_and_bytes_agree() {
        let mut raw = [0u8; BURST_BYTES];
        raw[8] = 0xAB; // low byte of word 1
        raw[63] = 0x01; // high byte of word 7
        let burst = Burst::new(raw);
        let words = burst.words();
        assert_eq!(words[0], 0);
        assert_eq!(words[1], 0xAB);
        assert_eq!(words[7], 0x01 << 56);
        assert_eq!(Burst::from_words(words), burst);
    }
}
