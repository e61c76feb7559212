//! Reassembly of streamed bursts into per-row word arrays.

use crate::transport::{CMD_CHANNEL, DeviceTransport, TransportError};

/// The data words of one DRAM row, in column order.
///
/// Owned by the caller for the duration of one row's read; length equals the
/// number of column words requested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowData {
    words: Vec<u64>,
}

impl RowData {
    /// Wraps an existing word array (used by tests and two-pass experiments
    /// that replay captured data).
    pub fn from_words(words: Vec<u64>) -> Self {
        RowData { words }
    }

    /// The row's words in column order.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Consumes the row into its word array.
    pub fn into_words(self) -> Vec<u64> {
        self.words
    }

    /// Number of column words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the row holds no words.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Byte `lane` (0..8, low to high) of column word `col`.
    pub fn byte(&self, col: usize, lane: usize) -> u8 {
        (self.words[col] >> (8 * lane)) as u8
    }
}

/// Receives `num_words` 64-bit column words from the device.
///
/// Repeatedly pulls one burst (8 words) until the row is assembled,
/// preserving request order as column order. Must be called after a
/// READ-class sequence executed; the transport delivers bursts in the order
/// the READ instructions were submitted.
///
/// # Errors
///
/// Propagates the transport's error for any single burst (short block,
/// timeout, link failure). No partial row is returned.
pub fn receive_row<T: DeviceTransport + ?Sized>(
    dev: &mut T,
    num_words: usize,
) -> Result<RowData, TransportError> {
    let mut words = Vec::with_capacity(num_words);
    while words.len() < num_words {
        let burst = dev.receive_burst(CMD_CHANNEL, None)?;
        for word in burst.words() {
            if words.len() == num_words {
                break;
            }
            words.push(word);
        }
    }
    Ok(RowData { words })
}
