//! Submission of built sequences to a device transport.

use crate::instruction::Instruction;
use crate::sequence::InstructionSequence;
use crate::transport::{CMD_CHANNEL, DeviceTransport, TransportError};
use log::trace;
use thiserror::Error;

/// Errors raised when submitting a sequence.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The sequence does not end with the end-transaction marker
    #[error("sequence does not end with an end-transaction marker")]
    MissingTerminator,
    /// The transport rejected the buffer
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Submits `seq` to the device for execution.
///
/// Valid only if the sequence's last instruction is
/// [`Instruction::EndTransaction`]; the device triggers the transaction on
/// that marker. Returns once the transport accepts the buffer; reading any
/// resulting data bursts is the caller's responsibility via
/// [`crate::receiver::receive_row`].
///
/// The physical bus direction and activated row/bank persist in hardware
/// after execution until the next bus-direction switch or precharge.
///
/// # Errors
///
/// [`ExecuteError::MissingTerminator`] on an unterminated sequence, or the
/// transport's error.
pub fn execute<T: DeviceTransport + ?Sized>(
    seq: &InstructionSequence,
    dev: &mut T,
) -> Result<(), ExecuteError> {
    match seq.instructions().last() {
        Some(Instruction::EndTransaction) => {}
        _ => return Err(ExecuteError::MissingTerminator),
    }
    trace!("submitting {} instructions", seq.len());
    dev.send(CMD_CHANNEL, seq.instructions())?;
    Ok(())
}

impl InstructionSequence {
    /// Convenience wrapper around [`execute`].
    pub fn execute<T: DeviceTransport + ?Sized>(&self, dev: &mut T) -> Result<(), ExecuteError> {
        execute(self, dev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Burst;
    use std::time::Duration;

    struct AcceptAll {
        sent: Vec<Vec<Instruction>>,
    }

    impl DeviceTransport for AcceptAll {
        fn reset(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn send(
            &mut self,
            _channel: usize,
            instructions: &[Instruction],
        ) -> Result<(), TransportError> {
            self.sent.push(instructions.to_vec());
            Ok(())
        }
        fn receive_burst(
            &mut self,
            _channel: usize,
            _timeout: Option<Duration>,
        ) -> Result<Burst, TransportError> {
            Err(TransportError::Timeout(Duration::ZERO))
        }
    }

    #[test]
    fn rejects_unterminated_sequence() {
        let mut dev = AcceptAll { sent: vec![] };
        let mut seq = InstructionSequence::new();
        seq.precharge_wait(0).unwrap();
        assert!(matches!(
            execute(&seq, &mut dev),
            Err(ExecuteError::MissingTerminator)
        ));
        assert!(dev.sent.is_empty());

        // empty sequences are rejected too
        seq.clear();
        assert!(matches!(
            execute(&seq, &mut dev),
            Err(ExecuteError::MissingTerminator)
        ));
    }

    #[test]
    fn forwards_terminated_sequence() {
        let mut dev = AcceptAll { sent: vec![] };
        let mut seq = InstructionSequence::new();
        seq.precharge_wait(1).unwrap();
        seq.terminate().unwrap();
        seq.execute(&mut dev).unwrap();
        assert_eq!(dev.sent.len(), 1);
        assert_eq!(dev.sent[0].last(), Some(&Instruction::EndTransaction));
    }
}
