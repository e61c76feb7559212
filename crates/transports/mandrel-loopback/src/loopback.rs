use log::{debug, trace, warn};
use mandrel_core::config::{DramConfig, INSTR_BUFFER_CAPACITY};
use mandrel_core::instruction::{BusDirection, Instruction, PrechargeScope, RefreshRegister};
use mandrel_core::transport::{BURST_BYTES, Burst, CMD_CHANNEL, DeviceTransport, TransportError};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Byte value served for reads that violate the bus protocol.
///
/// Real hardware returns garbage in that situation; the model returns a
/// recognizable constant so misbehaving experiments fail loudly in
/// verification.
const PROTOCOL_GARBAGE: u8 = 0xEE;

/// Software DRAM model behind the transport trait.
///
/// The model keeps sparse per-row storage, tracks the bus direction and the
/// activated row of every bank, and services READ bursts through a response
/// FIFO in request order. Wire words are decoded with the same codec a
/// hardware channel would use, so the full encode path is exercised on every
/// submission.
pub struct LoopbackDevice {
    dram: DramConfig,
    /// Row storage, filled on first write. Unwritten rows read as 0x00.
    rows: HashMap<(u8, u32), Vec<u8>>,
    active: Vec<Option<u32>>,
    bus: Option<BusDirection>,
    read_fifo: VecDeque<Burst>,
    clock: (u8, u8, u8),
    refresh: HashMap<RefreshRegister, u32>,
    weak: Vec<(u8, u32, usize, u8)>,
    cycles: u64,
}

impl LoopbackDevice {
    /// Opens device `id`.
    ///
    /// The model provides a single device; any other id fails with
    /// [`TransportError::DeviceUnavailable`].
    pub fn open(id: usize, dram: DramConfig) -> Result<Self, TransportError> {
        if id != 0 {
            return Err(TransportError::DeviceUnavailable(id));
        }
        debug!("loopback device {} opened ({:?})", id, dram);
        Ok(LoopbackDevice {
            active: vec![None; dram.num_banks],
            dram,
            rows: HashMap::new(),
            bus: None,
            read_fifo: VecDeque::new(),
            clock: (6, 1, 3),
            refresh: HashMap::new(),
            weak: Vec::new(),
            cycles: 0,
        })
    }

    /// Closes the device, dropping all model state.
    pub fn close(self) {}

    /// Controller cycles consumed by executed WAIT instructions.
    pub fn elapsed_cycles(&self) -> u64 {
        self.cycles
    }

    /// Last programmed clock configuration (mult, div_in, div_out).
    pub fn clock_config(&self) -> (u8, u8, u8) {
        self.clock
    }

    /// Last value written to a refresh register, if any.
    pub fn refresh_register(&self, register: RefreshRegister) -> Option<u32> {
        self.refresh.get(&register).copied()
    }

    /// Flips one stored bit, simulating a retention or timing failure.
    ///
    /// `byte_index` addresses the row's bytes (column word x 8 + lane). The
    /// row is materialized as zeros if it was never written.
    pub fn flip_bit(&mut self, bank: u8, row: u32, byte_index: usize, bit: u8) {
        let row_bytes = self.dram.num_cols * 8;
        assert!(byte_index < row_bytes, "byte index {} out of row", byte_index);
        assert!(bit < 8);
        let storage = self
            .rows
            .entry((bank, row))
            .or_insert_with(|| vec![0; row_bytes]);
        storage[byte_index] ^= 1 << bit;
    }

    /// Marks a cell as weak: every read of it returns the stored bit
    /// flipped, regardless of what was written.
    pub fn mark_weak(&mut self, bank: u8, row: u32, byte_index: usize, bit: u8) {
        assert!(byte_index < self.dram.num_cols * 8);
        assert!(bit < 8);
        self.weak.push((bank, row, byte_index, bit));
    }

    fn apply(&mut self, instr: Instruction) {
        match instr {
            Instruction::Precharge { bank, scope } => match scope {
                PrechargeScope::Single => {
                    if let Some(active) = self.active.get_mut(bank as usize) {
                        *active = None;
                    }
                }
                PrechargeScope::All => self.active.fill(None),
            },
            Instruction::Activate { bank, row } => {
                if let Some(active) = self.active.get_mut(bank as usize) {
                    *active = Some(row);
                }
            }
            Instruction::Read { bank, col } => {
                let burst = self.read_burst(bank, col);
                self.read_fifo.push_back(burst);
            }
            Instruction::Write { bank, col, pattern } => self.write_burst(bank, col, pattern),
            Instruction::Wait { cycles } => self.cycles += cycles as u64,
            Instruction::BusDir { dir } => {
                trace!("bus direction -> {:?}", dir);
                self.bus = Some(dir);
            }
            Instruction::Clock {
                mult,
                div_in,
                div_out,
            } => {
                self.clock = (mult, div_in, div_out);
                // the device streams its clock configuration back as a burst
                let mut raw = [0u8; BURST_BYTES];
                raw[0] = mult;
                raw[4] = div_in;
                raw[8] = div_out;
                self.read_fifo.push_back(Burst::new(raw));
            }
            Instruction::Refresh { register, value } => {
                self.refresh.insert(register, value);
            }
            Instruction::EndTransaction => {}
        }
    }

    fn read_burst(&mut self, bank: u8, col: u16) -> Burst {
        if self.bus != Some(BusDirection::Read) {
            warn!("READ with bus not in read direction");
            return Burst::new([PROTOCOL_GARBAGE; BURST_BYTES]);
        }
        let Some(&Some(row)) = self.active.get(bank as usize) else {
            warn!("READ on bank {} without an activated row", bank);
            return Burst::new([PROTOCOL_GARBAGE; BURST_BYTES]);
        };
        let offset = col as usize * 8;
        if offset + BURST_BYTES > self.dram.num_cols * 8 {
            warn!("READ beyond row end: bank {}, col {}", bank, col);
            return Burst::new([PROTOCOL_GARBAGE; BURST_BYTES]);
        }
        let mut raw = [0u8; BURST_BYTES];
        if let Some(storage) = self.rows.get(&(bank, row)) {
            raw.copy_from_slice(&storage[offset..offset + BURST_BYTES]);
        }
        for &(wbank, wrow, byte_index, bit) in &self.weak {
            if wbank == bank && wrow == row && (offset..offset + BURST_BYTES).contains(&byte_index)
            {
                raw[byte_index - offset] ^= 1 << bit;
            }
        }
        Burst::new(raw)
    }

    fn write_burst(&mut self, bank: u8, col: u16, pattern: u8) {
        if self.bus != Some(BusDirection::Write) {
            warn!("WRITE with bus not in write direction, dropped");
            return;
        }
        let Some(&Some(row)) = self.active.get(bank as usize) else {
            warn!("WRITE on bank {} without an activated row, dropped", bank);
            return;
        };
        let row_bytes = self.dram.num_cols * 8;
        let offset = col as usize * 8;
        if offset + BURST_BYTES > row_bytes {
            warn!("WRITE beyond row end: bank {}, col {}, dropped", bank, col);
            return;
        }
        let storage = self
            .rows
            .entry((bank, row))
            .or_insert_with(|| vec![0; row_bytes]);
        storage[offset..offset + BURST_BYTES].fill(pattern);
    }
}

impl DeviceTransport for LoopbackDevice {
    fn reset(&mut self) -> Result<(), TransportError> {
        debug!("loopback device reset");
        self.read_fifo.clear();
        self.active.fill(None);
        self.bus = None;
        Ok(())
    }

    fn send(&mut self, channel: usize, instructions: &[Instruction]) -> Result<(), TransportError> {
        if channel != CMD_CHANNEL {
            return Err(TransportError::Link(format!("unknown channel {}", channel)));
        }
        if instructions.len() > INSTR_BUFFER_CAPACITY {
            return Err(TransportError::Overflow {
                len: instructions.len(),
                capacity: INSTR_BUFFER_CAPACITY,
            });
        }
        // run the full wire codec, as the hardware channel would
        for instr in instructions {
            let word = instr.encode();
            let decoded = Instruction::decode(word)
                .map_err(|e| TransportError::Link(e.to_string()))?;
            self.apply(decoded);
        }
        Ok(())
    }

    fn receive_burst(
        &mut self,
        channel: usize,
        timeout: Option<Duration>,
    ) -> Result<Burst, TransportError> {
        if channel != CMD_CHANNEL {
            return Err(TransportError::Link(format!("unknown channel {}", channel)));
        }
        self.read_fifo
            .pop_front()
            .ok_or(TransportError::Timeout(timeout.unwrap_or(Duration::ZERO)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_dram() -> DramConfig {
        DramConfig {
            num_cols: 16,
            num_rows: 8,
            num_banks: 2,
        }
    }

    fn send(dev: &mut LoopbackDevice, instrs: &[Instruction]) {
        dev.send(CMD_CHANNEL, instrs).unwrap();
    }

    #[test]
    fn only_device_zero_exists() {
        assert!(LoopbackDevice::open(0, small_dram()).is_ok());
        assert!(matches!(
            LoopbackDevice::open(3, small_dram()),
            Err(TransportError::DeviceUnavailable(3))
        ));
    }

    #[test]
    fn write_then_read_returns_pattern() {
        let mut dev = LoopbackDevice::open(0, small_dram()).unwrap();
        send(
            &mut dev,
            &[
                Instruction::BusDir {
                    dir: BusDirection::Write,
                },
                Instruction::Activate { bank: 1, row: 3 },
                Instruction::Write {
                    bank: 1,
                    col: 8,
                    pattern: 0x66,
                },
                Instruction::BusDir {
                    dir: BusDirection::Read,
                },
                Instruction::Read { bank: 1, col: 8 },
                Instruction::EndTransaction,
            ],
        );
        let burst = dev.receive_burst(CMD_CHANNEL, None).unwrap();
        assert_eq!(burst.bytes(), &[0x66; BURST_BYTES]);
        // the unwritten first half of the row reads as zeros
        send(&mut dev, &[Instruction::Read { bank: 1, col: 0 }]);
        let burst = dev.receive_burst(CMD_CHANNEL, None).unwrap();
        assert_eq!(burst.bytes(), &[0x00; BURST_BYTES]);
    }

    #[test]
    fn read_without_activation_is_garbage() {
        let mut dev = LoopbackDevice::open(0, small_dram()).unwrap();
        send(
            &mut dev,
            &[
                Instruction::BusDir {
                    dir: BusDirection::Read,
                },
                Instruction::Read { bank: 0, col: 0 },
            ],
        );
        let burst = dev.receive_burst(CMD_CHANNEL, None).unwrap();
        assert_eq!(burst.bytes(), &[PROTOCOL_GARBAGE; BURST_BYTES]);
    }

    #[test]
    fn precharge_all_deactivates_every_bank() {
        let mut dev = LoopbackDevice::open(0, small_dram()).unwrap();
        send(
            &mut dev,
            &[
                Instruction::Activate { bank: 0, row: 1 },
                Instruction::Activate { bank: 1, row: 2 },
                Instruction::Precharge {
                    bank: 0,
                    scope: PrechargeScope::All,
                },
            ],
        );
        assert_eq!(dev.active, vec![None, None]);
    }

    #[test]
    fn oversized_buffer_overflows() {
        let mut dev = LoopbackDevice::open(0, small_dram()).unwrap();
        let instrs = vec![Instruction::Wait { cycles: 1 }; INSTR_BUFFER_CAPACITY + 1];
        assert!(matches!(
            dev.send(CMD_CHANNEL, &instrs),
            Err(TransportError::Overflow { len, capacity })
                if len == INSTR_BUFFER_CAPACITY + 1 && capacity == INSTR_BUFFER_CAPACITY
        ));
    }

    #[test]
    fn wait_cycles_accumulate() {
        let mut dev = LoopbackDevice::open(0, small_dram()).unwrap();
        send(
            &mut dev,
            &[
                Instruction::Wait { cycles: 5 },
                Instruction::Wait { cycles: 10 },
            ],
        );
        assert_eq!(dev.elapsed_cycles(), 15);
    }

    #[test]
    fn clock_config_streams_readback() {
        let mut dev = LoopbackDevice::open(0, small_dram()).unwrap();
        send(
            &mut dev,
            &[
                Instruction::Clock {
                    mult: 8,
                    div_in: 1,
                    div_out: 4,
                },
                Instruction::EndTransaction,
            ],
        );
        assert_eq!(dev.clock_config(), (8, 1, 4));
        let burst = dev.receive_burst(CMD_CHANNEL, None).unwrap();
        assert_eq!(burst.bytes()[0], 8);
        assert_eq!(burst.bytes()[4], 1);
        assert_eq!(burst.bytes()[8], 4);
    }

    #[test]
    fn refresh_registers_stored() {
        let mut dev = LoopbackDevice::open(0, small_dram()).unwrap();
        send(
            &mut dev,
            &[
                Instruction::Refresh {
                    register: RefreshRegister::Trfc,
                    value: 104,
                },
                Instruction::Refresh {
                    register: RefreshRegister::Trefi,
                    value: 0,
                },
            ],
        );
        assert_eq!(dev.refresh_register(RefreshRegister::Trfc), Some(104));
        assert_eq!(dev.refresh_register(RefreshRegister::Trefi), Some(0));
    }

    #[test]
    fn weak_cell_flips_on_every_read() {
        let mut dev = LoopbackDevice::open(0, small_dram()).unwrap();
        dev.mark_weak(0, 0, 5, 0);
        for _ in 0..2 {
            send(
                &mut dev,
                &[
                    Instruction::BusDir {
                        dir: BusDirection::Write,
                    },
                    Instruction::Activate { bank: 0, row: 0 },
                    Instruction::Write {
                        bank: 0,
                        col: 0,
                        pattern: 0xFF,
                    },
                    Instruction::BusDir {
                        dir: BusDirection::Read,
                    },
                    Instruction::Read { bank: 0, col: 0 },
                ],
            );
            let burst = dev.receive_burst(CMD_CHANNEL, None).unwrap();
            assert_eq!(burst.bytes()[5], 0xFE);
        }
    }

    #[test]
    fn flip_bit_corrupts_storage() {
        let mut dev = LoopbackDevice::open(0, small_dram()).unwrap();
        send(
            &mut dev,
            &[
                Instruction::BusDir {
                    dir: BusDirection::Write,
                },
                Instruction::Activate { bank: 0, row: 0 },
                Instruction::Write {
                    bank: 0,
                    col: 0,
                    pattern: 0xFF,
                },
            ],
        );
        dev.flip_bit(0, 0, 3, 7);
        send(
            &mut dev,
            &[
                Instruction::BusDir {
                    dir: BusDirection::Read,
                },
                Instruction::Read { bank: 0, col: 0 },
            ],
        );
        let burst = dev.receive_burst(CMD_CHANNEL, None).unwrap();
        assert_eq!(burst.bytes()[3], 0x7F);
        assert_eq!(burst.bytes()[2], 0xFF);
    }
}
