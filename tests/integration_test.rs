use mandrel::config::DramConfig;
use mandrel::instruction::BusDirection;
use mandrel::ops::{
    flush_read_fifo, get_clock_speed, read_row, set_clock_speed, turn_bus, write_row,
};
use mandrel::report::ReportWriter;
use mandrel::sequence::InstructionSequence;
use mandrel::sweep::{CellMatching, PatternKind, RetentionSweep, SweepConfig, SystematicSweep};
use mandrel::transport::DeviceTransport;
use mandrel::verify::{ErrorTally, broadcast_pattern, locate_byte_faults};
use mandrel_loopback::LoopbackDevice;
use std::time::Duration;

fn small_dram() -> DramConfig {
    DramConfig {
        num_cols: 32,
        num_rows: 8,
        num_banks: 2,
    }
}

#[test]
fn write_read_round_trip_has_zero_errors() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dram = small_dram();
    let mut dev = LoopbackDevice::open(0, dram)?;
    let mut seq = InstructionSequence::new();

    for pattern in [0x00u8, 0xFF, 0x66, 0xA5, rand::random()] {
        turn_bus(&mut dev, BusDirection::Write, &mut seq)?;
        write_row(&mut dev, 1, 3, pattern, &dram, &mut seq)?;
        turn_bus(&mut dev, BusDirection::Read, &mut seq)?;
        let row = read_row(&mut dev, 1, 3, 5, &dram, &mut seq)?;

        let mut tally = ErrorTally::new();
        tally.verify(row.words(), broadcast_pattern(pattern));
        assert_eq!(tally.errors(), 0, "pattern {:#04x}", pattern);
        assert_eq!(tally.words(), dram.num_cols as u64);
    }
    Ok(())
}

#[test]
fn injected_flips_are_counted_and_localized() -> anyhow::Result<()> {
    let dram = small_dram();
    let mut dev = LoopbackDevice::open(0, dram)?;
    let mut seq = InstructionSequence::new();
    let pattern = 0xFF;

    turn_bus(&mut dev, BusDirection::Write, &mut seq)?;
    write_row(&mut dev, 0, 2, pattern, &dram, &mut seq)?;

    // three single-bit retention failures: column word 4 lane 1, column word
    // 10 lane 7, column word 31 lane 0
    dev.flip_bit(0, 2, 4 * 8 + 1, 0);
    dev.flip_bit(0, 2, 10 * 8 + 7, 6);
    dev.flip_bit(0, 2, 31 * 8, 3);

    turn_bus(&mut dev, BusDirection::Read, &mut seq)?;
    let row = read_row(&mut dev, 0, 2, 5, &dram, &mut seq)?;

    let mut tally = ErrorTally::new();
    tally.verify(row.words(), broadcast_pattern(pattern));
    assert_eq!(tally.errors(), 3);

    let faults = locate_byte_faults(&row, pattern);
    let positions: Vec<(usize, usize)> = faults.iter().map(|f| (f.col, f.lane)).collect();
    assert_eq!(positions, vec![(4, 1), (10, 7), (31, 0)]);
    assert_eq!(faults[0].observed, 0xFE);
    assert_eq!(faults[1].observed, 0xBF);
    assert_eq!(faults[2].observed, 0xF7);
    Ok(())
}

#[test]
fn retention_sweep_covers_banks_and_writes_artifact() -> anyhow::Result<()> {
    let dram = small_dram();
    let mut dev = LoopbackDevice::open(0, dram)?;
    dev.reset()?;
    flush_read_fifo(&mut dev);

    // one weak cell in each bank
    dev.mark_weak(0, 5, 0, 0);
    dev.mark_weak(1, 1, 17, 4);

    let dir = std::env::temp_dir().join("mandrel-integration-test");
    std::fs::create_dir_all(&dir)?;
    let artifact = dir.join("retention.csv");
    let mut report = ReportWriter::create(&artifact)?;

    let config = SweepConfig {
        pattern: PatternKind::One,
        retention: Duration::from_millis(10),
        group_size: Some(3),
        dram,
        ..SweepConfig::default()
    };
    let data = RetentionSweep::new(config).run(&mut dev, Some(&mut report))?;

    assert_eq!(data.samples.len(), dram.total_rows());
    assert_eq!(data.errors, 2);
    // coverage order: all of bank 0's rows, then all of bank 1's
    let banks: Vec<usize> = data.samples.iter().map(|s| s.bank).collect();
    let mut expected_banks = vec![0; dram.num_rows];
    expected_banks.extend(vec![1; dram.num_rows]);
    assert_eq!(banks, expected_banks);
    let flipped: Vec<(usize, usize)> = data
        .samples
        .iter()
        .filter(|s| s.errors > 0)
        .map(|s| (s.bank, s.row))
        .collect();
    assert_eq!(flipped, vec![(0, 5), (1, 1)]);

    let content = std::fs::read_to_string(&artifact)?;
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some("bank,row,errors"));
    assert_eq!(lines.count(), dram.total_rows());
    std::fs::remove_file(&artifact)?;
    Ok(())
}

#[test]
fn cell_matching_correlates_weak_and_flipped_cells() -> anyhow::Result<()> {
    let dram = small_dram();
    let mut dev = LoopbackDevice::open(0, dram)?;

    // a weak cell fails in both passes; it must show up as a coinciding
    // error, not just an error
    dev.mark_weak(0, 1, 9, 2);

    let experiment = CellMatching {
        rows: 4,
        bank: 0,
        pattern: 0xFF,
        timing_trcd: 1,
        trcd: 5,
        retention: Duration::from_millis(5),
        dram,
    };
    let data = experiment.run(&mut dev)?;
    assert_eq!(data.errors, 1);
    assert_eq!(data.matches, 1);
    assert_eq!(data.matched_percentage, 100.0);
    Ok(())
}

#[test]
fn systematic_sweep_samples_every_cell() -> anyhow::Result<()> {
    let dram = DramConfig {
        num_cols: 16,
        num_rows: 32,
        num_banks: 1,
    };
    let mut dev = LoopbackDevice::open(0, dram)?;

    let dir = std::env::temp_dir().join("mandrel-integration-test");
    std::fs::create_dir_all(&dir)?;
    let artifact = dir.join("systematic.csv");
    let mut report = ReportWriter::create(&artifact)?;

    let sweep = SystematicSweep {
        pattern: 0x00,
        clock_mults: vec![8],
        retention_steps: 2,
        retention_step: Duration::from_millis(1),
        trcds: vec![1, 5],
        rows_per_cell: 4,
        bank: 0,
        dram,
    };
    let samples = sweep.run(&mut dev, &mut report)?;

    assert_eq!(samples.len(), 4);
    assert!(samples.iter().all(|s| s.errors == 0));
    assert!(samples.iter().all(|s| s.clock_mhz == 400));
    // effective tRCD in nanoseconds scales with the cycle count
    assert_eq!(samples[0].trcd_ns, 1000.0 / 400.0);
    assert_eq!(samples[1].trcd_ns, 5.0 * 1000.0 / 400.0);

    let content = std::fs::read_to_string(&artifact)?;
    assert!(content.starts_with("tRCD in ns,retention ms,errors,error percentage"));
    std::fs::remove_file(&artifact)?;
    Ok(())
}

#[test]
fn clock_reprogram_reads_back_fabric_speed() -> anyhow::Result<()> {
    let mut dev = LoopbackDevice::open(0, small_dram())?;
    let mut seq = InstructionSequence::new();
    set_clock_speed(&mut dev, 8, 1, 4, &mut seq)?;
    let fabric = get_clock_speed(&mut dev)?;
    assert_eq!(fabric, 400); // 400 MHz base x 8 / (1 x 4) / 2
    Ok(())
}
