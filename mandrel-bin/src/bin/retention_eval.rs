use anyhow::{Context, Result};
use clap::Parser;
use indicatif::MultiProgress;
use log::info;
use mandrel_core::config::DramConfig;
use mandrel_core::ops::flush_read_fifo;
use mandrel_core::report::ReportWriter;
use mandrel_core::sweep::{PatternKind, RetentionSweep, SweepConfig};
use mandrel_core::transport::DeviceTransport;
use mandrel_loopback::LoopbackDevice;
use std::time::Duration;

/// CLI arguments for the `retention_eval` binary.
///
/// Runs a whole-device retention sweep against the loopback DRAM model,
/// optionally seeding weak cells to exercise the verification pipeline, and
/// writes the per-row results to a CSV artifact.
#[derive(Debug, Parser)]
struct CliArgs {
    /// The data pattern byte, e.g. 0x66.
    #[clap(long = "pattern", default_value = "0xff", value_parser = parse_byte)]
    pattern: u8,
    /// The retention time in milliseconds.
    #[clap(long = "retention-ms", default_value = "64")]
    retention_ms: u64,
    /// The activate-to-read delay in cycles used during verification.
    #[clap(long = "trcd", default_value = "5")]
    trcd: u32,
    /// Column words per row.
    #[clap(long = "cols", default_value = "64")]
    cols: usize,
    /// Rows per bank.
    #[clap(long = "rows", default_value = "128")]
    rows: usize,
    /// Number of banks.
    #[clap(long = "banks", default_value = "2")]
    banks: usize,
    /// Rows written per group; derived from the retention time if omitted.
    #[clap(long = "group-size")]
    group_size: Option<usize>,
    /// Number of weak cells to seed into the model.
    #[clap(long = "weak-cells", default_value = "0")]
    weak_cells: usize,
    /// Output file for per-row results (CSV).
    #[clap(long = "output", default_value = "result.csv")]
    output: String,
    /// Optional output file for the full sweep record (JSON).
    #[clap(long = "json")]
    json: Option<String>,
}

fn parse_byte(s: &str) -> std::result::Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid pattern byte {:?}: {}", s, e))
}

fn main() -> Result<()> {
    env_logger::init();
    let args = CliArgs::parse();

    let dram = DramConfig {
        num_cols: args.cols,
        num_rows: args.rows,
        num_banks: args.banks,
    };

    let mut dev =
        LoopbackDevice::open(0, dram).context("failed to open the loopback device")?;
    dev.reset().context("device reset failed")?;
    flush_read_fifo(&mut dev);

    for i in 0..args.weak_cells {
        let bank = (i % dram.num_banks) as u8;
        let row = ((i * 7) % dram.num_rows) as u32;
        let byte_index = (i * 13) % (dram.num_cols * 8);
        let bit = (i % 8) as u8;
        dev.mark_weak(bank, row, byte_index, bit);
    }
    if args.weak_cells > 0 {
        info!("seeded {} weak cell(s)", args.weak_cells);
    }

    let config = SweepConfig {
        pattern: PatternKind::Fixed(args.pattern),
        retention: Duration::from_millis(args.retention_ms),
        trcd: args.trcd,
        group_size: args.group_size,
        max_row_retries: 1,
        dram,
    };

    let mut report =
        ReportWriter::create(&args.output).context("failed to create the result file")?;
    let progress = MultiProgress::new();
    let sweep = RetentionSweep::new(config).progress(progress);
    let data = sweep.run(&mut dev, Some(&mut report))?;

    println!(
        "pattern {:#04x}: {} bit error(s) across {} row(s), {:.4}% of all bits",
        data.pattern,
        data.errors,
        data.samples.len(),
        data.error_percentage
    );

    if let Some(json) = &args.json {
        data.write_json(json)
            .context("failed to write the JSON record")?;
        info!("sweep record written to {}", json);
    }

    dev.close();
    Ok(())
}
