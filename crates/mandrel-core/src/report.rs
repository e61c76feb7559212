//! Tabular result artifacts.
//!
//! Sweeps persist one header row naming the swept dimensions and one row per
//! sampled point. Every value carries an explicit radix through [`Field`],
//! so a hexadecimal raw-data dump can never be misread as a decimal index.
//! Rows are flushed as they are written; a run that aborts mid-sweep leaves
//! all rows produced so far intact.

use itertools::Itertools;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A single report value with an explicit formatting radix.
#[derive(Clone, Debug)]
pub enum Field<'a> {
    /// Decimal integer (indices, counts)
    Dec(u64),
    /// Hexadecimal integer (raw data words)
    Hex(u64),
    /// Floating-point value (percentages, nanosecond timings)
    Float(f64),
    /// Free text
    Text(&'a str),
}

impl fmt::Display for Field<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Dec(v) => write!(f, "{}", v),
            Field::Hex(v) => write!(f, "{:x}", v),
            Field::Float(v) => write!(f, "{}", v),
            Field::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Writer for comma-separated result artifacts.
pub struct ReportWriter {
    out: BufWriter<File>,
}

impl ReportWriter {
    /// Creates (truncating) the result file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        Ok(ReportWriter {
            out: BufWriter::new(File::create(path)?),
        })
    }

    /// Writes the header row naming the swept dimensions.
    pub fn header(&mut self, names: &[&str]) -> std::io::Result<()> {
        writeln!(self.out, "{}", names.iter().join(","))?;
        self.out.flush()
    }

    /// Writes one sample row and flushes it.
    pub fn row(&mut self, fields: &[Field]) -> std::io::Result<()> {
        writeln!(self.out, "{}", fields.iter().join(","))?;
        self.out.flush()
    }
}
