use std::{fmt::Write as _, io::Write};

use featsniff_common::FeatureRecord;

use crate::error::SinkError;

/// Writes one comma separated line per feature record.
///
/// Each row is formatted into a reused buffer and handed to the writer with a
/// single `write_all`, so a row is never split across writes.
pub struct CsvSink<W: Write> {
    out: W,
    line: String,
}

impl<W: Write> CsvSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            line: String::with_capacity(128),
        }
    }

    /// Writes the column names as the first line.
    pub fn write_header(&mut self) -> Result<(), SinkError> {
        self.line.clear();
        self.line.push_str(&FeatureRecord::FIELDS.join(","));
        self.line.push('\n');
        self.out
            .write_all(self.line.as_bytes())
            .map_err(SinkError::Write)
    }

    pub fn emit(&mut self, record: &FeatureRecord) -> Result<(), SinkError> {
        self.line.clear();
        // formatting into a String cannot fail
        let _ = writeln!(self.line, "{record}");
        self.out
            .write_all(self.line.as_bytes())
            .map_err(SinkError::Write)
    }

    pub fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush().map_err(SinkError::Flush)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
