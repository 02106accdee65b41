//! Output serializers for flow records

use std::io::Write;

use serde_json::Value;

use crate::error::Result;
use crate::models::FlowRecord;

/// Fixed CSV column order
pub const CSV_COLUMNS: [&str; 26] = [
    "ts",
    "proto",
    "src_ip",
    "src_port",
    "dst_ip",
    "dst_port",
    "bytes",
    "pkts",
    "src_ptr",
    "src_asn",
    "src_as_org",
    "src_country_iso",
    "src_country_name",
    "src_region",
    "src_city",
    "src_latitude",
    "src_longitude",
    "dst_ptr",
    "dst_asn",
    "dst_as_org",
    "dst_country_iso",
    "dst_country_name",
    "dst_region",
    "dst_city",
    "dst_latitude",
    "dst_longitude",
];

const INTEGER_COLUMNS: [&str; 6] = ["src_port", "dst_port", "bytes", "pkts", "src_asn", "dst_asn"];

const FLOAT_COLUMNS: [&str; 4] = ["src_latitude", "src_longitude", "dst_latitude", "dst_longitude"];

/// Output serialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Jsonl,
    Csv,
}

/// Destination for processed records
pub trait RecordSink {
    /// Serialize one record
    fn write_record(&mut self, record: &FlowRecord) -> Result<()>;

    /// Flush buffered output
    fn finish(&mut self) -> Result<()>;
}

/// Build the sink for `format` on top of `writer`
pub fn sink_for<'w, W: Write + 'w>(format: OutputFormat, writer: W) -> Result<Box<dyn RecordSink + 'w>> {
    Ok(match format {
        OutputFormat::Jsonl => Box::new(JsonlSink::new(writer)),
        OutputFormat::Csv => Box::new(CsvSink::new(writer)?),
    })
}

/// Compact JSON, one record per line, every field preserved
pub struct JsonlSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for JsonlSink<W> {
    fn write_record(&mut self, record: &FlowRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Fixed-column CSV with a header row; fields outside [`CSV_COLUMNS`] are dropped
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvSink<W> {
    /// Create the sink and write the header row
    pub fn new(writer: W) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(CSV_COLUMNS)?;
        Ok(Self { writer })
    }

    #[cfg(test)]
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| crate::error::Error::Io(e.into_error()))
    }
}

impl<W: Write> RecordSink for CsvSink<W> {
    fn write_record(&mut self, record: &FlowRecord) -> Result<()> {
        let row = CSV_COLUMNS.iter().map(|column| cell(column, record.get(column)));
        self.writer.write_record(row)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Render one CSV cell; numeric columns that fail coercion are empty
fn cell(column: &str, value: Option<&Value>) -> String {
    let Some(value) = value else {
        return String::new();
    };

    if INTEGER_COLUMNS.contains(&column) {
        return coerce_int(value).unwrap_or_default();
    }
    if FLOAT_COLUMNS.contains(&column) {
        return coerce_float(value).map(format_float).unwrap_or_default();
    }

    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn coerce_int(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite())
                    .map(|f| (f.trunc() as i64).to_string())
            }
        }
        Value::String(s) => s.trim().parse::<i64>().ok().map(|i| i.to_string()),
        Value::Bool(b) => Some(u8::from(*b).to_string()),
        _ => None,
    }
}

/// Whole numbers keep a trailing `.0` so float columns stay recognizable
fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
