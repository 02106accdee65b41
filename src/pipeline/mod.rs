//! Streaming read → enrich → write pipeline

pub mod sink;
pub mod source;

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::config::MalformedPolicy;
use crate::enrichment::cache::ResolutionCache;
use crate::enrichment::flow::{AddressFields, enrich_flow_record};
use crate::error::{Error, Result};
use crate::models::FlowRecord;

pub use sink::{OutputFormat, RecordSink, sink_for};
pub use source::FlowSource;

/// Counters reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Records parsed from the input
    pub read: usize,
    /// Records passed through the record adapter
    pub enriched: usize,
    /// Records handed to the sink
    pub written: usize,
    /// Malformed lines skipped
    pub skipped: usize,
}

/// One pass over a record stream
pub struct Pipeline<'a> {
    cache: Option<&'a ResolutionCache>,
    fields: AddressFields,
    on_malformed: MalformedPolicy,
}

impl<'a> Pipeline<'a> {
    /// Pass records through unchanged
    pub fn passthrough() -> Self {
        Self {
            cache: None,
            fields: AddressFields::default(),
            on_malformed: MalformedPolicy::default(),
        }
    }

    /// Enrich every record carrying an address field
    pub fn enriching(cache: &'a ResolutionCache) -> Self {
        Self {
            cache: Some(cache),
            ..Self::passthrough()
        }
    }

    pub fn with_fields(mut self, fields: AddressFields) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.on_malformed = policy;
        self
    }

    /// Drain `source` into `sink`
    pub async fn run<I, S>(&self, source: I, sink: &mut S) -> Result<PipelineStats>
    where
        I: IntoIterator<Item = Result<FlowRecord>>,
        S: RecordSink + ?Sized,
    {
        let mut stats = PipelineStats::default();

        for item in source {
            let mut record = match item {
                Ok(record) => record,
                Err(Error::MalformedRecord { line, reason }) => match self.on_malformed {
                    MalformedPolicy::Skip => {
                        tracing::warn!(line, %reason, "Skipping malformed record");
                        metrics::counter!("flowscope_records_skipped_total").increment(1);
                        stats.skipped += 1;
                        continue;
                    }
                    MalformedPolicy::Abort => return Err(Error::MalformedRecord { line, reason }),
                },
                Err(e) => return Err(e),
            };
            stats.read += 1;

            if let Some(cache) = self.cache {
                if self.fields.present_in(&record) {
                    enrich_flow_record(&mut record, cache, &self.fields).await;
                    stats.enriched += 1;
                }
            }

            sink.write_record(&record)?;
            stats.written += 1;
            metrics::counter!("flowscope_records_total").increment(1);
        }

        sink.finish()?;
        Ok(stats)
    }
}

/// Open `path` for reading; `-` or an empty path means stdin
pub fn open_input(path: &str) -> Result<Box<dyn BufRead>> {
    if path.is_empty() || path == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }

    let file = File::open(Path::new(path)).map_err(|e| {
        Error::Io(io::Error::new(e.kind(), format!("cannot read input '{path}': {e}")))
    })?;
    Ok(Box::new(BufReader::new(file)))
}

/// Open `path` for writing; `-` or an empty path means stdout
pub fn open_output(path: &str) -> Result<Box<dyn Write>> {
    if path.is_empty() || path == "-" {
        return Ok(Box::new(BufWriter::new(io::stdout())));
    }

    let file = File::create(Path::new(path)).map_err(|e| {
        Error::Io(io::Error::new(e.kind(), format!("cannot write output '{path}': {e}")))
    })?;
    Ok(Box::new(BufWriter::new(file)))
}

#[cfg(test)]
mod tests {
    use super::sink::JsonlSink;
    use super::*;
    use crate::enrichment::testing::google_engine;
    use serde_json::{Value, json};
    use std::io::Cursor;

    async fn run_to_string(pipeline: &Pipeline<'_>, input: &str, format: OutputFormat) -> (Result<PipelineStats>, String) {
        let mut out = Vec::new();
        let result = {
            let mut sink = sink_for(format, &mut out).unwrap();
            pipeline.run(FlowSource::new(Cursor::new(input)), sink.as_mut()).await
        };
        (result, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn test_round_trip_jsonl() {
        let cache = ResolutionCache::new(google_engine(), 16);
        let pipeline = Pipeline::enriching(&cache);

        let (stats, out) = run_to_string(&pipeline, "{\"src_ip\":\"8.8.8.8\",\"dst_ip\":\"10.0.0.5\"}\n", OutputFormat::Jsonl).await;
        let stats = stats.unwrap();
        let value: Value = serde_json::from_str(out.trim_end()).unwrap();

        assert_eq!(stats, PipelineStats { read: 1, enriched: 1, written: 1, skipped: 0 });
        assert_eq!(value["src_asn"], json!(15169));
        assert_eq!(value["src_ptr"], json!("dns.google"));
        for key in crate::models::ENRICHMENT_KEYS {
            assert_eq!(value[format!("dst_{key}")], Value::Null, "dst_{key}");
        }
        assert!(!out.contains(": "), "output must be compact");
    }

    #[tokio::test]
    async fn test_round_trip_csv() {
        let cache = ResolutionCache::new(google_engine(), 16);
        let pipeline = Pipeline::enriching(&cache);
        let input = "{\"ts\":\"2025-01-01T00:00:00Z\",\"proto\":\"udp\",\"src_ip\":\"8.8.8.8\",\"src_port\":\"53\",\"dst_ip\":\"10.0.0.5\",\"dst_port\":5353,\"bytes\":120,\"pkts\":2,\"device\":\"cam-1\"}\n";

        let (stats, out) = run_to_string(&pipeline, input, OutputFormat::Csv).await;
        stats.unwrap();

        let mut reader = csv::Reader::from_reader(out.as_bytes());
        let headers = reader.headers().unwrap().clone();
        let row = reader.records().next().unwrap().unwrap();
        let get = |name: &str| {
            let idx = headers.iter().position(|h| h == name).unwrap();
            row.get(idx).unwrap().to_string()
        };

        assert_eq!(headers.len(), 26);
        assert_eq!(get("src_port"), "53");
        assert_eq!(get("src_asn"), "15169");
        assert_eq!(get("src_latitude"), "37.751");
        assert_eq!(get("src_longitude"), "-97.822");
        assert_eq!(get("dst_latitude"), "");
        assert_eq!(get("dst_asn"), "");
        assert!(!out.contains("cam-1"));
    }

    #[tokio::test]
    async fn test_passthrough_leaves_records_untouched() {
        let pipeline = Pipeline::passthrough();
        let input = "{\"src_ip\":\"8.8.8.8\",\"x\":1}\n";

        let (stats, out) = run_to_string(&pipeline, input, OutputFormat::Jsonl).await;

        assert_eq!(stats.unwrap().enriched, 0);
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn test_records_without_address_fields_are_not_enriched() {
        let cache = ResolutionCache::new(google_engine(), 16);
        let pipeline = Pipeline::enriching(&cache);

        let (stats, out) = run_to_string(&pipeline, "{\"ts\":1}\n", OutputFormat::Jsonl).await;

        assert_eq!(stats.unwrap().enriched, 0);
        assert_eq!(out, "{\"ts\":1}\n");
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped_by_default() {
        let pipeline = Pipeline::passthrough();
        let input = "{\"a\":1}\n{broken\n42\n{\"b\":2}\n";

        let (stats, out) = run_to_string(&pipeline, input, OutputFormat::Jsonl).await;

        assert_eq!(stats.unwrap(), PipelineStats { read: 2, enriched: 0, written: 2, skipped: 2 });
        assert_eq!(out.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_malformed_line_aborts_when_configured() {
        let pipeline = Pipeline::passthrough().with_malformed_policy(MalformedPolicy::Abort);
        let input = "{\"a\":1}\n{broken\n{\"b\":2}\n";

        let (result, out) = run_to_string(&pipeline, input, OutputFormat::Jsonl).await;

        assert!(matches!(result, Err(Error::MalformedRecord { line: 2, .. })));
        assert_eq!(out, "{\"a\":1}\n");
    }

    #[test]
    fn test_open_input_missing_file_names_path() {
        let err = open_input("/no/such/flows.jsonl").err().unwrap();
        assert!(err.to_string().contains("/no/such/flows.jsonl"));
    }

    #[test]
    fn test_open_output_unwritable_path_fails() {
        assert!(open_output("/no/such/dir/out.csv").is_err());
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let in_path = dir.path().join("flows.jsonl");
        let out_path = dir.path().join("flows.out.jsonl");
        std::fs::write(&in_path, "{\"src_ip\":\"127.0.0.1\"}\n").unwrap();

        let cache = ResolutionCache::new(google_engine(), 4);
        let pipeline = Pipeline::enriching(&cache);
        {
            let input = open_input(in_path.to_str().unwrap()).unwrap();
            let mut sink = JsonlSink::new(open_output(out_path.to_str().unwrap()).unwrap());
            pipeline.run(FlowSource::new(input), &mut sink).await.unwrap();
        }

        let written = std::fs::read_to_string(&out_path).unwrap();
        let value: Value = serde_json::from_str(written.trim_end()).unwrap();
        assert_eq!(value["src_asn"], Value::Null);
        assert_eq!(value.as_object().unwrap().len(), 1 + 18);
        assert!(cache.is_empty());
    }
}
