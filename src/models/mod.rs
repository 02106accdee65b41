//! Core data models for flow enrichment

pub mod address;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default field carrying the source address of a flow
pub const DEFAULT_SRC_FIELD: &str = "src_ip";

/// Default field carrying the destination address of a flow
pub const DEFAULT_DST_FIELD: &str = "dst_ip";

/// Enrichment keys written per direction, in output order
pub const ENRICHMENT_KEYS: [&str; 9] = [
    "ptr",
    "asn",
    "as_org",
    "country_iso",
    "country_name",
    "region",
    "city",
    "latitude",
    "longitude",
];

/// Which address of a flow is being enriched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Src,
    Dst,
}

impl Direction {
    pub fn prefix(&self) -> &'static str {
        match self {
            Direction::Src => "src_",
            Direction::Dst => "dst_",
        }
    }
}

/// Output field name for an enrichment key, e.g. `src_` + `asn`
pub fn prefixed_key(direction: Direction, key: &str) -> String {
    format!("{}{}", direction.prefix(), key)
}

/// Resolution result for one IP address
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EnrichedAddress {
    pub address: String,
    pub ptr: Option<String>,
    pub asn: Option<u32>,
    pub as_org: Option<String>,
    pub country_iso: Option<String>,
    pub country_name: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl EnrichedAddress {
    /// An address with nothing known about it
    pub fn unknown(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// The nine enrichment values, in `ENRICHMENT_KEYS` order
    pub fn values(&self) -> [Value; 9] {
        [
            opt_value(self.ptr.clone()),
            opt_value(self.asn),
            opt_value(self.as_org.clone()),
            opt_value(self.country_iso.clone()),
            opt_value(self.country_name.clone()),
            opt_value(self.region.clone()),
            opt_value(self.city.clone()),
            opt_value(self.latitude),
            opt_value(self.longitude),
        ]
    }
}

fn opt_value<T: Into<Value>>(value: Option<T>) -> Value {
    value.map(Into::into).unwrap_or(Value::Null)
}

/// ASN database answer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsnRecord {
    pub asn: Option<u32>,
    pub as_org: Option<String>,
}

/// City database answer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoRecord {
    pub country_iso: Option<String>,
    pub country_name: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// One network flow: an open JSON object.
///
/// Only the two address fields are read and only the prefixed enrichment
/// fields are written; everything else passes through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowRecord {
    fields: Map<String, Value>,
}

impl FlowRecord {
    /// Parse one JSONL line. Anything but a JSON object is rejected.
    pub fn from_json_line(line: &str) -> Result<Self, String> {
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(fields)) => Ok(Self { fields }),
            Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
            Err(e) => Err(e.to_string()),
        }
    }

    /// The address stored under `field`, if it is a string
    pub fn address(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Write all nine enrichment fields for one direction
    pub fn set_enrichment(&mut self, direction: Direction, enriched: &EnrichedAddress) {
        for (key, value) in ENRICHMENT_KEYS.iter().zip(enriched.values()) {
            self.fields.insert(prefixed_key(direction, key), value);
        }
    }

    /// Write all nine enrichment fields for one direction as null
    pub fn set_unenriched(&mut self, direction: Direction) {
        for key in ENRICHMENT_KEYS {
            self.fields.insert(prefixed_key(direction, key), Value::Null);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

impl From<Map<String, Value>> for FlowRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prefixed_keys() {
        assert_eq!(prefixed_key(Direction::Src, "asn"), "src_asn");
        assert_eq!(prefixed_key(Direction::Dst, "country_iso"), "dst_country_iso");
    }

    #[test]
    fn test_from_json_line_rejects_non_objects() {
        assert!(FlowRecord::from_json_line("[1,2,3]").is_err());
        assert!(FlowRecord::from_json_line("\"8.8.8.8\"").is_err());
        assert!(FlowRecord::from_json_line("{not json").is_err());
        assert!(FlowRecord::from_json_line(r#"{"src_ip":"8.8.8.8"}"#).is_ok());
    }

    #[test]
    fn test_address_requires_string() {
        let record = FlowRecord::from_json_line(r#"{"src_ip":"8.8.8.8","dst_ip":167772165}"#).unwrap();
        assert_eq!(record.address("src_ip"), Some("8.8.8.8"));
        assert_eq!(record.address("dst_ip"), None);
        assert_eq!(record.address("missing"), None);
    }

    #[test]
    fn test_set_enrichment_is_additive() {
        let mut record = FlowRecord::from_json_line(r#"{"ts":1,"src_ip":"8.8.8.8","note":"x"}"#).unwrap();
        let enriched = EnrichedAddress {
            address: "8.8.8.8".into(),
            asn: Some(15169),
            latitude: Some(37.751),
            ..Default::default()
        };

        record.set_enrichment(Direction::Src, &enriched);

        assert_eq!(record.len(), 3 + 9);
        assert_eq!(record.get("note"), Some(&json!("x")));
        assert_eq!(record.get("src_asn"), Some(&json!(15169)));
        assert_eq!(record.get("src_latitude"), Some(&json!(37.751)));
        assert_eq!(record.get("src_ptr"), Some(&Value::Null));
    }

    #[test]
    fn test_set_unenriched_writes_nulls() {
        let mut record = FlowRecord::default();
        record.set_unenriched(Direction::Dst);

        assert_eq!(record.len(), 9);
        for key in ENRICHMENT_KEYS {
            assert_eq!(record.get(&format!("dst_{key}")), Some(&Value::Null));
        }
    }

    #[test]
    fn test_enriched_address_serializes_field_names() {
        let value = serde_json::to_value(EnrichedAddress::unknown("1.1.1.1")).unwrap();
        assert_eq!(value["address"], json!("1.1.1.1"));
        assert_eq!(value["ptr"], Value::Null);
        assert_eq!(value["country_iso"], Value::Null);
    }
}
