//! Applies address enrichment to the two address fields of a flow record

use crate::enrichment::cache::ResolutionCache;
use crate::models::address::is_enrichable;
use crate::models::{DEFAULT_DST_FIELD, DEFAULT_SRC_FIELD, Direction, FlowRecord};

/// Names of the fields holding the flow's source and destination addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressFields {
    pub src: String,
    pub dst: String,
}

impl AddressFields {
    pub fn new(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
        }
    }

    /// Whether the record carries either address field
    pub fn present_in(&self, record: &FlowRecord) -> bool {
        record.contains(&self.src) || record.contains(&self.dst)
    }
}

impl Default for AddressFields {
    fn default() -> Self {
        Self::new(DEFAULT_SRC_FIELD, DEFAULT_DST_FIELD)
    }
}

/// Write `src_*` and `dst_*` enrichment fields into `record`.
///
/// Addresses that are absent, malformed or not globally routable get nine
/// null fields without consulting the cache.
pub async fn enrich_flow_record<'a>(
    record: &'a mut FlowRecord,
    cache: &ResolutionCache,
    fields: &AddressFields,
) -> &'a mut FlowRecord {
    apply(record, cache, Direction::Src, &fields.src).await;
    apply(record, cache, Direction::Dst, &fields.dst).await;
    record
}

async fn apply(record: &mut FlowRecord, cache: &ResolutionCache, direction: Direction, field: &str) {
    let address = record
        .address(field)
        .filter(|address| is_enrichable(address))
        .map(str::to_string);

    let Some(address) = address else {
        record.set_unenriched(direction);
        return;
    };

    let enriched = cache.get_or_resolve(&address).await;
    record.set_enrichment(direction, &enriched);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::testing::google_engine;
    use crate::enrichment::{EnrichmentEngine, MockAsnLookup, MockGeoLookup, MockPtrLookup};
    use crate::models::ENRICHMENT_KEYS;
    use serde_json::{Value, json};

    /// Engine whose providers fail the test if they are ever called
    fn untouchable_cache() -> ResolutionCache {
        let mut asn = MockAsnLookup::new();
        asn.expect_lookup_asn().never();
        let mut geo = MockGeoLookup::new();
        geo.expect_lookup_geo().never();
        let mut ptr = MockPtrLookup::new();
        ptr.expect_lookup_ptr().never();
        ResolutionCache::new(EnrichmentEngine::new(Box::new(asn), Box::new(geo), Box::new(ptr)), 8)
    }

    fn assert_all_null(record: &FlowRecord, prefix: &str) {
        for key in ENRICHMENT_KEYS {
            assert_eq!(
                record.get(&format!("{prefix}{key}")),
                Some(&Value::Null),
                "{prefix}{key} should be null"
            );
        }
    }

    #[tokio::test]
    async fn test_private_addresses_are_nulled_without_lookups() {
        let cache = untouchable_cache();
        let mut record = FlowRecord::from_json_line(r#"{"src_ip":"192.168.1.10","dst_ip":"ff02::1"}"#).unwrap();

        enrich_flow_record(&mut record, &cache, &AddressFields::default()).await;

        assert_all_null(&record, "src_");
        assert_all_null(&record, "dst_");
        assert_eq!(record.len(), 2 + 18);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_missing_addresses_still_get_all_columns() {
        let cache = untouchable_cache();
        let mut record = FlowRecord::from_json_line(r#"{"ts":"2025-01-01T00:00:00Z","proto":"tcp"}"#).unwrap();

        enrich_flow_record(&mut record, &cache, &AddressFields::default()).await;

        assert_eq!(record.len(), 2 + 18);
        assert_all_null(&record, "src_");
        assert_all_null(&record, "dst_");
    }

    #[tokio::test]
    async fn test_invalid_address_values_are_nulled() {
        let cache = untouchable_cache();
        let mut record = FlowRecord::from_json_line(r#"{"src_ip":"999.1.1.1","dst_ip":42}"#).unwrap();

        enrich_flow_record(&mut record, &cache, &AddressFields::default()).await;

        assert_all_null(&record, "src_");
        assert_all_null(&record, "dst_");
        assert_eq!(record.get("dst_ip"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn test_public_source_private_destination() {
        let cache = ResolutionCache::new(google_engine(), 8);
        let mut record = FlowRecord::from_json_line(r#"{"src_ip":"8.8.8.8","dst_ip":"10.0.0.5"}"#).unwrap();

        enrich_flow_record(&mut record, &cache, &AddressFields::default()).await;

        assert_eq!(record.get("src_asn"), Some(&json!(15169)));
        assert_eq!(record.get("src_as_org"), Some(&json!("GOOGLE")));
        assert_eq!(record.get("src_ptr"), Some(&json!("dns.google")));
        assert_eq!(record.get("src_latitude"), Some(&json!(37.751)));
        assert_all_null(&record, "dst_");
        assert_eq!(record.get("src_ip"), Some(&json!("8.8.8.8")));
        assert!(cache.contains("8.8.8.8"));
        assert!(!cache.contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_custom_field_names() {
        let cache = ResolutionCache::new(google_engine(), 8);
        let mut record = FlowRecord::from_json_line(r#"{"saddr":"8.8.8.8","daddr":"1.1.1.1"}"#).unwrap();
        let fields = AddressFields::new("saddr", "daddr");

        assert!(fields.present_in(&record));
        enrich_flow_record(&mut record, &cache, &fields).await;

        assert_eq!(record.get("src_asn"), Some(&json!(15169)));
        assert_eq!(record.get("dst_asn"), Some(&json!(15169)));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_existing_fields_are_preserved() {
        let cache = ResolutionCache::new(google_engine(), 8);
        let mut record =
            FlowRecord::from_json_line(r#"{"ts":1700000000,"src_ip":"8.8.8.8","bytes":512,"device":"cam-1"}"#)
                .unwrap();

        let enriched = enrich_flow_record(&mut record, &cache, &AddressFields::default()).await;

        assert_eq!(enriched.get("bytes"), Some(&json!(512)));
        assert_eq!(enriched.get("device"), Some(&json!("cam-1")));
        assert_eq!(enriched.get("ts"), Some(&json!(1700000000)));
    }
}
