//! ASN and City lookups against local MaxMind databases

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use maxminddb::{geoip2, Reader};

use crate::enrichment::{AsnLookup, GeoLookup};
use crate::error::{Error, LookupError, Result};
use crate::models::{AsnRecord, GeoRecord};

const ASN_DB_LABEL: &str = "ASN DB";
const CITY_DB_LABEL: &str = "City DB";

/// Open a MaxMind database, or nothing when no path is configured
fn open_reader(label: &'static str, path: Option<&Path>) -> Result<Option<Arc<Reader<Vec<u8>>>>> {
    let Some(path) = path else {
        tracing::warn!("{} not configured, lookups will be empty", label);
        return Ok(None);
    };

    if !path.is_file() {
        return Err(Error::MissingDatabase {
            database: label,
            path: path.to_path_buf(),
        });
    }

    let reader = Reader::open_readfile(path).map_err(|source| Error::OpenDatabase {
        database: label,
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!(path = %path.display(), "Opened {}", label);
    Ok(Some(Arc::new(reader)))
}

/// ASN lookups using a MaxMind GeoLite2-ASN database
pub struct MaxMindAsnProvider {
    reader: Option<Arc<Reader<Vec<u8>>>>,
}

impl MaxMindAsnProvider {
    /// Open the ASN database at `path`; `None` yields a provider that knows nothing
    pub fn open(path: Option<&Path>) -> Result<Self> {
        Ok(Self {
            reader: open_reader(ASN_DB_LABEL, path)?,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.reader.is_some()
    }

    fn lookup(&self, ip: IpAddr) -> std::result::Result<AsnRecord, LookupError> {
        let reader = self.reader.as_ref().ok_or(LookupError::Unavailable)?;
        let asn: geoip2::Asn = reader.lookup(ip)?;

        Ok(AsnRecord {
            asn: asn.autonomous_system_number,
            as_org: asn.autonomous_system_organization.map(|s| s.to_string()),
        })
    }
}

#[async_trait]
impl AsnLookup for MaxMindAsnProvider {
    fn name(&self) -> &'static str {
        "maxmind-asn"
    }

    async fn lookup_asn(&self, ip: IpAddr) -> AsnRecord {
        self.lookup(ip).unwrap_or_else(|e| {
            tracing::debug!(provider = self.name(), %ip, kind = e.kind(), error = %e, "ASN lookup empty");
            AsnRecord::default()
        })
    }
}

/// Geographic lookups using a MaxMind GeoLite2-City database
pub struct MaxMindCityProvider {
    reader: Option<Arc<Reader<Vec<u8>>>>,
}

impl MaxMindCityProvider {
    /// Open the City database at `path`; `None` yields a provider that knows nothing
    pub fn open(path: Option<&Path>) -> Result<Self> {
        Ok(Self {
            reader: open_reader(CITY_DB_LABEL, path)?,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.reader.is_some()
    }

    fn lookup(&self, ip: IpAddr) -> std::result::Result<GeoRecord, LookupError> {
        let reader = self.reader.as_ref().ok_or(LookupError::Unavailable)?;
        let city: geoip2::City = reader.lookup(ip)?;
        let mut data = GeoRecord::default();

        if let Some(country) = city.country {
            data.country_iso = country.iso_code.map(|s| s.to_string());
            data.country_name = country.names.and_then(|n| english(&n));
        }

        if let Some(city_data) = city.city {
            data.city = city_data.names.and_then(|n| english(&n));
        }

        // Subdivisions are listed from largest to smallest
        if let Some(subdivisions) = city.subdivisions {
            data.region = subdivisions
                .last()
                .and_then(|s| s.names.as_ref())
                .and_then(english);
        }

        if let Some(location) = city.location {
            data.latitude = location.latitude.filter(|lat| (-90.0..=90.0).contains(lat));
            data.longitude = location.longitude.filter(|lon| (-180.0..=180.0).contains(lon));
        }

        Ok(data)
    }
}

fn english(names: &std::collections::BTreeMap<&str, &str>) -> Option<String> {
    names
        .get("en")
        .filter(|name| !name.is_empty())
        .map(|name| name.to_string())
}

#[async_trait]
impl GeoLookup for MaxMindCityProvider {
    fn name(&self) -> &'static str {
        "maxmind-city"
    }

    async fn lookup_geo(&self, ip: IpAddr) -> GeoRecord {
        self.lookup(ip).unwrap_or_else(|e| {
            tracing::debug!(provider = self.name(), %ip, kind = e.kind(), error = %e, "Geo lookup empty");
            GeoRecord::default()
        })
    }
}
