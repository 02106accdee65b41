//! Enrichment services for flow addresses

pub mod cache;
pub mod dns;
pub mod flow;
pub mod geoip;

use std::net::IpAddr;

use async_trait::async_trait;

use crate::config::EnrichConfig;
use crate::error::Result;
use crate::models::{AsnRecord, EnrichedAddress, GeoRecord};

use dns::DnsProvider;
use geoip::{MaxMindAsnProvider, MaxMindCityProvider};

/// Autonomous-system lookup
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AsnLookup: Send + Sync {
    /// Provider name
    fn name(&self) -> &'static str;

    /// ASN and organization; empty when unknown
    async fn lookup_asn(&self, ip: IpAddr) -> AsnRecord;
}

/// Country / region / city lookup
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// Provider name
    fn name(&self) -> &'static str;

    /// Geographic attributes; empty when unknown
    async fn lookup_geo(&self, ip: IpAddr) -> GeoRecord;
}

/// Reverse-DNS lookup
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PtrLookup: Send + Sync {
    /// Provider name
    fn name(&self) -> &'static str;

    /// First PTR name without the trailing root dot
    async fn lookup_ptr(&self, ip: IpAddr) -> Option<String>;
}

/// Resolves one address against all three providers
pub struct EnrichmentEngine {
    asn: Box<dyn AsnLookup>,
    geo: Box<dyn GeoLookup>,
    ptr: Box<dyn PtrLookup>,
}

impl EnrichmentEngine {
    pub fn new(asn: Box<dyn AsnLookup>, geo: Box<dyn GeoLookup>, ptr: Box<dyn PtrLookup>) -> Self {
        Self { asn, geo, ptr }
    }

    /// Open the MaxMind databases and build the DNS resolver.
    ///
    /// A configured database path that does not exist is a fatal error.
    pub fn from_config(config: &EnrichConfig) -> Result<Self> {
        let asn = MaxMindAsnProvider::open(config.asn_db.as_deref())?;
        let geo = MaxMindCityProvider::open(config.city_db.as_deref())?;
        let ptr = DnsProvider::new(config.dns_server);

        tracing::info!(
            asn_db = asn.is_enabled(),
            city_db = geo.is_enabled(),
            dns_server = ?config.dns_server,
            "Enrichment engine ready"
        );

        Ok(Self::new(Box::new(asn), Box::new(geo), Box::new(ptr)))
    }

    /// Enrich a globally routable address.
    ///
    /// Callers are expected to have checked `is_enrichable` first; an
    /// unparsable address yields an empty result.
    pub async fn resolve(&self, address: &str) -> EnrichedAddress {
        let ip: IpAddr = match address.parse() {
            Ok(ip) => ip,
            Err(_) => {
                tracing::debug!(address, "Refusing to resolve unparsable address");
                return EnrichedAddress::unknown(address);
            }
        };

        let (asn, geo, ptr) = tokio::join!(
            self.asn.lookup_asn(ip),
            self.geo.lookup_geo(ip),
            self.ptr.lookup_ptr(ip),
        );

        tracing::trace!(
            address,
            asn_provider = self.asn.name(),
            geo_provider = self.geo.name(),
            ptr_provider = self.ptr.name(),
            "Resolved address"
        );

        EnrichedAddress {
            address: address.to_string(),
            ptr,
            asn: asn.asn,
            as_org: asn.as_org,
            country_iso: geo.country_iso,
            country_name: geo.country_name,
            region: geo.region,
            city: geo.city,
            latitude: geo.latitude,
            longitude: geo.longitude,
        }
    }

    /// Release database handles and the resolver
    pub fn close(self) {
        tracing::debug!(
            asn_provider = self.asn.name(),
            geo_provider = self.geo.name(),
            "Closing enrichment engine"
        );
        drop(self);
    }
}
