//! Reverse-DNS (PTR) provider

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::proto::rr::Name;
use trust_dns_resolver::TokioAsyncResolver;

use crate::enrichment::PtrLookup;
use crate::error::LookupError;

/// Per-query timeout
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound for one whole lookup, retries included
pub const LOOKUP_LIFETIME: Duration = Duration::from_secs(3);

/// PTR lookups through a single long-lived resolver
pub struct DnsProvider {
    resolver: TokioAsyncResolver,
    lifetime: Duration,
}

impl DnsProvider {
    /// Build a resolver for `nameserver`, or from the system configuration
    pub fn new(nameserver: Option<IpAddr>) -> Self {
        Self::with_timeouts(nameserver, QUERY_TIMEOUT, LOOKUP_LIFETIME)
    }

    pub fn with_timeouts(nameserver: Option<IpAddr>, query_timeout: Duration, lifetime: Duration) -> Self {
        let (config, mut opts) = match nameserver {
            Some(ip) => (
                ResolverConfig::from_parts(None, vec![], NameServerConfigGroup::from_ips_clear(&[ip], 53, true)),
                ResolverOpts::default(),
            ),
            None => trust_dns_resolver::system_conf::read_system_conf().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Could not read system DNS configuration, using defaults");
                (ResolverConfig::default(), ResolverOpts::default())
            }),
        };
        opts.timeout = query_timeout;
        opts.attempts = 1;

        let resolver = TokioAsyncResolver::tokio(config, opts);

        Self { resolver, lifetime }
    }

    async fn reverse_lookup(&self, ip: IpAddr) -> Result<String, LookupError> {
        let response = tokio::time::timeout(self.lifetime, self.resolver.reverse_lookup(ip))
            .await
            .map_err(|_| LookupError::Timeout)?
            .map_err(classify)?;

        response
            .iter()
            .next()
            .map(|ptr| ptr_text(ptr))
            .filter(|name| !name.is_empty())
            .ok_or(LookupError::NotFound)
    }
}

fn classify(err: ResolveError) -> LookupError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => LookupError::NotFound,
        ResolveErrorKind::Timeout => LookupError::Timeout,
        _ => LookupError::Backend(err.to_string()),
    }
}

/// PTR target as ASCII, internationalized labels kept in `xn--` form
fn ptr_text(name: &Name) -> String {
    strip_root(&name.to_ascii()).to_string()
}

/// `dns.google.` -> `dns.google`
fn strip_root(name: &str) -> &str {
    name.trim_end_matches('.')
}

#[async_trait]
impl PtrLookup for DnsProvider {
    fn name(&self) -> &'static str {
        "dns"
    }

    async fn lookup_ptr(&self, ip: IpAddr) -> Option<String> {
        match self.reverse_lookup(ip).await {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::debug!(provider = self.name(), %ip, kind = e.kind(), error = %e, "Reverse lookup empty");
                None
            }
        }
    }
}
