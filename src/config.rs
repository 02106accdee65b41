//! Runtime configuration shared by the CLI and the HTTP shell

use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::Error;

/// Default number of distinct addresses kept by the resolution cache
pub const DEFAULT_CACHE_CAPACITY: usize = 8192;

/// Settings needed to build the enrichment engine and its cache
#[derive(Debug, Clone)]
pub struct EnrichConfig {
    /// MaxMind ASN database; `None` disables ASN lookups
    pub asn_db: Option<PathBuf>,
    /// MaxMind City database; `None` disables geo lookups
    pub city_db: Option<PathBuf>,
    /// Nameserver used for PTR queries instead of the system resolver
    pub dns_server: Option<IpAddr>,
    pub cache_capacity: usize,
}

impl EnrichConfig {
    pub fn new(
        asn_db: Option<PathBuf>,
        city_db: Option<PathBuf>,
        dns_server: Option<IpAddr>,
        cache_capacity: usize,
    ) -> Self {
        Self {
            asn_db: non_empty(asn_db),
            city_db: non_empty(city_db),
            dns_server,
            cache_capacity,
        }
    }
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            asn_db: None,
            city_db: None,
            dns_server: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// An empty path from the environment means "not configured"
fn non_empty(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| p.as_os_str() != "")
}

/// What to do with an input line that is not a JSON object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MalformedPolicy {
    /// Log a warning, count the line and keep going
    #[default]
    Skip,
    /// Stop the run with an error
    Abort,
}

/// Timezone the report schedule is evaluated in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportTimezone {
    /// IANA zone such as `America/Chicago`, daylight saving included
    Named(Tz),
    /// Fixed offset such as `-06:00`
    Fixed(FixedOffset),
}

impl ReportTimezone {
    /// Parse an IANA zone name, falling back to a `+HH:MM` / `-HH:MM` offset
    pub fn parse(value: &str) -> Result<Self, Error> {
        let value = value.trim();
        if let Ok(tz) = value.parse::<Tz>() {
            return Ok(Self::Named(tz));
        }

        value.parse::<FixedOffset>().map(Self::Fixed).map_err(|_| {
            Error::InvalidConfig(format!(
                "timezone '{value}' must be an IANA zone like America/Chicago or an offset like -06:00"
            ))
        })
    }

    /// First occurrence of `schedule` strictly after `now`, in local wall-clock time
    pub fn next_after(&self, schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Named(tz) => schedule
                .after(&now.with_timezone(tz))
                .next()
                .map(|due| due.with_timezone(&Utc)),
            Self::Fixed(offset) => schedule
                .after(&now.with_timezone(offset))
                .next()
                .map(|due| due.with_timezone(&Utc)),
        }
    }
}

impl fmt::Display for ReportTimezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(tz) => write!(f, "{tz}"),
            Self::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

/// Daily report job settings
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub reports_dir: PathBuf,
    /// Six-field cron expression (seconds first), in local time
    pub cron: String,
    pub schedule: Schedule,
    pub timezone: ReportTimezone,
}

impl ReportConfig {
    pub fn new(reports_dir: impl AsRef<Path>, cron: impl Into<String>, timezone: &str) -> Result<Self, Error> {
        let cron = cron.into();
        let schedule = Schedule::from_str(&cron)
            .map_err(|e| Error::InvalidConfig(format!("report schedule '{cron}' is not a valid cron expression: {e}")))?;

        Ok(Self {
            reports_dir: reports_dir.as_ref().to_path_buf(),
            cron,
            schedule,
            timezone: ReportTimezone::parse(timezone)?,
        })
    }
}
