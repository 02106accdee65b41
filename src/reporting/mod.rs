//! Daily violations report job
//!
//! Reports are markdown files named `<YYYY-MM-DD>_camtrace_daily_report.md`
//! produced by the capture side. The job picks the newest one, counts the
//! rows of its violations table and raises an alert when there are any.
//! When no report exists yet an empty one is written for today.
//!
//! The scheduler ticks every second in UTC; [`DailyTrigger`] decides which
//! tick is due by evaluating the report cron in the configured timezone, so
//! the job keeps its local wall-clock time across daylight-saving changes.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use cron::Schedule;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::config::{ReportConfig, ReportTimezone};

/// File name suffix shared by all daily reports
pub const REPORT_SUFFIX: &str = "_camtrace_daily_report.md";

/// Scheduler tick, in UTC
const TICK_SCHEDULE: &str = "* * * * * *";

/// Violation counts parsed from a report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViolationSummary {
    pub total: usize,
    pub by_device: BTreeMap<String, usize>,
}

/// Result of one report run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome {
    pub path: PathBuf,
    pub summary: ViolationSummary,
}

impl ReportOutcome {
    /// Alert subject, when there is something to alert about
    pub fn alert_subject(&self) -> Option<String> {
        (self.summary.total > 0).then(|| format!("Daily Report: {} violation(s)", self.summary.total))
    }
}

/// Newest report in `dir`, by file name
pub fn find_latest_report(dir: &Path) -> io::Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut candidates = vec![];
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_report = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(REPORT_SUFFIX));
        if is_report && path.is_file() {
            candidates.push(path);
        }
    }

    candidates.sort();
    Ok(candidates.pop())
}

/// Count rows of the first markdown table that has a `Device` column
pub fn parse_violations(markdown: &str) -> ViolationSummary {
    let lines: Vec<&str> = markdown.lines().map(str::trim).collect();
    let mut summary = ViolationSummary::default();
    let mut in_table = false;
    let mut device_idx = None;

    for (i, line) in lines.iter().enumerate() {
        if !in_table {
            if line.starts_with('|') && line.contains("Device") {
                device_idx = split_row(line).iter().position(|h| *h == "Device");
                in_table = lines.get(i + 1).is_some_and(|next| is_rule(next, false));
            }
            continue;
        }

        if !(line.starts_with('|') && line.ends_with('|')) {
            break;
        }
        if is_rule(line, true) {
            continue;
        }

        summary.total += 1;
        if let Some(device) = device_idx.and_then(|idx| split_row(line).get(idx).copied()) {
            *summary.by_device.entry(device.to_string()).or_insert(0) += 1;
        }
    }

    summary
}

fn split_row(line: &str) -> Vec<&str> {
    line.trim_matches('|').split('|').map(str::trim).collect()
}

/// Separator rows contain only pipes, dashes and spaces (and colons for alignment)
fn is_rule(line: &str, allow_colon: bool) -> bool {
    line.chars()
        .all(|c| matches!(c, '|' | '-' | ' ') || (allow_colon && c == ':'))
}

/// Write an empty report for `date` and return its path
pub fn write_stub_report(dir: &Path, date: NaiveDate) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}{}", date.format("%Y-%m-%d"), REPORT_SUFFIX));
    let body = format!(
        "# Daily Report - {}\n\n\
         **Ingested events:** 0  \n\
         **Unique devices:** 0  \n\
         **Violations:** 0  \n\
         **New destinations first seen today:** 0\n\n\
         ---\n\n\
         ## Violations\n\
         | Time | Device | dst_ip:port | RDNS | ASN | Geo | Severity | Reason |\n\
         |---|---|---|---|---|---|---|---|\n",
        date.format("%B %d, %Y")
    );
    fs::write(&path, body)?;
    Ok(path)
}

/// Summarize the newest report, creating an empty one for `today` if none exists
pub fn generate_report(dir: &Path, today: NaiveDate) -> io::Result<ReportOutcome> {
    fs::create_dir_all(dir)?;

    if let Some(path) = find_latest_report(dir)? {
        let summary = parse_violations(&fs::read_to_string(&path)?);
        return Ok(ReportOutcome { path, summary });
    }

    let path = write_stub_report(dir, today)?;
    Ok(ReportOutcome {
        path,
        summary: ViolationSummary::default(),
    })
}

/// One scheduled run. Failures are logged, never returned to the scheduler.
pub fn run_daily_report(dir: &Path, today: NaiveDate) -> Option<ReportOutcome> {
    let outcome = match generate_report(dir, today) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(dir = %dir.display(), error = %e, "Daily report failed");
            return None;
        }
    };

    match outcome.alert_subject() {
        Some(subject) => tracing::warn!(
            report = %outcome.path.display(),
            by_device = ?outcome.summary.by_device,
            "{}",
            subject
        ),
        None => tracing::info!(report = %outcome.path.display(), "Daily report clean"),
    }

    Some(outcome)
}

/// Next local-time occurrence of the report schedule
#[derive(Debug)]
pub struct DailyTrigger {
    schedule: Schedule,
    timezone: ReportTimezone,
    next_due: Option<DateTime<Utc>>,
}

impl DailyTrigger {
    pub fn new(config: &ReportConfig, now: DateTime<Utc>) -> Self {
        Self {
            schedule: config.schedule.clone(),
            timezone: config.timezone,
            next_due: config.timezone.next_after(&config.schedule, now),
        }
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.next_due
    }

    /// True once per occurrence, on the first poll at or after its due time
    pub fn poll(&mut self, now: DateTime<Utc>) -> bool {
        match self.next_due {
            Some(due) if due <= now => {
                self.next_due = self.timezone.next_after(&self.schedule, now);
                true
            }
            _ => false,
        }
    }

    /// Calendar date in the report timezone
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        match self.timezone {
            ReportTimezone::Named(tz) => now.with_timezone(&tz).date_naive(),
            ReportTimezone::Fixed(offset) => now.with_timezone(&offset).date_naive(),
        }
    }
}

/// Schedule the daily report job and start the scheduler
pub async fn start_scheduler(config: ReportConfig) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    let trigger = DailyTrigger::new(&config, Utc::now());
    let next_due = trigger.next_due();
    let trigger = Arc::new(Mutex::new(trigger));
    let dir = config.reports_dir.clone();

    let job = Job::new_async(TICK_SCHEDULE, move |_uuid, _scheduler| {
        let dir = dir.clone();
        let now = Utc::now();
        let today = match trigger.lock() {
            Ok(mut trigger) => trigger.poll(now).then(|| trigger.today(now)),
            Err(_) => None, // Lock poisoned, skip this tick
        };

        Box::pin(async move {
            let Some(today) = today else {
                return;
            };
            if let Err(e) = tokio::task::spawn_blocking(move || run_daily_report(&dir, today)).await {
                tracing::error!(error = %e, "Daily report task panicked");
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    tracing::info!(
        cron = %config.cron,
        timezone = %config.timezone,
        next_due = ?next_due,
        dir = %config.reports_dir.display(),
        "Daily report scheduled"
    );

    Ok(scheduler)
}
