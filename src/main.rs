//! flowscope
//!
//! Enriches network flow records with reverse-DNS, ASN and GeoIP attributes
//! from local databases, as a streaming CLI or as a small HTTP service.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod enrichment;
mod error;
mod models;
mod pipeline;
mod reporting;

use api::{create_router, AppState};
use config::{EnrichConfig, MalformedPolicy, ReportConfig, DEFAULT_CACHE_CAPACITY};
use enrichment::cache::ResolutionCache;
use enrichment::flow::AddressFields;
use enrichment::EnrichmentEngine;
use pipeline::{open_input, open_output, sink_for, FlowSource, OutputFormat, Pipeline};

/// flowscope
#[derive(Parser, Debug)]
#[command(name = "flowscope")]
#[command(about = "Enrich flow JSONL with PTR/ASN/Geo from local MaxMind databases")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read flow records, optionally enrich them, write JSONL or CSV
    Enrich(EnrichArgs),
    /// Serve the enrichment HTTP API
    Serve(ServeArgs),
}

/// Options shared by every command that resolves addresses
#[derive(clap::Args, Debug)]
struct LookupArgs {
    /// Enrich IP addresses
    #[arg(long, env = "ENRICH_IPS", action = ArgAction::SetTrue, value_parser = FalseyValueParser::new())]
    enrich: bool,

    /// MaxMind ASN database path (empty to disable)
    #[arg(long, env = "MAXMIND_ASN_DB", default_value = "./data/maxmind/GeoLite2-ASN.mmdb")]
    asn_db: PathBuf,

    /// MaxMind City database path (empty to disable)
    #[arg(long, env = "MAXMIND_CITY_DB", default_value = "./data/maxmind/GeoLite2-City.mmdb")]
    city_db: PathBuf,

    /// Nameserver for PTR lookups (system resolver when unset)
    #[arg(long, env = "DNS_RESOLVER")]
    dns_resolver: Option<String>,

    /// Number of distinct addresses kept in the resolution cache
    #[arg(long, env = "CACHE_CAPACITY", default_value_t = DEFAULT_CACHE_CAPACITY)]
    cache_capacity: usize,

    /// Field holding the source address
    #[arg(long, default_value = models::DEFAULT_SRC_FIELD)]
    src_field: String,

    /// Field holding the destination address
    #[arg(long, default_value = models::DEFAULT_DST_FIELD)]
    dst_field: String,
}

impl LookupArgs {
    fn fields(&self) -> AddressFields {
        AddressFields::new(&self.src_field, &self.dst_field)
    }

    fn dns_server(&self) -> Result<Option<IpAddr>> {
        match self.dns_resolver.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(server) => server
                .parse()
                .map(Some)
                .with_context(|| format!("DNS_RESOLVER '{server}' is not an IP address")),
        }
    }

    /// Open the databases and wrap the engine in its cache
    fn build_resolver(&self) -> Result<Option<ResolutionCache>> {
        if !self.enrich {
            return Ok(None);
        }

        let config = EnrichConfig::new(
            Some(self.asn_db.clone()),
            Some(self.city_db.clone()),
            self.dns_server()?,
            self.cache_capacity,
        );
        let engine = EnrichmentEngine::from_config(&config).context("Failed to initialize IP enrichment")?;

        Ok(Some(ResolutionCache::new(engine, config.cache_capacity)))
    }
}

#[derive(clap::Args, Debug)]
struct EnrichArgs {
    #[command(flatten)]
    lookup: LookupArgs,

    /// Input JSONL (`-` for stdin)
    #[arg(long = "in", default_value = "-")]
    input: String,

    /// Output file (`-` for stdout)
    #[arg(long = "out", default_value = "-")]
    output: String,

    /// Output CSV instead of JSONL
    #[arg(long)]
    csv: bool,

    /// What to do with lines that are not JSON objects
    #[arg(long, env = "MALFORMED_LINES", value_enum, default_value_t = MalformedPolicy::Skip)]
    on_malformed: MalformedPolicy,
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    #[command(flatten)]
    lookup: LookupArgs,

    /// Server host
    #[arg(long, env = "CAMTRACE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(long, env = "CAMTRACE_PORT", default_value = "8000")]
    port: u16,

    /// Run the daily report job
    #[arg(long, env = "CAMTRACE_SCHEDULER", action = ArgAction::SetTrue, value_parser = FalseyValueParser::new())]
    scheduler: bool,

    /// Directory holding the daily reports
    #[arg(long, env = "REPORTS_DIR", default_value = "reports")]
    reports_dir: PathBuf,

    /// Cron schedule of the report job (seconds first)
    #[arg(long, env = "REPORT_CRON", default_value = "0 59 23 * * *")]
    report_cron: String,

    /// Timezone the report schedule is evaluated in (IANA name or UTC offset)
    #[arg(long, env = "CAMTRACE_TZ", default_value = "America/Chicago")]
    report_tz: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing on stderr; stdout carries pipeline output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowscope=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parse arguments
    let args = Args::parse();

    match args.command {
        Command::Enrich(args) => run_enrich(args).await,
        Command::Serve(args) => run_serve(args).await,
    }
}

async fn run_enrich(args: EnrichArgs) -> Result<()> {
    let resolver = args.lookup.build_resolver()?;

    let input = open_input(&args.input).context("Failed to open input")?;
    let output = open_output(&args.output).context("Failed to open output")?;
    let format = if args.csv { OutputFormat::Csv } else { OutputFormat::Jsonl };
    let mut sink = sink_for(format, output)?;

    let stats = {
        let pipeline = match resolver.as_ref() {
            Some(cache) => Pipeline::enriching(cache),
            None => Pipeline::passthrough(),
        }
        .with_fields(args.lookup.fields())
        .with_malformed_policy(args.on_malformed);

        pipeline
            .run(FlowSource::new(input), sink.as_mut())
            .await
            .context("Flow pipeline failed")?
    };

    tracing::info!(
        read = stats.read,
        enriched = stats.enriched,
        written = stats.written,
        skipped = stats.skipped,
        cached = resolver.as_ref().map(ResolutionCache::len),
        "Pipeline complete"
    );

    if let Some(cache) = resolver {
        cache.into_engine().close();
    }

    Ok(())
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    tracing::info!("Starting flowscope service");

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    let resolver = args.lookup.build_resolver()?.map(Arc::new);
    if resolver.is_some() {
        tracing::info!("IP enrichment enabled");
    }

    let mut scheduler = if args.scheduler {
        let config = ReportConfig::new(&args.reports_dir, args.report_cron.clone(), &args.report_tz)?;
        let scheduler = reporting::start_scheduler(config)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start report scheduler: {e:?}"))?;
        Some(scheduler)
    } else {
        None
    };

    // Create application state
    let state = Arc::new(AppState {
        resolver: resolver.clone(),
        fields: args.lookup.fields(),
        metrics: Some(metrics),
    });

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Create router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler.as_mut() {
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!(error = ?e, "Report scheduler did not shut down cleanly");
        }
    }

    // The router is gone, so this is the last handle to the cache
    if let Some(cache) = resolver.and_then(|r| Arc::try_unwrap(r).ok()) {
        cache.into_engine().close();
    }

    tracing::info!("flowscope stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
