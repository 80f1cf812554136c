//! trustee-web command line
//!
//! Builds the mailbox-trustee web for a set of seed identities from
//! permission CSV exports (or a PostgreSQL table with the `postgres`
//! feature) and writes the node list, optional edge list and run summary.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: pretty)
//! - `TRUSTEE_WEB_TABLE`: SQL table name when `--database-url` is used
//!
//! Logs go to stderr so the node CSV can stream to stdout.
//!
//! ## Usage
//!
//! ```bash
//! trustee-web --input full_access.csv --input send_as.csv \
//!     --seed alice@contoso.com --max-depth 3 --output web.csv --summary web.json
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trustee_web::error::Result;
use trustee_web::policy::web::{depth_from_i64, threshold_from_i64};
use trustee_web::types::parse_identities;
use trustee_web::{
    report, BuildError, CancellationToken, ConfigError, Identity, RelationshipStore, RelationshipTable,
    ReportError, ReportFiles, TableLoader, WebBuilder, WebPolicy,
};

/// Discover the mailbox-trustee permission web around seed identities
#[derive(Parser, Debug)]
#[command(name = "trustee-web")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Relationship CSV file; repeat to concatenate several sources
    #[arg(short, long = "input", value_name = "CSV")]
    inputs: Vec<PathBuf>,

    /// Read relationships from PostgreSQL instead of CSV (requires the `postgres` feature)
    #[arg(long, value_name = "URL")]
    database_url: Option<String>,

    /// Seed identity; repeat for several seeds
    #[arg(short, long = "seed", value_name = "IDENTITY")]
    seeds: Vec<String>,

    /// File with one seed identity per line (`#` starts a comment)
    #[arg(long, value_name = "FILE")]
    seed_file: Option<PathBuf>,

    /// JSON policy file; flags below override its values
    #[arg(long, value_name = "FILE")]
    policy: Option<PathBuf>,

    /// Maximum hops from the nearest seed
    #[arg(long, allow_negative_numbers = true)]
    max_depth: Option<i64>,

    /// Drop mailboxes with more trustees than this
    #[arg(long, allow_negative_numbers = true)]
    permissive_mailbox_threshold: Option<i64>,

    /// Drop trustees holding more mailboxes than this
    #[arg(long, allow_negative_numbers = true)]
    power_trustee_threshold: Option<i64>,

    /// Mailbox identity whose rows are ignored; repeatable
    #[arg(long, value_name = "IDENTITY")]
    ignore_mailbox: Vec<String>,

    /// Trustee identity whose rows are ignored; repeatable
    #[arg(long, value_name = "IDENTITY")]
    ignore_trustee: Vec<String>,

    /// Permission type whose rows are ignored; repeatable
    #[arg(long, value_name = "PERMISSION")]
    ignore_permission: Vec<String>,

    /// Fail if the web grows past this many nodes
    #[arg(long)]
    max_nodes: Option<usize>,

    /// Abort the traversal after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Node CSV output (stdout when omitted)
    #[arg(short, long, value_name = "CSV")]
    output: Option<PathBuf>,

    /// Also write the edges between discovered nodes (CSV sources only)
    #[arg(long, value_name = "CSV")]
    edges_output: Option<PathBuf>,

    /// Write the run summary as JSON
    #[arg(long, value_name = "JSON")]
    summary: Option<PathBuf>,

    /// Add MailboxFanout/TrusteeFanout columns to the node CSV (CSV sources only)
    #[arg(long)]
    adjacency: bool,
}

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "trustee_web=info,sqlx=warn".into());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .init();
    }
}

fn read_seed_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let reader = BufReader::new(File::open(path)?);
    let mut seeds = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        seeds.push(trimmed.to_string());
    }
    Ok(seeds)
}

fn resolve_policy(cli: &Cli) -> Result<WebPolicy> {
    let mut policy = match &cli.policy {
        Some(path) => WebPolicy::from_json_file(path)?,
        None => WebPolicy::default(),
    };

    if let Some(depth) = cli.max_depth {
        policy.max_depth = depth_from_i64(depth)?;
    }
    if let Some(value) = cli.permissive_mailbox_threshold {
        policy.permissive_mailbox_threshold = threshold_from_i64("permissive_mailbox_threshold", value)?;
    }
    if let Some(value) = cli.power_trustee_threshold {
        policy.power_trustee_threshold = threshold_from_i64("power_trustee_threshold", value)?;
    }
    policy.ignore_mailbox.extend(parse_identities(&cli.ignore_mailbox)?);
    policy.ignore_trustee.extend(parse_identities(&cli.ignore_trustee)?);
    for name in &cli.ignore_permission {
        policy.ignore_permission_named(name)?;
    }
    if cli.max_nodes.is_some() {
        policy.max_nodes = cli.max_nodes;
    }
    if cli.timeout_secs.is_some() {
        policy.deadline_secs = cli.timeout_secs;
    }

    policy.validate()?;
    Ok(policy)
}

fn resolve_seeds(cli: &Cli) -> Result<Vec<Identity>> {
    let mut raw = cli.seeds.clone();
    if let Some(path) = &cli.seed_file {
        raw.extend(read_seed_file(path)?);
    }
    if raw.is_empty() {
        return Err(BuildError::NoSeeds.into());
    }
    Ok(parse_identities(&raw)?)
}

/// Cancel the build on Ctrl+C.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling web build");
            token.cancel();
        }
    });
}

async fn build_and_report<S: RelationshipStore + 'static>(
    cli: &Cli,
    store: Arc<S>,
    table: Option<&RelationshipTable>,
    policy: WebPolicy,
    seeds: &[Identity],
) -> Result<()> {
    let token = CancellationToken::new();
    spawn_interrupt_handler(token.clone());

    let builder = WebBuilder::new(store, policy)?.with_cancellation(token);
    let web = builder.build(seeds).await?;
    report::log_summary(web.summary());

    let adjacency = if cli.adjacency {
        table.map(|t| t as &dyn report::AdjacencySource)
    } else {
        None
    };
    let mut nodes = Vec::new();
    report::write_nodes_csv(&web, adjacency, &mut nodes)?;

    // Every output is rendered before any file is touched.
    let mut files = ReportFiles::new();
    let stdout_nodes = match &cli.output {
        Some(path) => {
            files.add(path, nodes);
            None
        }
        None => Some(nodes),
    };

    let mut edges_written = None;
    if let Some(path) = &cli.edges_output {
        match table {
            Some(t) => {
                let mut edges = Vec::new();
                edges_written = Some(report::write_edges_csv(&web, t, &mut edges)?);
                files.add(path, edges);
            }
            None => warn!("--edges-output is only supported for CSV sources"),
        }
    }
    if let Some(path) = &cli.summary {
        let mut summary = Vec::new();
        report::write_summary_json(web.summary(), &mut summary)?;
        files.add(path, summary);
    }
    files.commit()?;

    if let Some(edges) = edges_written {
        info!(edges = edges, "Edge list written");
    }
    if let Some(nodes) = stdout_nodes {
        let mut out = std::io::stdout().lock();
        out.write_all(&nodes).map_err(ReportError::from)?;
        out.flush().map_err(ReportError::from)?;
    }
    Ok(())
}

#[cfg(feature = "postgres")]
async fn run_sql(cli: &Cli, url: &str, policy: WebPolicy, seeds: &[Identity]) -> Result<()> {
    use trustee_web::store::postgres::{PostgresConfig, PostgresRelationshipStore};

    if cli.adjacency {
        warn!("--adjacency is only supported for CSV sources");
    }
    let config = PostgresConfig::from_env().with_database_url(url);
    let store = PostgresRelationshipStore::new(config, &policy).await?;
    build_and_report(cli, Arc::new(store), None, policy, seeds).await
}

#[cfg(not(feature = "postgres"))]
async fn run_sql(_cli: &Cli, _url: &str, _policy: WebPolicy, _seeds: &[Identity]) -> Result<()> {
    Err(ConfigError::FeatureDisabled("postgres").into())
}

async fn run(cli: Cli) -> Result<()> {
    let policy = resolve_policy(&cli)?;
    let seeds = resolve_seeds(&cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        seed_count = seeds.len(),
        params_hash = %policy.params_hash(),
        "Starting trustee-web"
    );

    match (&cli.database_url, cli.inputs.is_empty()) {
        (Some(_), false) => Err(ConfigError::ConflictingSources.into()),
        (Some(url), true) => run_sql(&cli, url, policy, &seeds).await,
        (None, true) => Err(ConfigError::NoSource.into()),
        (None, false) => {
            let loader = cli
                .inputs
                .iter()
                .fold(TableLoader::new(), |loader, path| loader.with_source(path));
            let table = Arc::new(loader.load(&policy)?);
            let table_ref = Arc::clone(&table);
            build_and_report(&cli, table, Some(table_ref.as_ref()), policy, &seeds).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "trustee-web failed");
            ExitCode::FAILURE
        }
    }
}
