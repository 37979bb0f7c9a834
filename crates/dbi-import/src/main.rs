//! DBI Import - bulk record import tool

use anyhow::Result;
use clap::Parser;
use dbi_common::logging::{init_logging, LogConfig, LogLevel};
use dbi_import::client::ApiClient;
use dbi_import::config::{
    ImportConfig, RetryPolicy, DEFAULT_BATCH_SIZE, DEFAULT_MAX_IN_FLIGHT, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_RETRY_DELAY_MS, DEFAULT_TIMEOUT_SECS,
};
use dbi_import::coordinator::ImportCoordinator;
use dbi_import::progress::{create_spinner, render_progress};
use dbi_import::schema::FieldMappingSchema;
use dbi_import::source::RecordSource;
use dbi_import::transform::RecordTransformer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "dbi-import")]
#[command(author, version, about = "Bulk record importer for DHIS2-style APIs")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run an import against the remote instance
    Run(RunArgs),

    /// Transform the first rows and print the payloads without submitting
    Preview {
        /// Input CSV file
        #[arg(short, long)]
        input: PathBuf,

        /// Field mapping schema (JSON)
        #[arg(short, long)]
        schema: PathBuf,

        /// Number of rows to preview
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },

    /// Validate the schema against the input header and ping the remote
    Check {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Input CSV file
        #[arg(short, long)]
        input: PathBuf,

        /// Field mapping schema (JSON)
        #[arg(short, long)]
        schema: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct ConnectionArgs {
    /// Base URL of the remote instance
    #[arg(long, env = "DBI_BASE_URL")]
    base_url: String,

    /// Username for basic auth
    #[arg(long, env = "DBI_USERNAME")]
    username: String,

    /// Password for basic auth
    #[arg(long, env = "DBI_PASSWORD", hide_env_values = true)]
    password: String,

    /// Per-request timeout in seconds
    #[arg(long, env = "DBI_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Input CSV file
    #[arg(short, long, env = "DBI_INPUT")]
    input: PathBuf,

    /// Field mapping schema (JSON)
    #[arg(short, long, env = "DBI_SCHEMA")]
    schema: PathBuf,

    /// Payloads per submission batch
    #[arg(long, env = "DBI_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Concurrent in-flight batch submissions
    #[arg(long, env = "DBI_MAX_IN_FLIGHT", default_value_t = DEFAULT_MAX_IN_FLIGHT)]
    max_in_flight: usize,

    /// Attempts per transient failure before giving up
    #[arg(long, env = "DBI_RETRY_ATTEMPTS", default_value_t = DEFAULT_RETRY_ATTEMPTS)]
    retry_attempts: u32,

    /// Delay between retry attempts in milliseconds
    #[arg(long, env = "DBI_RETRY_DELAY_MS", default_value_t = DEFAULT_RETRY_DELAY_MS)]
    retry_delay_ms: u64,

    /// Ledger of successfully imported rows
    #[arg(long, default_value = "succeeded_imports.csv")]
    succeeded_out: PathBuf,

    /// Ledger of failed rows, replayable as a new input file
    #[arg(long, default_value = "failed_imports.csv")]
    failed_out: PathBuf,
}

impl RunArgs {
    fn into_config(self) -> ImportConfig {
        ImportConfig {
            base_url: self.connection.base_url,
            username: self.connection.username,
            password: self.connection.password,
            input: self.input,
            schema: self.schema,
            batch_size: self.batch_size,
            max_in_flight: self.max_in_flight,
            retry: RetryPolicy {
                attempts: self.retry_attempts,
                delay_ms: self.retry_delay_ms,
            },
            timeout_secs: self.connection.timeout_secs,
            succeeded_out: self.succeeded_out,
            failed_out: self.failed_out,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Environment variables take precedence; the verbose flag wins over both
    let mut log_config = LogConfig::from_env().unwrap_or_default();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    log_config.log_file_prefix = "dbi-import".to_string();

    init_logging(&log_config)?;

    match cli.command {
        Command::Run(args) => run_import(args).await?,
        Command::Preview {
            input,
            schema,
            limit,
        } => preview(&input, &schema, limit).await?,
        Command::Check {
            connection,
            input,
            schema,
        } => check(connection, &input, &schema).await?,
    }

    Ok(())
}

async fn run_import(args: RunArgs) -> Result<()> {
    let schema = FieldMappingSchema::load(&args.schema)?;
    let config = args.into_config();
    let mut coordinator = ImportCoordinator::new(config, schema)?;

    // Ctrl-C cancels cooperatively: in-flight batches resolve, unsubmitted
    // rows land in the failed ledger.
    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, draining");
            cancel.cancel();
        }
    });

    let mut progress_rx = coordinator.progress_channel();
    let spinner = create_spinner();
    let render = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            spinner.set_message(render_progress(&progress));
        }
        spinner.finish_and_clear();
    });

    let summary = coordinator.run().await?;
    let _ = render.await;

    println!("{}", summary);
    if let Some(snapshot) = coordinator.ledger_snapshot() {
        if !snapshot.failed.is_empty() {
            println!(
                "failed rows written for replay; re-run with the failed ledger as input"
            );
        }
    }
    Ok(())
}

async fn preview(input: &PathBuf, schema_path: &PathBuf, limit: usize) -> Result<()> {
    let schema = Arc::new(FieldMappingSchema::load(schema_path)?);
    let source = RecordSource::open(input)?;
    schema.validate_headers(source.headers())?;

    // No identifier generator: generated ids render as placeholders
    let transformer = RecordTransformer::preview(schema);

    for item in source.take(limit) {
        match item {
            Ok(row) => match transformer.transform(&row).await {
                Ok(payload) => {
                    println!("# line {}", payload.row.line);
                    println!("{}", serde_json::to_string_pretty(&payload.body)?);
                },
                Err(err) => warn!(line = row.line(), error = %err, "row failed transformation"),
            },
            Err(err) => warn!(line = err.line, error = %err.error, "skipping malformed row"),
        }
    }
    Ok(())
}

async fn check(connection: ConnectionArgs, input: &PathBuf, schema_path: &PathBuf) -> Result<()> {
    let schema = FieldMappingSchema::load(schema_path)?;
    schema.validate()?;

    let source = RecordSource::open(input)?;
    schema.validate_headers(source.headers())?;
    let columns = source.headers().len();

    let config = ImportConfig {
        base_url: connection.base_url,
        username: connection.username,
        password: connection.password,
        input: input.clone(),
        schema: schema_path.clone(),
        batch_size: DEFAULT_BATCH_SIZE,
        max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        retry: RetryPolicy::default(),
        timeout_secs: connection.timeout_secs,
        succeeded_out: PathBuf::from("succeeded_imports.csv"),
        failed_out: PathBuf::from("failed_imports.csv"),
    };
    config.validate()?;

    let client = ApiClient::new(&config)?;
    client.ping().await?;

    println!(
        "ok: {} mapped fields, {} input columns, remote {} reachable",
        schema.fields.len(),
        columns,
        client.base_url()
    );
    Ok(())
}
