//! # Sheet Harness CLI (`shx`)
//!
//! ```bash
//! shx --config ./config/shx.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shx init` | Create the SQLite database and run migrations |
//! | `shx import [PATH]` | Import CSV/TSV/XLSX rows |
//! | `shx schemas` | List stored dataset schemas |
//! | `shx schema <dataset>` | Show the latest schema of a dataset |
//! | `shx query --filter k=v` | Filtered row retrieval |
//! | `shx decode "<text>"` | Decode a stored row sentence |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sheet_harness::ingest::ImportArgs;
use sheet_harness::progress::ProgressMode;
use sheet_harness::query::QueryArgs;
use sheet_harness::{config, decode, ingest, migrate, query, schemas};

/// Sheet Harness: import spreadsheet rows and query them back with typed filters.
#[derive(Parser)]
#[command(name = "shx", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/shx.toml")]
    config: PathBuf,

    /// Log level when `RUST_LOG` is not set (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run more than once.
    Init,

    /// Import rows from a sheet file or a directory of sheets.
    ///
    /// Without PATH, `[connectors.sheets].root` is scanned.
    Import {
        path: Option<PathBuf>,

        /// Dataset name for every imported table (default: file stem or sheet name).
        #[arg(long)]
        dataset: Option<String>,

        /// Target index (default: `[ingest].index`).
        #[arg(long)]
        index: Option<String>,

        /// Read and infer schemas without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Maximum rows imported per table.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress on stderr: off, human or json (default: human on a TTY).
        #[arg(long)]
        progress: Option<String>,
    },

    /// List stored dataset schemas.
    Schemas,

    /// Print the latest schema of a dataset as JSON.
    Schema { dataset: String },

    /// Retrieve rows matching key/value filters.
    ///
    /// Keys starting with `data.` address row fields; other keys address
    /// row tags (`dataset_name`, `source_name`, `row_number`, `schema_id`,
    /// `import_batch_id`). Repeating a key ORs its values.
    Query {
        #[arg(long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,

        /// Filters as a JSON object, e.g. '{"data.Env": ["prod", "staging"]}'.
        #[arg(long)]
        filter_json: Option<String>,

        /// Dataset whose schema types the filters.
        #[arg(long)]
        dataset: Option<String>,

        #[arg(long)]
        index: Option<String>,

        /// Maximum rows returned (default: `[retrieval].final_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Decode a row sentence into a JSON row.
    Decode {
        text: String,

        /// Side-channel JSON stored with the row.
        #[arg(long)]
        raw_json: Option<String>,

        /// Type fields with this dataset's latest schema.
        #[arg(long)]
        dataset: Option<String>,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import {
            path,
            dataset,
            index,
            dry_run,
            limit,
            progress,
        } => {
            let mode = match progress.as_deref() {
                Some(value) => ProgressMode::parse(value)?,
                None => ProgressMode::default_for_tty(),
            };
            let reporter = mode.reporter();
            let args = ImportArgs {
                path: path.as_deref(),
                dataset: dataset.as_deref(),
                index: index.as_deref(),
                dry_run,
                limit,
            };
            ingest::run_import(&cfg, &args, reporter.as_ref()).await?;
        }
        Commands::Schemas => {
            schemas::list_schemas(&cfg).await?;
        }
        Commands::Schema { dataset } => {
            schemas::show_schema(&cfg, &dataset).await?;
        }
        Commands::Query {
            filters,
            filter_json,
            dataset,
            index,
            limit,
            json,
        } => {
            let args = QueryArgs {
                filters: &filters,
                filter_json: filter_json.as_deref(),
                dataset: dataset.as_deref(),
                index: index.as_deref(),
                limit,
                json,
            };
            query::run_query(&cfg, &args).await?;
        }
        Commands::Decode {
            text,
            raw_json,
            dataset,
        } => {
            decode::run_decode(&cfg, &text, raw_json.as_deref(), dataset.as_deref()).await?;
        }
    }

    Ok(())
}
