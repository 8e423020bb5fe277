//! Kuba Insights CLI
//!
//! Thin command-line front end over the analytics pipeline.
//!
//! # Usage
//!
//! ```bash
//! insights ask "which inverter has the most downtime?" --granularity hour
//! insights ask "top features" --format json
//! insights describe performance
//! insights repl
//! insights check-config --config insights.toml
//! ```
//!
//! Configuration is read from `--config`, then `INSIGHTS_CONFIG`, then
//! `./insights.toml`, falling back to built-in defaults.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};

use kuba_insights::{Config, FilterSpec, Granularity, Pipeline, StageFailure};

const DEFAULT_CONFIG_FILE: &str = "insights.toml";

// =============================================================================
// CLI Definition
// =============================================================================

/// Kuba Insights - ask ranking questions about tabular time-series data
#[derive(Parser)]
#[command(name = "insights")]
#[command(version)]
#[command(about = "Query-driven analytics over inverter datasets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "INSIGHTS_CONFIG")]
    config: Option<PathBuf>,

    /// Override data directory path
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question
    Ask {
        /// Free-text question
        query: String,

        /// Restrict to one entity
        #[arg(short, long)]
        entity: Option<String>,

        /// Inclusive start date
        #[arg(long)]
        start: Option<String>,

        /// Inclusive end date
        #[arg(long)]
        end: Option<String>,

        /// Bucket width (minute, hour, day, week, month or T/H/D/W/M)
        #[arg(short, long)]
        granularity: Option<Granularity>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show loaded datasets, or one dataset's schema
    Describe {
        /// Dataset name
        name: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Interactive question loop; `exit` or `quit` leaves
    Repl,

    /// Validate configuration without loading data
    CheckConfig,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

// =============================================================================
// Configuration
// =============================================================================

fn load_config(cli: &Cli) -> kuba_insights::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file_with_env(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            Config::from_file_with_env(DEFAULT_CONFIG_FILE)?
        },
        None => Config::from_env(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.catalog.data_dir = data_dir.clone();
    }
    Ok(config)
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.monitoring.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();
}

// =============================================================================
// Command Handlers
// =============================================================================

fn cmd_ask(
    pipeline: &Pipeline,
    query: &str,
    filters: &FilterSpec,
    format: OutputFormat,
) -> CliResult {
    match pipeline.answer(query, Some(filters)) {
        Ok(answer) => {
            match format {
                OutputFormat::Text => println!("{}", answer.text()),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&answer)?),
            }
            Ok(())
        },
        Err(failure) => {
            print_failure(&failure, format)?;
            std::process::exit(2);
        },
    }
}

fn print_failure(failure: &StageFailure, format: OutputFormat) -> CliResult {
    match format {
        OutputFormat::Text => eprintln!("{}", failure.message),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "stage": failure.stage,
                "message": failure.message,
            }))?
        ),
    }
    Ok(())
}

fn cmd_describe(pipeline: &Pipeline, name: Option<&str>, format: OutputFormat) -> CliResult {
    let catalog = pipeline.catalog();

    let Some(name) = name else {
        match format {
            OutputFormat::Text => println!("{}", catalog.planner_prompt()),
            OutputFormat::Json => {
                let all: Vec<_> = catalog.datasets().collect();
                println!("{}", serde_json::to_string_pretty(&all)?);
            },
        }
        return Ok(());
    };

    let meta = catalog.describe(name)?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(meta)?);
        return Ok(());
    }

    println!("Dataset: {}", meta.name);
    println!("  Description: {}", meta.description);
    println!("  Rows: {}", meta.row_count);
    println!("  Keywords: {}", meta.keywords.join(", "));
    println!("  Key columns: {}", meta.key_columns.join(", "));
    println!("  Entity column: {}", meta.entity_column.as_deref().unwrap_or("-"));
    println!("  Timestamp column: {}", meta.timestamp_column.as_deref().unwrap_or("-"));
    println!("  Metrics:");
    for metric in &meta.available_metrics {
        println!("    - {}", metric);
    }
    println!("  Columns:");
    for (column, column_type) in &meta.columns {
        println!("    {:<40} {:?}", column, column_type);
    }
    Ok(())
}

fn cmd_repl(pipeline: &Pipeline) -> CliResult {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    println!("Ask a question about the loaded datasets ('exit' to quit).");
    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query.to_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        match pipeline.answer(query, None) {
            Ok(answer) => println!("{}", answer.text()),
            Err(failure) => println!("{}", failure.message),
        }
    }

    let stats = pipeline.stats();
    debug!(
        queries = stats.queries,
        answered = stats.answered,
        failures = stats.failures(),
        "Session finished"
    );
    Ok(())
}

fn cmd_check_config(config: &Config) -> CliResult {
    config.validate()?;

    println!("Configuration is valid!");
    println!();
    println!("Catalog:");
    println!("  Data directory: {:?}", config.catalog.data_dir);
    for dataset in &config.catalog.datasets {
        let path = dataset.resolved_path(&config.catalog.data_dir);
        let status = if path.exists() { "found" } else { "missing" };
        println!("  - {} ({:?}, {})", dataset.name, path, status);
    }
    println!();
    println!("Interpreter:");
    println!(
        "  Default: '{}' from '{}'",
        config.interpreter.default_metric, config.interpreter.default_dataset
    );
    println!("  Fallback rules: {}", config.interpreter.fallback.len());
    println!();
    println!("Ranking:");
    println!("  Lower-is-better keywords: {}", config.ranking.negative_keywords.join(", "));
    println!("  Report size: {}", config.ranking.summary_size);
    println!();
    println!("Monitoring:");
    println!("  Log level: {}", config.monitoring.log_level);

    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> CliResult {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config);

    if let Commands::CheckConfig = cli.command {
        return cmd_check_config(&config);
    }

    info!("Starting Kuba Insights v{}", env!("CARGO_PKG_VERSION"));
    let pipeline = Pipeline::from_config(&config)?;

    match &cli.command {
        Commands::Ask {
            query,
            entity,
            start,
            end,
            granularity,
            format,
        } => {
            let filters = FilterSpec {
                start_date: start.clone(),
                end_date: end.clone(),
                entity_id: entity.clone(),
                granularity: *granularity,
            };
            cmd_ask(&pipeline, query, &filters, *format)
        },
        Commands::Describe { name, format } => cmd_describe(&pipeline, name.as_deref(), *format),
        Commands::Repl => cmd_repl(&pipeline),
        Commands::CheckConfig => cmd_check_config(&config),
    }
}
