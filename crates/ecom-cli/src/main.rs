use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand};
use ecom_core::Table;
use ecom_ingest::{IngestConfig, IngestPipeline};
use ecom_producer::{parse_as_of, ProducerConfig};

#[derive(Debug, Parser)]
#[command(name = "ecom-cli")]
#[command(about = "Synthetic e-commerce dataset producer and SQLite loader")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Ingest options when no subcommand is given.
    #[command(flatten)]
    ingest: IngestArgs,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load the CSV files into the store (default).
    Ingest(IngestArgs),
    /// Write a fresh synthetic dataset as CSV files.
    Generate(GenerateArgs),
}

#[derive(Debug, Clone, Default, Args)]
struct IngestArgs {
    /// Directory holding the CSV files [env: ECOM_DATA_DIR] [default: synthetic_ecom_data]
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// SQLite store file [env: ECOM_DB_PATH] [default: database/ecommerce.db]
    #[arg(long)]
    db_path: Option<PathBuf>,
    /// Delete and recreate the store before ingesting
    #[arg(long)]
    replace: bool,
    /// Also write customer_ltv.csv into the data directory
    #[arg(long)]
    ltv: bool,
}

impl IngestArgs {
    fn into_config(self, mut config: IngestConfig) -> IngestConfig {
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(db_path) = self.db_path {
            config.db_path = db_path;
        }
        config.replace |= self.replace;
        config.write_ltv |= self.ltv;
        config
    }
}

#[derive(Debug, Clone, Default, Args)]
struct GenerateArgs {
    /// RNG seed [env: ECOM_SEED] [default: 42]
    #[arg(long)]
    seed: Option<u64>,
    /// Multiplier applied to the base row counts [env: ECOM_SCALE] [default: 1.0]
    #[arg(long)]
    scale: Option<f64>,
    /// Output directory [env: ECOM_DATA_DIR] [default: synthetic_ecom_data]
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Latest generated timestamp, YYYY-MM-DD[ HH:MM:SS] [env: ECOM_AS_OF] [default: 2025-01-01]
    #[arg(long, value_parser = parse_as_of_arg)]
    as_of: Option<NaiveDateTime>,
}

fn parse_as_of_arg(raw: &str) -> Result<NaiveDateTime, String> {
    parse_as_of(raw)
        .ok_or_else(|| format!("expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS, got {raw:?}"))
}

impl GenerateArgs {
    fn into_config(self, mut config: ProducerConfig) -> ProducerConfig {
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(scale) = self.scale {
            config.scale = scale;
        }
        if let Some(out_dir) = self.out_dir {
            config.out_dir = out_dir;
        }
        if let Some(as_of) = self.as_of {
            config.as_of = as_of;
        }
        config
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("ECOM_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn ingest(args: IngestArgs) -> Result<()> {
    let config = args.into_config(IngestConfig::from_env());
    let summary = IngestPipeline::new(config).run_once().await?;

    for load in &summary.tables {
        println!(" {load}");
    }
    println!(
        " recomputed totals for {} orders",
        summary.orders_recomputed
    );
    if let Some(report) = &summary.ltv_report {
        println!(
            " wrote customer ltv report ({} customers) -> {}",
            report.customers,
            report.path.display()
        );
    }
    println!(
        "\ningestion complete: run_id={} database={}",
        summary.run_id,
        summary.db_path.display()
    );
    Ok(())
}

fn generate(args: GenerateArgs) -> Result<()> {
    let config = args.into_config(ProducerConfig::from_env());
    let written = ecom_producer::run_producer(&config)?;

    let count = |table: Table| {
        written
            .iter()
            .find(|f| f.table == table)
            .map(|f| f.rows)
            .unwrap_or(0)
    };
    println!("synthetic data generated: {}", config.out_dir.display());
    println!(
        "customers: {}, products: {}, orders: {}, order_items: {}, reviews: {}",
        count(Table::Customers),
        count(Table::Products),
        count(Table::Orders),
        count(Table::OrderItems),
        count(Table::Reviews)
    );
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Ingest(args)) => ingest(args).await,
        Some(Commands::Generate(args)) => generate(args),
        None => ingest(cli.ingest).await,
    }
}
