//! Ingestion pipeline: loads the five CSV files into the SQLite store, reconciles order
//! totals from line items and optionally writes the customer lifetime-value report.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ecom_core::{Cell, HeaderIndex, RawRow, Table};
use ecom_storage::{CustomerLtv, EcomStore};
use serde::{Serialize, Serializer};
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "ecom-ingest";

pub const DEFAULT_DATA_DIR: &str = "synthetic_ecom_data";
pub const DEFAULT_DB_PATH: &str = "database/ecommerce.db";
pub const LTV_REPORT_FILE: &str = "customer_ltv.csv";

pub const LTV_COLUMNS: [&str; 6] = [
    "customer_id",
    "name",
    "lifetime_spend",
    "orders_count",
    "avg_order_value",
    "last_order_date",
];

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub replace: bool,
    pub write_ltv: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            replace: false,
            write_ltv: false,
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

impl IngestConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("ECOM_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR)),
            db_path: std::env::var("ECOM_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH)),
            replace: env_flag("ECOM_REPLACE"),
            write_ltv: env_flag("ECOM_WRITE_LTV"),
        }
    }

    pub fn ltv_report_path(&self) -> PathBuf {
        self.data_dir.join(LTV_REPORT_FILE)
    }
}

/// Header plus data rows read from one source.
#[derive(Debug, Clone, Default)]
pub struct SourceRows {
    pub header: HeaderIndex,
    pub rows: Vec<RawRow>,
}

/// Tabular input for one table. `Ok(None)` means the source does not exist.
pub trait TableSource {
    fn describe(&self) -> String;
    fn read(&mut self) -> Result<Option<SourceRows>>;
}

/// CSV file with a header row. Rows may be shorter or longer than the header.
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TableSource for CsvFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&mut self) -> Result<Option<SourceRows>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        let header = HeaderIndex::new(
            reader
                .headers()
                .with_context(|| format!("reading header of {}", self.path.display()))?
                .iter(),
        );

        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record
                .with_context(|| format!("reading row {} of {}", idx + 1, self.path.display()))?;
            rows.push(RawRow::new(record.iter()));
        }
        Ok(Some(SourceRows { header, rows }))
    }
}

/// In-memory rows, for callers that already hold the data.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl MemorySource {
    pub fn new<S: Into<String>>(name: S, header: &[&str], rows: &[&[&str]]) -> Self {
        Self {
            name: name.into(),
            header: header.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|v| v.to_string()).collect())
                .collect(),
        }
    }
}

impl TableSource for MemorySource {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn read(&mut self) -> Result<Option<SourceRows>> {
        Ok(Some(SourceRows {
            header: HeaderIndex::new(self.header.iter().cloned()),
            rows: self.rows.iter().cloned().map(RawRow::new).collect(),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableLoadOutcome {
    Loaded { rows: u64 },
    Missing,
    Empty,
}

#[derive(Debug, Clone)]
pub struct TableLoad {
    pub table: Table,
    pub source: String,
    pub outcome: TableLoadOutcome,
    /// Rows dropped because their primary key is not an integer.
    pub skipped: u64,
}

impl TableLoad {
    pub fn rows(&self) -> u64 {
        match self.outcome {
            TableLoadOutcome::Loaded { rows } => rows,
            TableLoadOutcome::Missing | TableLoadOutcome::Empty => 0,
        }
    }
}

impl fmt::Display for TableLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            TableLoadOutcome::Loaded { rows } => {
                write!(f, "inserted {rows:>5} rows into {}", self.table)?;
                if self.skipped > 0 {
                    write!(f, " (skipped {} rows without an integer key)", self.skipped)?;
                }
                Ok(())
            }
            TableLoadOutcome::Missing => {
                write!(f, "{} not found; skipped {}", self.source, self.table)
            }
            TableLoadOutcome::Empty => {
                write!(f, "no rows in {}; skipped {}", self.source, self.table)
            }
        }
    }
}

/// Read one source, coerce its rows to `table`'s columns and upsert them in one transaction.
/// A missing or empty source is a skip, not an error. Rows whose primary key does not coerce to
/// an integer are dropped with a warning.
pub async fn load_table(
    store: &EcomStore,
    source: &mut dyn TableSource,
    table: Table,
) -> Result<TableLoad> {
    let described = source.describe();
    let mut skipped = 0u64;
    let outcome = match source.read()? {
        None => {
            warn!(%table, source = %described, "source not found; skipping table");
            TableLoadOutcome::Missing
        }
        Some(data) if data.rows.is_empty() => {
            warn!(%table, source = %described, "source has no rows; skipping table");
            TableLoadOutcome::Empty
        }
        Some(data) => {
            let mut records = Vec::with_capacity(data.rows.len());
            for (idx, row) in data.rows.iter().enumerate() {
                let record = table.record_from_row(&data.header, row);
                if matches!(record.primary_key(), Cell::Integer(_)) {
                    records.push(record);
                } else {
                    skipped += 1;
                    warn!(
                        %table,
                        source = %described,
                        row = idx + 1,
                        key = ?record.primary_key(),
                        "primary key is not an integer; skipping row"
                    );
                }
            }
            let rows = store
                .upsert_records(table, &records)
                .await
                .with_context(|| format!("loading {table} from {described}"))?;
            info!(%table, rows, skipped, "loaded table");
            TableLoadOutcome::Loaded { rows }
        }
    };

    Ok(TableLoad {
        table,
        source: described,
        outcome,
        skipped,
    })
}

fn money<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("{value:.2}"))
}

#[derive(Debug, Serialize)]
struct LtvReportRow<'a> {
    customer_id: i64,
    name: &'a str,
    #[serde(serialize_with = "money")]
    lifetime_spend: f64,
    orders_count: i64,
    #[serde(serialize_with = "money")]
    avg_order_value: f64,
    last_order_date: &'a str,
}

impl<'a> From<&'a CustomerLtv> for LtvReportRow<'a> {
    fn from(row: &'a CustomerLtv) -> Self {
        Self {
            customer_id: row.customer_id,
            name: row.name.as_deref().unwrap_or_default(),
            lifetime_spend: row.lifetime_spend,
            orders_count: row.orders_count,
            avg_order_value: row.avg_order_value,
            last_order_date: row.last_order_date.as_deref().unwrap_or_default(),
        }
    }
}

/// Write the LTV report as CSV. Returns the number of customer rows written.
pub fn write_ltv_report(rows: &[CustomerLtv], path: &Path) -> Result<usize> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer
        .write_record(LTV_COLUMNS)
        .with_context(|| format!("writing header to {}", path.display()))?;
    for row in rows {
        writer
            .serialize(LtvReportRow::from(row))
            .with_context(|| format!("writing row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(rows.len())
}

#[derive(Debug, Clone)]
pub struct LtvReport {
    pub path: PathBuf,
    pub customers: usize,
}

#[derive(Debug, Clone)]
pub struct IngestRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub db_path: PathBuf,
    pub tables: Vec<TableLoad>,
    pub orders_recomputed: u64,
    pub ltv_report: Option<LtvReport>,
}

impl IngestRunSummary {
    pub fn table(&self, table: Table) -> Option<&TableLoad> {
        self.tables.iter().find(|t| t.table == table)
    }

    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(TableLoad::rows).sum()
    }
}

pub struct IngestPipeline {
    config: IngestConfig,
}

impl IngestPipeline {
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    pub fn source_for(&self, table: Table) -> CsvFileSource {
        CsvFileSource::new(self.config.data_dir.join(table.file_name()))
    }

    pub async fn run_once(&self) -> Result<IngestRunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "ingest",
            %run_id,
            data_dir = %self.config.data_dir.display(),
            db = %self.config.db_path.display()
        );
        self.run(run_id).instrument(span).await
    }

    async fn run(&self, run_id: Uuid) -> Result<IngestRunSummary> {
        let started_at = Utc::now();

        fs::create_dir_all(&self.config.data_dir)
            .await
            .with_context(|| format!("creating {}", self.config.data_dir.display()))?;

        let opened = if self.config.replace {
            EcomStore::open_replacing(&self.config.db_path).await
        } else {
            EcomStore::open(&self.config.db_path).await
        };
        let store =
            opened.with_context(|| format!("opening store {}", self.config.db_path.display()))?;
        store.ensure_schema().await.context("creating schema")?;

        let mut tables = Vec::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            let mut source = self.source_for(table);
            tables.push(load_table(&store, &mut source, table).await?);
        }

        let orders_recomputed = store
            .recompute_order_totals()
            .await
            .context("recomputing order totals")?;
        info!(orders = orders_recomputed, "recomputed order totals from line items");

        let ltv_report = if self.config.write_ltv {
            let rows = store
                .customer_ltv()
                .await
                .context("computing customer lifetime value")?;
            let path = self.config.ltv_report_path();
            let customers = write_ltv_report(&rows, &path)?;
            info!(customers, path = %path.display(), "wrote customer ltv report");
            Some(LtvReport { path, customers })
        } else {
            None
        };

        store.close().await;

        Ok(IngestRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            db_path: self.config.db_path.clone(),
            tables,
            orders_recomputed,
            ltv_report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn schema_store() -> EcomStore {
        let store = EcomStore::in_memory().await.expect("store");
        store.ensure_schema().await.expect("schema");
        store
    }

    #[tokio::test]
    async fn missing_source_is_a_skip() {
        let dir = tempdir().expect("tempdir");
        let store = schema_store().await;
        let mut source = CsvFileSource::new(dir.path().join("reviews.csv"));

        let load = load_table(&store, &mut source, Table::Reviews)
            .await
            .expect("load");
        assert_eq!(load.outcome, TableLoadOutcome::Missing);
        assert_eq!(load.rows(), 0);
        assert!(load.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn header_only_source_is_a_skip() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("products.csv");
        std::fs::write(&path, "product_id,name,category,price,sku\n").expect("write");
        let store = schema_store().await;

        let load = load_table(&store, &mut CsvFileSource::new(&path), Table::Products)
            .await
            .expect("load");
        assert_eq!(load.outcome, TableLoadOutcome::Empty);
        assert_eq!(store.row_count(Table::Products).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn memory_source_loads_and_counts_rows() {
        let store = schema_store().await;
        let mut source = MemorySource::new(
            "inline customers",
            &["customer_id", "name", "email"],
            &[&["1", "Ada", "ada@example.com"], &["2", "Grace", "grace@example.com"]],
        );

        let load = load_table(&store, &mut source, Table::Customers)
            .await
            .expect("load");
        assert_eq!(load.outcome, TableLoadOutcome::Loaded { rows: 2 });
        assert_eq!(
            load.to_string(),
            "inserted     2 rows into customers".to_string()
        );
    }

    #[tokio::test]
    async fn rows_without_an_integer_key_are_dropped() {
        let store = schema_store().await;
        let mut source = MemorySource::new(
            "inline customers",
            &["customer_id", "name", "email"],
            &[
                &["", "Nameless", "nameless@example.com"],
                &["abc", "Typo", "typo@example.com"],
                &["1", "Ada", "ada@example.com"],
            ],
        );

        let load = load_table(&store, &mut source, Table::Customers)
            .await
            .expect("load");
        assert_eq!(load.outcome, TableLoadOutcome::Loaded { rows: 1 });
        assert_eq!(load.skipped, 2);
        assert_eq!(
            load.to_string(),
            "inserted     1 rows into customers (skipped 2 rows without an integer key)"
        );
        assert_eq!(store.row_count(Table::Customers).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn csv_rows_with_ragged_lengths_are_accepted() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("customers.csv");
        std::fs::write(
            &path,
            "customer_id,name,email,address,join_date\n1,Ada,ada@example.com\n2,Grace,grace@example.com,\"2 Main St, Apt 4\",2024-01-02,extra\n",
        )
        .expect("write");

        let data = CsvFileSource::new(&path)
            .read()
            .expect("read")
            .expect("present");
        assert_eq!(data.rows.len(), 2);
        let record = Table::Customers.record_from_row(&data.header, &data.rows[1]);
        assert_eq!(
            record.cell("address").and_then(|c| c.as_text()),
            Some("2 Main St, Apt 4")
        );
        let short = Table::Customers.record_from_row(&data.header, &data.rows[0]);
        assert!(short.cell("join_date").is_some_and(|c| c.is_null()));
    }

    #[test]
    fn ltv_report_formats_money_with_two_decimals() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(LTV_REPORT_FILE);
        let rows = vec![
            CustomerLtv {
                customer_id: 1,
                name: Some("Ada".into()),
                lifetime_spend: 50.0,
                orders_count: 2,
                avg_order_value: 25.0,
                last_order_date: Some("2024-03-01 10:00:00".into()),
            },
            CustomerLtv {
                customer_id: 2,
                name: None,
                lifetime_spend: 0.0,
                orders_count: 0,
                avg_order_value: 0.0,
                last_order_date: None,
            },
        ];

        assert_eq!(write_ltv_report(&rows, &path).expect("write"), 2);
        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(
            text,
            "customer_id,name,lifetime_spend,orders_count,avg_order_value,last_order_date\n\
             1,Ada,50.00,2,25.00,2024-03-01 10:00:00\n\
             2,,0.00,0,0.00,\n"
        );
    }

    #[test]
    fn ltv_report_with_no_customers_is_header_only() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(LTV_REPORT_FILE);
        assert_eq!(write_ltv_report(&[], &path).expect("write"), 0);
        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text.trim_end(), LTV_COLUMNS.join(","));
    }

    #[test]
    fn default_config_points_at_relative_paths() {
        let config = IngestConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("synthetic_ecom_data"));
        assert_eq!(config.db_path, PathBuf::from("database/ecommerce.db"));
        assert_eq!(
            config.ltv_report_path(),
            PathBuf::from("synthetic_ecom_data/customer_ltv.csv")
        );
        assert!(!config.replace);
        assert!(!config.write_ltv);
    }
}
