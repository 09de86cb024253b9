//! SQLite store for the normalized e-commerce schema: schema management, batch upserts,
//! order-total recomputation and the customer lifetime-value query.

use std::path::{Path, PathBuf};

use ecom_core::{Cell, Table, TableRecord};
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "ecom-storage";

/// Secondary indexes: every foreign-key column plus `orders.order_date`.
pub const INDEX_STATEMENTS: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_orders_customer ON orders(customer_id)",
    "CREATE INDEX IF NOT EXISTS idx_orders_date ON orders(order_date)",
    "CREATE INDEX IF NOT EXISTS idx_items_order ON order_items(order_id)",
    "CREATE INDEX IF NOT EXISTS idx_items_product ON order_items(product_id)",
    "CREATE INDEX IF NOT EXISTS idx_reviews_product ON reviews(product_id)",
    "CREATE INDEX IF NOT EXISTS idx_reviews_customer ON reviews(customer_id)",
];

const RECOMPUTE_ORDER_TOTALS: &str = "
    UPDATE orders
    SET total = (
        SELECT ROUND(SUM(line_total), 2)
        FROM order_items
        WHERE order_items.order_id = orders.order_id
    )
    WHERE order_id IN (SELECT DISTINCT order_id FROM order_items)";

const CUSTOMER_LTV: &str = "
    SELECT
        c.customer_id AS customer_id,
        c.name AS name,
        CAST(ROUND(COALESCE(SUM(o.total), 0), 2) AS REAL) AS lifetime_spend,
        COUNT(DISTINCT o.order_id) AS orders_count,
        CAST(
            CASE
                WHEN COUNT(DISTINCT o.order_id) = 0 THEN 0
                ELSE ROUND(SUM(o.total) / COUNT(DISTINCT o.order_id), 2)
            END AS REAL
        ) AS avg_order_value,
        MAX(o.order_date) AS last_order_date
    FROM customers c
    LEFT JOIN orders o ON o.customer_id = c.customer_id AND o.status = 'completed'
    GROUP BY c.customer_id, c.name
    ORDER BY lifetime_spend DESC, c.customer_id ASC";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("creating store directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("removing store file {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("opening store {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("creating schema object for {object}: {source}")]
    Schema {
        object: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("writing {table}: {source}")]
    Write {
        table: Table,
        #[source]
        source: sqlx::Error,
    },
    #[error(transparent)]
    Query(#[from] sqlx::Error),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Per-customer aggregate over completed orders.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerLtv {
    pub customer_id: i64,
    pub name: Option<String>,
    pub lifetime_spend: f64,
    pub orders_count: i64,
    pub avg_order_value: f64,
    pub last_order_date: Option<String>,
}

/// `CREATE TABLE IF NOT EXISTS` statement derived from the table definition.
pub fn create_table_sql(table: Table) -> String {
    let mut lines = Vec::new();
    for (idx, column) in table.columns().iter().enumerate() {
        let mut line = format!("{} {}", column.name, column.kind.sql_type());
        if idx == 0 {
            line.push_str(" PRIMARY KEY");
        }
        if table.unique_columns().contains(&column.name) {
            line.push_str(" UNIQUE");
        }
        lines.push(line);
    }
    for fk in table.foreign_keys() {
        lines.push(format!(
            "FOREIGN KEY({}) REFERENCES {}({})",
            fk.column,
            fk.references.name(),
            fk.references.primary_key()
        ));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        table.name(),
        lines.join(",\n    ")
    )
}

/// Insert, or on primary-key conflict overwrite every non-key column.
pub fn upsert_sql(table: Table) -> String {
    let columns = table.column_names();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let key = table.primary_key();
    let assignments = columns
        .iter()
        .filter(|c| **c != key)
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) DO UPDATE SET {}",
        table.name(),
        columns.join(", "),
        placeholders,
        key,
        assignments
    )
}

fn bind_cell<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    cell: &'q Cell,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match cell {
        Cell::Null => query.bind(None::<String>),
        Cell::Integer(v) => query.bind(*v),
        Cell::Real(v) => query.bind(*v),
        Cell::Text(v) => query.bind(v.as_str()),
    }
}

/// Delete the store file and its WAL sidecars. Returns whether the main file existed.
pub async fn remove_store_files(path: &Path) -> Result<bool> {
    let mut existed = false;
    for suffix in ["", "-wal", "-shm"] {
        let mut target = path.as_os_str().to_owned();
        target.push(suffix);
        let target = PathBuf::from(target);
        let present = fs::try_exists(&target)
            .await
            .map_err(|source| StoreError::Remove {
                path: target.clone(),
                source,
            })?;
        if !present {
            continue;
        }
        fs::remove_file(&target)
            .await
            .map_err(|source| StoreError::Remove {
                path: target.clone(),
                source,
            })?;
        if suffix.is_empty() {
            existed = true;
        }
    }
    Ok(existed)
}

/// Handle to the relational store. One connection, so per-connection pragmas hold for the
/// whole run.
#[derive(Debug, Clone)]
pub struct EcomStore {
    pool: SqlitePool,
    location: String,
}

impl EcomStore {
    /// Open (creating if missing) a file-backed store with WAL journaling and foreign keys on.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);
        let location = path.display().to_string();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|source| StoreError::Open {
                path: location.clone(),
                source,
            })?;
        debug!(store = %location, "opened sqlite store");
        Ok(Self { pool, location })
    }

    /// Delete any existing store at `path`, then open a fresh one.
    pub async fn open_replacing(path: &Path) -> Result<Self> {
        if remove_store_files(path).await? {
            info!(store = %path.display(), "removed existing store");
        }
        Self::open(path).await
    }

    /// Private in-memory store; lives as long as the returned handle.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);
        let location = ":memory:".to_string();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|source| StoreError::Open {
                path: location.clone(),
                source,
            })?;
        Ok(Self { pool, location })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes if absent. Safe to call repeatedly.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await
            .map_err(|source| StoreError::Schema {
                object: "foreign_keys pragma".to_string(),
                source,
            })?;

        for table in Table::ALL {
            sqlx::query(&create_table_sql(table))
                .execute(&self.pool)
                .await
                .map_err(|source| StoreError::Schema {
                    object: table.name().to_string(),
                    source,
                })?;
        }

        for statement in INDEX_STATEMENTS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|source| StoreError::Schema {
                    object: statement.to_string(),
                    source,
                })?;
        }

        debug!(store = %self.location, "schema ensured");
        Ok(())
    }

    /// Upsert a batch inside one transaction; nothing is committed if any row fails.
    pub async fn upsert_records(&self, table: Table, records: &[TableRecord]) -> Result<u64> {
        let sql = upsert_sql(table);
        let write_err = |source| StoreError::Write { table, source };

        let mut tx = self.pool.begin().await.map_err(write_err)?;
        let mut written = 0u64;
        for record in records {
            debug_assert_eq!(record.table, table);
            let query = record
                .cells
                .iter()
                .fold(sqlx::query(&sql), |query, cell| bind_cell(query, cell));
            written += query
                .execute(&mut *tx)
                .await
                .map_err(write_err)?
                .rows_affected();
        }
        tx.commit().await.map_err(write_err)?;
        Ok(written)
    }

    /// Set each order's total to the rounded sum of its line totals. Orders without items
    /// keep their stored total. Returns the number of orders updated.
    pub async fn recompute_order_totals(&self) -> Result<u64> {
        let write_err = |source| StoreError::Write {
            table: Table::Orders,
            source,
        };
        let mut tx = self.pool.begin().await.map_err(write_err)?;
        let updated = sqlx::query(RECOMPUTE_ORDER_TOTALS)
            .execute(&mut *tx)
            .await
            .map_err(write_err)?
            .rows_affected();
        tx.commit().await.map_err(write_err)?;
        Ok(updated)
    }

    /// One row per customer, ordered by lifetime spend descending.
    pub async fn customer_ltv(&self) -> Result<Vec<CustomerLtv>> {
        let rows = sqlx::query(CUSTOMER_LTV).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<CustomerLtv> {
                Ok(CustomerLtv {
                    customer_id: row.try_get("customer_id")?,
                    name: row.try_get("name")?,
                    lifetime_spend: row.try_get("lifetime_spend")?,
                    orders_count: row.try_get("orders_count")?,
                    avg_order_value: row.try_get("avg_order_value")?,
                    last_order_date: row.try_get("last_order_date")?,
                })
            })
            .collect()
    }

    pub async fn row_count(&self, table: Table) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
