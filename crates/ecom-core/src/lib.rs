//! Core entity records and the CSV/table contract for the e-commerce dataset.

use std::collections::HashMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "ecom-core";

/// Timestamp layout shared by `order_date` and `review_date`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Completed,
    Shipped,
    Cancelled,
    Returned,
}

/// Field order is the `customers.csv` column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: i64,
    pub name: String,
    pub email: String,
    pub address: String,
    pub join_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: i64,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub sku: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: i64,
    pub customer_id: i64,
    #[serde(with = "space_timestamp")]
    pub order_date: NaiveDateTime,
    pub total: f64,
    pub status: OrderStatus,
}

/// One order line. `line_total` is `unit_price * quantity` rounded to cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_item_id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub unit_price: f64,
    pub line_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub review_id: i64,
    pub product_id: i64,
    pub customer_id: i64,
    pub rating: u8,
    pub review_text: String,
    #[serde(with = "space_timestamp")]
    pub review_date: NaiveDateTime,
}

/// Serde adapter writing `NaiveDateTime` as `YYYY-MM-DD HH:MM:SS`.
pub mod space_timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&value.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// Round a monetary amount to two decimals.
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Semantic type of a column; drives both DDL and load-time coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
}

impl ColumnKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Real => "REAL",
            ColumnKind::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn int(name: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        kind: ColumnKind::Integer,
    }
}

const fn real(name: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        kind: ColumnKind::Real,
    }
}

const fn text(name: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        kind: ColumnKind::Text,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references: Table,
}

const CUSTOMER_COLUMNS: &[ColumnDef] = &[
    int("customer_id"),
    text("name"),
    text("email"),
    text("address"),
    text("join_date"),
];

const PRODUCT_COLUMNS: &[ColumnDef] = &[
    int("product_id"),
    text("name"),
    text("category"),
    real("price"),
    text("sku"),
];

const ORDER_COLUMNS: &[ColumnDef] = &[
    int("order_id"),
    int("customer_id"),
    text("order_date"),
    real("total"),
    text("status"),
];

const ORDER_ITEM_COLUMNS: &[ColumnDef] = &[
    int("order_item_id"),
    int("order_id"),
    int("product_id"),
    int("quantity"),
    real("unit_price"),
    real("line_total"),
];

const REVIEW_COLUMNS: &[ColumnDef] = &[
    int("review_id"),
    int("product_id"),
    int("customer_id"),
    int("rating"),
    text("review_text"),
    text("review_date"),
];

const ORDER_REFERENCES: &[ForeignKey] = &[ForeignKey {
    column: "customer_id",
    references: Table::Customers,
}];

const ORDER_ITEM_REFERENCES: &[ForeignKey] = &[
    ForeignKey {
        column: "order_id",
        references: Table::Orders,
    },
    ForeignKey {
        column: "product_id",
        references: Table::Products,
    },
];

const REVIEW_REFERENCES: &[ForeignKey] = &[
    ForeignKey {
        column: "product_id",
        references: Table::Products,
    },
    ForeignKey {
        column: "customer_id",
        references: Table::Customers,
    },
];

/// The five tables of the normalized store, in load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Customers,
    Products,
    Orders,
    OrderItems,
    Reviews,
}

impl Table {
    /// Parents before children.
    pub const ALL: [Table; 5] = [
        Table::Customers,
        Table::Products,
        Table::Orders,
        Table::OrderItems,
        Table::Reviews,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Customers => "customers",
            Table::Products => "products",
            Table::Orders => "orders",
            Table::OrderItems => "order_items",
            Table::Reviews => "reviews",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Table::Customers => "customers.csv",
            Table::Products => "products.csv",
            Table::Orders => "orders.csv",
            Table::OrderItems => "order_items.csv",
            Table::Reviews => "reviews.csv",
        }
    }

    pub fn columns(self) -> &'static [ColumnDef] {
        match self {
            Table::Customers => CUSTOMER_COLUMNS,
            Table::Products => PRODUCT_COLUMNS,
            Table::Orders => ORDER_COLUMNS,
            Table::OrderItems => ORDER_ITEM_COLUMNS,
            Table::Reviews => REVIEW_COLUMNS,
        }
    }

    pub fn column_names(self) -> Vec<&'static str> {
        self.columns().iter().map(|c| c.name).collect()
    }

    /// Every table is keyed on its first column.
    pub fn primary_key(self) -> &'static str {
        self.columns()[0].name
    }

    pub fn foreign_keys(self) -> &'static [ForeignKey] {
        match self {
            Table::Customers | Table::Products => &[],
            Table::Orders => ORDER_REFERENCES,
            Table::OrderItems => ORDER_ITEM_REFERENCES,
            Table::Reviews => REVIEW_REFERENCES,
        }
    }

    pub fn unique_columns(self) -> &'static [&'static str] {
        match self {
            Table::Customers => &["email"],
            _ => &[],
        }
    }

    /// Map a header-indexed row onto this table's columns, coercing numeric kinds.
    pub fn record_from_row(self, header: &HeaderIndex, row: &RawRow) -> TableRecord {
        let cells = self
            .columns()
            .iter()
            .map(|column| match row.get(header, column.name) {
                Some(raw) => Cell::coerce(column.kind, raw),
                None => Cell::Null,
            })
            .collect();
        TableRecord { table: self, cells }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A column value after load-time coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    /// Numeric kinds fall back to the raw text when parsing fails. Empty strings are kept as text.
    pub fn coerce(kind: ColumnKind, raw: &str) -> Cell {
        if raw.is_empty() {
            return Cell::Text(String::new());
        }
        match kind {
            ColumnKind::Integer => coerce_integer(raw)
                .map(Cell::Integer)
                .unwrap_or_else(|| Cell::Text(raw.to_string())),
            ColumnKind::Real => coerce_real(raw)
                .map(Cell::Real)
                .unwrap_or_else(|| Cell::Text(raw.to_string())),
            ColumnKind::Text => Cell::Text(raw.to_string()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

/// Parse as a float then truncate toward zero, so `"3.0"` and `"3.7"` both load as 3.
pub fn coerce_integer(raw: &str) -> Option<i64> {
    let value = coerce_real(raw)?.trunc();
    if value < i64::MIN as f64 || value >= i64::MAX as f64 {
        return None;
    }
    Some(value as i64)
}

pub fn coerce_real(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Column name to position lookup built from a CSV header row.
#[derive(Debug, Clone, Default)]
pub struct HeaderIndex {
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    /// Duplicate names resolve to the last occurrence.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let positions = names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| (name.into(), idx))
            .collect();
        Self { positions }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }
}

/// One untyped data row, read positionally against a [`HeaderIndex`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRow {
    pub values: Vec<String>,
}

impl RawRow {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `None` when the column is absent from the header or the row is short.
    pub fn get<'a>(&'a self, header: &HeaderIndex, column: &str) -> Option<&'a str> {
        header
            .position(column)
            .and_then(|idx| self.values.get(idx))
            .map(String::as_str)
    }
}

/// Cells for one table row, in the table's column order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRecord {
    pub table: Table,
    pub cells: Vec<Cell>,
}

impl TableRecord {
    pub fn cell(&self, column: &str) -> Option<&Cell> {
        self.table
            .columns()
            .iter()
            .position(|c| c.name == column)
            .and_then(|idx| self.cells.get(idx))
    }

    pub fn primary_key(&self) -> &Cell {
        &self.cells[0]
    }
}
