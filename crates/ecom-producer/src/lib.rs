//! Seeded synthetic dataset producer. Emits the five CSV files the ingest pipeline consumes.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use ecom_core::{
    round_cents, Customer, Order, OrderItem, OrderStatus, Product, Review, Table,
    TIMESTAMP_FORMAT,
};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "ecom-producer";

const FIRST_NAMES: &[&str] = &[
    "James", "Mary", "Robert", "Patricia", "John", "Jennifer", "Michael", "Linda", "David",
    "Elizabeth", "William", "Barbara", "Richard", "Susan", "Joseph", "Jessica", "Thomas", "Sarah",
    "Charles", "Karen", "Daniel", "Lisa", "Matthew", "Nancy", "Anthony", "Betty", "Mark",
    "Sandra", "Steven", "Ashley", "Paul", "Emily", "Andrew", "Donna", "Joshua", "Michelle",
    "Kevin", "Carol", "Brian", "Amanda", "Priya", "Wei", "Sofia", "Mateo", "Amara", "Kenji",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez", "Hernandez", "Lopez", "Gonzalez", "Wilson", "Anderson", "Thomas", "Taylor",
    "Moore", "Jackson", "Martin", "Lee", "Perez", "Thompson", "White", "Harris", "Sanchez",
    "Clark", "Ramirez", "Lewis", "Robinson", "Walker", "Young", "Allen", "King", "Wright",
    "Scott", "Nguyen", "Hill", "Flores", "Green", "Patel", "Chen", "Okafor", "Tanaka",
];

const EMAIL_DOMAINS: &[&str] = &[
    "example.com", "example.org", "example.net", "mail.test", "shop.test",
];

const STREET_NAMES: &[&str] = &[
    "Oak", "Maple", "Cedar", "Pine", "Elm", "Washington", "Lake", "Hill", "Park", "Sunset",
    "River", "Highland", "Meadow", "Forest", "Spring", "Church", "Mill", "Valley",
];

const STREET_SUFFIXES: &[&str] = &["St", "Ave", "Rd", "Blvd", "Ln", "Dr", "Ct", "Way"];

const CITIES: &[(&str, &str)] = &[
    ("Springfield", "IL"),
    ("Riverside", "CA"),
    ("Franklin", "TN"),
    ("Greenville", "SC"),
    ("Madison", "WI"),
    ("Georgetown", "TX"),
    ("Salem", "OR"),
    ("Fairview", "NJ"),
    ("Clinton", "IA"),
    ("Arlington", "VA"),
    ("Ashland", "KY"),
    ("Burlington", "VT"),
];

const PRODUCT_WORDS: &[&str] = &[
    "Aurora", "Summit", "Nimbus", "Vertex", "Harbor", "Ember", "Cobalt", "Willow", "Atlas",
    "Echo", "Prism", "Quartz", "Drift", "Orbit", "Canyon", "Falcon", "Lumen", "Vivid",
    "Pulse", "Nova", "Breeze", "Granite", "Velvet", "Tundra", "Zephyr", "Copper", "Maple",
];

const REVIEW_WORDS: &[&str] = &[
    "quality", "arrived", "quickly", "works", "great", "price", "value", "would", "recommend",
    "again", "packaging", "sturdy", "color", "matches", "description", "size", "fits",
    "perfectly", "daily", "use", "happy", "purchase", "easy", "setup", "battery", "lasts",
    "long", "material", "feels", "cheap", "expected", "better", "gift", "family", "loved",
    "returned", "replacement", "support", "helpful", "shipping", "slow", "overall", "solid",
];

const CATEGORIES: &[(&str, f64)] = &[
    ("Electronics", 0.18),
    ("Home", 0.14),
    ("Books", 0.12),
    ("Toys", 0.12),
    ("Clothing", 0.18),
    ("Sports", 0.14),
    ("Beauty", 0.12),
];

const STATUS_WEIGHTS: &[(OrderStatus, f64)] = &[
    (OrderStatus::Completed, 0.70),
    (OrderStatus::Shipped, 0.20),
    (OrderStatus::Cancelled, 0.06),
    (OrderStatus::Returned, 0.04),
];

const RATING_WEIGHTS: &[(u8, f64)] = &[(1, 0.05), (2, 0.05), (3, 0.15), (4, 0.40), (5, 0.35)];

/// Quantities are drawn uniformly from this list, so single units dominate.
const QUANTITY_CHOICES: &[i64] = &[1, 1, 1, 2, 3];

const PRICE_LOG_MEAN: f64 = 3.0;
const PRICE_LOG_SIGMA: f64 = 0.8;

/// Default upper bound for generated dates.
pub const DEFAULT_AS_OF: &str = "2025-01-01 00:00:00";

const JOIN_WINDOW_DAYS: i64 = 3 * 365;
const ACTIVITY_WINDOW_SECS: i64 = 2 * 365 * 24 * 60 * 60;

/// Row counts at scale 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseSizes {
    pub customers: usize,
    pub products: usize,
    pub orders: usize,
    pub reviews: usize,
}

impl Default for BaseSizes {
    fn default() -> Self {
        Self {
            customers: 500,
            products: 200,
            orders: 2500,
            reviews: 800,
        }
    }
}

impl BaseSizes {
    /// Each size is multiplied by `scale` and truncated.
    pub fn scaled(&self, scale: f64) -> BaseSizes {
        let scale = if scale.is_finite() { scale.max(0.0) } else { 0.0 };
        let apply = |n: usize| (n as f64 * scale) as usize;
        BaseSizes {
            customers: apply(self.customers),
            products: apply(self.products),
            orders: apply(self.orders),
            reviews: apply(self.reviews),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub seed: u64,
    pub scale: f64,
    pub out_dir: PathBuf,
    /// Upper bound for every generated date; fixes the output for a given seed.
    pub as_of: NaiveDateTime,
    pub base_sizes: BaseSizes,
}

/// Accepts `YYYY-MM-DD HH:MM:SS` or a bare `YYYY-MM-DD` (midnight).
pub fn parse_as_of(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            scale: 1.0,
            out_dir: PathBuf::from("synthetic_ecom_data"),
            as_of: parse_as_of(DEFAULT_AS_OF).unwrap_or_default(),
            base_sizes: BaseSizes::default(),
        }
    }
}

impl ProducerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            seed: std::env::var("ECOM_SEED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.seed),
            scale: std::env::var("ECOM_SCALE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.scale),
            out_dir: std::env::var("ECOM_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.out_dir),
            as_of: std::env::var("ECOM_AS_OF")
                .ok()
                .and_then(|v| parse_as_of(&v))
                .unwrap_or(defaults.as_of),
            ..defaults
        }
    }

    pub fn sizes(&self) -> BaseSizes {
        self.base_sizes.scaled(self.scale)
    }
}

/// All five entity sets, foreign keys consistent with each other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub customers: Vec<Customer>,
    pub products: Vec<Product>,
    pub orders: Vec<Order>,
    pub order_items: Vec<OrderItem>,
    pub reviews: Vec<Review>,
}

#[derive(Debug, Clone)]
pub struct WrittenFile {
    pub table: Table,
    pub path: PathBuf,
    pub rows: usize,
}

struct Generator {
    rng: StdRng,
    as_of: NaiveDateTime,
}

impl Generator {
    fn new(seed: u64, as_of: NaiveDateTime) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            as_of,
        }
    }

    fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        &items[self.rng.gen_range(0..items.len())]
    }

    fn weighted<T: Copy>(&mut self, table: &[(T, f64)]) -> T {
        // Weight tables are constant and non-empty with positive weights.
        let index = WeightedIndex::new(table.iter().map(|(_, w)| *w))
            .map(|dist| dist.sample(&mut self.rng))
            .unwrap_or(0);
        table[index].0
    }

    fn full_name(&mut self) -> (String, String) {
        let first = self.pick(FIRST_NAMES).to_string();
        let last = self.pick(LAST_NAMES).to_string();
        (first, last)
    }

    fn address(&mut self) -> String {
        let number = self.rng.gen_range(1..10_000);
        let street = self.pick(STREET_NAMES);
        let suffix = self.pick(STREET_SUFFIXES);
        let (city, state) = *self.pick(CITIES);
        let zip = self.rng.gen_range(10_000..99_999);
        format!("{number} {street} {suffix}, {city}, {state} {zip}")
    }

    fn email(&mut self, first: &str, last: &str, taken: &mut HashSet<String>) -> String {
        let domain = self.pick(EMAIL_DOMAINS);
        let base = format!("{}.{}", first.to_ascii_lowercase(), last.to_ascii_lowercase());
        let mut candidate = format!("{base}@{domain}");
        let mut suffix = self.rng.gen_range(1..100);
        while taken.contains(&candidate) {
            candidate = format!("{base}{suffix}@{domain}");
            suffix += 1;
        }
        taken.insert(candidate.clone());
        candidate
    }

    fn timestamp_within(&mut self, window_secs: i64) -> NaiveDateTime {
        let offset = self.rng.gen_range(0..=window_secs);
        self.as_of - Duration::seconds(offset)
    }

    /// Log-normal sample via Box-Muller, rounded to cents and kept positive.
    fn price(&mut self) -> f64 {
        let u1: f64 = 1.0 - self.rng.gen::<f64>();
        let u2: f64 = self.rng.gen::<f64>();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        round_cents((PRICE_LOG_MEAN + PRICE_LOG_SIGMA * z).exp()).max(0.01)
    }

    fn sentence(&mut self, words: usize) -> String {
        let body = (0..words)
            .map(|_| *self.pick(REVIEW_WORDS))
            .collect::<Vec<_>>()
            .join(" ");
        let mut chars = body.chars();
        match chars.next() {
            Some(first) => format!("{}{}.", first.to_ascii_uppercase(), chars.as_str()),
            None => String::new(),
        }
    }

    fn customers(&mut self, count: usize) -> Vec<Customer> {
        let mut taken = HashSet::with_capacity(count);
        (1..=count as i64)
            .map(|customer_id| {
                let (first, last) = self.full_name();
                let email = self.email(&first, &last, &mut taken);
                let join_offset = self.rng.gen_range(0..=JOIN_WINDOW_DAYS);
                Customer {
                    customer_id,
                    name: format!("{first} {last}"),
                    email,
                    address: self.address(),
                    join_date: self.as_of.date() - Duration::days(join_offset),
                }
            })
            .collect()
    }

    fn products(&mut self, count: usize) -> Vec<Product> {
        (1..=count as i64)
            .map(|product_id| {
                let category = self.weighted(CATEGORIES).to_string();
                let price = self.price();
                let name = format!("{} {}", self.pick(PRODUCT_WORDS), self.pick(PRODUCT_WORDS));
                Product {
                    product_id,
                    name,
                    category,
                    price,
                    sku: format!("SKU-{product_id:06}"),
                }
            })
            .collect()
    }

    fn orders_and_items(
        &mut self,
        count: usize,
        customers: &[Customer],
        products: &[Product],
    ) -> (Vec<Order>, Vec<OrderItem>) {
        let mut orders = Vec::with_capacity(count);
        let mut items = Vec::new();

        for order_id in 1..=count as i64 {
            let customer_id = self.pick(customers).customer_id;
            let order_date = self.timestamp_within(ACTIVITY_WINDOW_SECS);
            let wanted = self.rng.gen_range(1..=5usize).min(products.len());

            let chosen: Vec<&Product> = products.choose_multiple(&mut self.rng, wanted).collect();
            let mut total = 0.0;
            for product in chosen {
                let quantity = *self.pick(QUANTITY_CHOICES);
                let line_total = round_cents(product.price * quantity as f64);
                items.push(OrderItem {
                    order_item_id: items.len() as i64 + 1,
                    order_id,
                    product_id: product.product_id,
                    quantity,
                    unit_price: product.price,
                    line_total,
                });
                total += line_total;
            }

            let status = self.weighted(STATUS_WEIGHTS);
            orders.push(Order {
                order_id,
                customer_id,
                order_date,
                total: round_cents(total),
                status,
            });
        }

        (orders, items)
    }

    fn reviews(&mut self, count: usize, customers: &[Customer], products: &[Product]) -> Vec<Review> {
        (1..=count as i64)
            .map(|review_id| {
                let product_id = self.pick(products).product_id;
                let customer_id = self.pick(customers).customer_id;
                let rating = self.weighted(RATING_WEIGHTS);
                let words = self.rng.gen_range(8..=14);
                Review {
                    review_id,
                    product_id,
                    customer_id,
                    rating,
                    review_text: self.sentence(words),
                    review_date: self.timestamp_within(ACTIVITY_WINDOW_SECS),
                }
            })
            .collect()
    }
}

/// Generate a dataset. Identical config (seed, scale, as_of) yields identical output.
pub fn generate(config: &ProducerConfig) -> Dataset {
    let sizes = config.sizes();
    let mut generator = Generator::new(config.seed, config.as_of);

    let customers = generator.customers(sizes.customers);
    let products = generator.products(sizes.products);

    if customers.is_empty() || products.is_empty() {
        if sizes.orders > 0 || sizes.reviews > 0 {
            warn!(
                customers = customers.len(),
                products = products.len(),
                "no customers or products to reference; skipping orders and reviews"
            );
        }
        return Dataset {
            customers,
            products,
            ..Dataset::default()
        };
    }

    let (orders, order_items) = generator.orders_and_items(sizes.orders, &customers, &products);
    let reviews = generator.reviews(sizes.reviews, &customers, &products);

    Dataset {
        customers,
        products,
        orders,
        order_items,
        reviews,
    }
}

fn write_table<T: Serialize>(out_dir: &Path, table: Table, rows: &[T]) -> Result<WrittenFile> {
    let path = out_dir.join(table.file_name());
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(&path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer
        .write_record(table.column_names())
        .with_context(|| format!("writing header to {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("writing row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(WrittenFile {
        table,
        path,
        rows: rows.len(),
    })
}

/// Write one CSV per table into `out_dir`, header row always present.
pub fn write_dataset(dataset: &Dataset, out_dir: &Path) -> Result<Vec<WrittenFile>> {
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

    let written = vec![
        write_table(out_dir, Table::Customers, &dataset.customers)?,
        write_table(out_dir, Table::Products, &dataset.products)?,
        write_table(out_dir, Table::Orders, &dataset.orders)?,
        write_table(out_dir, Table::OrderItems, &dataset.order_items)?,
        write_table(out_dir, Table::Reviews, &dataset.reviews)?,
    ];
    for file in &written {
        info!(table = %file.table, rows = file.rows, path = %file.path.display(), "wrote csv");
    }
    Ok(written)
}

/// Generate and write in one step.
pub fn run_producer(config: &ProducerConfig) -> Result<Vec<WrittenFile>> {
    let dataset = generate(config);
    write_dataset(&dataset, &config.out_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(seed: u64, scale: f64) -> ProducerConfig {
        ProducerConfig {
            seed,
            scale,
            out_dir: PathBuf::from("unused"),
            as_of: NaiveDate::from_ymd_opt(2026, 1, 15)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            base_sizes: BaseSizes::default(),
        }
    }

    #[test]
    fn sizes_scale_and_truncate() {
        let sizes = BaseSizes::default().scaled(0.333);
        assert_eq!(
            sizes,
            BaseSizes {
                customers: 166,
                products: 66,
                orders: 832,
                reviews: 266,
            }
        );
        assert_eq!(BaseSizes::default().scaled(-1.0).customers, 0);
    }

    #[test]
    fn default_as_of_is_fixed() {
        let expected = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(ProducerConfig::default().as_of, expected);
        assert_eq!(parse_as_of("2025-01-01"), Some(expected));
        assert_eq!(
            parse_as_of("2024-06-30 18:45:00"),
            NaiveDate::from_ymd_opt(2024, 6, 30)
                .unwrap()
                .and_hms_opt(18, 45, 0)
        );
        assert_eq!(parse_as_of("yesterday"), None);
    }

    #[test]
    fn default_configs_generate_identical_datasets() {
        let mut first = ProducerConfig::default();
        first.scale = 0.01;
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let mut second = ProducerConfig::default();
        second.scale = 0.01;
        assert_eq!(generate(&first), generate(&second));
    }

    #[test]
    fn same_seed_same_dataset() {
        let a = generate(&config(7, 0.1));
        let b = generate(&config(7, 0.1));
        let c = generate(&config(8, 0.1));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn generated_rows_respect_the_data_model() {
        let dataset = generate(&config(42, 0.2));
        assert_eq!(dataset.customers.len(), 100);
        assert_eq!(dataset.products.len(), 40);
        assert_eq!(dataset.orders.len(), 500);
        assert_eq!(dataset.reviews.len(), 160);

        let emails: HashSet<_> = dataset.customers.iter().map(|c| &c.email).collect();
        assert_eq!(emails.len(), dataset.customers.len());

        let prices: HashMap<i64, f64> = dataset
            .products
            .iter()
            .map(|p| (p.product_id, p.price))
            .collect();
        assert!(prices.values().all(|p| *p > 0.0));

        let mut per_order: HashMap<i64, Vec<&OrderItem>> = HashMap::new();
        for (idx, item) in dataset.order_items.iter().enumerate() {
            assert_eq!(item.order_item_id, idx as i64 + 1);
            assert_eq!(prices[&item.product_id], item.unit_price);
            assert!((1..=3).contains(&item.quantity));
            assert_eq!(item.line_total, round_cents(item.unit_price * item.quantity as f64));
            per_order.entry(item.order_id).or_default().push(item);
        }

        for order in &dataset.orders {
            let items = &per_order[&order.order_id];
            assert!((1..=5).contains(&items.len()));
            let distinct: HashSet<_> = items.iter().map(|i| i.product_id).collect();
            assert_eq!(distinct.len(), items.len());
            let sum: f64 = items.iter().map(|i| i.line_total).sum();
            assert_eq!(order.total, round_cents(sum));
            assert!(order.customer_id >= 1 && order.customer_id <= 100);
            assert!(order.order_date <= config(42, 0.2).as_of);
        }

        assert!(dataset.reviews.iter().all(|r| (1..=5).contains(&r.rating)));
        for review in &dataset.reviews {
            assert!(review.review_text.ends_with('.'));
            assert!(review
                .review_text
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn written_files_always_carry_a_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let written = write_dataset(&generate(&config(3, 0.0)), dir.path()).expect("write");
        assert_eq!(written.len(), 5);
        for file in written {
            let text = fs::read_to_string(&file.path).expect("read csv");
            assert_eq!(text.trim_end(), file.table.column_names().join(","));
            assert_eq!(file.rows, 0);
        }
    }

    #[test]
    fn written_rows_read_back_as_entities() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dataset = generate(&config(11, 0.05));
        write_dataset(&dataset, dir.path()).expect("write");

        let mut reader =
            csv::Reader::from_path(dir.path().join(Table::Orders.file_name())).expect("open");
        let orders: Vec<Order> = reader
            .deserialize()
            .collect::<Result<_, _>>()
            .expect("deserialize orders");
        assert_eq!(orders.len(), dataset.orders.len());
        assert_eq!(orders[0].order_id, dataset.orders[0].order_id);
        assert_eq!(orders[0].status, dataset.orders[0].status);
        assert_eq!(orders[0].order_date, dataset.orders[0].order_date);
    }

    #[test]
    fn empty_catalog_skips_dependent_entities() {
        let mut cfg = config(1, 1.0);
        cfg.base_sizes = BaseSizes {
            customers: 3,
            products: 0,
            orders: 10,
            reviews: 10,
        };
        let dataset = generate(&cfg);
        assert_eq!(dataset.customers.len(), 3);
        assert!(dataset.orders.is_empty());
        assert!(dataset.order_items.is_empty());
        assert!(dataset.reviews.is_empty());
    }
}
