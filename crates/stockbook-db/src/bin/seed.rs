//! # Seed Data Generator
//!
//! Populates a database with branches, a warehouse, items and a few posted
//! documents for development.
//!
//! ## Usage
//! ```bash
//! # Seed the database from the default config
//! cargo run -p stockbook-db --bin seed
//!
//! # Specify database path
//! cargo run -p stockbook-db --bin seed -- --db ./data/stockbook.db
//!
//! # Use a specific config file
//! cargo run -p stockbook-db --bin seed -- --config ./stockbook.toml
//! ```
//!
//! ## Generated Data
//! - Branches HQ and LHR, warehouse MAIN under HQ
//! - Items with standard costs
//! - Two goods receipts at different costs, a waybill drawing across both
//!   batches, a transfer to LHR and a stock audit

use std::env;
use std::path::PathBuf;

use chrono::{Duration, Utc};
use stockbook_core::{Location, Money, MovementKind};
use stockbook_db::{Database, DocumentLine, PostDocument, StockbookConfig};
use tracing_subscriber::EnvFilter;

/// (sku, name, standard cost in cents)
const ITEMS: &[(&str, &str, i64)] = &[
    ("RICE-5KG", "Basmati rice 5kg", 9_000),
    ("TEA-900G", "Black tea 900g", 75_000),
    ("OIL-3L", "Cooking oil 3L", 18_500),
    ("SUGAR-1KG", "White sugar 1kg", 1_600),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stockbook=debug,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();

    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Stockbook Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>      Database file path (default: from config)");
                println!("  -c, --config <PATH>  Config file (default: platform config dir)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut settings = StockbookConfig::load(config_path)?;
    if let Some(path) = db_path {
        settings.database.path = Some(path);
    }

    println!("🌱 Stockbook Seed Data Generator");
    println!("================================");
    println!("Database: {}", settings.database_path()?.display());
    println!();

    let db = Database::from_settings(settings).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.locations().branches().await?;
    if !existing.is_empty() {
        println!("⚠ Database already has {} branches", existing.len());
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let hq = db.locations().create_branch("HQ", "Head Office").await?;
    let lhr = db.locations().create_branch("LHR", "Lahore").await?;
    let main = db.locations().create_warehouse(hq.id, "MAIN", "Main store").await?;
    println!("✓ Created branches HQ, LHR and warehouse MAIN");

    let mut item_ids = Vec::with_capacity(ITEMS.len());
    for (sku, name, cost) in ITEMS {
        let item = db.items().create(sku, name, Money::from_cents(*cost)).await?;
        item_ids.push(item.id);
    }
    println!("✓ Created {} items", item_ids.len());

    let warehouse = Location::Warehouse(main.id);
    let branch = Location::Branch(lhr.id);
    let rice = item_ids[0];
    let start = Utc::now() - Duration::days(3);

    let receipt = |quantity: i64, cost: i64, days: i64| PostDocument {
        document_type: "Goods Receipt".into(),
        location: warehouse,
        holder: "seed".into(),
        effective_at: Some(start + Duration::days(days)),
        lines: item_ids
            .iter()
            .map(|&item_id| DocumentLine::Movement {
                item_id,
                location: warehouse,
                kind: MovementKind::In,
                quantity,
                unit_cost: Some(Money::from_cents(cost)),
            })
            .collect(),
    };

    let documents = vec![
        receipt(40, 9_000, 0),
        receipt(40, 9_600, 1),
        PostDocument {
            document_type: "Waybill".into(),
            location: warehouse,
            holder: "seed".into(),
            effective_at: Some(start + Duration::days(2)),
            lines: vec![DocumentLine::Movement {
                item_id: rice,
                location: warehouse,
                kind: MovementKind::Out,
                quantity: -55,
                unit_cost: None,
            }],
        },
        PostDocument {
            document_type: "Stock Transfer".into(),
            location: warehouse,
            holder: "seed".into(),
            effective_at: Some(start + Duration::days(2)),
            lines: vec![DocumentLine::Transfer {
                item_id: rice,
                from: warehouse,
                to: branch,
                quantity: 10,
            }],
        },
        PostDocument {
            document_type: "Stock Audit".into(),
            location: warehouse,
            holder: "seed".into(),
            effective_at: None,
            lines: vec![DocumentLine::Balance {
                item_id: rice,
                location: warehouse,
                physical_quantity: 14,
                unit_cost: None,
            }],
        },
    ];

    let mut posted = Vec::with_capacity(documents.len());
    for document in &documents {
        let result = db.post_document(document).await?;
        println!("✓ Posted {} ({} lines)", result.code, result.lines.len());
        posted.push(result);
    }

    println!();
    println!("Stock of RICE-5KG:");
    let ledger = db.ledger();
    for location in [warehouse, branch] {
        let quantity = ledger.current_stock(rice, location).await?;
        println!("  {}: {}", location, quantity);
    }

    let batches = ledger.consumable_batches(rice, warehouse).await?;
    for batch in &batches {
        let report = ledger.reconcile_batch(batch.id).await?;
        println!(
            "  batch {} @ {}: remaining {}, movements {}, consistent {}",
            batch.id,
            batch.unit_cost,
            report.remaining_quantity,
            report.movement_count,
            report.is_consistent()
        );
    }

    println!();
    println!("{}", serde_json::to_string_pretty(&posted)?);

    db.close().await;
    Ok(())
}
