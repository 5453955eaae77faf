//! view_violations - list recorded violations from the SQLite store

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::Path;

use traffic_sentinel::{SqliteViolationStore, ViolationCategory, ViolationFilter, ViolationStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the violation database.
    #[arg(long, env = "SENTINEL_DB_PATH", default_value = "data/violations.db")]
    db: String,
    /// Only this category (helmet|signal|lane|triple).
    #[arg(long = "type", value_name = "CATEGORY")]
    category: Option<String>,
    /// Only violations from this source video.
    #[arg(long)]
    video: Option<String>,
    /// Earliest timestamp (RFC 3339).
    #[arg(long)]
    since: Option<String>,
    /// Latest timestamp (RFC 3339).
    #[arg(long)]
    until: Option<String>,
    /// Maximum rows to print.
    #[arg(long)]
    limit: Option<usize>,
    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    if !Path::new(&args.db).exists() {
        return Err(anyhow!("no violation database at {}", args.db));
    }
    let store = SqliteViolationStore::open(&args.db)?;

    let record_type = match &args.category {
        Some(value) => Some(value.parse::<ViolationCategory>()?.record_type().to_string()),
        None => None,
    };
    let filter = ViolationFilter {
        record_type,
        video: args.video,
        since: args.since,
        until: args.until,
        limit: args.limit,
    };
    let events = store.query(&filter)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("no violations recorded");
        return Ok(());
    }
    println!(
        "{:>6}  {:<26}  {:<32}  {:<40}  VIDEO",
        "ID", "TYPE", "TIMESTAMP", "IMAGE"
    );
    for event in &events {
        println!(
            "{:>6}  {:<26}  {:<32}  {:<40}  {}",
            event.id,
            event.record_type,
            event.timestamp,
            event.image_path.as_deref().unwrap_or("-"),
            event.video.as_deref().unwrap_or("-")
        );
    }
    println!("{} violation(s)", events.len());
    Ok(())
}
