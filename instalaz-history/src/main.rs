use anyhow::{Context, Result};
use clap::Parser;
use libinstalaz::logging::LoggingConfig;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

#[derive(Parser, Debug)]
#[command(name = "instalaz-history")]
#[command(version, about = "Query Instalaz publish history")]
#[command(long_about = r#"Query the publish history and activity log of the local Instalaz database.

Each publish attempt is a batch: the carousel slides (or the reel) sent
together, with the outcome recorded per item.

EXAMPLES:
    # Last 20 publish attempts across all accounts
    instalaz-history

    # One account, failures only
    instalaz-history --account 3 --outcome failed

    # Filter by date range
    instalaz-history --since "2026-03-01" --until "2026-03-07"

    # Dashboard activity feed instead of publish attempts
    instalaz-history --activity --limit 50

    # JSON output for scripting
    instalaz-history --format json | jq '.[] | select(.outcome == "failed") | .error'

    # Export to CSV (one row per item)
    instalaz-history --format csv > history.csv

OUTPUT FORMATS:
    text  - Human-readable text (default)
    json  - JSON array
    jsonl - JSON lines, one object per line
    csv   - CSV with headers

EXIT CODES:
    0 - Success (including empty results)
    1 - Error (database not found, query failed, etc.)
"#)]
struct Args {
    /// Only this account
    #[arg(short, long, value_name = "ID")]
    account: Option<i64>,

    /// Only batches with this outcome
    #[arg(short, long, value_name = "OUTCOME")]
    #[arg(value_parser = ["pending", "posted", "failed"])]
    outcome: Option<String>,

    /// Show entries since this date (Unix timestamp, YYYY-MM-DD, or RFC 3339)
    #[arg(long, value_name = "DATE")]
    since: Option<String>,

    /// Show entries until this date (Unix timestamp, YYYY-MM-DD, or RFC 3339)
    #[arg(long, value_name = "DATE")]
    until: Option<String>,

    /// Show the activity log instead of publish attempts
    #[arg(long)]
    activity: bool,

    /// Maximum number of entries to return
    #[arg(short, long, default_value = "20", value_name = "N")]
    limit: usize,

    /// Output format
    #[arg(short, long, default_value = "text", value_name = "FORMAT")]
    #[arg(value_parser = ["text", "json", "jsonl", "csv"])]
    format: String,

    /// Log queries to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Default)]
struct HistoryQuery {
    account: Option<i64>,
    outcome: Option<String>,
    since: Option<i64>,
    until: Option<i64>,
    limit: usize,
}

/// One publish attempt
#[derive(Debug, Serialize)]
struct Batch {
    batch_id: String,
    account_id: i64,
    account_name: Option<String>,
    slot: Option<String>,
    outcome: String,
    media_id: Option<String>,
    permalink: Option<String>,
    error: Option<String>,
    created_at: i64,
    items: Vec<BatchItem>,
}

#[derive(Debug, Serialize)]
struct BatchItem {
    item_id: String,
    item_url: String,
}

#[derive(Debug, Serialize)]
struct Activity {
    id: i64,
    account_id: Option<i64>,
    action: String,
    status: String,
    message: String,
    created_at: i64,
}

/// Appends the shared filters to a query over `post_history h` or `activity_logs a`
fn push_filters(sql: &mut String, alias: &str, query: &HistoryQuery) {
    if query.account.is_some() {
        sql.push_str(&format!(" AND {}.account_id = ?", alias));
    }
    if query.since.is_some() {
        sql.push_str(&format!(" AND {}.created_at >= ?", alias));
    }
    if query.until.is_some() {
        sql.push_str(&format!(" AND {}.created_at <= ?", alias));
    }
}

async fn query_batches(pool: &SqlitePool, query: &HistoryQuery) -> Result<Vec<Batch>> {
    let mut sql = String::from(
        "SELECT h.batch_id, h.account_id, a.name AS account_name, h.slot, h.outcome, \
         h.media_id, h.permalink, h.error, MIN(h.created_at) AS created_at \
         FROM post_history h LEFT JOIN accounts a ON a.id = h.account_id WHERE 1=1",
    );
    push_filters(&mut sql, "h", query);
    if query.outcome.is_some() {
        sql.push_str(" AND h.outcome = ?");
    }
    sql.push_str(" GROUP BY h.batch_id ORDER BY created_at DESC, h.batch_id LIMIT ?");

    let mut q = sqlx::query(&sql);
    if let Some(account) = query.account {
        q = q.bind(account);
    }
    if let Some(since) = query.since {
        q = q.bind(since);
    }
    if let Some(until) = query.until {
        q = q.bind(until);
    }
    if let Some(ref outcome) = query.outcome {
        q = q.bind(outcome);
    }
    q = q.bind(query.limit as i64);

    let rows = q.fetch_all(pool).await.context("Failed to query publish history")?;

    let mut batches = Vec::with_capacity(rows.len());
    for row in rows {
        let batch_id: String = row.get("batch_id");
        let items = sqlx::query(
            "SELECT item_id, item_url FROM post_history WHERE batch_id = ? ORDER BY id",
        )
        .bind(&batch_id)
        .fetch_all(pool)
        .await
        .context("Failed to query batch items")?
        .into_iter()
        .map(|r| BatchItem {
            item_id: r.get("item_id"),
            item_url: r.get("item_url"),
        })
        .collect();

        batches.push(Batch {
            batch_id,
            account_id: row.get("account_id"),
            account_name: row.get("account_name"),
            slot: row.get("slot"),
            outcome: row.get("outcome"),
            media_id: row.get("media_id"),
            permalink: row.get("permalink"),
            error: row.get("error"),
            created_at: row.get("created_at"),
            items,
        });
    }
    Ok(batches)
}

async fn query_activity(pool: &SqlitePool, query: &HistoryQuery) -> Result<Vec<Activity>> {
    let mut sql = String::from(
        "SELECT a.id, a.account_id, a.action, a.status, a.message, a.created_at \
         FROM activity_logs a WHERE 1=1",
    );
    push_filters(&mut sql, "a", query);
    sql.push_str(" ORDER BY a.created_at DESC, a.id DESC LIMIT ?");

    let mut q = sqlx::query(&sql);
    if let Some(account) = query.account {
        q = q.bind(account);
    }
    if let Some(since) = query.since {
        q = q.bind(since);
    }
    if let Some(until) = query.until {
        q = q.bind(until);
    }
    q = q.bind(query.limit as i64);

    let rows = q.fetch_all(pool).await.context("Failed to query activity log")?;
    Ok(rows
        .into_iter()
        .map(|row| Activity {
            id: row.get("id"),
            account_id: row.get("account_id"),
            action: row.get("action"),
            status: row.get("status"),
            message: row.get("message"),
            created_at: row.get("created_at"),
        })
        .collect())
}

/// Parse a date argument to a Unix timestamp
fn parse_date(date_str: &str) -> Result<i64> {
    if let Ok(timestamp) = date_str.parse::<i64>() {
        return Ok(timestamp);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(date_str) {
        return Ok(dt.timestamp());
    }
    chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
        .with_context(|| {
            format!(
                "Invalid date format: {}. Use a Unix timestamp, YYYY-MM-DD or YYYY-MM-DDTHH:MM:SSZ",
                date_str
            )
        })
}

fn format_time(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn print_json<T: Serialize>(entries: &[T], format: &str) -> Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(entries)?);
    } else {
        for entry in entries {
            println!("{}", serde_json::to_string(entry)?);
        }
    }
    Ok(())
}

fn print_batches(batches: &[Batch], format: &str) -> Result<()> {
    match format {
        "json" | "jsonl" => print_json(batches, format)?,
        "csv" => {
            println!("batch_id,timestamp,account_id,slot,outcome,item_id,media_id,error");
            for batch in batches {
                for item in &batch.items {
                    println!(
                        "{},{},{},{},{},{},{},{}",
                        batch.batch_id,
                        batch.created_at,
                        batch.account_id,
                        batch.slot.as_deref().unwrap_or(""),
                        batch.outcome,
                        csv_field(&item.item_id),
                        batch.media_id.as_deref().unwrap_or(""),
                        csv_field(batch.error.as_deref().unwrap_or("")),
                    );
                }
            }
        }
        _ => {
            for batch in batches {
                let symbol = match batch.outcome.as_str() {
                    "posted" => "✓",
                    "failed" => "✗",
                    _ => "…",
                };
                let account = batch
                    .account_name
                    .clone()
                    .unwrap_or_else(|| format!("account {}", batch.account_id));
                let slot = batch.slot.as_deref().unwrap_or("manual");
                println!(
                    "{} {} | {} | {} | {} item(s)",
                    symbol,
                    format_time(batch.created_at),
                    account,
                    slot,
                    batch.items.len()
                );
                if let Some(ref permalink) = batch.permalink {
                    println!("  {}", permalink);
                } else if let Some(ref media_id) = batch.media_id {
                    println!("  media {}", media_id);
                }
                if let Some(ref error) = batch.error {
                    println!("  {}", error);
                }
                for item in &batch.items {
                    println!("    {}", item.item_id);
                }
                println!();
            }
        }
    }
    Ok(())
}

fn print_activity(entries: &[Activity], format: &str) -> Result<()> {
    match format {
        "json" | "jsonl" => print_json(entries, format)?,
        "csv" => {
            println!("id,timestamp,account_id,action,status,message");
            for entry in entries {
                println!(
                    "{},{},{},{},{},{}",
                    entry.id,
                    entry.created_at,
                    entry.account_id.map(|id| id.to_string()).unwrap_or_default(),
                    entry.action,
                    entry.status,
                    csv_field(&entry.message),
                );
            }
        }
        _ => {
            for entry in entries {
                println!(
                    "{} | {:<7} | {} | {}",
                    format_time(entry.created_at),
                    entry.status,
                    entry.action,
                    entry.message
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    LoggingConfig::from_env(None, args.verbose).init();

    tracing::debug!("instalaz-history started with args: {:?}", args);

    let config = libinstalaz::Config::load_or_default().context("Failed to load configuration")?;
    let db_path = shellexpand::tilde(&config.database.path).to_string();

    if !std::path::Path::new(&db_path).exists() {
        eprintln!("Error: Database not found at {}", db_path);
        eprintln!("Has instalaz-server been started yet?");
        std::process::exit(1);
    }

    // Read-only: never competes with the server for writes
    let db_url = format!("sqlite://{}?mode=ro", db_path.replace('\\', "/"));
    let pool = SqlitePool::connect(&db_url)
        .await
        .context("Failed to connect to database")?;

    let query = HistoryQuery {
        account: args.account,
        outcome: args.outcome,
        since: args.since.as_deref().map(parse_date).transpose()?,
        until: args.until.as_deref().map(parse_date).transpose()?,
        limit: args.limit,
    };

    if args.activity {
        let entries = query_activity(&pool, &query).await?;
        print_activity(&entries, &args.format)?;
    } else {
        let batches = query_batches(&pool, &query).await?;
        print_batches(&batches, &args.format)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("1772323200").unwrap(), 1772323200);
        assert_eq!(parse_date("2026-03-01").unwrap(), 1772323200);
        assert_eq!(parse_date("2026-03-01T00:00:00Z").unwrap(), 1772323200);
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("img (1).jpg"), "img (1).jpg");
        assert_eq!(csv_field("a, b"), "\"a, b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_filters_follow_alias() {
        let query = HistoryQuery {
            account: Some(1),
            since: Some(0),
            ..Default::default()
        };
        let mut sql = String::from("SELECT * FROM activity_logs a WHERE 1=1");
        push_filters(&mut sql, "a", &query);
        assert!(sql.ends_with(" AND a.account_id = ? AND a.created_at >= ?"));
    }
}
