//! Database statistics and queue overview.
//!
//! Used by `cwatch stats` to show how many items sit in each lifecycle
//! state, how many notifications went out, and when the queue next has
//! work.

use anyhow::Result;
use chrono::Utc;

use catalog_watch_core::models::ItemStatus;
use catalog_watch_core::store::ItemStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let now = Utc::now();

    let counts = store.count_by_status().await?;
    let total: i64 = counts.iter().map(|(_, n)| n).sum();
    let notifications = store.count_notifications().await?;
    let due_now = store.count_due(now).await?;

    let last_seen: Option<i64> = sqlx::query_scalar("SELECT MAX(first_seen_at) FROM items")
        .fetch_one(&pool)
        .await?;
    let next_due: Option<i64> = sqlx::query_scalar(
        "SELECT MIN(next_attempt_at) FROM items WHERE status = 'pending'",
    )
    .fetch_one(&pool)
    .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Catalog Watch: Database Stats");
    println!("=============================");
    println!();
    println!("  Database:       {}", config.db.path.display());
    println!("  Size:           {}", format_bytes(db_size));
    println!();
    println!("  Items:          {}", total);
    for status in ItemStatus::ALL {
        let n = counts
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0);
        if status == ItemStatus::Discovered && n == 0 {
            continue;
        }
        println!("    {:<12} {:>6}", status.as_str(), n);
    }
    println!();
    println!("  Notifications:  {}", notifications);
    println!("  Due now:        {}", due_now);
    println!(
        "  Next due:       {}",
        next_due
            .map(|ts| format_ts_relative(ts, now.timestamp()))
            .unwrap_or_else(|| "nothing queued".to_string())
    );
    println!(
        "  Last new item:  {}",
        last_seen
            .map(|ts| format_ts_relative(ts, now.timestamp()))
            .unwrap_or_else(|| "never".to_string())
    );
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to `now`, in either direction
/// ("3 hours ago", "in 5 mins").
fn format_ts_relative(ts: i64, now: i64) -> String {
    let delta = now - ts;
    let (magnitude, past) = if delta >= 0 { (delta, true) } else { (-delta, false) };

    if magnitude < 60 {
        return if past { "just now" } else { "within a minute" }.to_string();
    }
    if magnitude >= 86400 * 30 {
        return format_ts_iso(ts);
    }

    let (n, unit) = if magnitude < 3600 {
        (magnitude / 60, "min")
    } else if magnitude < 86400 {
        (magnitude / 3600, "hour")
    } else {
        (magnitude / 86400, "day")
    };
    let plural = if n == 1 { "" } else { "s" };
    if past {
        format!("{} {}{} ago", n, unit, plural)
    } else {
        format!("in {} {}{}", n, unit, plural)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
