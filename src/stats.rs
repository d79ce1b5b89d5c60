//! Database statistics: collection sizes and account activity.
//!
//! Used by `mrag stats` to confirm that ingestion worked and the API is in
//! use.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

struct CollectionStats {
    name: String,
    entries: i64,
    dims: Option<i64>,
    last_updated: Option<i64>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let rows = sqlx::query(
        r#"
        SELECT
            c.name AS name,
            COUNT(e.id) AS entries,
            MAX(e.dims) AS dims,
            MAX(e.updated_at) AS last_updated
        FROM vector_collections c
        LEFT JOIN vector_entries e ON e.collection = c.name
        GROUP BY c.name
        ORDER BY c.name
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let collections: Vec<CollectionStats> = rows
        .iter()
        .map(|row| CollectionStats {
            name: row.get("name"),
            entries: row.get("entries"),
            dims: row.get("dims"),
            last_updated: row.get("last_updated"),
        })
        .collect();

    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&pool)
        .await?;
    let keys: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM api_keys")
        .fetch_one(&pool)
        .await?;
    let conversations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
        .fetch_one(&pool)
        .await?;
    let turns: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversation_turns")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Motoko RAG Database Stats");
    println!("=========================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Users:         {}", users);
    println!("  API keys:      {}", keys);
    println!("  Conversations: {} ({} turns)", conversations, turns);
    println!();

    if collections.is_empty() {
        println!("  No collections yet. Run `mrag ingest all`.");
    } else {
        println!("  Collections:");
        println!(
            "  {:<28} {:>8} {:>6}   {}",
            "NAME", "ENTRIES", "DIMS", "LAST UPDATED"
        );
        println!("  {}", "-".repeat(64));
        for c in &collections {
            println!(
                "  {:<28} {:>8} {:>6}   {}",
                c.name,
                c.entries,
                c.dims.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
                c.last_updated
                    .map(format_ts_iso)
                    .unwrap_or_else(|| "never".to_string())
            );
        }
    }
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
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
