//! Knowledge store statistics.
//!
//! Provides a quick summary of what has been extracted: record counts per
//! knowledge section, event counts per type, file sizes, and when the last
//! sync finished. Used by `amp stats` to confirm syncs are doing their job.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::store::KnowledgeStore;

/// Run the stats command: load the store and print a summary.
pub fn run_stats(config: &Config) -> Result<()> {
    let store = KnowledgeStore::from_config(&config.store)?;
    let stats = store.stats()?;

    println!("Amplifier: Knowledge Store Stats");
    println!("================================");
    println!();
    println!("  Store:          {}", config.store.dir.display());
    println!(
        "  Size:           {} extractions, {} events",
        format_bytes(stats.extractions_bytes),
        format_bytes(stats.events_bytes)
    );
    println!(
        "  Last sync:      {}",
        stats
            .last_sync
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!("  Extractions:    {}", stats.extractions);
    println!("  Concepts:       {}", stats.concepts);
    println!("  Relationships:  {}", stats.relationships);
    println!("  Insights:       {}", stats.insights);
    println!("  Patterns:       {}", stats.patterns);
    println!("  Events:         {}", stats.events);

    if !stats.events_by_type.is_empty() {
        println!();
        println!("  By event type:");
        println!("  {:<24} {:>8}", "TYPE", "COUNT");
        println!("  {}", "-".repeat(33));
        for (event_type, count) in &stats.events_by_type {
            println!("  {:<24} {:>8}", event_type, count);
        }
    }

    println!();
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

/// Format a timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: DateTime<Utc>) -> String {
    let delta = (Utc::now() - ts).num_seconds();

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn timestamps_are_relative() {
        let now = Utc::now();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - Duration::minutes(1)), "1 min ago");
        assert_eq!(format_ts_relative(now - Duration::hours(5)), "5 hours ago");
        assert_eq!(format_ts_relative(now - Duration::days(2)), "2 days ago");

        let old = now - Duration::days(90);
        assert_eq!(format_ts_relative(old), old.format("%Y-%m-%d %H:%M").to_string());
    }
}
