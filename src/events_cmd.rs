//! `amp events`: print recent lifecycle events or follow the log.

use anyhow::Result;
use std::time::Duration;

use crate::config::Config;
use crate::store::KnowledgeStore;
use crate::sync::shutdown_signal;

const FOLLOW_POLL: Duration = Duration::from_millis(500);

pub async fn run_events(config: &Config, n: usize, follow: bool) -> Result<()> {
    let store = KnowledgeStore::from_config(&config.store)?;

    // One read gives both the tail to print and where following resumes.
    let (mut events, mut offset) = store.events_since(0)?;
    let recent = events.split_off(events.len().saturating_sub(n));
    if recent.is_empty() && !follow {
        println!("No events.");
        return Ok(());
    }
    for event in &recent {
        println!("{}", event.display_line());
    }

    if !follow {
        return Ok(());
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(FOLLOW_POLL) => {
                let (events, next) = store.events_since(offset)?;
                for event in &events {
                    println!("{}", event.display_line());
                }
                offset = next;
            }
        }
    }

    Ok(())
}
