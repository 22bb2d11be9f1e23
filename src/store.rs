//! Append-only JSON Lines knowledge store.
//!
//! Two files live under the configured store directory:
//!
//! | File | Content |
//! |------|---------|
//! | `extractions.jsonl` | one [`Extraction`] per line |
//! | `events.jsonl` | one [`Event`] per line |
//!
//! Lines are never rewritten. A re-extracted document is appended again and
//! the newest line for a `source_id` wins, so readers see exactly one record
//! per id. Membership and search run against an in-memory mirror built when
//! the store is opened.
//!
//! Each append is a single `write_all` of a complete line. If the write fails
//! the file is truncated back to its previous length, so a torn record never
//! survives. Writers take `&mut self`: one writer per store at a time.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::events::{Event, EventType};
use crate::models::Extraction;

/// Output format for [`KnowledgeStore::export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// A single pretty-printed JSON array.
    Json,
    /// One JSON object per line, deduplicated.
    Jsonl,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "jsonl" => Ok(ExportFormat::Jsonl),
            other => Err(Error::Config(format!(
                "Unknown export format: '{}'. Use json or jsonl.",
                other
            ))),
        }
    }
}

/// Counts reported by `amp stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub extractions: usize,
    pub concepts: usize,
    pub relationships: usize,
    pub insights: usize,
    pub patterns: usize,
    pub events: usize,
    pub events_by_type: BTreeMap<String, usize>,
    pub extractions_bytes: u64,
    pub events_bytes: u64,
    pub last_sync: Option<DateTime<Utc>>,
}

pub struct KnowledgeStore {
    extractions_path: PathBuf,
    events_path: PathBuf,
    records: Vec<Extraction>,
    latest: HashMap<String, usize>,
}

impl KnowledgeStore {
    /// Open (creating if needed) the store rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|source| Error::Storage {
            path: dir.to_path_buf(),
            source,
        })?;

        let extractions_path = dir.join("extractions.jsonl");
        let events_path = dir.join("events.jsonl");
        let records: Vec<Extraction> = read_jsonl(&extractions_path)?;

        let mut latest = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            latest.insert(record.source_id.clone(), i);
        }

        tracing::debug!(
            path = %extractions_path.display(),
            lines = records.len(),
            unique = latest.len(),
            "loaded knowledge store"
        );

        Ok(Self {
            extractions_path,
            events_path,
            records,
            latest,
        })
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        Self::open(&config.dir)
    }

    pub fn extractions_path(&self) -> &Path {
        &self.extractions_path
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Append an extraction. A record with an existing id supersedes it.
    pub fn save(&mut self, extraction: Extraction) -> Result<()> {
        let line = serde_json::to_string(&extraction)?;
        append_line(&self.extractions_path, &line)?;

        self.latest
            .insert(extraction.source_id.clone(), self.records.len());
        self.records.push(extraction);
        Ok(())
    }

    pub fn is_processed(&self, source_id: &str) -> bool {
        self.latest.contains_key(source_id)
    }

    /// Latest record for `source_id`.
    pub fn get(&self, source_id: &str) -> Option<&Extraction> {
        self.latest.get(source_id).map(|&i| &self.records[i])
    }

    /// Latest record per id, ordered by the position of that record's line.
    pub fn extractions(&self) -> impl Iterator<Item = &Extraction> {
        self.records
            .iter()
            .enumerate()
            .filter(|(i, r)| self.latest.get(&r.source_id) == Some(i))
            .map(|(_, r)| r)
    }

    /// Number of unique ids.
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    /// Case-insensitive substring match over every text field.
    pub fn search(&self, query: &str) -> Vec<&Extraction> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.extractions()
            .filter(|e| {
                e.text_fields()
                    .any(|field| field.to_lowercase().contains(&needle))
            })
            .collect()
    }

    pub fn export(&self, format: ExportFormat) -> Result<String> {
        let records: Vec<&Extraction> = self.extractions().collect();
        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&records)?),
            ExportFormat::Jsonl => {
                let mut out = String::new();
                for record in records {
                    out.push_str(&serde_json::to_string(record)?);
                    out.push('\n');
                }
                Ok(out)
            }
        }
    }

    pub fn record_event(&mut self, event: &Event) -> Result<()> {
        let line = serde_json::to_string(event)?;
        append_line(&self.events_path, &line)
    }

    pub fn read_events(&self) -> Result<Vec<Event>> {
        read_jsonl(&self.events_path)
    }

    /// The last `n` events in file order.
    pub fn recent_events(&self, n: usize) -> Result<Vec<Event>> {
        let mut events = self.read_events()?;
        let start = events.len().saturating_sub(n);
        Ok(events.split_off(start))
    }

    /// Complete event lines written at or after byte `offset`.
    ///
    /// Returns the events and the offset just past the last complete line,
    /// so a caller tailing the log never consumes a half-written line.
    pub fn events_since(&self, offset: u64) -> Result<(Vec<Event>, u64)> {
        let mut file = match File::open(&self.events_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        // Truncated or replaced underneath us: start over.
        let offset = if offset > len { 0 } else { offset };

        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let complete = match buf.iter().rposition(|&b| b == b'\n') {
            Some(pos) => &buf[..=pos],
            None => return Ok((Vec::new(), offset)),
        };

        let events = complete
            .split(|&b| b == b'\n')
            .filter_map(|line| parse_line(&self.events_path, line))
            .collect();

        Ok((events, offset + complete.len() as u64))
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();

        for e in self.extractions() {
            stats.extractions += 1;
            stats.concepts += e.concepts.len();
            stats.relationships += e.relationships.len();
            stats.insights += e.insights.len();
            stats.patterns += e.patterns.len();
        }

        for event in self.read_events()? {
            stats.events += 1;
            *stats
                .events_by_type
                .entry(event.event_type.as_str().to_string())
                .or_insert(0) += 1;
            if event.event_type == EventType::SyncFinished {
                stats.last_sync = Some(event.timestamp);
            }
        }

        stats.extractions_bytes = file_len(&self.extractions_path);
        stats.events_bytes = file_len(&self.events_path);
        Ok(stats)
    }
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Append `line` plus a newline as one write. Rolls back on failure.
fn append_line(path: &Path, line: &str) -> Result<()> {
    let storage = |source: std::io::Error| Error::Storage {
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(storage)?;

    let prior_len = file.metadata().map_err(storage)?.len();

    let mut buf = String::with_capacity(line.len() + 2);
    // Terminate a torn line left by a crash so the new record stands alone.
    if prior_len > 0 && !ends_with_newline(&mut file).map_err(storage)? {
        buf.push('\n');
    }
    buf.push_str(line);
    buf.push('\n');

    if let Err(e) = file.write_all(buf.as_bytes()).and_then(|_| file.flush()) {
        if let Err(rollback) = file.set_len(prior_len) {
            tracing::error!(
                path = %path.display(),
                error = %rollback,
                "failed to roll back partial append"
            );
        }
        return Err(storage(e));
    }

    Ok(())
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Parse every well-formed line; malformed lines are logged and skipped.
fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::Storage {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let mut items = Vec::new();
    for line in BufReader::new(file).split(b'\n') {
        let line = line.map_err(|source| Error::Storage {
            path: path.to_path_buf(),
            source,
        })?;
        items.extend(parse_line(path, &line));
    }
    Ok(items)
}

/// Decode one raw line. Blank lines are ignored; lines that are not valid
/// JSON (including a record torn inside a multi-byte character) are logged.
fn parse_line<T: serde::de::DeserializeOwned>(path: &Path, line: &[u8]) -> Option<T> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice(line) {
        Ok(item) => Some(item),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                bytes = line.len(),
                error = %e,
                "skipping malformed line"
            );
            None
        }
    }
}
