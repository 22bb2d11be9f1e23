//! Core data models used throughout Amplifier.
//!
//! [`SourceDocument`] is what the content scanner produces; [`Extraction`]
//! is what the synthesizer produces from it and the store persists, one
//! JSON line per record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// A readable text document from the content directory.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub source_id: String,
    pub title: String,
    pub path: PathBuf,
    pub relative_path: String,
    pub body: String,
    pub content_hash: String,
}

/// Structured knowledge derived from one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub source_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub concepts: Vec<Concept>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_score")]
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[serde(default = "default_score")]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

fn default_score() -> f64 {
    0.5
}

impl Extraction {
    /// An extraction with identity only and no knowledge.
    pub fn empty(source_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    /// True when no concepts, relationships, insights, or patterns are present.
    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
            && self.relationships.is_empty()
            && self.insights.is_empty()
            && self.patterns.is_empty()
    }

    /// Every searchable text field, in a stable order.
    pub fn text_fields(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.title.as_str())
            .chain(
                self.concepts
                    .iter()
                    .flat_map(|c| [c.name.as_str(), c.description.as_str()]),
            )
            .chain(self.relationships.iter().flat_map(|r| {
                [r.subject.as_str(), r.predicate.as_str(), r.object.as_str()]
            }))
            .chain(self.insights.iter().map(String::as_str))
            .chain(
                self.patterns
                    .iter()
                    .flat_map(|p| [p.name.as_str(), p.description.as_str()]),
            )
    }
}

/// Lowercase slug: alphanumerics (any script) kept, every other run
/// collapsed to `-`.
///
/// `"notes/Doc1.md"` becomes `"notes-doc1-md"`; callers strip extensions first
/// when they want `"notes-doc1"`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Stable id derived from a relative path, for names that slug to nothing
/// or to an id another file already holds.
pub fn path_id(relative_path: &str) -> String {
    let digest = content_hash(relative_path);
    format!("doc-{}", &digest[..12])
}

/// SHA-256 hex digest of a document body.
pub fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_examples() {
        assert_eq!(slugify("Doc1"), "doc1");
        assert_eq!(slugify("notes/Meeting Notes"), "notes-meeting-notes");
        assert_eq!(slugify("  --Hello__World--  "), "hello-world");
        assert_eq!(slugify("émoji ✓ ok"), "émoji-ok");
        assert_eq!(slugify("Café"), "café");
        assert_eq!(slugify("日本語"), "日本語");
        assert_eq!(slugify("Заметки 2"), "заметки-2");
        assert_eq!(slugify("✓ ✓"), "");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn path_id_is_stable_and_distinct() {
        assert_eq!(path_id("a/b.md"), path_id("a/b.md"));
        assert_ne!(path_id("a/b.md"), path_id("a/c.md"));
        assert!(path_id("✓.md").starts_with("doc-"));
        assert_eq!(path_id("x").len(), 16);
    }

    #[test]
    fn missing_fields_default_on_load() {
        let e: Extraction = serde_json::from_str(r#"{"source_id":"a"}"#).unwrap();
        assert_eq!(e.source_id, "a");
        assert!(e.is_empty());
        assert!(e.content_hash.is_none());
    }

    #[test]
    fn optional_fields_not_serialized_when_absent() {
        let line = serde_json::to_string(&Extraction::empty("a", "A")).unwrap();
        assert!(!line.contains("content_hash"));
        assert!(!line.contains("extracted_at"));
        assert!(line.contains("\"concepts\":[]"));
    }

    #[test]
    fn text_fields_cover_every_section() {
        let e = Extraction {
            source_id: "x".into(),
            title: "T".into(),
            concepts: vec![Concept {
                name: "C".into(),
                description: "CD".into(),
                importance: 0.1,
            }],
            relationships: vec![Relationship {
                subject: "S".into(),
                predicate: "P".into(),
                object: "O".into(),
                confidence: 1.0,
            }],
            insights: vec!["I".into()],
            patterns: vec![Pattern {
                name: "PN".into(),
                description: "PD".into(),
            }],
            ..Extraction::default()
        };
        let fields: Vec<&str> = e.text_fields().collect();
        assert_eq!(fields, vec!["T", "C", "CD", "S", "P", "O", "I", "PN", "PD"]);
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);
    }
}
