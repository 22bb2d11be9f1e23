//! `amp search`: case-insensitive substring search over stored extractions.

use anyhow::Result;

use crate::config::Config;
use crate::models::Extraction;
use crate::store::KnowledgeStore;

pub fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let store = KnowledgeStore::from_config(&config.store)?;
    let mut results = store.search(query);
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let total = results.len();
    if let Some(limit) = limit {
        results.truncate(limit);
    }

    for (i, extraction) in results.iter().enumerate() {
        let title_display = if extraction.title.is_empty() {
            "(untitled)"
        } else {
            extraction.title.as_str()
        };
        println!("{}. {} / {}", i + 1, extraction.source_id, title_display);
        println!(
            "    concepts: {}  relationships: {}  insights: {}  patterns: {}",
            extraction.concepts.len(),
            extraction.relationships.len(),
            extraction.insights.len(),
            extraction.patterns.len()
        );
        if let Some(field) = matching_field(extraction, query) {
            println!("    match: \"{}\"", excerpt(field, 120));
        }
        if let Some(at) = extraction.extracted_at {
            println!("    extracted: {}", at.format("%Y-%m-%d"));
        }
        println!();
    }

    if results.len() < total {
        println!("({} of {} matches shown)", results.len(), total);
    }

    Ok(())
}

/// First text field that contains `query`, ignoring case.
fn matching_field<'a>(extraction: &'a Extraction, query: &str) -> Option<&'a str> {
    let needle = query.trim().to_lowercase();
    extraction
        .text_fields()
        .find(|field| field.to_lowercase().contains(&needle))
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Concept;

    #[test]
    fn matching_field_finds_first_hit() {
        let mut e = Extraction::empty("doc1", "Doc1");
        e.concepts.push(Concept {
            name: "AI Agents".into(),
            description: "Agents that act".into(),
            importance: 0.9,
        });
        e.insights.push("Reduces manual work".into());

        assert_eq!(matching_field(&e, "agents"), Some("AI Agents"));
        assert_eq!(matching_field(&e, "MANUAL"), Some("Reduces manual work"));
        assert_eq!(matching_field(&e, "absent"), None);
    }

    #[test]
    fn excerpt_flattens_and_truncates() {
        assert_eq!(excerpt(" a\nb ", 10), "a b");
        assert_eq!(excerpt("abcdef", 3), "abc...");
    }
}
