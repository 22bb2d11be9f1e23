//! Knowledge synthesis: one document in, one [`Extraction`] out.
//!
//! The synthesizer builds a single prompt asking for a JSON object with
//! `concepts`, `relationships`, `insights` and `patterns`, sends it through
//! an [`AiSession`], and parses the reply leniently:
//!
//! 1. Strip a surrounding markdown code fence, if any.
//! 2. Parse as JSON; failing that, parse the outermost `{...}` span.
//! 3. Keep well-formed entries of each section and drop the rest.
//!    Scores are clamped to `[0, 1]`.
//!
//! Per-document problems (timeout, provider error, unparseable reply) never
//! surface as `Err`. They come back as an empty extraction plus a
//! [`SynthesisFailure`], so the sync driver can log and move on. Only fatal
//! session errors propagate.

use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::{Concept, Extraction, Pattern, Relationship, SourceDocument};
use crate::session::AiSession;

/// Character budget for the document body when none is configured.
pub const DEFAULT_MAX_CHARS: usize = 50_000;

/// Why a synthesis produced no knowledge.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisFailure {
    Timeout,
    Session(String),
    MalformedResponse(String),
}

impl std::fmt::Display for SynthesisFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynthesisFailure::Timeout => f.write_str("timeout"),
            SynthesisFailure::Session(msg) => write!(f, "session error: {}", msg),
            SynthesisFailure::MalformedResponse(msg) => write!(f, "malformed response: {}", msg),
        }
    }
}

/// Outcome of [`KnowledgeSynthesizer::extract`].
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub extraction: Extraction,
    pub failure: Option<SynthesisFailure>,
}

impl Synthesis {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    fn failed(doc: &SourceDocument, failure: SynthesisFailure) -> Self {
        Self {
            extraction: Extraction::empty(&doc.source_id, &doc.title),
            failure: Some(failure),
        }
    }
}

/// Stateless prompt builder and response parser.
#[derive(Debug, Clone, Copy)]
pub struct KnowledgeSynthesizer {
    max_chars: usize,
}

impl Default for KnowledgeSynthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHARS)
    }
}

impl KnowledgeSynthesizer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    pub fn build_prompt(&self, doc: &SourceDocument) -> String {
        let (body, truncated) = truncate_chars(&doc.body, self.max_chars);
        if truncated {
            tracing::debug!(
                source_id = %doc.source_id,
                max_chars = self.max_chars,
                "document body truncated for extraction"
            );
        }

        let mut prompt = String::from(
            "Extract structured knowledge from the document below.\n\n\
             Respond with a single JSON object and nothing else, using exactly these keys:\n\
             {\n  \
               \"concepts\": [{\"name\": \"...\", \"description\": \"...\", \"importance\": 0.0}],\n  \
               \"relationships\": [{\"subject\": \"...\", \"predicate\": \"...\", \"object\": \"...\", \"confidence\": 0.0}],\n  \
               \"insights\": [\"...\"],\n  \
               \"patterns\": [{\"name\": \"...\", \"description\": \"...\"}]\n\
             }\n\
             Scores range from 0.0 to 1.0. Use an empty array for any section with nothing to report.\n\n",
        );
        prompt.push_str(&format!("Title: {}\n", doc.title));
        if truncated {
            prompt.push_str(&format!(
                "(Only the first {} characters are included.)\n",
                self.max_chars
            ));
        }
        prompt.push_str("\n---\n");
        prompt.push_str(body);
        prompt.push_str("\n---\n");
        prompt
    }

    /// Run one query for `doc` and parse the reply.
    ///
    /// # Errors
    ///
    /// Only fatal session errors, such as [`Error::ProviderUnavailable`].
    pub async fn extract<S: AiSession + ?Sized>(
        &self,
        session: &mut S,
        doc: &SourceDocument,
    ) -> Result<Synthesis> {
        let prompt = self.build_prompt(doc);

        let response = match session.query(&prompt).await {
            Ok(response) => response,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                return Ok(Synthesis::failed(
                    doc,
                    SynthesisFailure::Session(e.to_string()),
                ))
            }
        };

        if response.is_timeout() {
            return Ok(Synthesis::failed(doc, SynthesisFailure::Timeout));
        }
        if !response.success() {
            let msg = response
                .error
                .unwrap_or_else(|| "empty response".to_string());
            return Ok(Synthesis::failed(doc, SynthesisFailure::Session(msg)));
        }

        match parse_response(&doc.source_id, &doc.title, &response.content) {
            Ok(mut extraction) => {
                extraction.content_hash = Some(doc.content_hash.clone());
                extraction.extracted_at = Some(Utc::now());
                Ok(Synthesis {
                    extraction,
                    failure: None,
                })
            }
            Err(Error::MalformedResponse(msg)) => Ok(Synthesis::failed(
                doc,
                SynthesisFailure::MalformedResponse(msg),
            )),
            Err(e) => Ok(Synthesis::failed(
                doc,
                SynthesisFailure::MalformedResponse(e.to_string()),
            )),
        }
    }
}

/// Parse a provider reply into an extraction for `source_id`.
///
/// # Errors
///
/// [`Error::MalformedResponse`] when no JSON object can be found or when
/// every section comes out empty.
pub fn parse_response(source_id: &str, title: &str, text: &str) -> Result<Extraction> {
    let object = parse_object(strip_code_fences(text))
        .or_else(|| parse_object(text))
        .ok_or_else(|| Error::MalformedResponse("no JSON object in response".to_string()))?;

    let extraction = Extraction {
        source_id: source_id.to_string(),
        title: title.to_string(),
        concepts: entries(&object, "concepts", concept_from),
        relationships: entries(&object, "relationships", relationship_from),
        insights: entries(&object, "insights", insight_from),
        patterns: entries(&object, "patterns", pattern_from),
        ..Extraction::default()
    };

    if extraction.is_empty() {
        return Err(Error::MalformedResponse(
            "response has no concepts, relationships, insights, or patterns".to_string(),
        ));
    }
    Ok(extraction)
}

/// Body of the first markdown code fence, or the trimmed text when there is none.
pub fn strip_code_fences(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text.trim();
    };
    let after = &text[start + 3..];
    // Skip the info string ("json", "JSON", ...) up to the end of the line.
    let content = match after.find('\n') {
        Some(i) => &after[i + 1..],
        None => after,
    };
    match content.find("```") {
        Some(end) => content[..end].trim(),
        None => content.trim(),
    }
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text.trim()) {
        return Some(map);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn entries<T>(object: &Map<String, Value>, key: &str, parse: fn(&Value) -> Option<T>) -> Vec<T> {
    let Some(items) = object.get(key).and_then(Value::as_array) else {
        return Vec::new();
    };
    let parsed: Vec<T> = items.iter().filter_map(parse).collect();
    if parsed.len() < items.len() {
        tracing::debug!(
            section = key,
            dropped = items.len() - parsed.len(),
            "dropped malformed entries"
        );
    }
    parsed
}

fn text(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn score(value: &Value, key: &str) -> f64 {
    value
        .get(key)
        .and_then(Value::as_f64)
        .map(|s| s.clamp(0.0, 1.0))
        .unwrap_or(0.5)
}

fn concept_from(value: &Value) -> Option<Concept> {
    if let Some(name) = value.as_str().map(str::trim).filter(|s| !s.is_empty()) {
        return Some(Concept {
            name: name.to_string(),
            description: String::new(),
            importance: 0.5,
        });
    }
    Some(Concept {
        name: text(value, "name")?,
        description: text(value, "description").unwrap_or_default(),
        importance: score(value, "importance"),
    })
}

fn relationship_from(value: &Value) -> Option<Relationship> {
    Some(Relationship {
        subject: text(value, "subject")?,
        predicate: text(value, "predicate")?,
        object: text(value, "object")?,
        confidence: score(value, "confidence"),
    })
}

fn insight_from(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn pattern_from(value: &Value) -> Option<Pattern> {
    Some(Pattern {
        name: text(value, "name")?,
        description: text(value, "description").unwrap_or_default(),
    })
}

/// Prefix of `s` holding at most `max` characters, and whether it was cut.
fn truncate_chars(s: &str, max: usize) -> (&str, bool) {
    match s.char_indices().nth(max) {
        Some((idx, _)) => (&s[..idx], true),
        None => (s, false),
    }
}
