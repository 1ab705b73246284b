use serde_json::{Map, Value};

use super::prompts;
use crate::doc_processor::prefix;
use crate::llm::{CallOptions, LlmError, ModelHandle};

/// Academic provenance of a document. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub instructor_name: Option<String>,
    pub institution_name: Option<String>,
    pub course_title: Option<String>,
    pub department: Option<String>,
}

impl DocumentMetadata {
    /// Read the four known keys; missing, null, blank or non-string values are `None`.
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let field = |name: &str| {
            map.get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
                .map(str::to_string)
        };
        Self {
            instructor_name: field("instructor_name"),
            institution_name: field("institution_name"),
            course_title: field("course_title"),
            department: field("department"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instructor_name.is_none()
            && self.institution_name.is_none()
            && self.course_title.is_none()
            && self.department.is_none()
    }

    /// Markdown header shown above the answer, if anything is known.
    pub fn render_header(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let lines = [
            ("Course", &self.course_title),
            ("Instructor", &self.instructor_name),
            ("Institution", &self.institution_name),
            ("Department", &self.department),
        ];
        let mut header: String = lines
            .iter()
            .filter_map(|&(label, value)| value.as_ref().map(|v| format!("**{label}:** {v}  \n")))
            .collect();
        header.push_str("\n---\n\n");
        Some(header)
    }
}

/// Strip a Markdown code fence some models wrap JSON in.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Coerce whatever the model sent into one object: an object passes through,
/// a non-empty array yields its first element, anything else is empty.
pub fn normalize_metadata(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Array(items) => match items.into_iter().next() {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}

pub fn parse_metadata_reply(reply: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(strip_code_fence(reply)) {
        Ok(value) => normalize_metadata(value),
        Err(e) => {
            tracing::warn!(error = %e, "metadata reply is not JSON");
            Map::new()
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    model: ModelHandle,
    prefix_chars: usize,
}

impl MetadataExtractor {
    pub fn new(model: ModelHandle, prefix_chars: usize) -> Self {
        Self {
            model,
            prefix_chars,
        }
    }

    pub async fn extract(&self, document: &str) -> Result<DocumentMetadata, LlmError> {
        let excerpt = prefix(document, self.prefix_chars);
        let reply = self
            .model
            .ask(
                prompts::metadata_extraction(excerpt),
                CallOptions {
                    temperature: Some(0.0),
                    json: true,
                    ..CallOptions::default()
                },
            )
            .await?;
        let metadata = DocumentMetadata::from_map(&parse_metadata_reply(&reply));
        tracing::debug!(?metadata, "metadata extracted");
        Ok(metadata)
    }
}
