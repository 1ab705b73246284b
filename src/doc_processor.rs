use async_trait::async_trait;
use std::path::Path;

use crate::storage::{BlobStore, StorageError};

/// A fetched and extracted document. Nothing is cached between requests.
#[derive(Debug, Clone)]
pub struct Document {
    pub key: String,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("PDF not found in S3")]
    NotFound,
    #[error("The PDF contains no readable text")]
    NoText,
    #[error("Could not parse document: {0}")]
    Parse(String),
    #[error("Unsupported file type: .{0}")]
    Unsupported(String),
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for DocumentError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => DocumentError::NotFound,
            other => DocumentError::Storage(other),
        }
    }
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, key: &str, bytes: Vec<u8>) -> Result<String, DocumentError>;
}

/// Picks a parser from the key's extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentExtractor;

#[async_trait]
impl TextExtractor for DocumentExtractor {
    async fn extract(&self, key: &str, bytes: Vec<u8>) -> Result<String, DocumentError> {
        let ext = Path::new(key)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("pdf")
            .to_lowercase();

        match ext.as_str() {
            "txt" | "md" | "markdown" => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            "pdf" => {
                // The parser is CPU-bound and can panic on malformed files.
                tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
                    .await
                    .map_err(|e| DocumentError::Parse(format!("PDF parser aborted: {e}")))?
                    .map_err(|e| DocumentError::Parse(format!("PDF parse error: {e}")))
            }
            _ => Err(DocumentError::Unsupported(ext)),
        }
    }
}

/// Fetch `key` and extract its text; whitespace-only text is an error.
pub async fn load_document(
    store: &dyn BlobStore,
    extractor: &dyn TextExtractor,
    key: &str,
) -> Result<Document, DocumentError> {
    let bytes = store.fetch(key).await?;
    let size = bytes.len();
    let text = extractor.extract(key, bytes).await?;
    if text.trim().is_empty() {
        return Err(DocumentError::NoText);
    }
    tracing::debug!(key, bytes = size, chars = text.chars().count(), "document loaded");
    Ok(Document {
        key: key.to_string(),
        text,
    })
}

/// First `max_chars` characters of `text`, never splitting a character.
pub fn prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStore;

    #[test]
    fn test_prefix_short_text() {
        assert_eq!(prefix("Hello world", 100), "Hello world");
    }

    #[test]
    fn test_prefix_respects_char_boundaries() {
        assert_eq!(prefix("héllo", 2), "hé");
        assert_eq!(prefix("abc", 0), "");
    }

    #[tokio::test]
    async fn test_plain_text_extraction() {
        let text = DocumentExtractor
            .extract("notes/week1.md", b"# Lecture 1".to_vec())
            .await
            .unwrap();
        assert_eq!(text, "# Lecture 1");
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let err = DocumentExtractor
            .extract("slides.pptx", vec![1, 2, 3])
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Unsupported(ext) if ext == "pptx"));
    }

    #[tokio::test]
    async fn test_garbage_pdf_is_parse_error() {
        let err = DocumentExtractor
            .extract("broken.pdf", b"definitely not a pdf".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Parse(_)));
    }

    #[tokio::test]
    async fn test_load_document_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blank.txt"), "  \n\t ").unwrap();
        let store = LocalStore::new(dir.path());

        let err = load_document(&store, &DocumentExtractor, "absent.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::NotFound));

        let err = load_document(&store, &DocumentExtractor, "blank.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::NoText));
    }

    #[tokio::test]
    async fn test_load_document_keeps_key_and_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("week1")).unwrap();
        std::fs::write(dir.path().join("week1/notes.md"), "# Abstract\nEntropy.").unwrap();
        let store = LocalStore::new(dir.path());

        let doc = load_document(&store, &DocumentExtractor, "week1/notes.md")
            .await
            .unwrap();
        assert_eq!(doc.key, "week1/notes.md");
        assert_eq!(doc.text, "# Abstract\nEntropy.");
    }
}
