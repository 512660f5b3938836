use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MedqError, Result};

/// Filename → already-extracted plain text, as handed over by the extraction layer.
pub type ExtractedDocuments = BTreeMap<String, String>;

/// Upper bound on the size of an attached file (10 MiB).
pub const MAX_DOCUMENT_BYTES: u64 = 10 * 1024 * 1024;

/// Accepted extensions and their expected content type.
const ALLOWED_TYPES: &[(&str, &str)] = &[
    (".pdf", "application/pdf"),
    (".doc", "application/msword"),
    (
        ".docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    (".txt", "text/plain"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".png", "image/png"),
    (".csv", "text/csv"),
    (
        ".xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    (".xls", "application/vnd.ms-excel"),
];

/// Metadata and extracted text of a file attached to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDocument {
    pub id: Uuid,
    pub query_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub text_content: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueryDocument {
    /// Validates the upload metadata and builds the record with a sanitized filename.
    pub fn new(
        query_id: Uuid,
        filename: &str,
        content_type: &str,
        size_bytes: u64,
        text_content: Option<String>,
    ) -> Result<Self> {
        let filename = sanitize_filename(filename);
        validate_upload(&filename, content_type, size_bytes)?;

        Ok(Self {
            id: Uuid::new_v4(),
            query_id,
            filename,
            content_type: content_type.to_string(),
            size_bytes: size_bytes as i64,
            text_content,
            created_at: Utc::now(),
        })
    }
}

/// Check extension, declared content type, and size of an uploaded file.
pub fn validate_upload(filename: &str, content_type: &str, size_bytes: u64) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(MedqError::InvalidInput("No file provided".into()));
    }

    let ext = Path::new(&filename.to_lowercase())
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let expected = ALLOWED_TYPES
        .iter()
        .find(|(allowed, _)| *allowed == ext)
        .map(|(_, ct)| *ct)
        .ok_or_else(|| {
            let allowed: Vec<&str> = ALLOWED_TYPES.iter().map(|(e, _)| *e).collect();
            MedqError::InvalidInput(format!(
                "File type not allowed. Allowed types: {}",
                allowed.join(", ")
            ))
        })?;

    // Text files are reported with assorted text/* subtypes by browsers.
    let text_variant = ext == ".txt" && content_type.starts_with("text/");
    if content_type != expected && !text_variant {
        return Err(MedqError::InvalidInput(format!(
            "Invalid content type. Expected {}, got {}",
            expected, content_type
        )));
    }

    if size_bytes > MAX_DOCUMENT_BYTES {
        return Err(MedqError::InvalidInput(format!(
            "File too large. Maximum size is {} MB",
            MAX_DOCUMENT_BYTES / 1024 / 1024
        )));
    }

    Ok(())
}

/// Strip directory components and path separators from a client-supplied name.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    base.replace(['/', '\\'], "_")
}

/// Collect the documents that actually carry text into a filename → text map.
/// Repeated filenames get a ` (2)`, ` (3)`, ... suffix so no text is dropped.
pub fn extracted_texts(documents: &[QueryDocument]) -> ExtractedDocuments {
    let mut texts = ExtractedDocuments::new();
    for document in documents.iter().filter(|d| !d.filename.is_empty()) {
        let Some(text) = document
            .text_content
            .as_ref()
            .filter(|t| !t.trim().is_empty())
        else {
            continue;
        };

        let mut key = document.filename.clone();
        let mut n = 2;
        while texts.contains_key(&key) {
            key = format!("{} ({})", document.filename, n);
            n += 1;
        }
        if key != document.filename {
            tracing::debug!(
                query_id = %document.query_id,
                filename = %document.filename,
                key = %key,
                "Renamed duplicate document"
            );
        }
        texts.insert(key, text.clone());
    }
    texts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_pdf_with_matching_type() {
        assert!(validate_upload("labs.pdf", "application/pdf", 1024).is_ok());
    }

    #[test]
    fn test_txt_accepts_any_text_subtype() {
        assert!(validate_upload("notes.TXT", "text/markdown", 10).is_ok());
    }

    #[test]
    fn test_rejects_unknown_extension() {
        let err = validate_upload("run.exe", "application/octet-stream", 10).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
        assert!(err.to_string().contains("File type not allowed"));
    }

    #[test]
    fn test_rejects_mismatched_content_type() {
        let err = validate_upload("scan.png", "image/jpeg", 10).unwrap_err();
        assert!(err.to_string().contains("Expected image/png"));
    }

    #[test]
    fn test_rejects_oversized_file() {
        let err = validate_upload("labs.pdf", "application/pdf", MAX_DOCUMENT_BYTES + 1).unwrap_err();
        assert!(err.to_string().contains("File too large"));
    }

    #[test]
    fn test_sanitize_strips_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd.txt"), "passwd.txt");
        assert_eq!(sanitize_filename("C:\\Users\\me\\labs.pdf"), "labs.pdf");
        assert_eq!(sanitize_filename("labs.pdf"), "labs.pdf");
    }

    #[test]
    fn test_extracted_texts_skips_empty_content() {
        let q = Uuid::new_v4();
        let docs = vec![
            QueryDocument::new(q, "a.txt", "text/plain", 3, Some("glucose 140 mg/dL".into())).unwrap(),
            QueryDocument::new(q, "b.txt", "text/plain", 3, Some("   ".into())).unwrap(),
            QueryDocument::new(q, "c.png", "image/png", 3, None).unwrap(),
        ];
        let texts = extracted_texts(&docs);
        assert_eq!(texts.len(), 1);
        assert!(texts.contains_key("a.txt"));
    }

    #[test]
    fn test_extracted_texts_keeps_same_named_documents() {
        let q = Uuid::new_v4();
        let docs = vec![
            QueryDocument::new(q, "jan/labs.txt", "text/plain", 3, Some("HbA1c 8.2 %".into())).unwrap(),
            QueryDocument::new(q, "feb/labs.txt", "text/plain", 3, Some("HbA1c 7.6 %".into())).unwrap(),
            QueryDocument::new(q, "mar/labs.txt", "text/plain", 3, Some("HbA1c 7.1 %".into())).unwrap(),
        ];
        let texts = extracted_texts(&docs);
        assert_eq!(texts.len(), 3);
        assert_eq!(texts["labs.txt"], "HbA1c 8.2 %");
        assert_eq!(texts["labs.txt (2)"], "HbA1c 7.6 %");
        assert_eq!(texts["labs.txt (3)"], "HbA1c 7.1 %");
    }
}
