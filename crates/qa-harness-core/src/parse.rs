//! Document parsing collaborator.
//!
//! [`DocumentParser`] turns uploaded bytes into a [`ParsedDocument`].
//! [`TextParser`] covers the text formats (Markdown, plain text, JSON,
//! HTML); the app crate layers PDF and DOCX extraction on top of it.

use std::path::Path;

use serde_json::Value;

use crate::error::{QaError, Result};
use crate::html::{visible_text, PageStructure};
use crate::models::{DocumentFormat, ParsedDocument};

pub trait DocumentParser: Send + Sync {
    /// Parse `bytes` uploaded as `filename`. `format` overrides the
    /// extension-derived format when given.
    fn parse(
        &self,
        bytes: &[u8],
        filename: &str,
        format: Option<DocumentFormat>,
    ) -> Result<ParsedDocument>;
}

/// Resolve the format of an upload from an override or its extension.
pub fn resolve_format(filename: &str, format: Option<DocumentFormat>) -> Result<DocumentFormat> {
    if let Some(format) = format {
        return Ok(format);
    }
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    DocumentFormat::from_extension(extension).ok_or_else(|| QaError::UnsupportedFormat {
        filename: filename.to_string(),
        extension: if extension.is_empty() {
            "(none)".to_string()
        } else {
            extension.to_string()
        },
    })
}

/// Parser for UTF-8 text formats.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextParser;

impl DocumentParser for TextParser {
    fn parse(
        &self,
        bytes: &[u8],
        filename: &str,
        format: Option<DocumentFormat>,
    ) -> Result<ParsedDocument> {
        let format = resolve_format(filename, format)?;
        if matches!(format, DocumentFormat::Pdf | DocumentFormat::Docx) {
            return Err(QaError::UnsupportedFormat {
                filename: filename.to_string(),
                extension: format.as_str().to_string(),
            });
        }

        let raw = decode_utf8(bytes, filename)?;
        let content = match format {
            DocumentFormat::Json => json_to_text(&raw, filename)?,
            DocumentFormat::Html => html_to_text(&raw, filename),
            _ => raw.clone(),
        };

        Ok(ParsedDocument {
            source_name: filename.to_string(),
            format,
            content,
            raw_content: raw,
        })
    }
}

pub fn decode_utf8(bytes: &[u8], filename: &str) -> Result<String> {
    let text = std::str::from_utf8(bytes).map_err(|e| QaError::Parse {
        filename: filename.to_string(),
        reason: format!("not valid UTF-8: {e}"),
    })?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text).to_string())
}

fn json_to_text(raw: &str, filename: &str) -> Result<String> {
    let value: Value = serde_json::from_str(raw).map_err(|e| QaError::Parse {
        filename: filename.to_string(),
        reason: format!("invalid JSON: {e}"),
    })?;
    let mut out = format!("JSON document: {filename}\n\n");
    write_json(&value, 0, &mut out);
    Ok(out)
}

/// Render JSON as indented `key: value` lines.
fn write_json(value: &Value, depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if child.is_object() || child.is_array() {
                    out.push_str(&format!("{pad}{key}:\n"));
                    write_json(child, depth + 1, out);
                } else {
                    out.push_str(&format!("{pad}{key}: {}\n", scalar(child)));
                }
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                if child.is_object() || child.is_array() {
                    out.push_str(&format!("{pad}[{i}]:\n"));
                    write_json(child, depth + 1, out);
                } else {
                    out.push_str(&format!("{pad}- {}\n", scalar(child)));
                }
            }
        }
        other => out.push_str(&format!("{pad}{}\n", scalar(other))),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn html_to_text(raw: &str, filename: &str) -> String {
    let page = PageStructure::extract(raw);
    format!(
        "HTML page: {filename}\n\n{}\nPage text:\n{}",
        page.summary(),
        visible_text(raw)
    )
}
