//! File parser covering every supported upload format.
//!
//! [`FileParser`] extracts text from PDF and DOCX bytes and hands the text
//! formats to the core [`TextParser`]. Binary formats keep the extracted
//! text as their raw content.

use std::io::Read;

use quick_xml::events::Event;

use qa_harness_core::models::{DocumentFormat, ParsedDocument};
use qa_harness_core::parse::{resolve_format, DocumentParser, TextParser};
use qa_harness_core::{QaError, Result};

/// Maximum decompressed bytes read from `word/document.xml` (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct FileParser;

impl DocumentParser for FileParser {
    fn parse(
        &self,
        bytes: &[u8],
        filename: &str,
        format: Option<DocumentFormat>,
    ) -> Result<ParsedDocument> {
        let format = resolve_format(filename, format)?;
        let text = match format {
            DocumentFormat::Pdf => extract_pdf(bytes, filename)?,
            DocumentFormat::Docx => extract_docx(bytes, filename)?,
            _ => return TextParser.parse(bytes, filename, Some(format)),
        };

        Ok(ParsedDocument {
            source_name: filename.to_string(),
            format,
            content: text.clone(),
            raw_content: text,
        })
    }
}

fn parse_error(filename: &str, reason: impl std::fmt::Display) -> QaError {
    QaError::Parse {
        filename: filename.to_string(),
        reason: reason.to_string(),
    }
}

fn extract_pdf(bytes: &[u8], filename: &str) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| parse_error(filename, format!("PDF extraction failed: {e}")))
}

fn extract_docx(bytes: &[u8], filename: &str) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| parse_error(filename, format!("not a DOCX archive: {e}")))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| parse_error(filename, "word/document.xml not found"))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| parse_error(filename, e))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(parse_error(filename, "word/document.xml exceeds size limit"));
    }

    docx_paragraphs(&xml).map_err(|e| parse_error(filename, e))
}

/// Concatenate `<w:t>` runs, one line per `<w:p>` paragraph.
fn docx_paragraphs(xml: &[u8]) -> std::result::Result<String, quick_xml::Error> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                out.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim_end().to_string())
}
