//! Text extraction from uploaded documents.
//!
//! `.docx` files are read from `word/document.xml`: one block per paragraph,
//! with tabs and line breaks preserved. Plain text (`.txt`, `.md`) is one block.

use regex::Regex;
use std::io::{Cursor, Read};
use std::path::Path;

use crate::error::{Error, Result};

const DOCX_BODY: &str = "word/document.xml";
const DOCX_RUN: &str = r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<w:tab/>|<w:br(?:\s[^>]*)?/>|<w:cr/>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Docx,
    PlainText,
}

impl DocumentKind {
    pub fn from_file_name(name: &str) -> Result<Self> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("docx") => Ok(DocumentKind::Docx),
            Some("txt" | "md") => Ok(DocumentKind::PlainText),
            _ => Err(Error::Validation(format!(
                "unsupported document type '{name}'; expected .docx, .txt or .md"
            ))),
        }
    }
}

/// Ordered text blocks of the document.
pub fn extract_blocks(file_name: &str, bytes: &[u8]) -> Result<Vec<String>> {
    match DocumentKind::from_file_name(file_name)? {
        DocumentKind::PlainText => {
            let text = std::str::from_utf8(bytes).map_err(|e| {
                Error::EmptyInput(format!("'{file_name}' is not valid UTF-8 text: {e}"))
            })?;
            Ok(vec![text.trim_start_matches('\u{feff}').to_string()])
        }
        DocumentKind::Docx => {
            let xml = read_docx_body(bytes)
                .map_err(|e| Error::EmptyInput(format!("could not read text from '{file_name}': {e}")))?;
            docx_paragraphs(&xml)
        }
    }
}

/// Blocks joined with blank lines, ready for chunking.
pub fn extract_text(file_name: &str, bytes: &[u8]) -> Result<String> {
    let blocks = extract_blocks(file_name, bytes)?;
    Ok(blocks
        .into_iter()
        .filter(|b| !b.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n"))
}

fn read_docx_body(bytes: &[u8]) -> anyhow::Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut entry = archive.by_name(DOCX_BODY)?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(xml)
}

fn docx_paragraphs(xml: &str) -> Result<Vec<String>> {
    let run = Regex::new(DOCX_RUN).map_err(|e| Error::Internal(e.to_string()))?;
    let mut blocks = Vec::new();
    for paragraph in xml.split("</w:p>") {
        let mut text = String::new();
        for cap in run.captures_iter(paragraph) {
            match cap.get(1) {
                Some(t) => text.push_str(&unescape_xml(t.as_str())),
                None if cap[0].starts_with("<w:tab") => text.push('\t'),
                None => text.push('\n'),
            }
        }
        if !text.trim().is_empty() {
            blocks.push(text);
        }
    }
    Ok(blocks)
}

fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .map(|hex| u32::from_str_radix(hex, 16))
                .or_else(|| entity.strip_prefix('#').map(str::parse::<u32>))
                .and_then(std::result::Result::ok)
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => out.push(c),
            None => out.push_str(&tail[..=semi]),
        }
        rest = &tail[semi + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescapes_named_and_numeric_entities() {
        assert_eq!(unescape_xml("a &amp; b &lt;c&gt; &#65;&#x42; &bogus;"), "a & b <c> AB &bogus;");
    }

    #[test]
    fn paragraphs_tabs_and_breaks() {
        let xml = r#"<w:body><w:p><w:r><w:t>Hello</w:t><w:tab/><w:t xml:space="preserve"> world</w:t></w:r></w:p><w:p></w:p><w:p><w:r><w:t>Line</w:t><w:br/><w:t>two</w:t></w:r></w:p></w:body>"#;
        let blocks = docx_paragraphs(xml).expect("parse");
        assert_eq!(blocks, vec!["Hello\t world".to_string(), "Line\ntwo".to_string()]);
    }
}
