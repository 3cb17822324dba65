//! Text extraction for uploaded binary documents (PDF, DOCX).
//!
//! The UI hands us raw bytes plus the original file name; this module
//! returns plain UTF-8 text. Extraction never retains the byte buffer.
//! A file that cannot be parsed fails on its own — the caller skips it and
//! continues with the rest of the upload batch.

use std::io::Read;

use crate::error::IngestError;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract plain text from an uploaded document, dispatching on the
/// file-name extension (case-insensitive).
pub fn extract_text(name: &str, bytes: &[u8]) -> Result<String, IngestError> {
    let extension = name.rsplit('.').next().unwrap_or("").to_lowercase();
    match extension.as_str() {
        "pdf" => extract_pdf(name, bytes),
        "docx" => extract_docx(name, bytes),
        _ => Err(IngestError::UnsupportedFormat { extension }),
    }
}

fn extract_pdf(name: &str, bytes: &[u8]) -> Result<String, IngestError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| IngestError::Extraction {
        name: name.to_string(),
        message: e.to_string(),
    })
}

/// DOCX: pull `word/document.xml` out of the ZIP container and concatenate
/// the `w:t` text runs, joining paragraphs with a newline.
fn extract_docx(name: &str, bytes: &[u8]) -> Result<String, IngestError> {
    let ooxml_err = |message: String| IngestError::Extraction {
        name: name.to_string(),
        message,
    };

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ooxml_err(e.to_string()))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| ooxml_err("word/document.xml not found".to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| ooxml_err(e.to_string()))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(ooxml_err("word/document.xml exceeds size limit".to_string()));
        }
    }

    extract_paragraphs(&doc_xml).map_err(ooxml_err)
}

fn extract_paragraphs(xml: &[u8]) -> Result<String, String> {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;
    let mut saw_paragraph = false;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => saw_paragraph = true,
                b"t" => in_text_run = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_text_run => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => {
                    paragraphs.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    // Text runs outside any paragraph (malformed but tolerated).
    if !current.is_empty() || !saw_paragraph {
        paragraphs.push(current);
    }

    Ok(paragraphs.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut archive = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            archive
                .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            let body: String = paragraphs
                .iter()
                .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
                .collect();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            archive.write_all(xml.as_bytes()).unwrap();
            archive.finish().unwrap();
        }
        buf
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = extract_text("report.xlsx", b"whatever").unwrap_err();
        match err {
            IngestError::UnsupportedFormat { extension } => assert_eq!(extension, "xlsx"),
            other => panic!("expected UnsupportedFormat, got {:?}", other),
        }
    }

    #[test]
    fn extension_dispatch_is_case_insensitive() {
        // Invalid bytes, but it must reach the PDF parser rather than
        // being rejected as an unknown format.
        let err = extract_text("Report.PDF", b"not a pdf").unwrap_err();
        assert!(matches!(err, IngestError::Extraction { .. }));
    }

    #[test]
    fn invalid_pdf_fails_that_file_only() {
        let err = extract_text("broken.pdf", b"not a pdf").unwrap_err();
        assert!(err.is_file_local());
    }

    #[test]
    fn invalid_zip_fails_docx() {
        let err = extract_text("broken.docx", b"not a zip").unwrap_err();
        assert!(matches!(err, IngestError::Extraction { .. }));
    }

    #[test]
    fn docx_paragraphs_joined_by_newline() {
        let bytes = docx_with_paragraphs(&["First paragraph.", "Second paragraph."]);
        let text = extract_text("doc.docx", &bytes).unwrap();
        assert_eq!(text, "First paragraph.\nSecond paragraph.");
    }

    #[test]
    fn docx_empty_paragraph_contributes_empty_line() {
        let bytes = docx_with_paragraphs(&["Alpha", "", "Beta"]);
        let text = extract_text("doc.docx", &bytes).unwrap();
        assert_eq!(text, "Alpha\n\nBeta");
    }

    #[test]
    fn docx_split_text_runs_are_concatenated() {
        let mut buf = Vec::new();
        {
            let mut archive = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            archive
                .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            let xml = "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p></w:body></w:document>";
            archive.write_all(xml.as_bytes()).unwrap();
            archive.finish().unwrap();
        }
        let text = extract_text("doc.docx", &buf).unwrap();
        assert_eq!(text, "Hello world");
    }
}
