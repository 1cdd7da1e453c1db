//! Artifact assembly: `output.txt`, `summary.txt` and `output.docx`.
//!
//! A `.docx` file is an OOXML package: a zip archive of XML parts. Only the
//! five parts Word needs to open a document are written. Each [`Section`]
//! becomes a `Heading1` paragraph followed by one body paragraph; newlines
//! and tabs in the body map to `<w:br/>` and `<w:tab/>` so line structure
//! survives. Characters XML 1.0 cannot carry are dropped from the document
//! (a form feed becomes a line break); the `.txt` artifacts keep them.
//!
//! Every artifact is written to `<name>.tmp` first and renamed into place,
//! so a download never sees a half-written file.

use crate::error::HandscribeError;
use crate::output::RunArtifacts;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const TEXT_ARTIFACT: &str = "output.txt";
pub const SUMMARY_ARTIFACT: &str = "summary.txt";
pub const DOCUMENT_ARTIFACT: &str = "output.docx";

/// Names a client may request from a run directory.
pub const ARTIFACT_NAMES: [&str; 3] = [TEXT_ARTIFACT, SUMMARY_ARTIFACT, DOCUMENT_ARTIFACT];

pub const TEXT_HEADING: &str = "Extracted Text";
pub const SUMMARY_HEADING: &str = "Summary";

const HEADING_STYLE: &str = "Heading1";
const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/><w:qFormat/></w:style><w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/><w:pPr><w:keepNext/><w:spacing w:before="240" w:after="120"/><w:outlineLvl w:val="0"/></w:pPr><w:rPr><w:b/><w:sz w:val="32"/></w:rPr></w:style></w:styles>"#;

/// A heading followed by its body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: String,
    pub body: String,
}

impl Section {
    pub fn new(heading: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            body: body.into(),
        }
    }
}

// ── Run artifacts ────────────────────────────────────────────────────────

/// Write the three artifacts of a run into `run_dir`.
pub async fn write_artifacts(
    run_dir: &Path,
    run_id: Uuid,
    full_text: &str,
    summary_text: &str,
) -> Result<RunArtifacts, HandscribeError> {
    tokio::fs::create_dir_all(run_dir)
        .await
        .map_err(|source| HandscribeError::OutputWriteFailed {
            path: run_dir.to_path_buf(),
            source,
        })?;

    let text = run_dir.join(TEXT_ARTIFACT);
    let summary = run_dir.join(SUMMARY_ARTIFACT);
    let document = run_dir.join(DOCUMENT_ARTIFACT);

    write_atomic(&text, full_text.as_bytes()).await?;
    write_atomic(&summary, summary_text.as_bytes()).await?;

    let sections = [
        Section::new(TEXT_HEADING, full_text),
        Section::new(SUMMARY_HEADING, summary_text),
    ];
    let bytes = build_document(&sections).map_err(|detail| {
        HandscribeError::DocumentWriteFailed {
            path: document.clone(),
            detail,
        }
    })?;
    write_atomic(&document, &bytes).await?;

    info!("Artifacts written to {}", run_dir.display());
    Ok(RunArtifacts {
        run_id,
        dir: run_dir.to_path_buf(),
        text,
        summary,
        document,
    })
}

/// Write `text`/`summary` as a two-section document at `path`.
pub async fn write_document(
    path: &Path,
    text: &str,
    summary: &str,
) -> Result<(), HandscribeError> {
    let sections = [
        Section::new(TEXT_HEADING, text),
        Section::new(SUMMARY_HEADING, summary),
    ];
    let bytes =
        build_document(&sections).map_err(|detail| HandscribeError::DocumentWriteFailed {
            path: path.to_path_buf(),
            detail,
        })?;
    write_atomic(path, &bytes).await
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), HandscribeError> {
    let write_err = |source| HandscribeError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let tmp_path = tmp_path_for(path);
    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

// ── DOCX writing ─────────────────────────────────────────────────────────

/// Serialise `sections` as a `.docx` package.
pub fn build_document(sections: &[Section]) -> Result<Vec<u8>, String> {
    let document_xml = document_xml(sections)?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let parts: [(&str, &[u8]); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES_XML.as_bytes()),
        ("_rels/.rels", ROOT_RELS_XML.as_bytes()),
        ("word/document.xml", &document_xml),
        ("word/styles.xml", STYLES_XML.as_bytes()),
        ("word/_rels/document.xml.rels", DOCUMENT_RELS_XML.as_bytes()),
    ];
    for (name, data) in parts {
        zip.start_file(name, options)
            .map_err(|e| format!("zip entry {}: {}", name, e))?;
        zip.write_all(data)
            .map_err(|e| format!("zip entry {}: {}", name, e))?;
    }

    let cursor = zip.finish().map_err(|e| format!("zip finish: {}", e))?;
    Ok(cursor.into_inner())
}

fn document_xml(sections: &[Section]) -> Result<Vec<u8>, String> {
    let mut w = Writer::new(Vec::new());

    emit(&mut w, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    emit(
        &mut w,
        Event::Start(BytesStart::new("w:document").with_attributes([("xmlns:w", W_NS)])),
    )?;
    emit(&mut w, Event::Start(BytesStart::new("w:body")))?;

    for section in sections {
        write_paragraph(&mut w, Some(HEADING_STYLE), &section.heading)?;
        write_paragraph(&mut w, None, &section.body)?;
    }

    emit(&mut w, Event::End(BytesEnd::new("w:body")))?;
    emit(&mut w, Event::End(BytesEnd::new("w:document")))?;

    Ok(w.into_inner())
}

fn emit(w: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), String> {
    w.write_event(event)
        .map_err(|e| format!("document.xml: {}", e))
}

/// One `<w:p>` with a single run; line and tab structure kept as elements.
fn write_paragraph(
    w: &mut Writer<Vec<u8>>,
    style: Option<&str>,
    text: &str,
) -> Result<(), String> {
    emit(w, Event::Start(BytesStart::new("w:p")))?;

    if let Some(style) = style {
        emit(w, Event::Start(BytesStart::new("w:pPr")))?;
        emit(
            w,
            Event::Empty(BytesStart::new("w:pStyle").with_attributes([("w:val", style)])),
        )?;
        emit(w, Event::End(BytesEnd::new("w:pPr")))?;
    }

    let text = xml_text(text);
    if !text.is_empty() {
        emit(w, Event::Start(BytesStart::new("w:r")))?;
        for (line_no, line) in text.split('\n').enumerate() {
            if line_no > 0 {
                emit(w, Event::Empty(BytesStart::new("w:br")))?;
            }
            for (tab_no, segment) in line.split('\t').enumerate() {
                if tab_no > 0 {
                    emit(w, Event::Empty(BytesStart::new("w:tab")))?;
                }
                if segment.is_empty() {
                    continue;
                }
                emit(
                    w,
                    Event::Start(
                        BytesStart::new("w:t").with_attributes([("xml:space", "preserve")]),
                    ),
                )?;
                emit(w, Event::Text(BytesText::new(segment)))?;
                emit(w, Event::End(BytesEnd::new("w:t")))?;
            }
        }
        emit(w, Event::End(BytesEnd::new("w:r")))?;
    }

    emit(w, Event::End(BytesEnd::new("w:p")))
}

/// Normalise line endings and keep only characters XML 1.0 allows.
fn xml_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .chars()
        .filter_map(|c| match c {
            '\r' | '\u{000C}' => Some('\n'),
            '\t' | '\n' => Some(c),
            c if is_xml_char(c) => Some(c),
            _ => None,
        })
        .collect()
}

fn is_xml_char(c: char) -> bool {
    matches!(c, '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}')
}

// ── DOCX reading ─────────────────────────────────────────────────────────

/// Reopen a `.docx` and return its sections in document order.
///
/// A `Heading1` paragraph starts a new section; following paragraphs form
/// its body, joined by newlines. Paragraphs before the first heading are
/// collected under an empty heading.
pub fn read_sections(path: &Path) -> Result<Vec<Section>, HandscribeError> {
    let read_err = |detail: String| HandscribeError::DocumentReadFailed {
        path: path.to_path_buf(),
        detail,
    };

    let file = std::fs::File::open(path).map_err(|e| read_err(e.to_string()))?;
    let mut archive =
        ZipArchive::new(std::io::BufReader::new(file)).map_err(|e| read_err(e.to_string()))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| read_err(format!("Cannot find word/document.xml: {}", e)))?
        .read_to_string(&mut xml)
        .map_err(|e| read_err(e.to_string()))?;

    parse_sections(&xml).map_err(read_err)
}

fn parse_sections(xml: &str) -> Result<Vec<Section>, String> {
    let mut reader = Reader::from_str(xml);

    let mut sections: Vec<Section> = Vec::new();
    let mut paragraph = String::new();
    let mut is_heading = false;
    let mut in_text = false;
    // Body paragraphs seen so far for the current section.
    let mut body_paragraphs = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:p" => {
                    paragraph.clear();
                    is_heading = false;
                }
                b"w:t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:br" => paragraph.push('\n'),
                b"w:tab" => paragraph.push('\t'),
                b"w:pStyle" => {
                    if let Ok(Some(attr)) = e.try_get_attribute("w:val") {
                        let val = attr.unescape_value().map_err(|e| e.to_string())?;
                        is_heading = val == HEADING_STYLE;
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text {
                    let text = e.unescape().map_err(|e| e.to_string())?;
                    paragraph.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    let text = std::mem::take(&mut paragraph);
                    if is_heading {
                        sections.push(Section::new(text, String::new()));
                        body_paragraphs = 0;
                    } else {
                        if sections.is_empty() {
                            sections.push(Section::new(String::new(), String::new()));
                        }
                        if let Some(current) = sections.last_mut() {
                            if body_paragraphs > 0 {
                                current.body.push('\n');
                            }
                            current.body.push_str(&text);
                        }
                        body_paragraphs += 1;
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "Error at position {}: {:?}",
                    reader.buffer_position(),
                    e
                ))
            }
            _ => {}
        }
    }

    Ok(sections)
}
