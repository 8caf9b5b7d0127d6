//! Content normalization for heterogeneous sources.
//!
//! Every supported source kind — PDF, DOCX, TXT files, scraped URLs, and raw
//! text — is reduced to plain-UTF-8 [`NormalizedDocument`] records. PDFs
//! yield one record per page (page number kept for attribution); everything
//! else yields exactly one record.
//!
//! Failures here are per-source: callers running a batch collect them and
//! keep going.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use scraper::{Html, Selector};

use crate::error::{RagError, Result};
use crate::models::NormalizedDocument;

/// Max decompressed bytes read from a single DOCX ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// File extensions accepted by [`normalize_file`].
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["pdf", "docx", "doc", "txt"];

/// Normalize an uploaded or on-disk file by extension.
pub fn normalize_file(filename: &str, bytes: &[u8]) -> Result<Vec<NormalizedDocument>> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => normalize_pdf(filename, bytes),
        "docx" | "doc" => normalize_docx(filename, bytes).map(|d| vec![d]),
        "txt" => Ok(vec![NormalizedDocument {
            text: String::from_utf8_lossy(bytes).into_owned(),
            source_uri: filename.to_string(),
            page_number: None,
        }]),
        "" => Err(RagError::UnsupportedFormat(format!(
            "{filename}: missing file extension"
        ))),
        other => Err(RagError::UnsupportedFormat(format!(
            "{filename}: .{other} (allowed: pdf, docx, doc, txt)"
        ))),
    }
}

/// Wrap caller-supplied raw text, preserving the caller's source label.
pub fn normalize_text(text: &str, source: Option<&str>) -> NormalizedDocument {
    NormalizedDocument {
        text: text.to_string(),
        source_uri: source.unwrap_or("manual_input").to_string(),
        page_number: None,
    }
}

// ============ PDF ============

fn normalize_pdf(filename: &str, bytes: &[u8]) -> Result<Vec<NormalizedDocument>> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| RagError::Parse(format!("{filename}: {e}")))?;

    let docs: Vec<NormalizedDocument> = pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| NormalizedDocument {
            text,
            source_uri: filename.to_string(),
            page_number: Some(i as u32 + 1),
        })
        .collect();

    if docs.is_empty() {
        return Err(RagError::Parse(format!(
            "{filename}: no extractable text"
        )));
    }
    Ok(docs)
}

// ============ DOCX ============

/// Pull the `<w:t>` text runs out of `word/document.xml`.
fn normalize_docx(filename: &str, bytes: &[u8]) -> Result<NormalizedDocument> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| RagError::Parse(format!("{filename}: {e}")))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| RagError::Parse(format!("{filename}: word/document.xml not found")))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| RagError::Parse(format!("{filename}: {e}")))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(RagError::Parse(format!(
                "{filename}: word/document.xml exceeds size limit"
            )));
        }
    }

    let text = extract_w_t_elements(&doc_xml)
        .map_err(|e| RagError::Parse(format!("{filename}: {e}")))?;

    Ok(NormalizedDocument {
        text,
        source_uri: filename.to_string(),
        page_number: None,
    })
}

fn extract_w_t_elements(xml: &[u8]) -> std::result::Result<String, quick_xml::Error> {
    let mut out = String::new();
    // No trim_text: leading spaces inside <w:t> runs are significant
    // (`<w:t xml:space="preserve"> world</w:t>`).
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            quick_xml::events::Event::Start(e) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            quick_xml::events::Event::Text(te) if in_t => {
                out.push_str(te.unescape()?.as_ref());
            }
            quick_xml::events::Event::End(e) => {
                match e.local_name().as_ref() {
                    b"t" => in_t = false,
                    // Paragraph boundary: keep it so the chunker can split there.
                    b"p" => out.push('\n'),
                    _ => {}
                }
            }
            quick_xml::events::Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

// ============ Scraped URLs ============

/// Fetch a page and strip markup and boilerplate, keeping the main text.
pub async fn normalize_url(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<NormalizedDocument> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| RagError::Fetch(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(RagError::Fetch(format!("{url}: HTTP {status}")));
    }

    let html = response
        .text()
        .await
        .map_err(|e| RagError::Fetch(format!("{url}: {e}")))?;

    let (body, title) = html_to_text(&html);

    if body.trim().is_empty() {
        return Err(RagError::Parse(format!("{url}: no textual content")));
    }

    // The title is often the only place a page names its own topic, so it
    // leads the text and gets chunked (and retrieved) along with the body.
    let text = match title {
        Some(t) => format!("{t}\n\n{body}"),
        None => body,
    };

    Ok(NormalizedDocument {
        text,
        source_uri: url.to_string(),
        page_number: None,
    })
}

/// Strip scripts, styles, and navigation chrome; return the remaining text
/// (one line per block) and the page title.
pub fn html_to_text(html: &str) -> (String, Option<String>) {
    let document = Html::parse_document(html);

    let title_sel = Selector::parse("title").expect("static selector");
    let title = document
        .select(&title_sel)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    // Prefer <main>/<article> when the page marks its content region,
    // falling back to <body>.
    let content_sel = Selector::parse("main, article").expect("static selector");
    let body_sel = Selector::parse("body").expect("static selector");
    let boilerplate_sel =
        Selector::parse("script, style, nav, header, footer, noscript, aside")
            .expect("static selector");

    let root = document
        .select(&content_sel)
        .next()
        .or_else(|| document.select(&body_sel).next());

    let Some(root) = root else {
        return (String::new(), title);
    };

    // Collect text nodes that are not inside boilerplate elements.
    let boilerplate_ids: std::collections::HashSet<_> = root
        .select(&boilerplate_sel)
        .flat_map(|el| el.descendants().map(|n| n.id()).chain([el.id()]))
        .collect();

    let mut lines: Vec<String> = Vec::new();
    for node in root.descendants() {
        if boilerplate_ids.contains(&node.id()) {
            continue;
        }
        if let Some(text) = node.value().as_text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
    }

    (lines.join("\n"), title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txt_passthrough() {
        let docs = normalize_file("notes.txt", b"plain text content").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "plain text content");
        assert_eq!(docs[0].source_uri, "notes.txt");
        assert!(docs[0].page_number.is_none());
    }

    #[test]
    fn unknown_extension_rejected() {
        let err = normalize_file("image.png", b"...").unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
    }

    #[test]
    fn missing_extension_rejected() {
        let err = normalize_file("README", b"...").unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
    }

    #[test]
    fn corrupt_pdf_is_parse_error() {
        let err = normalize_file("broken.pdf", b"not a pdf").unwrap_err();
        assert!(matches!(err, RagError::Parse(_)));
    }

    #[test]
    fn docx_malformed_entity_is_error() {
        let xml = br#"<?xml version="1.0"?>
            <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
              <w:body><w:p><w:r><w:t>bad &bogus; reference</w:t></w:r></w:p></w:body>
            </w:document>"#;
        assert!(extract_w_t_elements(xml).is_err());
    }

    #[test]
    fn corrupt_docx_is_parse_error() {
        let err = normalize_file("broken.docx", b"not a zip").unwrap_err();
        assert!(matches!(err, RagError::Parse(_)));
    }

    #[test]
    fn raw_text_default_source() {
        let doc = normalize_text("hello", None);
        assert_eq!(doc.source_uri, "manual_input");
        let doc = normalize_text("hello", Some("geo"));
        assert_eq!(doc.source_uri, "geo");
    }

    #[test]
    fn html_strips_boilerplate() {
        let html = r#"<html><head><title>Test Page</title>
            <script>var x = 1;</script><style>.a{color:red}</style></head>
            <body><nav>Home | About</nav>
            <main><h1>Heading</h1><p>Main content here.</p></main>
            <footer>Copyright</footer></body></html>"#;
        let (text, title) = html_to_text(html);
        assert_eq!(title.as_deref(), Some("Test Page"));
        assert!(text.contains("Heading"));
        assert!(text.contains("Main content here."));
        assert!(!text.contains("var x"));
        assert!(!text.contains("color:red"));
        assert!(!text.contains("Copyright"));
    }

    #[test]
    fn html_without_main_falls_back_to_body() {
        let html = "<html><body><p>Just a paragraph.</p><script>nope()</script></body></html>";
        let (text, _) = html_to_text(html);
        assert!(text.contains("Just a paragraph."));
        assert!(!text.contains("nope"));
    }

    #[test]
    fn docx_text_extracted_from_w_t_runs() {
        // Minimal OOXML body, enough for the <w:t> walk.
        let xml = br#"<?xml version="1.0"?>
            <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
              <w:body>
                <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t> world</w:t></w:r></w:p>
                <w:p><w:r><w:t>Second paragraph</w:t></w:r></w:p>
              </w:body>
            </w:document>"#;
        let text = extract_w_t_elements(xml).unwrap();
        assert!(text.contains("Hello world"));
        assert!(text.contains("Second paragraph"));
        // Paragraphs separated by a newline.
        assert!(text.contains("world\n") || text.contains("world \n"));
    }
}
