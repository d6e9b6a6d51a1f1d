//! Content extraction from downloaded documents.
//!
//! Office Open XML files (`docx`, `xlsx`, `pptx` and their macro-enabled
//! variants) are zip archives: embedded objects live under
//! `<part>/embeddings/`, text lives in the XML parts, and explicit
//! hyperlinks are relationship targets marked `TargetMode="External"`.
//! Every other extension is read as plain text.
//!
//! At most `max_bytes` of content is read per document. Plain text is
//! truncated at the cap; archive parts that do not fit the remaining cap
//! are skipped.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::Path;

use regex::Regex;
use tracing::debug;

use crate::error::InspectError;

const OFFICE_EXTENSIONS: &[&str] = &["docx", "docm", "xlsx", "xlsm", "pptx", "pptm"];
const TEXT_PART_PREFIXES: &[&str] = &["word/", "xl/", "ppt/"];

/// What a document contains, before link resolution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentContent {
    pub embedded: Vec<String>,
    pub text: String,
    pub hyperlinks: Vec<String>,
}

/// Compiled patterns for Office Open XML parsing.
#[derive(Debug)]
pub struct DocumentParser {
    tags: Regex,
    relationship: Regex,
    attribute: Regex,
    max_bytes: u64,
}

impl DocumentParser {
    pub fn new(max_bytes: u64) -> Result<Self, regex::Error> {
        Ok(Self {
            tags: Regex::new(r"<[^>]*>")?,
            relationship: Regex::new(r"<Relationship\b[^>]*>")?,
            attribute: Regex::new(r#"(\w+)="([^"]*)""#)?,
            max_bytes,
        })
    }

    /// Extract content from the file at `path`, dispatching on `extension`.
    pub fn extract(&self, path: &Path, extension: &str) -> Result<DocumentContent, InspectError> {
        let file = File::open(path)?;
        if OFFICE_EXTENSIONS.contains(&extension) {
            return self.extract_office(BufReader::new(file));
        }
        let text = read_capped(BufReader::new(file), self.max_bytes)?;
        if text.len() as u64 >= self.max_bytes {
            debug!("Read only the first {} bytes of {}", self.max_bytes, path.display());
        }
        Ok(DocumentContent {
            text,
            ..Default::default()
        })
    }

    fn extract_office<R: Read + Seek>(&self, reader: R) -> Result<DocumentContent, InspectError> {
        let mut archive = zip::ZipArchive::new(reader)?;
        let mut content = DocumentContent::default();
        let mut remaining = self.max_bytes;

        for i in 0..archive.len() {
            let mut part = archive.by_index(i)?;
            if part.is_dir() {
                continue;
            }
            let name = part.name().to_string();

            if name.contains("/embeddings/") {
                if let Some(file_name) = name.rsplit('/').next().filter(|n| !n.is_empty()) {
                    content.embedded.push(file_name.to_string());
                }
                continue;
            }
            let is_rels = name.ends_with(".rels");
            let is_text = name.ends_with(".xml")
                && TEXT_PART_PREFIXES.iter().any(|p| name.starts_with(p));
            if !is_rels && !is_text {
                continue;
            }
            if part.size() > remaining {
                debug!(
                    "Skipping part {name}: {} bytes over the remaining {remaining}",
                    part.size()
                );
                continue;
            }

            let xml = read_capped(&mut part, remaining)?;
            remaining = remaining.saturating_sub(xml.len() as u64);
            if is_rels {
                self.collect_external_targets(&xml, &mut content.hyperlinks);
            } else {
                let text = self.tags.replace_all(&xml, " ");
                content.text.push_str(&unescape(&text));
                content.text.push('\n');
            }
        }
        Ok(content)
    }

    fn collect_external_targets(&self, xml: &str, out: &mut Vec<String>) {
        for rel in self.relationship.find_iter(xml) {
            let mut target = None;
            let mut external = false;
            for cap in self.attribute.captures_iter(rel.as_str()) {
                match &cap[1] {
                    "Target" => target = Some(unescape(&cap[2])),
                    "TargetMode" => external = &cap[2] == "External",
                    _ => {}
                }
            }
            if let (true, Some(target)) = (external, target) {
                out.push(target);
            }
        }
    }
}

/// Read at most `limit` bytes, replacing invalid UTF-8.
fn read_capped(reader: impl Read, limit: u64) -> io::Result<String> {
    let mut bytes = Vec::new();
    reader.take(limit).read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    /// Minimal `.docx` with one paragraph, one external hyperlink and one
    /// embedded object.
    pub(crate) fn sample_docx(text: &str, hyperlink: &str) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let opts = SimpleFileOptions::default();
            zip.start_file("[Content_Types].xml", opts).unwrap();
            zip.write_all(b"<Types/>").unwrap();
            zip.start_file("word/document.xml", opts).unwrap();
            write!(
                zip,
                "<w:document><w:body><w:p><w:r><w:t>{text}</w:t></w:r></w:p></w:body></w:document>"
            )
            .unwrap();
            zip.start_file("word/_rels/document.xml.rels", opts).unwrap();
            write!(
                zip,
                r#"<Relationships><Relationship Id="rId1" Type="http://x/hyperlink" Target="{hyperlink}" TargetMode="External"/><Relationship Id="rId2" Type="http://x/image" Target="media/image1.png"/></Relationships>"#
            )
            .unwrap();
            zip.start_file("word/embeddings/oleObject1.bin", opts).unwrap();
            zip.write_all(b"\x00\x01").unwrap();
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn office_archive_yields_text_links_and_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.docx");
        std::fs::write(
            &path,
            sample_docx("See Q3 &amp; Q4", "https://www.dropbox.com/s/abc?dl=0&amp;x=1"),
        )
        .unwrap();

        let parser = DocumentParser::new(1 << 20).unwrap();
        let content = parser.extract(&path, "docx").unwrap();
        assert_eq!(content.embedded, vec!["oleObject1.bin".to_string()]);
        assert_eq!(
            content.hyperlinks,
            vec!["https://www.dropbox.com/s/abc?dl=0&x=1".to_string()]
        );
        assert!(content.text.contains("See Q3 & Q4"));
        assert!(!content.text.contains("<w:t>"));
    }

    #[test]
    fn plain_text_is_read_directly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "link: https://www.dropbox.com/s/x").unwrap();
        let content = DocumentParser::new(1 << 20).unwrap().extract(&path, "md").unwrap();
        assert!(content.text.contains("dropbox.com/s/x"));
        assert!(content.embedded.is_empty());
    }

    #[test]
    fn plain_text_stops_at_the_read_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let mut body = "x".repeat(64);
        body.push_str("https://www.dropbox.com/s/late");
        std::fs::write(&path, body).unwrap();

        let content = DocumentParser::new(64).unwrap().extract(&path, "csv").unwrap();
        assert_eq!(content.text.len(), 64);
        assert!(!content.text.contains("dropbox"));
    }

    #[test]
    fn oversized_archive_parts_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.docx");
        let long = "word ".repeat(200);
        std::fs::write(&path, sample_docx(&long, "https://www.dropbox.com/s/abc")).unwrap();

        let content = DocumentParser::new(128).unwrap().extract(&path, "docx").unwrap();
        assert!(content.text.is_empty());
        assert!(content.hyperlinks.is_empty());
        assert_eq!(content.embedded, vec!["oleObject1.bin".to_string()]);
    }

    #[test]
    fn corrupt_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.xlsx");
        std::fs::write(&path, b"not a zip").unwrap();
        assert!(matches!(
            DocumentParser::new(1 << 20).unwrap().extract(&path, "xlsx"),
            Err(InspectError::Archive(_))
        ));
    }
}
