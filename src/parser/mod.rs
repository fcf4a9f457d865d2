//! Document parsing: raw upload bytes to ordered, page-attributed text units.
//!
//! The source kind is decided once from the upload key (`.zip` means an archive of PDFs,
//! anything else a single PDF) and each kind is routed through its own extraction path:
//!
//! - Single: one unit per page, pages numbered as in the PDF (1-based).
//! - Archive: every `.pdf` member parsed on its own, in archive order, with page numbers local to
//!   that member. Units carry the member name as their source so `(source, page)` stays
//!   unambiguous across members.
//! - OCR (optional): JPEG images embedded on a page are run through a [`TextRecognizer`] and
//!   recognized text is emitted as an extra unit on the same page.
//!
//! Parsing is synchronous and CPU-bound; async callers should run it on a blocking thread.

mod archive;
mod ocr;
mod pdf;

pub use ocr::{OcrError, TesseractRecognizer, TextRecognizer};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while extracting text from an upload.
#[derive(Debug, Error)]
pub enum ParseError {
    /// PDF structure could not be read.
    #[error("failed to read PDF '{source_name}': {error}")]
    Pdf {
        /// Document or archive member being parsed.
        source_name: String,
        /// Underlying PDF library error.
        #[source]
        error: lopdf::Error,
    },
    /// PDF is encrypted and cannot be read without a password.
    #[error("PDF '{0}' is encrypted")]
    Encrypted(String),
    /// Zip container could not be read.
    #[error("failed to read archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    /// Archive member exceeded the configured size bound.
    #[error("archive member '{name}' exceeds {limit} bytes")]
    MemberTooLarge {
        /// Member name inside the archive.
        name: String,
        /// Configured byte limit.
        limit: u64,
    },
    /// Archive held no PDF members.
    #[error("archive contains no PDF documents")]
    EmptyArchive,
    /// Reading archive member bytes failed.
    #[error("failed to read archive member '{name}': {source}")]
    MemberRead {
        /// Member name inside the archive.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// How an upload is routed through extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A single PDF document.
    Single,
    /// A zip archive of PDF documents.
    Archive,
}

impl SourceKind {
    /// Decide the source kind from an upload key or filename.
    pub fn from_key(key: &str) -> Self {
        if key.to_ascii_lowercase().ends_with(".zip") {
            Self::Archive
        } else {
            Self::Single
        }
    }
}

/// Where a unit's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitOrigin {
    /// Text extracted from the page content stream.
    Text,
    /// Text recognized from an embedded image.
    Ocr,
}

/// One page-attributable fragment of extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextUnit {
    /// Extracted text.
    pub text: String,
    /// 1-based page number within `source`.
    pub page: u32,
    /// Document the page belongs to (the filename, or the archive member name).
    pub source: String,
    /// Extraction path that produced the text.
    pub origin: UnitOrigin,
}

/// Parser settings shared by every ingestion job.
#[derive(Clone)]
pub struct DocumentParser {
    recognizer: Option<Arc<dyn TextRecognizer>>,
    max_member_bytes: u64,
}

impl DocumentParser {
    /// Build a parser bounding archive members to `max_member_bytes`, without OCR.
    pub fn new(max_member_bytes: u64) -> Self {
        Self {
            recognizer: None,
            max_member_bytes,
        }
    }

    /// Enable OCR of embedded page images through `recognizer`.
    pub fn with_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Build a parser from configuration, enabling Tesseract OCR when requested and installed.
    pub fn from_config(config: &crate::config::Config) -> Self {
        let parser = Self::new(config.max_archive_member_bytes);
        if !config.ocr_enabled {
            return parser;
        }
        if TesseractRecognizer::is_available() {
            tracing::info!(language = %config.ocr_language, "OCR enabled for embedded page images");
            parser.with_recognizer(Arc::new(TesseractRecognizer::new(
                config.ocr_language.clone(),
            )))
        } else {
            tracing::warn!("OCR_ENABLED is set but tesseract was not found; OCR disabled");
            parser
        }
    }

    /// Extract ordered text units from `bytes`.
    ///
    /// `source_name` labels units of a single document; archive members are labelled with
    /// their own names.
    pub fn parse(
        &self,
        bytes: &[u8],
        kind: SourceKind,
        source_name: &str,
    ) -> Result<Vec<TextUnit>, ParseError> {
        let units = match kind {
            SourceKind::Single => pdf::extract_units(bytes, source_name, self.recognizer.as_deref())?,
            SourceKind::Archive => {
                let mut units = Vec::new();
                for member in archive::pdf_members(bytes, self.max_member_bytes)? {
                    units.extend(pdf::extract_units(
                        &member.bytes,
                        &member.name,
                        self.recognizer.as_deref(),
                    )?);
                }
                units
            }
        };
        tracing::debug!(source = source_name, kind = ?kind, units = units.len(), "Parsed document");
        Ok(units)
    }

    /// Count pages without extracting text; archives report the sum over their PDF members.
    pub fn count_pages(
        &self,
        bytes: &[u8],
        kind: SourceKind,
        source_name: &str,
    ) -> Result<u32, ParseError> {
        match kind {
            SourceKind::Single => pdf::page_count(bytes, source_name),
            SourceKind::Archive => archive::pdf_members(bytes, self.max_member_bytes)?
                .iter()
                .try_fold(0u32, |total, member| {
                    Ok(total + pdf::page_count(&member.bytes, &member.name)?)
                }),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Builders for small PDFs and archives used across unit tests.

    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, dictionary};
    use std::io::Write;

    /// Build a PDF with one page per entry in `pages`, each showing that text.
    pub(crate) fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().expect("encode content"),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save pdf");
        bytes
    }

    /// Zip the given `(name, bytes)` members in order.
    pub(crate) fn zip_archive(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, bytes) in members {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .expect("start member");
            writer.write_all(bytes).expect("write member");
        }
        writer.finish().expect("finish zip").into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{pdf_with_pages, zip_archive};
    use super::*;

    struct FixedRecognizer;

    impl TextRecognizer for FixedRecognizer {
        fn recognize(&self, _image: &[u8]) -> Result<String, OcrError> {
            Ok("scanned".into())
        }
    }

    #[test]
    fn source_kind_is_decided_by_extension() {
        assert_eq!(SourceKind::from_key("alice/bundle.ZIP"), SourceKind::Archive);
        assert_eq!(SourceKind::from_key("alice/report.pdf"), SourceKind::Single);
        assert_eq!(SourceKind::from_key("alice/notes"), SourceKind::Single);
    }

    #[test]
    fn single_pdf_yields_one_unit_per_page_in_order() {
        let bytes = pdf_with_pages(&["Intro page", "Revenue was $5M in 2023", "Outlook"]);
        let units = DocumentParser::new(1 << 20)
            .parse(&bytes, SourceKind::Single, "report.pdf")
            .expect("parse");

        assert_eq!(units.len(), 3);
        let pages: Vec<u32> = units.iter().map(|unit| unit.page).collect();
        assert_eq!(pages, vec![1, 2, 3]);
        assert!(units[1].text.contains("Revenue was $5M in 2023"));
        assert!(units.iter().all(|unit| unit.source == "report.pdf"));
        assert!(units.iter().all(|unit| unit.origin == UnitOrigin::Text));
    }

    #[test]
    fn archive_members_keep_local_page_numbers() {
        let archive = zip_archive(&[
            ("a.pdf", pdf_with_pages(&["a1", "a2", "a3"])),
            ("readme.txt", b"not a pdf".to_vec()),
            ("b.pdf", pdf_with_pages(&["b1", "b2", "b3", "b4", "b5"])),
        ]);
        let parser = DocumentParser::new(1 << 20);
        let units = parser
            .parse(&archive, SourceKind::Archive, "bundle.zip")
            .expect("parse");

        assert_eq!(units.len(), 8);
        let labels: Vec<(String, u32)> = units
            .iter()
            .map(|unit| (unit.source.clone(), unit.page))
            .collect();
        assert_eq!(labels[0], ("a.pdf".to_string(), 1));
        assert_eq!(labels[2], ("a.pdf".to_string(), 3));
        assert_eq!(labels[3], ("b.pdf".to_string(), 1));
        assert_eq!(labels[7], ("b.pdf".to_string(), 5));
        assert_eq!(
            parser
                .count_pages(&archive, SourceKind::Archive, "bundle.zip")
                .expect("count"),
            8
        );
    }

    #[test]
    fn corrupt_input_is_a_parse_error() {
        let parser = DocumentParser::new(1 << 20);
        assert!(matches!(
            parser.parse(b"definitely not a pdf", SourceKind::Single, "x.pdf"),
            Err(ParseError::Pdf { .. })
        ));
        assert!(matches!(
            parser.parse(b"not a zip either", SourceKind::Archive, "x.zip"),
            Err(ParseError::Archive(_))
        ));
    }

    #[test]
    fn archive_without_pdfs_is_rejected() {
        let archive = zip_archive(&[("notes.txt", b"hello".to_vec())]);
        let error = DocumentParser::new(1 << 20)
            .parse(&archive, SourceKind::Archive, "bundle.zip")
            .unwrap_err();
        assert!(matches!(error, ParseError::EmptyArchive));
    }

    #[test]
    fn oversized_members_are_rejected() {
        let archive = zip_archive(&[("big.pdf", pdf_with_pages(&["page"]))]);
        let error = DocumentParser::new(16)
            .parse(&archive, SourceKind::Archive, "bundle.zip")
            .unwrap_err();
        assert!(matches!(error, ParseError::MemberTooLarge { limit: 16, .. }));
    }

    #[test]
    fn recognizer_is_not_consulted_without_images() {
        let bytes = pdf_with_pages(&["plain text only"]);
        let units = DocumentParser::new(1 << 20)
            .with_recognizer(Arc::new(FixedRecognizer))
            .parse(&bytes, SourceKind::Single, "plain.pdf")
            .expect("parse");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].origin, UnitOrigin::Text);
    }
}
