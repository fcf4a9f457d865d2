use super::{ParseError, TextRecognizer, TextUnit, UnitOrigin};
use lopdf::{Dictionary, Document, Object, ObjectId};

/// Upper bound on `Parent` hops when resolving inherited page resources.
const MAX_PARENT_DEPTH: usize = 32;

fn load(bytes: &[u8], source_name: &str) -> Result<Document, ParseError> {
    let document = Document::load_mem(bytes).map_err(|error| ParseError::Pdf {
        source_name: source_name.to_string(),
        error,
    })?;
    if document.is_encrypted() {
        return Err(ParseError::Encrypted(source_name.to_string()));
    }
    Ok(document)
}

pub(super) fn page_count(bytes: &[u8], source_name: &str) -> Result<u32, ParseError> {
    let document = load(bytes, source_name)?;
    Ok(document.get_pages().len() as u32)
}

pub(super) fn extract_units(
    bytes: &[u8],
    source_name: &str,
    recognizer: Option<&dyn TextRecognizer>,
) -> Result<Vec<TextUnit>, ParseError> {
    let document = load(bytes, source_name)?;
    let pages = document.get_pages();
    let mut units = Vec::with_capacity(pages.len());

    for (page_number, page_id) in pages {
        let text = document
            .extract_text(&[page_number])
            .map_err(|error| ParseError::Pdf {
                source_name: source_name.to_string(),
                error,
            })?;
        units.push(TextUnit {
            text,
            page: page_number,
            source: source_name.to_string(),
            origin: UnitOrigin::Text,
        });

        if let Some(recognizer) = recognizer {
            for image in page_jpeg_images(&document, page_id) {
                match recognizer.recognize(&image) {
                    Ok(text) if !text.trim().is_empty() => units.push(TextUnit {
                        text,
                        page: page_number,
                        source: source_name.to_string(),
                        origin: UnitOrigin::Ocr,
                    }),
                    Ok(_) => {}
                    Err(error) => tracing::warn!(
                        source = source_name,
                        page = page_number,
                        error = %error,
                        "OCR failed for embedded image; skipping"
                    ),
                }
            }
        }
    }

    Ok(units)
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object.as_reference() {
        Ok(id) => document.get_object(id).ok(),
        Err(_) => Some(object),
    }
}

fn resolve_dict<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    resolve(document, object).and_then(|object| object.as_dict().ok())
}

/// Find the page's resource dictionary, following `Parent` links for inherited resources.
fn page_resources(document: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = document.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_PARENT_DEPTH {
        if let Ok(resources) = node.get(b"Resources") {
            return resolve_dict(document, resources);
        }
        node = resolve_dict(document, node.get(b"Parent").ok()?)?;
    }
    None
}

fn has_dct_filter(document: &Document, dict: &Dictionary) -> bool {
    let Some(filter) = dict.get(b"Filter").ok().and_then(|f| resolve(document, f)) else {
        return false;
    };
    match filter {
        Object::Name(name) => name.as_slice() == b"DCTDecode",
        Object::Array(filters) => filters
            .iter()
            .any(|f| matches!(f, Object::Name(name) if name.as_slice() == b"DCTDecode")),
        _ => false,
    }
}

/// JPEG image XObjects referenced by the page. Their stream bytes are complete JPEG files.
fn page_jpeg_images(document: &Document, page_id: ObjectId) -> Vec<Vec<u8>> {
    let Some(xobjects) = page_resources(document, page_id)
        .and_then(|resources| resources.get(b"XObject").ok())
        .and_then(|xobjects| resolve_dict(document, xobjects))
    else {
        return Vec::new();
    };

    xobjects
        .iter()
        .filter_map(|(_, object)| resolve(document, object))
        .filter_map(|object| object.as_stream().ok())
        .filter(|stream| {
            stream
                .dict
                .get(b"Subtype")
                .and_then(Object::as_name)
                .map(|subtype| subtype == b"Image")
                .unwrap_or(false)
        })
        .filter(|stream| has_dct_filter(document, &stream.dict))
        .map(|stream| stream.content.clone())
        .collect()
}
