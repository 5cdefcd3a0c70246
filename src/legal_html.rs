//! Parser for single-norm legal HTML pages.
//!
//! German federal law pages carry one norm (`§ 433`, `Art 1`) per page:
//!
//! - law title in the first `<h1>`
//! - norm identifier in `<span class="jnenbez">`
//! - optional norm title in `<span class="jnentitel">`
//! - one `<div class="jurAbsatz">` per structural paragraph (Absatz)
//!
//! The parser produces one norm document (full text) plus one document per
//! paragraph when the norm has more than one. Pages are served declared as
//! ISO-8859-1; decoding never fails the document.

use scraper::{Html, Selector};

use crate::error::LexError;
use crate::models::{ChunkMetadata, SourceKind};

/// A parsed legal norm.
#[derive(Debug, Clone, PartialEq)]
pub struct LegalNorm {
    pub law_title: String,
    /// e.g. `§ 433`, `Art 1`
    pub norm_id: String,
    /// e.g. `Vertragstypische Pflichten beim Kaufvertrag`
    pub norm_title: String,
    /// Each Absatz in document order.
    pub paragraphs: Vec<String>,
    pub full_text: String,
}

/// One corpus document derived from a norm, ready for embedding.
#[derive(Debug, Clone)]
pub struct CorpusDocument {
    pub document_id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Decode page bytes declared as ISO-8859-1.
///
/// Every byte maps to a code point in Latin-1, so there is no failure
/// path; a document is never failed for encoding reasons.
pub fn decode_legacy_html(bytes: &[u8]) -> String {
    encoding_rs::mem::decode_latin1(bytes).into_owned()
}

/// Parse a single-norm HTML page into structured data.
///
/// Returns `InvalidInput` only when the page carries no norm content at all
/// (neither an identifier nor any paragraph).
pub fn parse_norm_html(html: &str) -> Result<LegalNorm, LexError> {
    let document = Html::parse_document(html);

    let h1_selector = Selector::parse("h1").map_err(selector_error)?;
    let norm_id_selector = Selector::parse("span.jnenbez").map_err(selector_error)?;
    let norm_title_selector = Selector::parse("span.jnentitel").map_err(selector_error)?;
    let paragraph_selector = Selector::parse("div.jurAbsatz").map_err(selector_error)?;

    let law_title = document
        .select(&h1_selector)
        .next()
        .map(element_text)
        .unwrap_or_default();

    let norm_id = document
        .select(&norm_id_selector)
        .next()
        .map(element_text)
        .unwrap_or_default();

    let norm_title = document
        .select(&norm_title_selector)
        .next()
        .map(element_text)
        .unwrap_or_default();

    let paragraphs: Vec<String> = document
        .select(&paragraph_selector)
        .map(element_text)
        .filter(|p| !p.is_empty())
        .collect();

    if norm_id.is_empty() && paragraphs.is_empty() {
        return Err(LexError::invalid_input("page carries no norm content"));
    }

    let full_text = paragraphs.join("\n\n");

    Ok(LegalNorm {
        law_title,
        norm_id,
        norm_title,
        paragraphs,
        full_text,
    })
}

/// Normalize a norm identifier for use in document IDs.
///
/// `§ 433` → `para_433`, `Art 1` → `art_1`.
pub fn normalize_norm_id(norm_id: &str) -> String {
    norm_id
        .replace('§', "para")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Convert a parsed norm into corpus documents.
///
/// Always one norm-level document; paragraph-level documents only when the
/// norm has more than one paragraph. Document IDs are deterministic:
/// `{law_abbrev_lower}_{normalized_norm_id}` and `..._abs_{i}` (1-based).
pub fn norm_documents(
    norm: &LegalNorm,
    law_abbrev: &str,
    jurisdiction: &str,
    source_url: Option<&str>,
    ingested_at: i64,
    embedding_model: &str,
) -> Vec<CorpusDocument> {
    let norm_doc_id = format!(
        "{}_{}",
        law_abbrev.to_lowercase(),
        normalize_norm_id(&norm.norm_id)
    );

    let base = ChunkMetadata {
        source_name: format!("{} {}", law_abbrev, norm.norm_id).trim().to_string(),
        source_kind: SourceKind::CorpusNorm,
        ingested_at,
        embedding_model: embedding_model.to_string(),
        source_url: source_url.map(|u| u.to_string()),
        jurisdiction: Some(jurisdiction.to_string()),
        law_abbrev: Some(law_abbrev.to_string()),
        norm_id: Some(norm.norm_id.clone()),
        law_title: some_nonempty(&norm.law_title),
        norm_title: some_nonempty(&norm.norm_title),
        ..ChunkMetadata::default()
    };

    let mut documents = Vec::new();

    documents.push(CorpusDocument {
        document_id: norm_doc_id.clone(),
        content: norm.full_text.clone(),
        metadata: ChunkMetadata {
            document_id: norm_doc_id.clone(),
            level: Some("norm".to_string()),
            paragraph_count: Some(norm.paragraphs.len() as i64),
            paragraph_index: None,
            ..base.clone()
        },
    });

    if norm.paragraphs.len() > 1 {
        for (index, paragraph) in norm.paragraphs.iter().enumerate() {
            let paragraph_number = (index + 1) as i64;
            let paragraph_doc_id = format!("{}_abs_{}", norm_doc_id, paragraph_number);
            documents.push(CorpusDocument {
                document_id: paragraph_doc_id.clone(),
                content: paragraph.clone(),
                metadata: ChunkMetadata {
                    document_id: paragraph_doc_id,
                    level: Some("paragraph".to_string()),
                    paragraph_index: Some(paragraph_number),
                    parent_norm_id: Some(norm_doc_id.clone()),
                    ..base.clone()
                },
            });
        }
    }

    documents
}

fn element_text(element: scraper::ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn some_nonempty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn selector_error<E: std::fmt::Debug>(e: E) -> LexError {
    LexError::internal(format!("invalid CSS selector: {:?}", e))
}
