//! Core data types used throughout Lex Harness.
//!
//! The data lifecycle is:
//!
//! ```text
//! source (HTML / text / file / PDF) → document text → chunk() → ChunkRecord
//!                                                          ↓
//!                                                   embed() → upsert()
//!                                                          ↓
//!                                                  search() → SearchHit
//! ```
//!
//! Metadata is a flat map of scalars only (string / int / bool). This keeps
//! the vector-store filter language to equality predicates over named fields
//! and avoids nested-structure filter ambiguity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How a document entered the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    CorpusNorm,
    PlainText,
    MarkdownFile,
    PdfDerived,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::CorpusNorm => "corpus-norm",
            SourceKind::PlainText => "plain-text",
            SourceKind::MarkdownFile => "markdown-file",
            SourceKind::PdfDerived => "pdf-derived",
        }
    }
}

/// A scalar metadata value. The vector-store filter language only supports
/// equality over these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Str(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Str(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

/// Per-chunk metadata. Tenancy, lineage, legal-corpus and user-document
/// fields; unset options are simply absent from the stored row.
///
/// Partition rule: `tenant_id` (private corpus) and `jurisdiction` (shared
/// corpus) never coexist on the same chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    // Tenancy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,

    // Lineage
    pub document_id: String,
    pub chunk_id: String,
    pub source_name: String,
    pub source_kind: SourceKind,
    pub ingested_at: i64,
    pub embedding_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,

    // Legal corpus
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub law_abbrev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub norm_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub law_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub norm_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Number of paragraphs in the norm; set on norm-level documents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paragraph_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paragraph_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_norm_id: Option<String>,

    // User documents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags_csv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Caller-supplied shallow string metadata, carried opaque.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Default for SourceKind {
    fn default() -> Self {
        SourceKind::PlainText
    }
}

impl ChunkMetadata {
    /// Look up a filterable field by name.
    ///
    /// `extra` entries are deliberately not filterable; the filter language
    /// is restricted to the declared scalar schema.
    pub fn field(&self, name: &str) -> Option<MetaValue> {
        match name {
            "tenant_id" => self.tenant_id.clone().map(MetaValue::Str),
            "case_id" => self.case_id.clone().map(MetaValue::Str),
            "document_id" => Some(MetaValue::Str(self.document_id.clone())),
            "chunk_id" => Some(MetaValue::Str(self.chunk_id.clone())),
            "source_name" => Some(MetaValue::Str(self.source_name.clone())),
            "source_kind" => Some(MetaValue::Str(self.source_kind.as_str().to_string())),
            "ingested_at" => Some(MetaValue::Int(self.ingested_at)),
            "embedding_model" => Some(MetaValue::Str(self.embedding_model.clone())),
            "jurisdiction" => self.jurisdiction.clone().map(MetaValue::Str),
            "law_abbrev" => self.law_abbrev.clone().map(MetaValue::Str),
            "norm_id" => self.norm_id.clone().map(MetaValue::Str),
            "law_title" => self.law_title.clone().map(MetaValue::Str),
            "norm_title" => self.norm_title.clone().map(MetaValue::Str),
            "level" => self.level.clone().map(MetaValue::Str),
            "paragraph_count" => self.paragraph_count.map(MetaValue::Int),
            "paragraph_index" => self.paragraph_index.map(MetaValue::Int),
            "parent_norm_id" => self.parent_norm_id.clone().map(MetaValue::Str),
            "tags_csv" => self.tags_csv.clone().map(MetaValue::Str),
            "tag" => self.tag.clone().map(MetaValue::Str),
            _ => None,
        }
    }

    /// Check the shared/private partition rule.
    pub fn partition_is_valid(&self) -> bool {
        !(self.tenant_id.is_some() && self.jurisdiction.is_some())
    }

    /// The safe subset returned with search hits. Never includes `extra`
    /// wholesale; only declared fields the caller is entitled to see.
    pub fn safe_subset(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        let mut put = |key: &str, value: Option<serde_json::Value>| {
            if let Some(v) = value {
                out.insert(key.to_string(), v);
            }
        };
        put("tenant_id", self.tenant_id.clone().map(Into::into));
        put("case_id", self.case_id.clone().map(Into::into));
        put(
            "document_id",
            Some(serde_json::Value::String(self.document_id.clone())),
        );
        put(
            "source_name",
            Some(serde_json::Value::String(self.source_name.clone())),
        );
        put(
            "source_kind",
            Some(serde_json::Value::String(self.source_kind.as_str().into())),
        );
        put("ingested_at", Some(self.ingested_at.into()));
        put("jurisdiction", self.jurisdiction.clone().map(Into::into));
        put("law_abbrev", self.law_abbrev.clone().map(Into::into));
        put("norm_id", self.norm_id.clone().map(Into::into));
        put("law_title", self.law_title.clone().map(Into::into));
        put("norm_title", self.norm_title.clone().map(Into::into));
        put("level", self.level.clone().map(Into::into));
        put("paragraph_count", self.paragraph_count.map(Into::into));
        put("paragraph_index", self.paragraph_index.map(Into::into));
        put("parent_norm_id", self.parent_norm_id.clone().map(Into::into));
        put("tags_csv", self.tags_csv.clone().map(Into::into));
        put("tag", self.tag.clone().map(Into::into));
        serde_json::Value::Object(out)
    }
}

/// A chunk ready for (or read back from) the vector store.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// `{document_id}:{index}` — unique within a collection.
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A stored chunk without its vector, as returned by exact lookups.
#[derive(Debug, Clone, Serialize)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub metadata: serde_json::Value,
}

/// One semantic search hit, ranked by descending similarity.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    /// Cosine similarity in `[0, 1]`, 1 is identical.
    pub similarity: f32,
    pub content: String,
    pub metadata: serde_json::Value,
}

/// Per-document ingestion summary. Error messages are bounded and never
/// contain document content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_id: Option<String>,
    pub source_name: String,
    pub chunks_created: usize,
    pub chunks_added: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestTotals {
    pub documents_received: usize,
    pub documents_ingested: usize,
    pub chunks_created: usize,
    pub chunks_added: usize,
    pub errors: usize,
}

/// Result of a user-document ingestion batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub status: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    pub totals: IngestTotals,
    pub documents: Vec<DocumentSummary>,
}

impl IngestReport {
    pub fn status_from_totals(totals: &IngestTotals) -> &'static str {
        if totals.documents_ingested > 0 {
            "complete"
        } else {
            "failed"
        }
    }
}

/// One entry of an offline catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub document_id: String,
    pub canonical_url: String,
    pub document_type_prefix: String,
}

/// Derive a stable document ID from the source name and content.
///
/// Used only when the caller does not provide a `document_id`. Never derived
/// from timestamps; ingestion must be replayable.
pub fn derive_document_id(source_name: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_name.as_bytes());
    hasher.update(b"\n");
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("doc_{}", &digest[..16])
}

/// Normalize tags to a deterministic CSV: trimmed, lowercased, unique,
/// sorted. Returns `None` when nothing remains.
pub fn normalize_tags_csv(tags: &[String]) -> Option<String> {
    let mut normalized: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized.join(","))
    }
}

/// The single-tag equality escape: populated only when exactly one
/// normalized tag was supplied.
pub fn single_tag(tags: &[String]) -> Option<String> {
    let csv = normalize_tags_csv(tags)?;
    if csv.contains(',') {
        None
    } else {
        Some(csv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_document_id_deterministic() {
        let a = derive_document_id("notes.txt", "Die Kündigungsfrist beträgt vier Wochen.");
        let b = derive_document_id("notes.txt", "Die Kündigungsfrist beträgt vier Wochen.");
        assert_eq!(a, b);
        assert!(a.starts_with("doc_"));
        assert_eq!(a.len(), "doc_".len() + 16);
    }

    #[test]
    fn test_derive_document_id_sensitive_to_name_and_text() {
        let a = derive_document_id("a.txt", "text");
        let b = derive_document_id("b.txt", "text");
        let c = derive_document_id("a.txt", "other");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_normalize_tags_csv() {
        let tags = vec![" Medical ".to_string(), "urgent".into(), "urgent".into()];
        assert_eq!(normalize_tags_csv(&tags).as_deref(), Some("medical,urgent"));
        assert_eq!(normalize_tags_csv(&[]), None);
        assert_eq!(normalize_tags_csv(&["  ".to_string()]), None);
    }

    #[test]
    fn test_single_tag_only_for_one() {
        assert_eq!(
            single_tag(&["Mietrecht".to_string()]).as_deref(),
            Some("mietrecht")
        );
        assert_eq!(single_tag(&["a".to_string(), "b".to_string()]), None);
        // Duplicates of the same token still count as one tag.
        assert_eq!(
            single_tag(&["a".to_string(), "A ".to_string()]).as_deref(),
            Some("a")
        );
    }

    #[test]
    fn test_partition_rule() {
        let mut meta = ChunkMetadata {
            tenant_id: Some("t1".into()),
            ..ChunkMetadata::default()
        };
        assert!(meta.partition_is_valid());
        meta.jurisdiction = Some("de-federal".into());
        assert!(!meta.partition_is_valid());
    }

    #[test]
    fn test_field_lookup_covers_filterables() {
        let meta = ChunkMetadata {
            tenant_id: Some("t1".into()),
            document_id: "doc_1".into(),
            chunk_id: "doc_1:0".into(),
            source_name: "a.txt".into(),
            ingested_at: 42,
            ..ChunkMetadata::default()
        };
        assert_eq!(meta.field("tenant_id"), Some(MetaValue::Str("t1".into())));
        assert_eq!(meta.field("ingested_at"), Some(MetaValue::Int(42)));
        assert_eq!(meta.field("case_id"), None);
        assert_eq!(meta.field("no_such_field"), None);
    }
}
