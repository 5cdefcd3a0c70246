//! Ingestion engine.
//!
//! Five flows composed from the same primitives:
//!
//! 1. **Corpus bulk ingest** — walk a local HTML tree, parse each norm page,
//!    embed, upsert into the shared `corpus` collection. Bounded worker
//!    pool; resume by skipping chunks that already exist.
//! 2. **Plain-text ingest** — in-memory documents bound to a tenant.
//! 3. **Markdown-file ingest** — safe-path resolve, lossy UTF-8 read, then
//!    flow 2.
//! 4. **PDF ingest** — safe-path resolve, convert to a Markdown sidecar,
//!    then flow 3; `replace` mode deletes prior chunks for the scope first.
//! 5. **Rendered-document ingest** — one document fetched through the
//!    external renderer on explicit user action.
//!
//! Within a batch, a document's chunks are fully upserted before its
//! summary is emitted. Per-document failures are recorded with a bounded
//! message and never abort the batch. Deadlines are checked cooperatively
//! at document boundaries; documents already upserted stay.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use globset::{Glob, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::chunk::{chunk_text, ChunkingOptions};
use crate::config::{DEFAULT_MAX_CONVERTED_CHARS, DEFAULT_MAX_TEXT_BYTES};
use crate::convert;
use crate::embedding::EmbeddingProvider;
use crate::error::{bounded_message, LexError};
use crate::legal_html;
use crate::models::{
    derive_document_id, normalize_tags_csv, single_tag, ChunkMetadata, ChunkRecord,
    DocumentSummary, IngestReport, IngestTotals, SourceKind,
};
use crate::renderer::RenderedDocument;
use crate::safe_path;
use crate::store::{Filter, VectorStore, CORPUS, USER_DOCUMENTS};

/// Errors kept per corpus ingest report before truncation.
const MAX_REPORT_ERRORS: usize = 20;

/// One in-memory document to ingest.
#[derive(Debug, Clone, Deserialize)]
pub struct TextDocument {
    pub source_name: String,
    pub text: String,
    #[serde(default)]
    pub document_id: Option<String>,
    /// Shallow string metadata carried opaque on every chunk.
    #[serde(default)]
    pub metadata: Option<std::collections::BTreeMap<String, String>>,
}

/// Options shared by the tenant-scoped ingestion flows.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub tenant_id: String,
    pub case_id: Option<String>,
    pub tags: Vec<String>,
    pub chunking: ChunkingOptions,
    /// Delete existing chunks for each `(tenant, case?, document)` scope
    /// before upserting.
    pub replace: bool,
    /// Cooperative deadline, checked at document boundaries.
    pub deadline: Option<Instant>,
}

impl IngestOptions {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            case_id: None,
            tags: Vec::new(),
            chunking: ChunkingOptions::default(),
            replace: false,
            deadline: None,
        }
    }

    fn validate(&self) -> Result<(), LexError> {
        if self.tenant_id.trim().is_empty() {
            return Err(LexError::invalid_input("tenant_id must be non-empty"));
        }
        self.chunking.validate()
    }

    /// Empty-string `case_id` is treated as absent.
    fn effective_case_id(&self) -> Option<&str> {
        self.case_id.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    fn deadline_exceeded(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }
}

/// Ingest in-memory documents into `user_documents` (flow 2).
pub async fn ingest_documents(
    store: &dyn VectorStore,
    provider: &dyn EmbeddingProvider,
    options: &IngestOptions,
    documents: &[TextDocument],
    source_kind: SourceKind,
) -> Result<IngestReport, LexError> {
    options.validate()?;
    if documents.is_empty() {
        return Err(LexError::invalid_input("no documents provided"));
    }

    let tenant_id = options.tenant_id.trim().to_string();
    let case_id = options.effective_case_id().map(|c| c.to_string());
    let tags_csv = normalize_tags_csv(&options.tags);
    let tag = single_tag(&options.tags);
    let ingested_at = chrono::Utc::now().timestamp();

    let mut totals = IngestTotals {
        documents_received: documents.len(),
        ..IngestTotals::default()
    };
    let mut summaries = Vec::with_capacity(documents.len());

    for document in documents {
        if options.deadline_exceeded() {
            summaries.push(DocumentSummary {
                document_id: document.document_id.clone(),
                source_name: document.source_name.clone(),
                chunks_created: 0,
                chunks_added: 0,
                errors: vec!["deadline exceeded before ingestion".to_string()],
            });
            totals.errors += 1;
            continue;
        }

        let summary = ingest_one_document(
            store,
            provider,
            &tenant_id,
            case_id.as_deref(),
            tags_csv.as_deref(),
            tag.as_deref(),
            ingested_at,
            options,
            document,
            source_kind,
        )
        .await;

        totals.chunks_created += summary.chunks_created;
        totals.chunks_added += summary.chunks_added;
        if summary.errors.is_empty() && summary.chunks_added > 0 {
            totals.documents_ingested += 1;
        } else if !summary.errors.is_empty() {
            totals.errors += 1;
        }
        summaries.push(summary);
    }

    Ok(IngestReport {
        status: IngestReport::status_from_totals(&totals).to_string(),
        tenant_id,
        case_id,
        totals,
        documents: summaries,
    })
}

#[allow(clippy::too_many_arguments)]
async fn ingest_one_document(
    store: &dyn VectorStore,
    provider: &dyn EmbeddingProvider,
    tenant_id: &str,
    case_id: Option<&str>,
    tags_csv: Option<&str>,
    tag: Option<&str>,
    ingested_at: i64,
    options: &IngestOptions,
    document: &TextDocument,
    source_kind: SourceKind,
) -> DocumentSummary {
    let failed = |document_id: Option<String>, error: &LexError| DocumentSummary {
        document_id,
        source_name: document.source_name.clone(),
        chunks_created: 0,
        chunks_added: 0,
        errors: vec![bounded_message(error)],
    };

    if document.text.trim().is_empty() {
        return failed(
            document.document_id.clone(),
            &LexError::invalid_input("empty document text"),
        );
    }

    let document_id = document
        .document_id
        .clone()
        .unwrap_or_else(|| derive_document_id(&document.source_name, &document.text));

    let chunks = match chunk_text(&document.text, &options.chunking) {
        Ok(chunks) => chunks,
        Err(e) => return failed(Some(document_id), &e),
    };
    let chunks_created = chunks.len();

    if options.replace {
        let mut predicates = vec![Filter::eq("tenant_id", tenant_id)];
        if let Some(case) = case_id {
            predicates.push(Filter::eq("case_id", case));
        }
        predicates.push(Filter::eq("document_id", document_id.as_str()));
        // all() always yields Some here: tenant + document predicates exist.
        if let Some(filter) = Filter::all(predicates) {
            if let Err(e) = store.delete(USER_DOCUMENTS, &filter).await {
                return failed(Some(document_id), &e);
            }
        }
    }

    let embeddings = match provider.embed_batch(&chunks).await {
        Ok(vectors) => vectors,
        Err(e) => {
            return DocumentSummary {
                document_id: Some(document_id),
                source_name: document.source_name.clone(),
                chunks_created,
                chunks_added: 0,
                errors: vec![bounded_message(&e)],
            }
        }
    };

    let extra = document.metadata.clone().unwrap_or_default();
    let records: Vec<ChunkRecord> = chunks
        .into_iter()
        .zip(embeddings)
        .enumerate()
        .map(|(index, (content, embedding))| {
            let chunk_id = format!("{}:{}", document_id, index);
            ChunkRecord {
                chunk_id: chunk_id.clone(),
                document_id: document_id.clone(),
                content,
                embedding,
                metadata: ChunkMetadata {
                    tenant_id: Some(tenant_id.to_string()),
                    case_id: case_id.map(|c| c.to_string()),
                    document_id: document_id.clone(),
                    chunk_id,
                    source_name: document.source_name.clone(),
                    source_kind,
                    ingested_at,
                    embedding_model: provider.model_name().to_string(),
                    relative_path: extra.get("relative_path").cloned(),
                    source_url: extra.get("source_url").cloned(),
                    tags_csv: tags_csv.map(|t| t.to_string()),
                    tag: tag.map(|t| t.to_string()),
                    extra: extra.clone(),
                    ..ChunkMetadata::default()
                },
            }
        })
        .collect();

    match store.upsert(USER_DOCUMENTS, &records).await {
        Ok(added) => DocumentSummary {
            document_id: Some(document_id),
            source_name: document.source_name.clone(),
            chunks_created,
            chunks_added: added,
            errors: Vec::new(),
        },
        Err(e) => DocumentSummary {
            document_id: Some(document_id),
            source_name: document.source_name.clone(),
            chunks_created,
            chunks_added: 0,
            errors: vec![bounded_message(&e)],
        },
    }
}

// ============ File-based flows ============

/// Per-file summary for file-based ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub path: String,
    pub source_name: Option<String>,
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    pub chunks_created: usize,
    pub chunks_added: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileTotals {
    pub files_received: usize,
    pub files_ingested: usize,
    pub chunks_created: usize,
    pub chunks_added: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileIngestReport {
    pub status: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    pub totals: FileTotals,
    pub files: Vec<FileSummary>,
}

/// Ingest Markdown files from under the allowlisted root (flow 3).
pub async fn ingest_markdown_files(
    store: &dyn VectorStore,
    provider: &dyn EmbeddingProvider,
    root: &Path,
    options: &IngestOptions,
    paths: &[String],
    max_chars_per_file: Option<usize>,
) -> Result<FileIngestReport, LexError> {
    options.validate()?;
    if paths.is_empty() {
        return Err(LexError::invalid_input("no paths provided"));
    }

    let mut totals = FileTotals {
        files_received: paths.len(),
        ..FileTotals::default()
    };
    let mut files = Vec::with_capacity(paths.len());

    for relative_path in paths {
        let read = safe_path::resolve_file(
            root,
            relative_path,
            &[".md", ".markdown"],
            DEFAULT_MAX_TEXT_BYTES,
        )
        .and_then(|resolved| {
            let (text, truncated) = safe_path::read_lossy_utf8(&resolved, max_chars_per_file)?;
            let source_name = resolved
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| relative_path.clone());
            Ok((source_name, text, truncated))
        });

        let (source_name, text, truncated) = match read {
            Ok(parts) => parts,
            Err(e) => {
                totals.errors += 1;
                files.push(FileSummary {
                    path: relative_path.clone(),
                    source_name: None,
                    document_id: None,
                    output_path: None,
                    chunks_created: 0,
                    chunks_added: 0,
                    errors: vec![bounded_message(&e)],
                });
                continue;
            }
        };

        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("relative_path".to_string(), relative_path.clone());
        metadata.insert("truncated".to_string(), truncated.to_string());

        let document = TextDocument {
            source_name,
            text,
            document_id: None,
            metadata: Some(metadata),
        };

        let report = ingest_documents(
            store,
            provider,
            options,
            std::slice::from_ref(&document),
            SourceKind::MarkdownFile,
        )
        .await?;

        merge_single_document_report(&mut totals, &mut files, relative_path, None, report);
    }

    Ok(FileIngestReport {
        status: file_status(&totals),
        tenant_id: options.tenant_id.trim().to_string(),
        case_id: options.effective_case_id().map(|c| c.to_string()),
        totals,
        files,
    })
}

/// Ingest PDF files: convert to Markdown sidecars, then ingest (flow 4).
pub async fn ingest_pdf_files(
    store: &dyn VectorStore,
    provider: &dyn EmbeddingProvider,
    root: &Path,
    options: &IngestOptions,
    paths: &[String],
    max_chars_per_file: Option<usize>,
) -> Result<FileIngestReport, LexError> {
    options.validate()?;
    if paths.is_empty() {
        return Err(LexError::invalid_input("no paths provided"));
    }

    let max_chars = max_chars_per_file.unwrap_or(DEFAULT_MAX_CONVERTED_CHARS);
    let mut totals = FileTotals {
        files_received: paths.len(),
        ..FileTotals::default()
    };
    let mut files = Vec::with_capacity(paths.len());

    for relative_path in paths {
        let converted = convert::convert_pdf_file(root, relative_path, Some(max_chars), true);
        let (outcome, extracted) = match converted {
            Ok(parts) => parts,
            Err(e) => {
                totals.errors += 1;
                files.push(FileSummary {
                    path: relative_path.clone(),
                    source_name: None,
                    document_id: None,
                    output_path: None,
                    chunks_created: 0,
                    chunks_added: 0,
                    errors: vec![bounded_message(&e)],
                });
                continue;
            }
        };

        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("relative_path".to_string(), relative_path.clone());
        metadata.insert("output_relative_path".to_string(), outcome.output_path.clone());
        metadata.insert("truncated".to_string(), extracted.truncated.to_string());

        let document = TextDocument {
            source_name: extracted.source_name.clone(),
            text: extracted.markdown,
            document_id: None,
            metadata: Some(metadata),
        };

        let report = ingest_documents(
            store,
            provider,
            options,
            std::slice::from_ref(&document),
            SourceKind::PdfDerived,
        )
        .await?;

        merge_single_document_report(
            &mut totals,
            &mut files,
            relative_path,
            Some(outcome.output_path),
            report,
        );
    }

    Ok(FileIngestReport {
        status: file_status(&totals),
        tenant_id: options.tenant_id.trim().to_string(),
        case_id: options.effective_case_id().map(|c| c.to_string()),
        totals,
        files,
    })
}

/// Ingest one rendered document on explicit user action (flow 5).
pub async fn ingest_rendered_document(
    store: &dyn VectorStore,
    provider: &dyn EmbeddingProvider,
    options: &IngestOptions,
    rendered: &RenderedDocument,
) -> Result<IngestReport, LexError> {
    let source_name = if rendered.title.trim().is_empty() {
        rendered.url.clone()
    } else {
        rendered.title.clone()
    };

    let mut metadata = rendered.metadata.clone();
    metadata.insert("source_url".to_string(), rendered.url.clone());

    let document = TextDocument {
        source_name,
        text: rendered.text.clone(),
        document_id: None,
        metadata: Some(metadata),
    };

    ingest_documents(
        store,
        provider,
        options,
        std::slice::from_ref(&document),
        SourceKind::PlainText,
    )
    .await
}

fn merge_single_document_report(
    totals: &mut FileTotals,
    files: &mut Vec<FileSummary>,
    relative_path: &str,
    output_path: Option<String>,
    report: IngestReport,
) {
    let summary = report.documents.into_iter().next();
    match summary {
        Some(summary) => {
            totals.chunks_created += summary.chunks_created;
            totals.chunks_added += summary.chunks_added;
            if summary.errors.is_empty() && summary.chunks_added > 0 {
                totals.files_ingested += 1;
            } else if !summary.errors.is_empty() {
                totals.errors += 1;
            }
            files.push(FileSummary {
                path: relative_path.to_string(),
                source_name: Some(summary.source_name),
                document_id: summary.document_id,
                output_path,
                chunks_created: summary.chunks_created,
                chunks_added: summary.chunks_added,
                errors: summary.errors,
            });
        }
        None => {
            totals.errors += 1;
            files.push(FileSummary {
                path: relative_path.to_string(),
                source_name: None,
                document_id: None,
                output_path,
                chunks_created: 0,
                chunks_added: 0,
                errors: vec!["ingestion produced no summary".to_string()],
            });
        }
    }
}

fn file_status(totals: &FileTotals) -> String {
    if totals.files_ingested > 0 {
        "complete".to_string()
    } else {
        "failed".to_string()
    }
}

// ============ Corpus bulk ingest ============

#[derive(Debug, Clone)]
pub struct CorpusIngestOptions {
    pub jurisdiction: String,
    /// Bounded worker pool for fetch/parse.
    pub workers: usize,
    /// Documents per embedding batch.
    pub embed_batch: usize,
    pub max_files: Option<usize>,
    pub deadline: Option<Instant>,
}

impl Default for CorpusIngestOptions {
    fn default() -> Self {
        Self {
            jurisdiction: "de-federal".to_string(),
            workers: 16,
            embed_batch: 64,
            max_files: None,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CorpusIngestReport {
    pub files_discovered: usize,
    pub files_processed: usize,
    pub norms_parsed: usize,
    pub documents_added: usize,
    pub documents_skipped: usize,
    pub error_count: usize,
    /// Bounded sample of error messages.
    pub errors: Vec<String>,
    pub elapsed_seconds: f64,
}

/// Bulk-ingest a local tree of legal HTML into the shared corpus (flow 1).
///
/// Layout: `{root}/{law_abbrev}/{norm}.html`. Files are parsed by a bounded
/// worker pool; parsed documents are embedded in batches and upserted.
/// Chunks whose `chunk_id` already exists are skipped, so an interrupted
/// run resumes where it stopped. No tenant metadata is ever written.
pub async fn ingest_corpus_tree(
    store: Arc<dyn VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    corpus_root: &Path,
    options: &CorpusIngestOptions,
) -> Result<CorpusIngestReport, LexError> {
    let started = Instant::now();

    if !corpus_root.is_dir() {
        return Err(LexError::invalid_input(format!(
            "corpus root is not a directory: {}",
            corpus_root.display()
        )));
    }

    let include = GlobSetBuilder::new()
        .add(Glob::new("**/*.html").map_err(|e| LexError::internal(e.to_string()))?)
        .add(Glob::new("**/*.htm").map_err(|e| LexError::internal(e.to_string()))?)
        .build()
        .map_err(|e| LexError::internal(e.to_string()))?;

    let mut html_files: Vec<std::path::PathBuf> = WalkDir::new(corpus_root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let relative = entry
                .path()
                .strip_prefix(corpus_root)
                .unwrap_or(entry.path());
            include.is_match(relative)
        })
        .map(|entry| entry.into_path())
        .collect();
    html_files.sort();
    if let Some(cap) = options.max_files {
        html_files.truncate(cap);
    }

    let mut report = CorpusIngestReport {
        files_discovered: html_files.len(),
        ..CorpusIngestReport::default()
    };

    let ingested_at = chrono::Utc::now().timestamp();
    let semaphore = Arc::new(Semaphore::new(options.workers));
    let mut tasks: JoinSet<(std::path::PathBuf, Result<Vec<legal_html::CorpusDocument>, LexError>)> =
        JoinSet::new();

    for file in html_files {
        let semaphore = semaphore.clone();
        let jurisdiction = options.jurisdiction.clone();
        let model = provider.model_name().to_string();
        let root = corpus_root.to_path_buf();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = parse_corpus_file(&root, &file, &jurisdiction, ingested_at, &model);
            (file, result)
        });
    }

    let mut documents: Vec<legal_html::CorpusDocument> = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (file, result) = joined.map_err(|e| LexError::internal(e.to_string()))?;
        report.files_processed += 1;
        match result {
            Ok(mut docs) => {
                report.norms_parsed += 1;
                documents.append(&mut docs);
            }
            Err(e) => {
                report.error_count += 1;
                if report.errors.len() < MAX_REPORT_ERRORS {
                    report
                        .errors
                        .push(format!("{}: {}", file.display(), bounded_message(&e)));
                }
            }
        }
    }

    // Deterministic upsert order regardless of worker completion order.
    documents.sort_by(|a, b| a.document_id.cmp(&b.document_id));

    for batch in documents.chunks(options.embed_batch.max(1)) {
        if options.deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            report.error_count += 1;
            if report.errors.len() < MAX_REPORT_ERRORS {
                report.errors.push("deadline exceeded; ingest resumable".to_string());
            }
            break;
        }

        // Resume support: drop documents whose chunk already exists.
        let mut pending = Vec::with_capacity(batch.len());
        for document in batch {
            let chunk_id = format!("{}:0", document.document_id);
            let existing = store
                .count(CORPUS, Some(&Filter::eq("chunk_id", chunk_id.as_str())))
                .await?;
            if existing > 0 {
                report.documents_skipped += 1;
            } else {
                pending.push(document);
            }
        }
        if pending.is_empty() {
            continue;
        }

        let texts: Vec<String> = pending.iter().map(|d| d.content.clone()).collect();
        let embeddings = match provider.embed_batch(&texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                report.error_count += pending.len();
                if report.errors.len() < MAX_REPORT_ERRORS {
                    report.errors.push(bounded_message(&e));
                }
                continue;
            }
        };

        let records: Vec<ChunkRecord> = pending
            .into_iter()
            .zip(embeddings)
            .map(|(document, embedding)| {
                let chunk_id = format!("{}:0", document.document_id);
                ChunkRecord {
                    chunk_id: chunk_id.clone(),
                    document_id: document.document_id.clone(),
                    content: document.content.clone(),
                    embedding,
                    metadata: ChunkMetadata {
                        document_id: document.document_id.clone(),
                        chunk_id,
                        ..document.metadata.clone()
                    },
                }
            })
            .collect();

        report.documents_added += store.upsert(CORPUS, &records).await?;
    }

    report.elapsed_seconds = started.elapsed().as_secs_f64();
    tracing::info!(
        files = report.files_processed,
        added = report.documents_added,
        skipped = report.documents_skipped,
        errors = report.error_count,
        "corpus ingest finished"
    );
    Ok(report)
}

fn parse_corpus_file(
    corpus_root: &Path,
    file: &Path,
    jurisdiction: &str,
    ingested_at: i64,
    embedding_model: &str,
) -> Result<Vec<legal_html::CorpusDocument>, LexError> {
    let bytes = std::fs::read(file)?;
    let html = legal_html::decode_legacy_html(&bytes);
    let norm = legal_html::parse_norm_html(&html)?;

    let law_abbrev = file
        .parent()
        .filter(|parent| *parent != corpus_root)
        .and_then(|parent| parent.file_name())
        .or_else(|| file.file_stem())
        .map(|n| n.to_string_lossy().to_uppercase())
        .unwrap_or_else(|| "UNKNOWN".to_string());

    let source_url = format!("file://{}", file.display());

    Ok(legal_html::norm_documents(
        &norm,
        &law_abbrev,
        jurisdiction,
        Some(&source_url),
        ingested_at,
        embedding_model,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::embedding;
    use crate::store::MemoryVectorStore;
    use std::fs;
    use tempfile::TempDir;

    async fn setup() -> (MemoryVectorStore, Arc<dyn EmbeddingProvider>) {
        let provider = embedding::local_provider(&EmbeddingConfig {
            dims: 32,
            ..EmbeddingConfig::default()
        })
        .await;
        (MemoryVectorStore::new(), provider)
    }

    fn doc(name: &str, text: &str) -> TextDocument {
        TextDocument {
            source_name: name.to_string(),
            text: text.to_string(),
            document_id: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_ingest_documents_basic() {
        let (store, provider) = setup().await;
        let options = IngestOptions::new("t1");
        let report = ingest_documents(
            &store,
            provider.as_ref(),
            &options,
            &[doc("a.txt", "Die Kündigungsfrist beträgt vier Wochen.")],
            SourceKind::PlainText,
        )
        .await
        .unwrap();

        assert_eq!(report.status, "complete");
        assert_eq!(report.totals.documents_ingested, 1);
        assert_eq!(report.totals.chunks_added, 1);
        let summary = &report.documents[0];
        assert!(summary.document_id.as_deref().unwrap().starts_with("doc_"));
        assert_eq!(summary.chunks_created, 1);
    }

    #[tokio::test]
    async fn test_empty_document_recorded_not_fatal() {
        let (store, provider) = setup().await;
        let options = IngestOptions::new("t1");
        let report = ingest_documents(
            &store,
            provider.as_ref(),
            &options,
            &[doc("empty.txt", "   "), doc("ok.txt", "Inhalt.")],
            SourceKind::PlainText,
        )
        .await
        .unwrap();

        assert_eq!(report.status, "complete");
        assert_eq!(report.totals.errors, 1);
        assert_eq!(report.totals.documents_ingested, 1);
        assert!(!report.documents[0].errors.is_empty());
        assert!(report.documents[1].errors.is_empty());
    }

    #[tokio::test]
    async fn test_replace_is_idempotent() {
        let (store, provider) = setup().await;
        let mut options = IngestOptions::new("t1");
        options.case_id = Some("c1".to_string());
        options.replace = true;

        let text = "Langer Text. ".repeat(300);
        let document = doc("x.txt", &text);

        let first = ingest_documents(
            &store,
            provider.as_ref(),
            &options,
            std::slice::from_ref(&document),
            SourceKind::PlainText,
        )
        .await
        .unwrap();
        let second = ingest_documents(
            &store,
            provider.as_ref(),
            &options,
            std::slice::from_ref(&document),
            SourceKind::PlainText,
        )
        .await
        .unwrap();

        assert_eq!(
            first.totals.chunks_added,
            second.totals.chunks_added
        );
        let document_id = first.documents[0].document_id.clone().unwrap();
        let filter = Filter::all(vec![
            Filter::eq("tenant_id", "t1"),
            Filter::eq("case_id", "c1"),
            Filter::eq("document_id", document_id.as_str()),
        ])
        .unwrap();
        let count = store.count(USER_DOCUMENTS, Some(&filter)).await.unwrap();
        assert_eq!(count as usize, first.totals.chunks_added);
    }

    #[tokio::test]
    async fn test_empty_case_id_treated_as_absent() {
        let (store, provider) = setup().await;
        let mut options = IngestOptions::new("t1");
        options.case_id = Some("".to_string());
        let report = ingest_documents(
            &store,
            provider.as_ref(),
            &options,
            &[doc("a.txt", "Inhalt.")],
            SourceKind::PlainText,
        )
        .await
        .unwrap();
        assert_eq!(report.case_id, None);
    }

    #[tokio::test]
    async fn test_markdown_traversal_writes_nothing() {
        let (store, provider) = setup().await;
        let tmp = TempDir::new().unwrap();
        let options = IngestOptions::new("t1");

        let report = ingest_markdown_files(
            &store,
            provider.as_ref(),
            tmp.path(),
            &options,
            &["../etc/passwd".to_string()],
            None,
        )
        .await
        .unwrap();

        assert_eq!(report.status, "failed");
        assert_eq!(report.totals.errors, 1);
        assert!(report.files[0].errors[0].contains("traversal"));
        assert_eq!(store.count(USER_DOCUMENTS, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_markdown_file_ingest() {
        let (store, provider) = setup().await;
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("notes.md"), "# Notizen\n\nMietminderung wegen Schimmel.")
            .unwrap();
        let options = IngestOptions::new("t1");

        let report = ingest_markdown_files(
            &store,
            provider.as_ref(),
            tmp.path(),
            &options,
            &["notes.md".to_string()],
            None,
        )
        .await
        .unwrap();

        assert_eq!(report.status, "complete");
        assert_eq!(report.files[0].source_name.as_deref(), Some("notes.md"));
        assert_eq!(report.totals.files_ingested, 1);
        assert!(store.count(USER_DOCUMENTS, None).await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_corpus_tree_ingest_and_resume() {
        let (store, provider) = setup().await;
        let store = Arc::new(store);
        let tmp = TempDir::new().unwrap();
        let law_dir = tmp.path().join("bgb");
        fs::create_dir_all(&law_dir).unwrap();
        fs::write(
            law_dir.join("__433.html"),
            r#"<html><body><h1>Bürgerliches Gesetzbuch</h1>
               <span class="jnenbez">§ 433</span>
               <div class="jurAbsatz">(1) Erster Absatz.</div>
               <div class="jurAbsatz">(2) Zweiter Absatz.</div>
               </body></html>"#,
        )
        .unwrap();

        let options = CorpusIngestOptions {
            workers: 2,
            ..CorpusIngestOptions::default()
        };
        let report = ingest_corpus_tree(store.clone(), provider.clone(), tmp.path(), &options)
            .await
            .unwrap();

        // 1 norm + 2 paragraph documents.
        assert_eq!(report.documents_added, 3);
        assert_eq!(report.error_count, 0);
        assert_eq!(store.count(CORPUS, None).await.unwrap(), 3);

        // Second run skips everything.
        let rerun = ingest_corpus_tree(store.clone(), provider, tmp.path(), &options)
            .await
            .unwrap();
        assert_eq!(rerun.documents_added, 0);
        assert_eq!(rerun.documents_skipped, 3);
        assert_eq!(store.count(CORPUS, None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_corpus_bad_file_recorded_and_continues() {
        let (store, provider) = setup().await;
        let store = Arc::new(store);
        let tmp = TempDir::new().unwrap();
        let law_dir = tmp.path().join("gg");
        fs::create_dir_all(&law_dir).unwrap();
        fs::write(law_dir.join("broken.html"), "<html><body>kein Inhalt</body></html>").unwrap();
        fs::write(
            law_dir.join("art_1.html"),
            r#"<h1>Grundgesetz</h1><span class="jnenbez">Art 1</span>
               <div class="jurAbsatz">Die Würde des Menschen ist unantastbar.</div>"#,
        )
        .unwrap();

        let report = ingest_corpus_tree(
            store.clone(),
            provider,
            tmp.path(),
            &CorpusIngestOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.error_count, 1);
        assert_eq!(report.documents_added, 1);
        assert_eq!(report.files_processed, 2);
    }

    #[tokio::test]
    async fn test_rendered_document_ingest() {
        let (store, provider) = setup().await;
        let options = IngestOptions::new("t1");
        let rendered = RenderedDocument {
            url: "https://example.test/doc/jlr-1".to_string(),
            title: "Mietspiegel".to_string(),
            text: "Der Mietspiegel regelt die ortsübliche Vergleichsmiete.".to_string(),
            metadata: Default::default(),
        };
        let report =
            ingest_rendered_document(&store, provider.as_ref(), &options, &rendered)
                .await
                .unwrap();
        assert_eq!(report.status, "complete");

        let filter = Filter::eq("tenant_id", "t1");
        let chunks = store.get(USER_DOCUMENTS, &filter, 10).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata["source_name"], "Mietspiegel");
    }
}
