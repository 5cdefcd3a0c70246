//! # Lex Harness
//!
//! **A tenant-isolated legal document ingestion and retrieval service for AI tools.**
//!
//! Lex Harness ingests authoritative legal corpora (German federal law HTML)
//! and user-supplied documents (plain text, Markdown, PDF-derived Markdown)
//! into a semantically searchable vector store, and exposes the results to
//! AI agents as a closed set of schema-validated tools. Large tool results
//! are returned as opaque references with bounded previews.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌─────────────┐
//! │  Sources    │──▶│   Ingest     │──▶│   SQLite    │
//! │ HTML/MD/PDF │   │ chunk+embed  │   │  vectors    │
//! └─────────────┘   └──────────────┘   └──────┬──────┘
//!                                             │
//!                         ┌───────────────────┤
//!                         ▼                   ▼
//!                   ┌───────────┐      ┌────────────┐
//!                   │   Query   │      │   Tools    │
//!                   │  engine   │──────│ + RefCache │
//!                   └───────────┘      └────────────┘
//! ```
//!
//! ## Data flow
//!
//! 1. Legal HTML is parsed into per-norm and per-paragraph documents
//!    ([`legal_html`]); user text is split by the deterministic chunker
//!    ([`chunk`]).
//! 2. Chunks are embedded through the gateway ([`embedding`]) — an HTTP
//!    replica pool, or the in-process single-flight fallback.
//! 3. The vector store ([`store`]) persists chunks with scalar metadata;
//!    `user_documents` operations are always tenant-scoped.
//! 4. The query engine ([`query`]) runs filtered cosine search and returns
//!    bounded excerpts.
//! 5. The tool surface ([`tools`]) validates inputs and wraps results in
//!    reference-cache envelopes ([`refcache`]).
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Environment-based configuration |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types: chunks, metadata, reports |
//! | [`safe_path`] | Allowlisted-root path resolution |
//! | [`chunk`] | Deterministic character chunker |
//! | [`legal_html`] | Per-norm legal HTML extraction |
//! | [`catalog`] | Offline, read-only document catalogs |
//! | [`store`] | Vector store trait, filter algebra, SQLite/memory backends |
//! | [`embedding`] | Embedding providers and vector utilities |
//! | [`refcache`] | Reference cache: namespaces, permissions, previews |
//! | [`ingest`] | Ingestion engine (corpus, text, Markdown, PDF, rendered) |
//! | [`convert`] | PDF → Markdown sidecar conversion |
//! | [`renderer`] | External headless-renderer interface |
//! | [`query`] | Corpus and user-document search |
//! | [`tools`] | Tool trait, registry, and the exposed tool set |
//! | [`server`] | Thin HTTP dispatcher over the registry |

pub mod catalog;
pub mod chunk;
pub mod config;
pub mod convert;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod legal_html;
pub mod models;
pub mod query;
pub mod refcache;
pub mod renderer;
pub mod safe_path;
pub mod server;
pub mod store;
pub mod tools;
