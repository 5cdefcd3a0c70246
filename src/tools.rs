//! The tool surface exposed to agents.
//!
//! A closed set of operations behind the [`Tool`] trait. Each tool declares
//! a JSON Schema for its parameters; [`ToolRegistry::dispatch`] validates
//! input against that schema before execution and converts every failure
//! into a structured error object — a tool call never crashes the process.
//!
//! Result-bearing tools route their payload through the reference cache:
//! the wire shape is the cache envelope (`ref_id`, `preview`,
//! `preview_strategy`, summary fields), with the full value included inline
//! only when it is small. The inner payload shape is never part of the
//! declared contract.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::catalog::CatalogRegistry;
use crate::chunk::ChunkingOptions;
use crate::config::{Config, DEFAULT_MAX_CONVERTED_CHARS};
use crate::convert;
use crate::embedding::EmbeddingProvider;
use crate::error::LexError;
use crate::ingest;
use crate::models::SourceKind;
use crate::query;
use crate::refcache::{AccessPolicy, Actor, Permission, RefCache};
use crate::renderer::DocumentRenderer;
use crate::store::VectorStore;

/// Serialized results up to this size are also returned inline next to
/// their reference.
const INLINE_VALUE_BYTES: usize = 2048;

/// Bridge handing tools the shared runtime state.
pub struct ToolContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn VectorStore>,
    pub provider: Arc<dyn EmbeddingProvider>,
    pub catalog: Arc<CatalogRegistry>,
    pub cache: Arc<RefCache>,
    pub renderer: Option<Arc<dyn DocumentRenderer>>,
}

impl ToolContext {
    /// Register a result and produce the wire envelope. Small values ride
    /// along inline; large ones are reachable only through `ref_id`.
    fn cached_response(&self, namespace: &str, value: Value) -> Result<Value, LexError> {
        let inline = serde_json::to_string(&value)
            .map(|s| s.len() <= INLINE_VALUE_BYTES)
            .unwrap_or(false);
        let envelope = self.cache.register(namespace, value.clone(), Actor::Agent)?;
        let mut wire = envelope.into_value();
        if inline {
            wire["value"] = value;
        }
        Ok(wire)
    }
}

/// An operation agents can discover and invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, LexError>;
}

/// Registry of all exposed tools.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry pre-loaded with the full tool set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ListAvailableDocumentsTool));
        registry.register(Box::new(SearchLawsTool));
        registry.register(Box::new(GetLawByIdTool));
        registry.register(Box::new(GetLawStatsTool));
        registry.register(Box::new(IngestDocumentsTool));
        registry.register(Box::new(IngestMarkdownFilesTool));
        registry.register(Box::new(IngestPdfFilesTool));
        registry.register(Box::new(ConvertFilesToMarkdownTool));
        registry.register(Box::new(SearchDocumentsTool));
        registry.register(Box::new(RetrieveCatalogDocumentTool));
        registry.register(Box::new(GetCachedResultTool));
        registry.register(Box::new(StoreSecretTool));
        registry.register(Box::new(ComputeWithSecretTool));
        registry.register(Box::new(GenerateItemsTool));
        registry.register(Box::new(HealthCheckTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Validate, execute, and convert failures into structured errors.
    pub async fn dispatch(&self, name: &str, params: Value, ctx: &ToolContext) -> Value {
        let Some(tool) = self.find(name) else {
            return error_object(&LexError::NotFound {
                resource: format!("tool {}", name),
            });
        };

        if let Err(e) = validate_against_schema(&params, &tool.parameters_schema()) {
            return error_object(&e);
        }

        match tool.execute(params, ctx).await {
            Ok(value) => value,
            Err(e) => {
                if matches!(e, LexError::Internal { .. }) {
                    tracing::error!(tool = name, error = %e, "tool failed on internal invariant");
                } else {
                    tracing::debug!(tool = name, error = %e, "tool returned error");
                }
                error_object(&e)
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn error_object(error: &LexError) -> Value {
    // Internal faults stay opaque; everything else surfaces its message.
    let message = match error {
        LexError::Internal { .. } => "internal error".to_string(),
        other => other.to_string(),
    };
    json!({
        "error": {
            "code": error.code(),
            "message": message,
        }
    })
}

/// Minimal JSON-Schema check: `type`, `required`, `properties` types,
/// `enum`, numeric `minimum`/`maximum`, string `minLength`.
fn validate_against_schema(params: &Value, schema: &Value) -> Result<(), LexError> {
    let object = params
        .as_object()
        .ok_or_else(|| LexError::invalid_input("parameters must be a JSON object"))?;

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required {
            let key = key.as_str().unwrap_or_default();
            if !object.contains_key(key) || object[key].is_null() {
                return Err(LexError::invalid_input(format!(
                    "missing required parameter: {}",
                    key
                )));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Ok(());
    };

    for (key, declared) in properties {
        let Some(value) = object.get(key) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        validate_value(key, value, declared)?;
    }
    Ok(())
}

fn validate_value(key: &str, value: &Value, declared: &Value) -> Result<(), LexError> {
    if let Some(expected) = declared.get("type").and_then(|t| t.as_str()) {
        let ok = match expected {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !ok {
            return Err(LexError::invalid_input(format!(
                "parameter {} must be of type {}",
                key, expected
            )));
        }
    }

    if let Some(allowed) = declared.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            return Err(LexError::invalid_input(format!(
                "parameter {} must be one of the declared values",
                key
            )));
        }
    }

    if let Some(min) = declared.get("minimum").and_then(|m| m.as_i64()) {
        if value.as_i64().map(|v| v < min).unwrap_or(false) {
            return Err(LexError::invalid_input(format!(
                "parameter {} must be >= {}",
                key, min
            )));
        }
    }
    if let Some(max) = declared.get("maximum").and_then(|m| m.as_i64()) {
        if value.as_i64().map(|v| v > max).unwrap_or(false) {
            return Err(LexError::invalid_input(format!(
                "parameter {} must be <= {}",
                key, max
            )));
        }
    }
    if let Some(min_length) = declared.get("minLength").and_then(|m| m.as_u64()) {
        if value
            .as_str()
            .map(|s| (s.chars().count() as u64) < min_length)
            .unwrap_or(false)
        {
            return Err(LexError::invalid_input(format!(
                "parameter {} is too short",
                key
            )));
        }
    }
    if let Some(items) = declared.get("items") {
        if let Some(array) = value.as_array() {
            for item in array {
                validate_value(key, item, items)?;
            }
        }
    }
    Ok(())
}

fn from_params<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, LexError> {
    serde_json::from_value(params)
        .map_err(|e| LexError::invalid_input(format!("invalid parameters: {}", e)))
}

fn chunking_from(value: Option<Value>) -> Result<ChunkingOptions, LexError> {
    match value {
        Some(v) => {
            let options: ChunkingOptions = serde_json::from_value(v)
                .map_err(|e| LexError::invalid_input(format!("invalid chunking options: {}", e)))?;
            options.validate()?;
            Ok(options)
        }
        None => Ok(ChunkingOptions::default()),
    }
}

// ============ Catalog ============

pub struct ListAvailableDocumentsTool;

#[derive(Deserialize)]
struct ListAvailableDocumentsInput {
    source: String,
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_catalog_limit")]
    limit: usize,
}

fn default_catalog_limit() -> usize {
    crate::catalog::DEFAULT_LIMIT
}

#[async_trait]
impl Tool for ListAvailableDocumentsTool {
    fn name(&self) -> &str {
        "list_available_documents"
    }

    fn description(&self) -> &str {
        "List discoverable document identifiers for an offline catalog source"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source": { "type": "string", "minLength": 1 },
                "prefix": { "type": "string" },
                "offset": { "type": "integer", "minimum": 0 },
                "limit": { "type": "integer", "minimum": 1, "maximum": 200 }
            },
            "required": ["source"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, LexError> {
        let input: ListAvailableDocumentsInput = from_params(params)?;
        let result = ctx
            .catalog
            .list_available(&input.source, input.prefix.as_deref(), input.offset, input.limit)
            .await?;

        let items = serde_json::to_value(&result.items)?;
        let mut response = ctx.cached_response("catalog", items)?;
        response["source"] = json!(result.source);
        response["catalog_version"] = json!(result.catalog_version);
        response["offset"] = json!(result.offset);
        response["limit"] = json!(result.limit);
        response["count_total"] = json!(result.count_total);
        response["count_filtered"] = json!(result.count_filtered);
        response["prefix_counts"] = serde_json::to_value(&result.prefix_counts)?;
        Ok(response)
    }
}

// ============ Corpus search ============

pub struct SearchLawsTool;

#[derive(Deserialize)]
struct SearchLawsInput {
    query: String,
    #[serde(default)]
    law_abbrev: Option<String>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default = "default_n_results")]
    n_results: usize,
}

fn default_n_results() -> usize {
    query::DEFAULT_N_RESULTS
}

#[async_trait]
impl Tool for SearchLawsTool {
    fn name(&self) -> &str {
        "search_laws"
    }

    fn description(&self) -> &str {
        "Semantic search across the shared legal corpus"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "minLength": 2 },
                "law_abbrev": { "type": "string" },
                "level": { "type": "string", "enum": ["law", "norm", "paragraph"] },
                "n_results": { "type": "integer", "minimum": 1, "maximum": 50 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, LexError> {
        let input: SearchLawsInput = from_params(params)?;
        let hits = query::search_laws(
            ctx.store.as_ref(),
            ctx.provider.as_ref(),
            &query::CorpusSearchParams {
                query: input.query.clone(),
                law_abbrev: input.law_abbrev.clone(),
                level: input.level.clone(),
                n_results: input.n_results,
            },
        )
        .await?;

        let count = hits.len();
        let value = json!({
            "query": input.query,
            "filters": { "law_abbrev": input.law_abbrev, "level": input.level },
            "count": count,
            "results": hits,
        });
        let mut response = ctx.cached_response("german_laws", value)?;
        response["count"] = json!(count);
        Ok(response)
    }
}

pub struct GetLawByIdTool;

#[derive(Deserialize)]
struct GetLawByIdInput {
    law_abbrev: String,
    #[serde(default)]
    norm_id: Option<String>,
}

#[async_trait]
impl Tool for GetLawByIdTool {
    fn name(&self) -> &str {
        "get_law_by_id"
    }

    fn description(&self) -> &str {
        "Retrieve the full text of a specific law or norm by identifier"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "law_abbrev": { "type": "string", "minLength": 1 },
                "norm_id": { "type": "string" }
            },
            "required": ["law_abbrev"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, LexError> {
        let input: GetLawByIdInput = from_params(params)?;
        let chunks = query::get_law_by_id(
            ctx.store.as_ref(),
            &input.law_abbrev,
            input.norm_id.as_deref(),
        )
        .await?;

        let count = chunks.len();
        let value = json!({
            "law_abbrev": input.law_abbrev.to_uppercase(),
            "norm_id": input.norm_id,
            "count": count,
            "results": chunks,
        });
        let mut response = ctx.cached_response("german_laws", value)?;
        response["count"] = json!(count);
        Ok(response)
    }
}

pub struct GetLawStatsTool;

#[async_trait]
impl Tool for GetLawStatsTool {
    fn name(&self) -> &str {
        "get_law_stats"
    }

    fn description(&self) -> &str {
        "Statistics about the corpus and user-document collections"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value, LexError> {
        let stats = query::get_law_stats(ctx.store.as_ref(), ctx.provider.as_ref()).await?;
        ctx.cached_response("stats", serde_json::to_value(&stats)?)
    }
}

// ============ User documents ============

pub struct IngestDocumentsTool;

#[derive(Deserialize)]
struct IngestDocumentsInput {
    tenant_id: String,
    documents: Vec<ingest::TextDocument>,
    #[serde(default)]
    case_id: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    chunking: Option<Value>,
    #[serde(default)]
    replace: bool,
}

#[async_trait]
impl Tool for IngestDocumentsTool {
    fn name(&self) -> &str {
        "ingest_documents"
    }

    fn description(&self) -> &str {
        "Ingest plain-text documents into the tenant's document store"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tenant_id": { "type": "string", "minLength": 1 },
                "documents": { "type": "array", "items": { "type": "object" } },
                "case_id": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } },
                "chunking": { "type": "object" },
                "replace": { "type": "boolean" }
            },
            "required": ["tenant_id", "documents"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, LexError> {
        let input: IngestDocumentsInput = from_params(params)?;
        if input.documents.is_empty() || input.documents.len() > 100 {
            return Err(LexError::invalid_input(
                "documents must contain between 1 and 100 items",
            ));
        }

        let options = ingest::IngestOptions {
            tenant_id: input.tenant_id,
            case_id: input.case_id,
            tags: input.tags,
            chunking: chunking_from(input.chunking)?,
            replace: input.replace,
            deadline: None,
        };

        let report = ingest::ingest_documents(
            ctx.store.as_ref(),
            ctx.provider.as_ref(),
            &options,
            &input.documents,
            SourceKind::PlainText,
        )
        .await?;

        let totals = serde_json::to_value(&report.totals)?;
        let status = report.status.clone();
        let mut response =
            ctx.cached_response("custom_documents", serde_json::to_value(&report)?)?;
        response["status"] = json!(status);
        response["totals"] = totals;
        Ok(response)
    }
}

pub struct IngestMarkdownFilesTool;

#[derive(Deserialize)]
struct IngestFilesInput {
    tenant_id: String,
    paths: Vec<String>,
    #[serde(default)]
    case_id: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    chunking: Option<Value>,
    #[serde(default)]
    max_chars_per_file: Option<usize>,
    #[serde(default)]
    replace: Option<bool>,
}

fn file_paths_schema(extra: Value) -> Value {
    let mut properties = json!({
        "tenant_id": { "type": "string", "minLength": 1 },
        "paths": { "type": "array", "items": { "type": "string" } },
        "case_id": { "type": "string" },
        "tags": { "type": "array", "items": { "type": "string" } },
        "chunking": { "type": "object" },
        "max_chars_per_file": { "type": "integer", "minimum": 1 }
    });
    if let (Some(base), Some(additional)) = (properties.as_object_mut(), extra.as_object()) {
        for (key, value) in additional {
            base.insert(key.clone(), value.clone());
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": ["tenant_id", "paths"]
    })
}

#[async_trait]
impl Tool for IngestMarkdownFilesTool {
    fn name(&self) -> &str {
        "ingest_markdown_files"
    }

    fn description(&self) -> &str {
        "Ingest Markdown files from under the allowlisted ingest root"
    }

    fn parameters_schema(&self) -> Value {
        file_paths_schema(json!({}))
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, LexError> {
        let input: IngestFilesInput = from_params(params)?;
        validate_paths(&input.paths)?;
        let root = ctx.config.resolve_ingest_root()?;

        let options = ingest::IngestOptions {
            tenant_id: input.tenant_id,
            case_id: input.case_id,
            tags: input.tags,
            chunking: chunking_from(input.chunking)?,
            replace: input.replace.unwrap_or(false),
            deadline: None,
        };

        let report = ingest::ingest_markdown_files(
            ctx.store.as_ref(),
            ctx.provider.as_ref(),
            &root,
            &options,
            &input.paths,
            input.max_chars_per_file,
        )
        .await?;

        let totals = serde_json::to_value(&report.totals)?;
        let status = report.status.clone();
        let mut response =
            ctx.cached_response("custom_documents", serde_json::to_value(&report)?)?;
        response["status"] = json!(status);
        response["totals"] = totals;
        Ok(response)
    }
}

pub struct IngestPdfFilesTool;

#[async_trait]
impl Tool for IngestPdfFilesTool {
    fn name(&self) -> &str {
        "ingest_pdf_files"
    }

    fn description(&self) -> &str {
        "Convert PDFs under the ingest root to Markdown and ingest them"
    }

    fn parameters_schema(&self) -> Value {
        file_paths_schema(json!({ "replace": { "type": "boolean" } }))
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, LexError> {
        let input: IngestFilesInput = from_params(params)?;
        validate_paths(&input.paths)?;
        let root = ctx.config.resolve_ingest_root()?;

        let options = ingest::IngestOptions {
            tenant_id: input.tenant_id,
            case_id: input.case_id,
            tags: input.tags,
            chunking: chunking_from(input.chunking)?,
            // Re-ingesting the same PDF should not duplicate chunks.
            replace: input.replace.unwrap_or(true),
            deadline: None,
        };

        let report = ingest::ingest_pdf_files(
            ctx.store.as_ref(),
            ctx.provider.as_ref(),
            &root,
            &options,
            &input.paths,
            input.max_chars_per_file,
        )
        .await?;

        let totals = serde_json::to_value(&report.totals)?;
        let status = report.status.clone();
        let mut response =
            ctx.cached_response("custom_documents", serde_json::to_value(&report)?)?;
        response["status"] = json!(status);
        response["totals"] = totals;
        Ok(response)
    }
}

pub struct ConvertFilesToMarkdownTool;

#[derive(Deserialize)]
struct ConvertFilesInput {
    paths: Vec<String>,
    #[serde(default)]
    max_chars_per_file: Option<usize>,
    #[serde(default = "default_true")]
    overwrite: bool,
}

fn default_true() -> bool {
    true
}

#[async_trait]
impl Tool for ConvertFilesToMarkdownTool {
    fn name(&self) -> &str {
        "convert_files_to_markdown"
    }

    fn description(&self) -> &str {
        "Convert PDFs under the ingest root to Markdown sidecar files"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "paths": { "type": "array", "items": { "type": "string" } },
                "max_chars_per_file": { "type": "integer", "minimum": 1 },
                "overwrite": { "type": "boolean" }
            },
            "required": ["paths"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, LexError> {
        let input: ConvertFilesInput = from_params(params)?;
        validate_paths(&input.paths)?;
        let root = ctx.config.resolve_ingest_root()?;
        let max_chars = input.max_chars_per_file.unwrap_or(DEFAULT_MAX_CONVERTED_CHARS);

        let mut converted = 0usize;
        let mut errors = 0usize;
        let mut files = Vec::with_capacity(input.paths.len());
        for relative_path in &input.paths {
            match convert::convert_pdf_file(&root, relative_path, Some(max_chars), input.overwrite)
            {
                Ok((outcome, _extracted)) => {
                    converted += 1;
                    files.push(json!({
                        "path": relative_path,
                        "status": "complete",
                        "outcome": outcome,
                    }));
                }
                Err(e) => {
                    errors += 1;
                    files.push(json!({
                        "path": relative_path,
                        "status": "failed",
                        "error": { "code": e.code(), "message": crate::error::bounded_message(&e) },
                    }));
                }
            }
        }

        let status = if converted > 0 { "complete" } else { "failed" };
        let value = json!({
            "status": status,
            "totals": {
                "files_received": input.paths.len(),
                "files_converted": converted,
                "errors": errors,
            },
            "files": files,
        });
        let mut response = ctx.cached_response("custom_documents", value)?;
        response["status"] = json!(status);
        Ok(response)
    }
}

pub struct SearchDocumentsTool;

#[derive(Deserialize)]
struct SearchDocumentsInput {
    query: String,
    tenant_id: String,
    #[serde(default)]
    case_id: Option<String>,
    #[serde(default)]
    document_id: Option<String>,
    #[serde(default)]
    source_name: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default = "default_n_results")]
    n_results: usize,
    #[serde(default = "default_excerpt_chars")]
    excerpt_chars: usize,
}

fn default_excerpt_chars() -> usize {
    query::DEFAULT_EXCERPT_CHARS
}

#[async_trait]
impl Tool for SearchDocumentsTool {
    fn name(&self) -> &str {
        "search_documents"
    }

    fn description(&self) -> &str {
        "Semantic search over the tenant's ingested documents"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "minLength": 2 },
                "tenant_id": { "type": "string", "minLength": 1 },
                "case_id": { "type": "string" },
                "document_id": { "type": "string" },
                "source_name": { "type": "string" },
                "tag": { "type": "string" },
                "n_results": { "type": "integer", "minimum": 1, "maximum": 50 },
                "excerpt_chars": { "type": "integer", "minimum": 50, "maximum": 5000 }
            },
            "required": ["query", "tenant_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, LexError> {
        let input: SearchDocumentsInput = from_params(params)?;
        let hits = query::search_documents(
            ctx.store.as_ref(),
            ctx.provider.as_ref(),
            &query::UserSearchParams {
                query: input.query.clone(),
                tenant_id: input.tenant_id.clone(),
                case_id: input.case_id.clone(),
                document_id: input.document_id.clone(),
                source_name: input.source_name.clone(),
                tag: input.tag.clone(),
                n_results: input.n_results,
                excerpt_chars: input.excerpt_chars,
            },
        )
        .await?;

        let count = hits.len();
        let value = json!({
            "query": input.query,
            "filters": {
                "tenant_id": input.tenant_id,
                "case_id": input.case_id,
                "document_id": input.document_id,
                "source_name": input.source_name,
                "tag": input.tag,
            },
            "count": count,
            "results": hits,
        });
        let mut response = ctx.cached_response("custom_documents", value)?;
        response["count"] = json!(count);
        Ok(response)
    }
}

// ============ Catalog-backed single-document retrieval ============

pub struct RetrieveCatalogDocumentTool;

#[derive(Deserialize)]
struct RetrieveCatalogDocumentInput {
    source: String,
    document_id: String,
    #[serde(default)]
    ingest: bool,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    case_id: Option<String>,
}

#[async_trait]
impl Tool for RetrieveCatalogDocumentTool {
    fn name(&self) -> &str {
        "retrieve_catalog_document"
    }

    fn description(&self) -> &str {
        "Render one catalog document through the external renderer, optionally ingesting it"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source": { "type": "string", "minLength": 1 },
                "document_id": { "type": "string", "minLength": 1 },
                "ingest": { "type": "boolean" },
                "tenant_id": { "type": "string" },
                "case_id": { "type": "string" }
            },
            "required": ["source", "document_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, LexError> {
        let input: RetrieveCatalogDocumentInput = from_params(params)?;
        let renderer = ctx.renderer.as_ref().ok_or_else(|| LexError::RendererFailed {
            message: "no renderer endpoint configured".to_string(),
        })?;

        // One document per call, always catalog-resolved; this path cannot
        // be turned into a crawler.
        let url = ctx
            .catalog
            .canonical_url(&input.source, &input.document_id)
            .await?;
        let rendered = renderer.render(&url).await?;

        let mut value = json!({
            "source": input.source,
            "document_id": input.document_id,
            "url": rendered.url,
            "title": rendered.title,
            "text": rendered.text,
            "metadata": rendered.metadata,
        });

        if input.ingest {
            let tenant_id = input
                .tenant_id
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    LexError::invalid_input("tenant_id is required when ingest is true")
                })?;
            let mut options = ingest::IngestOptions::new(tenant_id);
            options.case_id = input.case_id.clone();
            let report = ingest::ingest_rendered_document(
                ctx.store.as_ref(),
                ctx.provider.as_ref(),
                &options,
                &rendered,
            )
            .await?;
            value["ingestion"] = serde_json::to_value(&report)?;
        }

        ctx.cached_response("catalog", value)
    }
}

// ============ Cache access ============

pub struct GetCachedResultTool;

#[derive(Deserialize)]
struct GetCachedResultInput {
    ref_id: String,
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    page_size: Option<usize>,
    #[serde(default)]
    max_size: Option<usize>,
}

#[async_trait]
impl Tool for GetCachedResultTool {
    fn name(&self) -> &str {
        "get_cached_result"
    }

    fn description(&self) -> &str {
        "Retrieve a cached result by reference, optionally one page at a time"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ref_id": { "type": "string", "minLength": 1 },
                "page": { "type": "integer", "minimum": 1 },
                "page_size": { "type": "integer", "minimum": 1, "maximum": 200 },
                "max_size": { "type": "integer", "minimum": 1 }
            },
            "required": ["ref_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, LexError> {
        let input: GetCachedResultInput = from_params(params)?;
        ctx.cache.get(
            &input.ref_id,
            Actor::Agent,
            input.page,
            input.page_size,
            input.max_size,
        )
    }
}

// ============ Private computation ============

pub struct StoreSecretTool;

#[derive(Deserialize)]
struct StoreSecretInput {
    value: Value,
}

#[async_trait]
impl Tool for StoreSecretTool {
    fn name(&self) -> &str {
        "store_secret"
    }

    fn description(&self) -> &str {
        "Store a value the agent may compute with but never read back"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "value": {}
            },
            "required": ["value"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, LexError> {
        let input: StoreSecretInput = from_params(params)?;
        let policy = AccessPolicy {
            user: Permission::Full,
            agent: Permission::Execute,
        };
        let envelope = ctx.cache.register_with_policy(
            "secrets",
            input.value,
            Actor::Agent,
            policy,
            None,
        )?;
        // The envelope's preview would leak the value; return the handle only.
        Ok(json!({ "ref_id": envelope.ref_id, "stored": true }))
    }
}

pub struct ComputeWithSecretTool;

#[derive(Deserialize)]
struct ComputeWithSecretInput {
    secret_ref: String,
    multiplier: f64,
}

#[async_trait]
impl Tool for ComputeWithSecretTool {
    fn name(&self) -> &str {
        "compute_with_secret"
    }

    fn description(&self) -> &str {
        "Multiply a stored secret number without revealing it"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "secret_ref": { "type": "string", "minLength": 1 },
                "multiplier": { "type": "number" }
            },
            "required": ["secret_ref", "multiplier"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, LexError> {
        let input: ComputeWithSecretInput = from_params(params)?;
        let secret = ctx.cache.resolve_for_compute(&input.secret_ref, Actor::Agent)?;

        let number = match &secret {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| LexError::invalid_input("stored secret is not numeric"))?;

        // Only the derived result leaves the computation.
        Ok(json!({ "result": number * input.multiplier }))
    }
}

// ============ Demo & health ============

pub struct GenerateItemsTool;

#[derive(Deserialize)]
struct GenerateItemsInput {
    count: usize,
}

#[async_trait]
impl Tool for GenerateItemsTool {
    fn name(&self) -> &str {
        "generate_items"
    }

    fn description(&self) -> &str {
        "Generate a list of items to exercise previews and pagination"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "count": { "type": "integer", "minimum": 1, "maximum": 10000 }
            },
            "required": ["count"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, LexError> {
        let input: GenerateItemsInput = from_params(params)?;
        let items: Vec<Value> = (0..input.count)
            .map(|index| json!({ "index": index, "name": format!("item-{}", index) }))
            .collect();
        let envelope = ctx.cache.register("demo", Value::Array(items), Actor::Agent)?;
        Ok(envelope.into_value())
    }
}

pub struct HealthCheckTool;

#[async_trait]
impl Tool for HealthCheckTool {
    fn name(&self) -> &str {
        "health_check"
    }

    fn description(&self) -> &str {
        "Report server, cache, and catalog status"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value, LexError> {
        Ok(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "cache_entries": ctx.cache.len(),
            "catalog_sources": ctx.catalog.list_sources(),
            "embedding_model": ctx.provider.model_name(),
        }))
    }
}

fn validate_paths(paths: &[String]) -> Result<(), LexError> {
    if paths.is_empty() || paths.len() > 200 {
        return Err(LexError::invalid_input(
            "paths must contain between 1 and 200 items",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::embedding;
    use crate::store::MemoryVectorStore;
    use std::time::Duration;

    async fn context() -> ToolContext {
        let provider = embedding::local_provider(&EmbeddingConfig {
            dims: 32,
            ..EmbeddingConfig::default()
        })
        .await;
        ToolContext {
            config: Arc::new(Config::default()),
            store: Arc::new(MemoryVectorStore::new()),
            provider,
            catalog: Arc::new(CatalogRegistry::empty()),
            cache: Arc::new(RefCache::new(64, Duration::from_secs(3600))),
            renderer: None,
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_structured_error() {
        let ctx = context().await;
        let registry = ToolRegistry::with_builtins();
        let out = registry.dispatch("no_such_tool", json!({}), &ctx).await;
        assert_eq!(out["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_missing_required_param() {
        let ctx = context().await;
        let registry = ToolRegistry::with_builtins();
        let out = registry.dispatch("search_laws", json!({}), &ctx).await;
        assert_eq!(out["error"]["code"], "invalid_input");
        assert!(out["error"]["message"]
            .as_str()
            .unwrap()
            .contains("query"));
    }

    #[tokio::test]
    async fn test_type_mismatch_rejected() {
        let ctx = context().await;
        let registry = ToolRegistry::with_builtins();
        let out = registry
            .dispatch(
                "search_laws",
                json!({ "query": "Kaufvertrag", "n_results": "ten" }),
                &ctx,
            )
            .await;
        assert_eq!(out["error"]["code"], "invalid_input");
    }

    #[tokio::test]
    async fn test_ingest_then_search_through_tools() {
        let ctx = context().await;
        let registry = ToolRegistry::with_builtins();

        let out = registry
            .dispatch(
                "ingest_documents",
                json!({
                    "tenant_id": "t1",
                    "documents": [
                        { "source_name": "a.txt", "text": "Die Kündigungsfrist beträgt vier Wochen." }
                    ]
                }),
                &ctx,
            )
            .await;
        assert_eq!(out["status"], "complete", "unexpected: {}", out);
        assert!(out["ref_id"].is_string());

        let found = registry
            .dispatch(
                "search_documents",
                json!({ "query": "Kündigungsfrist", "tenant_id": "t1" }),
                &ctx,
            )
            .await;
        assert_eq!(found["count"], 1);
    }

    #[tokio::test]
    async fn test_generate_items_envelope_and_pagination() {
        let ctx = context().await;
        let registry = ToolRegistry::with_builtins();

        let out = registry
            .dispatch("generate_items", json!({ "count": 100 }), &ctx)
            .await;
        assert_eq!(out["preview_strategy"], "sample");
        assert_eq!(out["total_items"], 100);
        let preview = out["preview"].as_array().unwrap();
        assert!(preview.len() <= 10);

        let ref_id = out["ref_id"].as_str().unwrap();
        let page = registry
            .dispatch(
                "get_cached_result",
                json!({ "ref_id": ref_id, "page": 2, "page_size": 20 }),
                &ctx,
            )
            .await;
        let items = page["items"].as_array().unwrap();
        assert_eq!(items.len(), 20);
        assert_eq!(items[0]["index"], 20);
        assert_eq!(items[19]["index"], 39);
    }

    #[tokio::test]
    async fn test_secret_flow_never_reveals_value() {
        let ctx = context().await;
        let registry = ToolRegistry::with_builtins();

        let stored = registry
            .dispatch("store_secret", json!({ "value": 21 }), &ctx)
            .await;
        let ref_id = stored.get("ref_id").and_then(|r| r.as_str()).unwrap();
        assert!(stored.get("preview").is_none());
        assert!(stored.get("value").is_none());

        let computed = registry
            .dispatch(
                "compute_with_secret",
                json!({ "secret_ref": ref_id, "multiplier": 2.0 }),
                &ctx,
            )
            .await;
        assert_eq!(computed["result"], 42.0);

        // Reading the secret back through the cache tool is denied.
        let denied = registry
            .dispatch("get_cached_result", json!({ "ref_id": ref_id }), &ctx)
            .await;
        assert_eq!(denied["error"]["code"], "permission_denied");
    }

    #[tokio::test]
    async fn test_catalog_tool_unknown_source() {
        let ctx = context().await;
        let registry = ToolRegistry::with_builtins();
        let out = registry
            .dispatch(
                "list_available_documents",
                json!({ "source": "does-not-exist" }),
                &ctx,
            )
            .await;
        assert_eq!(out["error"]["code"], "catalog_not_found");
    }

    #[tokio::test]
    async fn test_renderer_tool_without_renderer() {
        let ctx = context().await;
        let registry = ToolRegistry::with_builtins();
        let out = registry
            .dispatch(
                "retrieve_catalog_document",
                json!({ "source": "s", "document_id": "d" }),
                &ctx,
            )
            .await;
        assert_eq!(out["error"]["code"], "renderer_failed");
    }

    #[tokio::test]
    async fn test_health_check() {
        let ctx = context().await;
        let registry = ToolRegistry::with_builtins();
        let out = registry.dispatch("health_check", json!({}), &ctx).await;
        assert_eq!(out["status"], "ok");
    }
}
