//! Reference cache: content-addressed storage for large tool results.
//!
//! Tools never return large payloads inline. A result is registered here and
//! the caller receives an opaque envelope — `ref_id`, a bounded preview, and
//! summary fields — with the full value retrievable (and pageable) through
//! `get_cached_result`. At the RPC boundary only the envelope shape is
//! advertised; the inner value's shape stays internal to this module.
//!
//! # Namespaces and permissions
//!
//! Namespaces are `/`-separated hierarchies (`custom_documents`,
//! `user:alice/session:abc`). Policies attach to namespace prefixes; an
//! entry inherits the policy of its longest registered ancestor unless it
//! carries an override. Each policy grants a [`Permission`] per actor:
//!
//! - `None` — no access
//! - `Execute` — the value may be resolved inside a computation, but the
//!   raw value never flows back to the caller
//! - `Read` — the value may be returned in full
//! - `Write` — entries may be created or overwritten
//! - `Full` — read + write
//!
//! # Lifecycle
//!
//! Entries expire by TTL (default 24 h) and are evicted LRU beyond the
//! capacity bound. Eviction is atomic per entry: a `ref_id` is either fully
//! present or fully absent.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::LexError;

/// Hard bound on a single cached value's serialized size.
const MAX_VALUE_BYTES: usize = 8_000_000;

/// Access level for one actor class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Permission {
    None,
    Execute,
    Read,
    Write,
    Full,
}

impl Permission {
    pub fn can_read(&self) -> bool {
        matches!(self, Permission::Read | Permission::Full)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, Permission::Write | Permission::Full)
    }

    /// EXECUTE is the weakest non-`None` capability: every grant above
    /// `None` may feed a value into a computation.
    pub fn can_execute(&self) -> bool {
        !matches!(self, Permission::None)
    }
}

/// Who is acting: the human user or the AI agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub user: Permission,
    pub agent: Permission,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            user: Permission::Full,
            agent: Permission::Full,
        }
    }
}

impl AccessPolicy {
    fn grant(&self, actor: Actor) -> Permission {
        match actor {
            Actor::User => self.user,
            Actor::Agent => self.agent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewStrategy {
    /// List-shaped values: the first few items plus every stride-th.
    Sample,
    /// String-shaped values: a character-bounded prefix.
    Truncate,
    /// List-shaped values: preview is page 1; further pages via `get`.
    Paginate,
}

#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// Item budget for sample/paginate previews.
    pub max_items: usize,
    /// Leading items always included in a sample.
    pub sample_head: usize,
    /// Every stride-th item after the head.
    pub sample_stride: usize,
    /// Character budget for truncate previews.
    pub max_chars: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            max_items: 10,
            sample_head: 5,
            sample_stride: 10,
            max_chars: 2048,
        }
    }
}

/// The wire envelope returned in place of a large result.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEnvelope {
    pub ref_id: String,
    pub preview: Value,
    pub preview_strategy: PreviewStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_items: Option<usize>,
    /// Summary fields merged into the envelope at the top level.
    #[serde(flatten)]
    pub summary: serde_json::Map<String, Value>,
}

impl CacheEnvelope {
    pub fn with_summary(mut self, key: &str, value: Value) -> Self {
        self.summary.insert(key.to_string(), value);
        self
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(&self).unwrap_or(Value::Null)
    }
}

struct CachedEntry {
    value: Value,
    strategy: PreviewStrategy,
    policy: AccessPolicy,
    created_at: Instant,
    ttl: Duration,
}

impl CachedEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

pub struct RefCache {
    entries: Mutex<LruCache<String, CachedEntry>>,
    default_ttl: Duration,
    preview: PreviewConfig,
    /// Namespace-prefix policies; the longest matching prefix wins.
    policies: Vec<(String, AccessPolicy)>,
}

impl RefCache {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self::with_preview(capacity, default_ttl, PreviewConfig::default())
    }

    pub fn with_preview(capacity: usize, default_ttl: Duration, preview: PreviewConfig) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
            preview,
            policies: Vec::new(),
        }
    }

    /// Attach a policy to a namespace prefix. Descendants inherit it unless
    /// a longer prefix (or a per-entry override) says otherwise.
    pub fn set_namespace_policy(mut self, prefix: impl Into<String>, policy: AccessPolicy) -> Self {
        self.policies.push((prefix.into(), policy));
        self
    }

    fn namespace_policy(&self, namespace: &str) -> AccessPolicy {
        let mut best: Option<(&str, AccessPolicy)> = None;
        for (prefix, policy) in &self.policies {
            let applies =
                namespace == prefix || namespace.starts_with(&format!("{}/", prefix));
            if applies && best.map(|(b, _)| prefix.len() > b.len()).unwrap_or(true) {
                best = Some((prefix, *policy));
            }
        }
        best.map(|(_, p)| p).unwrap_or_default()
    }

    /// Register a value and return its envelope.
    ///
    /// `ref_id` is a pure function of `(namespace, content)`: the same value
    /// registered twice within its TTL yields the same handle. A hash-prefix
    /// collision with different content extends the prefix.
    pub fn register(
        &self,
        namespace: &str,
        value: Value,
        actor: Actor,
    ) -> Result<CacheEnvelope, LexError> {
        let policy = self.namespace_policy(namespace);
        self.register_with_policy(namespace, value, actor, policy, None)
    }

    /// Register with an explicit per-entry policy (e.g. EXECUTE-only
    /// secrets) and optional strategy override.
    pub fn register_with_policy(
        &self,
        namespace: &str,
        value: Value,
        actor: Actor,
        policy: AccessPolicy,
        strategy: Option<PreviewStrategy>,
    ) -> Result<CacheEnvelope, LexError> {
        if !self.namespace_policy(namespace).grant(actor).can_write() {
            return Err(LexError::PermissionDenied {
                message: format!("no write access to namespace {}", namespace),
            });
        }

        let serialized = canonical_json(&value);
        if serialized.len() > MAX_VALUE_BYTES {
            return Err(LexError::CacheFull);
        }

        let strategy = strategy.unwrap_or_else(|| default_strategy(&value));
        let digest = {
            let mut hasher = Sha256::new();
            hasher.update(namespace.as_bytes());
            hasher.update(b"\n");
            hasher.update(serialized.as_bytes());
            format!("{:x}", hasher.finalize())
        };

        let mut entries = self
            .entries
            .lock()
            .map_err(|_| LexError::internal("cache lock poisoned"))?;

        let now = Instant::now();
        let mut prefix_len = 12;
        let ref_id = loop {
            let candidate = format!("{}:{}", namespace, &digest[..prefix_len]);
            match entries.peek(&candidate) {
                Some(existing)
                    if !existing.is_expired(now) && canonical_json(&existing.value) != serialized =>
                {
                    // Live entry with different content under this prefix.
                    if prefix_len >= digest.len() {
                        return Err(LexError::internal("content hash collision"));
                    }
                    prefix_len = (prefix_len + 4).min(digest.len());
                }
                _ => break candidate,
            }
        };

        let total_items = value.as_array().map(|a| a.len());
        let preview = build_preview(&value, strategy, &self.preview);

        entries.push(
            ref_id.clone(),
            CachedEntry {
                value,
                strategy,
                policy,
                created_at: now,
                ttl: self.default_ttl,
            },
        );

        Ok(CacheEnvelope {
            ref_id,
            preview,
            preview_strategy: strategy,
            total_items,
            summary: serde_json::Map::new(),
        })
    }

    /// Retrieve a cached value (or one page of it).
    ///
    /// Requires READ. List-shaped values support `page`/`page_size`;
    /// string-shaped values support `max_chars`.
    pub fn get(
        &self,
        ref_id: &str,
        actor: Actor,
        page: Option<usize>,
        page_size: Option<usize>,
        max_chars: Option<usize>,
    ) -> Result<Value, LexError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| LexError::internal("cache lock poisoned"))?;

        let now = Instant::now();
        if entries.peek(ref_id).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.pop(ref_id);
        }
        let entry = entries.get(ref_id).ok_or_else(|| LexError::NotFound {
            resource: format!("cached result {}", ref_id),
        })?;

        if !entry.policy.grant(actor).can_read() {
            return Err(LexError::PermissionDenied {
                message: format!("no read access to {}", ref_id),
            });
        }

        // Paginate-strategy entries answer unpaged reads with page 1.
        let page = match (&entry.value, page, entry.strategy) {
            (Value::Array(_), None, PreviewStrategy::Paginate) => Some(1),
            (_, page, _) => page,
        };

        match (&entry.value, page) {
            (Value::Array(items), Some(page)) => {
                if page == 0 {
                    return Err(LexError::invalid_input("page is 1-based"));
                }
                let page_size = page_size.unwrap_or(self.preview.max_items).max(1);
                let total_pages = items.len().div_ceil(page_size).max(1);
                if page > total_pages {
                    return Err(LexError::invalid_input(format!(
                        "page {} out of range (total_pages {})",
                        page, total_pages
                    )));
                }
                let start = (page - 1) * page_size;
                let slice: Vec<Value> =
                    items.iter().skip(start).take(page_size).cloned().collect();
                Ok(serde_json::json!({
                    "ref_id": ref_id,
                    "page": page,
                    "page_size": page_size,
                    "total_pages": total_pages,
                    "total_items": items.len(),
                    "items": slice,
                }))
            }
            (Value::String(s), _) => {
                let cap = max_chars.unwrap_or(usize::MAX);
                if s.chars().count() > cap {
                    let truncated: String = s.chars().take(cap).collect();
                    Ok(serde_json::json!({
                        "ref_id": ref_id,
                        "value": truncated,
                        "truncated": true,
                    }))
                } else {
                    Ok(serde_json::json!({
                        "ref_id": ref_id,
                        "value": s,
                        "truncated": false,
                    }))
                }
            }
            (value, _) => Ok(serde_json::json!({
                "ref_id": ref_id,
                "value": value,
            })),
        }
    }

    /// Resolve a cached value for internal computation.
    ///
    /// Requires EXECUTE. Callers must not echo the resolved value back to
    /// the actor; only derived results leave the computation.
    pub fn resolve_for_compute(&self, ref_id: &str, actor: Actor) -> Result<Value, LexError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| LexError::internal("cache lock poisoned"))?;

        let now = Instant::now();
        if entries.peek(ref_id).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.pop(ref_id);
        }
        let entry = entries.get(ref_id).ok_or_else(|| LexError::NotFound {
            resource: format!("cached result {}", ref_id),
        })?;

        if !entry.policy.grant(actor).can_execute() {
            return Err(LexError::PermissionDenied {
                message: format!("no execute access to {}", ref_id),
            });
        }
        Ok(entry.value.clone())
    }

    /// Number of live entries (expired entries are swept first).
    pub fn len(&self) -> usize {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            entries.pop(&key);
        }
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn default_strategy(value: &Value) -> PreviewStrategy {
    match value {
        Value::Array(_) => PreviewStrategy::Sample,
        _ => PreviewStrategy::Truncate,
    }
}

fn build_preview(value: &Value, strategy: PreviewStrategy, config: &PreviewConfig) -> Value {
    match (strategy, value) {
        (PreviewStrategy::Sample, Value::Array(items)) => {
            let mut sampled = Vec::new();
            for (index, item) in items.iter().enumerate() {
                let in_head = index < config.sample_head;
                let on_stride = index >= config.sample_head
                    && (index - config.sample_head) % config.sample_stride == 0;
                if in_head || on_stride {
                    sampled.push(item.clone());
                }
                if sampled.len() >= config.max_items {
                    break;
                }
            }
            Value::Array(sampled)
        }
        (PreviewStrategy::Paginate, Value::Array(items)) => {
            Value::Array(items.iter().take(config.max_items).cloned().collect())
        }
        (_, Value::String(s)) => {
            if s.chars().count() > config.max_chars {
                Value::String(s.chars().take(config.max_chars).collect())
            } else {
                value.clone()
            }
        }
        _ => value.clone(),
    }
}

/// Deterministic serialization for hashing: object keys sorted recursively.
fn canonical_json(value: &Value) -> String {
    fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
                sorted.sort_by_key(|(k, _)| k.clone());
                let mut out = serde_json::Map::new();
                for (k, v) in sorted {
                    out.insert(k.clone(), canonicalize(v));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            other => other.clone(),
        }
    }
    canonicalize(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache() -> RefCache {
        RefCache::new(16, Duration::from_secs(3600))
    }

    #[test]
    fn test_ref_id_is_pure_function_of_content() {
        let cache = cache();
        let a = cache
            .register("demo", json!({"b": 1, "a": 2}), Actor::Agent)
            .unwrap();
        // Key order must not matter.
        let b = cache
            .register("demo", json!({"a": 2, "b": 1}), Actor::Agent)
            .unwrap();
        assert_eq!(a.ref_id, b.ref_id);
        assert!(a.ref_id.starts_with("demo:"));
    }

    #[test]
    fn test_different_content_different_ref_id() {
        let cache = cache();
        let a = cache.register("demo", json!([1, 2, 3]), Actor::Agent).unwrap();
        let b = cache.register("demo", json!([4, 5, 6]), Actor::Agent).unwrap();
        assert_ne!(a.ref_id, b.ref_id);
    }

    #[test]
    fn test_get_round_trip() {
        let cache = cache();
        let envelope = cache
            .register("demo", json!("ein langer Text"), Actor::Agent)
            .unwrap();
        let out = cache
            .get(&envelope.ref_id, Actor::Agent, None, None, None)
            .unwrap();
        assert_eq!(out["value"], "ein langer Text");
        assert_eq!(out["truncated"], false);
    }

    #[test]
    fn test_sample_preview_budget() {
        let cache = cache();
        let items: Vec<Value> = (0..100).map(|i| json!({"index": i})).collect();
        let envelope = cache
            .register("demo", Value::Array(items), Actor::Agent)
            .unwrap();

        assert_eq!(envelope.preview_strategy, PreviewStrategy::Sample);
        assert_eq!(envelope.total_items, Some(100));
        let preview = envelope.preview.as_array().unwrap();
        assert!(preview.len() <= 10);
        // Head, then stride.
        assert_eq!(preview[0]["index"], 0);
        assert_eq!(preview[4]["index"], 4);
        assert_eq!(preview[5]["index"], 5);
        assert_eq!(preview[6]["index"], 15);
    }

    #[test]
    fn test_pagination_returns_original_order() {
        let cache = cache();
        let items: Vec<Value> = (0..100).map(|i| json!(i)).collect();
        let envelope = cache
            .register("demo", Value::Array(items), Actor::Agent)
            .unwrap();

        let page = cache
            .get(&envelope.ref_id, Actor::Agent, Some(2), Some(20), None)
            .unwrap();
        assert_eq!(page["page"], 2);
        assert_eq!(page["total_pages"], 5);
        let slice = page["items"].as_array().unwrap();
        assert_eq!(slice.len(), 20);
        assert_eq!(slice[0], json!(20));
        assert_eq!(slice[19], json!(39));
    }

    #[test]
    fn test_page_out_of_range() {
        let cache = cache();
        let envelope = cache
            .register("demo", json!([1, 2, 3]), Actor::Agent)
            .unwrap();
        let err = cache
            .get(&envelope.ref_id, Actor::Agent, Some(9), Some(10), None)
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn test_execute_without_read() {
        let cache = cache();
        let policy = AccessPolicy {
            user: Permission::Full,
            agent: Permission::Execute,
        };
        let envelope = cache
            .register_with_policy("secrets", json!(42), Actor::Agent, policy, None)
            .unwrap();

        // The agent may compute with the value...
        let value = cache
            .resolve_for_compute(&envelope.ref_id, Actor::Agent)
            .unwrap();
        assert_eq!(value, json!(42));

        // ...but never read it back.
        let err = cache
            .get(&envelope.ref_id, Actor::Agent, None, None, None)
            .unwrap_err();
        assert_eq!(err.code(), "permission_denied");

        // The user keeps full access.
        assert!(cache.get(&envelope.ref_id, Actor::User, None, None, None).is_ok());
    }

    #[test]
    fn test_namespace_policy_inheritance() {
        let cache = RefCache::new(16, Duration::from_secs(3600)).set_namespace_policy(
            "user:alice",
            AccessPolicy {
                user: Permission::Full,
                agent: Permission::None,
            },
        );
        // Child namespaces inherit the ancestor's policy.
        let err = cache
            .register("user:alice/session:abc", json!(1), Actor::Agent)
            .unwrap_err();
        assert_eq!(err.code(), "permission_denied");

        // Unrelated namespaces use the default.
        assert!(cache.register("public", json!(1), Actor::Agent).is_ok());
    }

    #[test]
    fn test_lru_eviction_is_atomic() {
        let cache = RefCache::new(2, Duration::from_secs(3600));
        let a = cache.register("demo", json!("a"), Actor::Agent).unwrap();
        let _b = cache.register("demo", json!("b"), Actor::Agent).unwrap();
        let _c = cache.register("demo", json!("c"), Actor::Agent).unwrap();

        assert_eq!(cache.len(), 2);
        // The oldest entry is fully gone, not partially present.
        let err = cache.get(&a.ref_id, Actor::Agent, None, None, None).unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = RefCache::new(16, Duration::from_millis(0));
        let envelope = cache.register("demo", json!(1), Actor::Agent).unwrap();
        let err = cache
            .get(&envelope.ref_id, Actor::Agent, None, None, None)
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_oversized_value_rejected() {
        let cache = cache();
        let huge = "x".repeat(MAX_VALUE_BYTES + 1);
        let err = cache.register("demo", json!(huge), Actor::Agent).unwrap_err();
        assert_eq!(err.code(), "cache_full");
    }

    #[test]
    fn test_envelope_serializes_summary_at_top_level() {
        let cache = cache();
        let envelope = cache
            .register("demo", json!([1, 2]), Actor::Agent)
            .unwrap()
            .with_summary("count", json!(2));
        let value = envelope.into_value();
        assert_eq!(value["count"], 2);
        assert!(value["ref_id"].is_string());
        assert_eq!(value["preview_strategy"], "sample");
    }
}
