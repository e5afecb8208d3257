//! Response cache for deterministic-ish LLM calls.
//!
//! Keyed by `(hash(messages), temperature, max_tokens)`. Only calls with
//! temperature below 0.5 are cached by the client. Expiry is lazy: an entry
//! past its TTL is dropped on the access that finds it.

use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::{ChatMessage, ChatOptions, LlmReply};

/// Default entry lifetime: one hour.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Opaque key-value interface for optional cache durability, provided by the
/// host. Values are opaque strings; store errors are swallowed by the cache
/// (durability is best-effort).
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: String);
}

/// File-per-entry store, typically rooted at `<workspace>/.cache/llm/`.
pub struct FsKvStore {
    dir: PathBuf,
}

impl FsKvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KvStore for FsKvStore {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    fn put(&self, key: &str, value: String) {
        if std::fs::create_dir_all(&self.dir).is_err() {
            return;
        }
        if let Err(e) = std::fs::write(self.path_for(key), value) {
            tracing::debug!(error = %e, "cache persistence write failed");
        }
    }
}

struct CacheEntry {
    reply: LlmReply,
    inserted_at: Instant,
}

/// Concurrent response cache with lazy TTL eviction and optional write-through
/// persistence.
pub struct ResponseCache {
    entries: DashMap<u64, CacheEntry>,
    ttl: Duration,
    persistence: Option<Arc<dyn KvStore>>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            persistence: None,
        }
    }

    /// Enables write-through persistence. Persisted entries outlive the
    /// process but are only consulted on in-memory misses; TTL does not apply
    /// to them (the host owns eviction of its store).
    pub fn with_persistence(mut self, store: Arc<dyn KvStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    /// Cache key over message roles+contents and the sampling knobs.
    pub fn key(messages: &[ChatMessage], options: &ChatOptions) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for m in messages {
            (m.role as u8).hash(&mut hasher);
            m.content.hash(&mut hasher);
        }
        options.temperature.to_bits().hash(&mut hasher);
        options.max_tokens.hash(&mut hasher);
        hasher.finish()
    }

    /// Whether the client caches a call with these options.
    pub fn cacheable(options: &ChatOptions) -> bool {
        options.temperature < 0.5
    }

    pub fn get(&self, key: u64) -> Option<LlmReply> {
        let expired = match self.entries.get(&key) {
            Some(entry) => {
                if entry.inserted_at.elapsed() <= self.ttl {
                    return Some(entry.reply.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(&key);
        }
        // In-memory miss: consult the host's store when configured.
        if let Some(ref store) = self.persistence {
            if let Some(reply) = store
                .get(&format!("{key:016x}"))
                .and_then(|raw| serde_json::from_str::<LlmReply>(&raw).ok())
            {
                self.entries.insert(
                    key,
                    CacheEntry {
                        reply: reply.clone(),
                        inserted_at: Instant::now(),
                    },
                );
                return Some(reply);
            }
        }
        None
    }

    pub fn put(&self, key: u64, reply: LlmReply) {
        if let Some(ref store) = self.persistence {
            if let Ok(raw) = serde_json::to_string(&reply) {
                store.put(&format!("{key:016x}"), raw);
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                reply,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
