//! Content-Addressed Cache
//!
//! Avoids redundant retrievals and generation calls within and across runs.
//! Keys are sha256 fingerprints of `(kind, input)`; entries live under
//! `data/cache/<shard>/<fingerprint>.bin` where the shard is the first two
//! hex characters of the fingerprint. Each entry is a small envelope of
//! stored-at seconds followed by the raw payload, so freshness survives
//! file-system timestamp quirks.
//!
//! Writes take a per-shard lock keyed by fingerprint prefix; reads of
//! distinct shards never contend. Streaming generation is never cached, but
//! the accumulated final text may be stored under the non-streaming key.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use kestrel_llm::{GenerationProvider, LlmResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::AppResult;

/// Number of per-shard write locks (shards map onto these by prefix).
const LOCK_STRIPES: usize = 16;

/// What produced a cached value; part of the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Retrieve,
    Generate,
    Embed,
    Websearch,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Retrieve => "retrieve",
            CacheKind::Generate => "generate",
            CacheKind::Embed => "embed",
            CacheKind::Websearch => "websearch",
        }
    }
}

/// Sharded file-backed cache.
pub struct Cache {
    root: PathBuf,
    websearch_ttl: Duration,
    locks: Vec<Mutex<()>>,
}

impl Cache {
    pub fn new(root: PathBuf, websearch_ttl: Duration) -> Self {
        Self {
            root,
            websearch_ttl,
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Stable fingerprint of `(kind, input)`.
    pub fn fingerprint(kind: CacheKind, input: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(input.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, fingerprint: &str) -> PathBuf {
        let shard = &fingerprint[..2];
        self.root.join(shard).join(format!("{}.bin", fingerprint))
    }

    fn stripe(&self, fingerprint: &str) -> &Mutex<()> {
        let byte = u8::from_str_radix(&fingerprint[..2], 16).unwrap_or(0);
        &self.locks[byte as usize % LOCK_STRIPES]
    }

    /// Freshness bound for a kind; `None` means no expiry.
    fn ttl(&self, kind: CacheKind) -> Option<Duration> {
        match kind {
            CacheKind::Websearch => Some(self.websearch_ttl),
            CacheKind::Retrieve | CacheKind::Generate | CacheKind::Embed => None,
        }
    }

    /// Fetch raw bytes for `(kind, input)` if present and fresh.
    pub async fn get(&self, kind: CacheKind, input: &str) -> Option<Vec<u8>> {
        let fingerprint = Self::fingerprint(kind, input);
        let path = self.entry_path(&fingerprint);
        let bytes = tokio::fs::read(&path).await.ok()?;
        if bytes.len() < 8 {
            warn!(target: "kestrel_cache", "discarding truncated cache entry {}", fingerprint);
            return None;
        }
        let stored_at = u64::from_le_bytes(bytes[..8].try_into().ok()?);
        if let Some(ttl) = self.ttl(kind) {
            let now = unix_now();
            if now.saturating_sub(stored_at) > ttl.as_secs() {
                debug!(target: "kestrel_cache", "stale {} entry {}", kind.as_str(), fingerprint);
                return None;
            }
        }
        Some(bytes[8..].to_vec())
    }

    /// Store raw bytes under `(kind, input)`.
    pub async fn put(&self, kind: CacheKind, input: &str, payload: &[u8]) -> AppResult<()> {
        let fingerprint = Self::fingerprint(kind, input);
        let path = self.entry_path(&fingerprint);
        let _guard = self.stripe(&fingerprint).lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut bytes = Vec::with_capacity(payload.len() + 8);
        bytes.extend_from_slice(&unix_now().to_le_bytes());
        bytes.extend_from_slice(payload);
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    /// Typed convenience: fetch and deserialize a JSON payload.
    pub async fn get_json<T: DeserializeOwned>(&self, kind: CacheKind, input: &str) -> Option<T> {
        let bytes = self.get(kind, input).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(target: "kestrel_cache", "undecodable cache entry ({}), ignoring", e);
                None
            }
        }
    }

    /// Typed convenience: serialize and store a JSON payload.
    pub async fn put_json<T: Serialize>(
        &self,
        kind: CacheKind,
        input: &str,
        value: &T,
    ) -> AppResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(kind, input, &bytes).await
    }
}

/// Generate through the cache: non-streaming generation calls are looked up
/// before hitting the provider and stored afterwards.
pub async fn cached_generate(
    cache: &Cache,
    provider: &Arc<dyn GenerationProvider>,
    prompt: &str,
    model: &str,
) -> LlmResult<String> {
    let key = format!("{}\u{1f}{}", model, prompt);
    if let Some(text) = cache.get_json::<String>(CacheKind::Generate, &key).await {
        debug!(target: "kestrel_cache", model, "generation cache hit");
        return Ok(text);
    }
    let text = provider.generate(prompt, model).await?;
    if let Err(e) = cache.put_json(CacheKind::Generate, &key, &text).await {
        warn!(target: "kestrel_cache", "failed to store generation result: {}", e);
    }
    Ok(text)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
