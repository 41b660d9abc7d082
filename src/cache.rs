//! Result cache for finished transcriptions.
//!
//! Entries are keyed by a SHA-256 fingerprint of the audio content and the
//! recognition parameters. The first writer for a fingerprint wins while its
//! entry is live; expired entries are treated as absent and removed lazily on
//! access or by the reaper.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::ServiceConfig;
use crate::models::{Segment, TranscriptionParams};

/// Bumped whenever the fingerprint layout changes
const FINGERPRINT_VERSION: &str = "v1";

/// Hex SHA-256 of raw audio bytes
pub fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Deterministic cache key for an audio digest and its parameters
pub fn fingerprint(audio_digest: &str, params: &TranscriptionParams) -> String {
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_VERSION.as_bytes());
    hasher.update([0]);
    hasher.update(audio_digest.trim().to_ascii_lowercase().as_bytes());
    hasher.update([0, u8::from(params.speaker_diarization)]);
    hasher.update([0, u8::from(params.emotion_recognition)]);
    hasher.update([0]);
    hasher.update(params.engine_model.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// A memoized result
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Vec<Segment>,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// TTL-bounded, first-writer-wins result store
#[derive(Debug)]
pub struct ResultCache {
    enabled: bool,
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(enabled: bool, ttl: Duration) -> Self {
        Self {
            enabled,
            ttl,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.cache_enabled, config.cache_ttl)
    }

    /// Look up a live entry, evicting it if it has expired
    pub fn get(&self, fingerprint: &str) -> Option<Vec<Segment>> {
        if !self.enabled {
            return None;
        }
        let now = Instant::now();

        let found = match self.entries.get(fingerprint) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        // The read guard is gone here, removing from its shard cannot deadlock
        match found {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.entries
                    .remove_if(fingerprint, |_, entry| entry.is_expired(now));
                debug!("Evicted expired cache entry {}", fingerprint);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value` unless a live entry already exists.
    ///
    /// Returns true when the value was written.
    pub fn put(&self, fingerprint: &str, value: Vec<Segment>) -> bool {
        if !self.enabled {
            return false;
        }
        let now = Instant::now();
        let fresh = CacheEntry {
            value,
            created_at: now,
            expires_at: now + self.ttl,
        };

        match self.entries.entry(fingerprint.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(fresh);
                    true
                } else {
                    debug!("Cache entry {} already live, keeping first write", fingerprint);
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        }
    }

    /// Remove every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Fraction of lookups answered from the cache
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn segment(text: &str) -> Vec<Segment> {
        vec![Segment {
            text: text.to_string(),
            end_time: 1.5,
            ..Default::default()
        }]
    }

    #[tokio::test(start_paused = true)]
    async fn first_write_wins_while_live() {
        let cache = ResultCache::new(true, Duration::from_secs(60));
        assert!(cache.put("f", segment("first")));
        assert!(!cache.put("f", segment("second")));
        assert_eq!(cache.get("f"), Some(segment("first")));
    }

    #[tokio::test(start_paused = true)]
    async fn entry_is_absent_after_ttl() {
        let cache = ResultCache::new(true, Duration::from_secs(1));
        cache.put("f1", segment("hello"));

        advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("f1"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_can_be_rewritten() {
        let cache = ResultCache::new(true, Duration::from_secs(1));
        cache.put("f", segment("old"));
        advance(Duration::from_secs(1)).await;

        assert!(cache.put("f", segment("new")));
        assert_eq!(cache.get("f"), Some(segment("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired_entries() {
        let cache = ResultCache::new(true, Duration::from_secs(10));
        cache.put("a", segment("a"));
        advance(Duration::from_secs(6)).await;
        cache.put("b", segment("b"));
        advance(Duration::from_secs(6)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("b").is_some());
    }

    #[tokio::test]
    async fn hit_rate_tracks_lookups() {
        let cache = ResultCache::new(true, Duration::from_secs(60));
        assert_eq!(cache.hit_rate(), 0.0);
        cache.put("f", segment("x"));
        cache.get("f");
        cache.get("missing");
        cache.get("f");
        cache.get("missing");
        assert!((cache.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn disabled_cache_stores_nothing() {
        let cache = ResultCache::new(false, Duration::from_secs(60));
        assert!(!cache.put("f", segment("x")));
        assert_eq!(cache.get("f"), None);
        assert_eq!(cache.hit_rate(), 0.0);
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let params = TranscriptionParams::default();
        let digest = digest_bytes(b"audio bytes");
        assert_eq!(fingerprint(&digest, &params), fingerprint(&digest, &params));
        assert_eq!(fingerprint(&digest, &params).len(), 64);
    }

    #[test]
    fn fingerprint_depends_on_every_parameter() {
        let digest = digest_bytes(b"audio bytes");
        let base = TranscriptionParams::default();
        let no_speakers = TranscriptionParams {
            speaker_diarization: false,
            ..base.clone()
        };
        let no_emotion = TranscriptionParams {
            emotion_recognition: false,
            ..base.clone()
        };
        let other_model = TranscriptionParams {
            engine_model: "16k_en".into(),
            ..base.clone()
        };

        let keys = [
            fingerprint(&digest, &base),
            fingerprint(&digest, &no_speakers),
            fingerprint(&digest, &no_emotion),
            fingerprint(&digest, &other_model),
            fingerprint(&digest_bytes(b"other audio"), &base),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
