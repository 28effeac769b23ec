use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use tracing::{debug, warn};

use super::{
    crypto::{AES_BLOCK_SIZE, decrypt_aes128_cbc, derive_iv},
    signal::StopSignal,
    types::{KeyInfo, MapInfo, Segment},
};
use crate::common::{
    errors::HlsError,
    http::{HttpResponse, HttpTransport},
};

/// Bounded retries with exponential backoff for segment downloads.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): base * 2^retry.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << retry.min(16))
    }
}

/// Raw key bytes by key URI, evicting the oldest insertion when full.
struct KeyCache {
    capacity: usize,
    keys: HashMap<String, Bytes>,
    order: VecDeque<String>,
}

impl KeyCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            keys: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, uri: &str) -> Option<Bytes> {
        self.keys.get(uri).cloned()
    }

    fn insert(&mut self, uri: String, key: Bytes) {
        if self.keys.contains_key(&uri) {
            self.keys.insert(uri, key);
            return;
        }
        while self.keys.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.keys.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(uri.clone());
        self.keys.insert(uri, key);
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Downloads and decrypts keys, init segments and media segments.
///
/// One fetcher belongs to one stream worker; its key cache dies with it.
pub struct SegmentFetcher {
    transport: Arc<dyn HttpTransport>,
    keys: KeyCache,
    retry: RetryPolicy,
    stop: Arc<StopSignal>,
}

impl SegmentFetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        retry: RetryPolicy,
        key_cache_capacity: usize,
        stop: Arc<StopSignal>,
    ) -> Self {
        Self {
            transport,
            keys: KeyCache::new(key_cache_capacity),
            retry,
            stop,
        }
    }

    fn get(&self, url: &str, what: &str) -> Result<Bytes, HlsError> {
        let HttpResponse { status, body } = self
            .transport
            .get(url)
            .map_err(|e| HlsError::transient(url, e))?;

        match status {
            200 | 206 => Ok(body),
            403 => {
                warn!("HLS: {} request returned 403, token expired: {}", what, url);
                Err(HlsError::AuthorizationExpired {
                    url: url.to_string(),
                })
            }
            _ => Err(HlsError::transient(
                url,
                format!("{} request failed: {}", what, status),
            )),
        }
    }

    /// Raw key bytes for `key`, from cache when possible.
    pub fn fetch_key(&mut self, key: &KeyInfo) -> Result<Bytes, HlsError> {
        let uri = key
            .uri
            .as_deref()
            .ok_or_else(|| HlsError::MalformedPlaylist("encryption key without URI".to_string()))?;

        if let Some(cached) = self.keys.get(uri) {
            return Ok(cached);
        }

        let data = self.get(uri, "key")?;
        if data.is_empty() {
            return Err(HlsError::transient(uri, "empty key response"));
        }

        debug!("HLS: cached key {} ({} bytes)", uri, data.len());
        self.keys.insert(uri.to_string(), data.clone());
        Ok(data)
    }

    /// Init segment bytes. Decrypted only under an explicit IV and when the
    /// payload is block aligned; anything else is assumed to be plaintext.
    pub fn fetch_map(&mut self, map: &MapInfo, key: Option<&KeyInfo>) -> Result<Bytes, HlsError> {
        let data = self.get(&map.uri, "map")?;

        let Some(key) = key.filter(|k| k.is_encrypted()) else {
            return Ok(data);
        };
        let Some(iv) = key.iv else {
            return Ok(data);
        };
        if data.len() % AES_BLOCK_SIZE != 0 {
            return Ok(data);
        }

        let raw_key = self.fetch_key(key)?;
        decrypt_aes128_cbc(data.to_vec(), &raw_key, &iv).map(Bytes::from)
    }

    /// Downloads and decrypts `segment`, retrying transient failures.
    ///
    /// Authorization expiry, decryption failures and cancellation are returned
    /// straight away.
    pub fn fetch_segment(&mut self, segment: &Segment) -> Result<Bytes, HlsError> {
        let mut retry = 0;
        loop {
            match self.try_fetch_segment(segment) {
                Ok(data) => return Ok(data),
                Err(e) if e.is_retryable() && retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.delay_for(retry);
                    warn!(
                        "HLS: segment {} retry {} in {:?}: {}",
                        segment.sequence, retry, delay, e
                    );
                    if self.stop.wait_timeout(delay) {
                        return Err(HlsError::Cancelled);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_fetch_segment(&mut self, segment: &Segment) -> Result<Bytes, HlsError> {
        if self.stop.is_stopped() {
            return Err(HlsError::Cancelled);
        }

        let data = self.get(&segment.url, "segment")?;

        match segment.key.as_ref().filter(|k| k.is_encrypted()) {
            Some(key) => {
                let raw_key = self.fetch_key(key)?;
                let iv = key.iv.unwrap_or_else(|| derive_iv(segment.sequence));
                decrypt_aes128_cbc(data.to_vec(), &raw_key, &iv).map(Bytes::from)
            }
            None => Ok(data),
        }
    }

    pub fn cached_keys(&self) -> usize {
        self.keys.len()
    }
}
