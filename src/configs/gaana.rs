use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{common::http::DEFAULT_USER_AGENT, hls::StreamOptions, hls::fetcher::RetryPolicy};

fn default_stream_quality() -> String {
    "high".to_string()
}
fn default_stream_format() -> String {
    "mp4".to_string()
}
fn default_stream_api_url() -> String {
    "https://gaana.com/api/stream-url".to_string()
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_request_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GaanaConfig {
    #[serde(default = "default_stream_quality")]
    pub stream_quality: String,
    #[serde(default = "default_stream_format")]
    pub stream_format: String,
    #[serde(default = "default_stream_api_url")]
    pub stream_api_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    pub proxy: Option<HttpProxyConfig>,
    #[serde(default)]
    pub hls: HlsConfig,
}

impl Default for GaanaConfig {
    fn default() -> Self {
        Self {
            stream_quality: default_stream_quality(),
            stream_format: default_stream_format(),
            stream_api_url: default_stream_api_url(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            proxy: None,
            hls: HlsConfig::default(),
        }
    }
}

impl GaanaConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct HttpProxyConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_segment_buffer_size() -> usize {
    5
}
fn default_poll_timeout_ms() -> u64 {
    5_000
}
fn default_max_segment_retries() -> u32 {
    2
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_key_cache_capacity() -> usize {
    20
}
fn default_throttle_interval_ms() -> u64 {
    100
}

/// Tuning for the segment worker and its queue.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HlsConfig {
    #[serde(default = "default_segment_buffer_size")]
    pub segment_buffer_size: usize,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_max_segment_retries")]
    pub max_segment_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_key_cache_capacity")]
    pub key_cache_capacity: usize,
    #[serde(default = "default_throttle_interval_ms")]
    pub throttle_interval_ms: u64,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            segment_buffer_size: default_segment_buffer_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
            max_segment_retries: default_max_segment_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            key_cache_capacity: default_key_cache_capacity(),
            throttle_interval_ms: default_throttle_interval_ms(),
        }
    }
}

impl From<&HlsConfig> for StreamOptions {
    fn from(config: &HlsConfig) -> Self {
        Self {
            queue_capacity: config.segment_buffer_size.max(1),
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            throttle_interval: Duration::from_millis(config.throttle_interval_ms),
            key_cache_capacity: config.key_cache_capacity.max(1),
            retry: RetryPolicy {
                max_retries: config.max_segment_retries,
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
            },
        }
    }
}
