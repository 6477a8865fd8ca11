//! Typed configuration surface for the discovery core
//!
//! The embedding application parses whatever file format it likes and
//! hands the core a `CoreConfig` value. Every section defaults sensibly.

use std::collections::BTreeMap;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CoreConfig {
    pub scheduler: SchedulerConfig,
    pub discovery: DiscoveryConfig,
    pub browser: BrowserSettings,
    /// Polite-pool contact; sent to CrossRef/OpenAlex when set.
    pub contact_email: Option<String>,
    /// Per-adapter overrides keyed by rate-limit endpoint id
    /// (`arxiv`, `pubmed`, ...).
    pub adapters: BTreeMap<String, AdapterSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_seconds: u64,
    pub worker_pool_size: usize,
    pub auto_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            worker_pool_size: 4,
            auto_start: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub default_max_articles: usize,
    pub default_relevance_threshold: f64,
    pub result_retention_days: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            default_max_articles: 50,
            default_relevance_threshold: 0.7,
            result_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub max_concurrent_contexts: usize,
    pub session_max_age_days: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            max_concurrent_contexts: 5,
            session_max_age_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AdapterSettings {
    /// Requests per second, replacing the built-in bucket rate.
    pub rate_limit_override: Option<f64>,
    pub api_key: Option<String>,
}

impl CoreConfig {
    pub fn adapter(&self, endpoint_id: &str) -> Option<&AdapterSettings> {
        self.adapters.get(endpoint_id)
    }

    pub fn api_key(&self, endpoint_id: &str) -> Option<&str> {
        self.adapter(endpoint_id)
            .and_then(|a| a.api_key.as_deref())
    }
}
