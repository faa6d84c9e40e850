// src/config.rs
//! Run configuration, loaded once at start-up and passed down by reference.
//!
//! Lookup order for [`load_default`]:
//! 1) `$NEWS_RELAY_CONFIG`
//! 2) `config/news_relay.toml`
//! 3) `config/news_relay.json`
//!
//! No file at all is an error: nothing may be fetched without sources.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engage::Thresholds;
use crate::extract::ExtractSettings;
use crate::image::ImageSettings;
use crate::ingest::types::Source;
use crate::ingest::FetchSettings;
use crate::pipeline::DailySlot;
use crate::retry::{Backoff, RetryPolicy};

pub const ENV_CONFIG_PATH: &str = "NEWS_RELAY_CONFIG";
pub const DEFAULT_TOML_PATH: &str = "config/news_relay.toml";
pub const DEFAULT_JSON_PATH: &str = "config/news_relay.json";

pub const DEFAULT_PLACEHOLDER_IMAGE: &str = "https://upload.wikimedia.org/wikipedia/commons/thumb/a/ac/No_image_available.svg/768px-No_image_available.svg.png";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Only sources with one of these region tags are used; empty = all.
    #[serde(default)]
    pub include_regions: Vec<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    /// Absent means the follow-back loop cannot run.
    #[serde(default)]
    pub thresholds: Option<Thresholds>,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub backoff: Backoff,
    pub max_delay_secs: u64,
    pub workers: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_retries: 2,
            base_delay_secs: 5,
            backoff: Backoff::Fixed,
            max_delay_secs: 60,
            workers: 4,
        }
    }
}

impl FetchConfig {
    pub fn policy(&self) -> RetryPolicy {
        let base = Duration::from_secs(self.base_delay_secs);
        match self.backoff {
            Backoff::Fixed => RetryPolicy::fixed(self.max_retries, base),
            Backoff::Exponential => RetryPolicy::exponential(
                self.max_retries,
                base,
                Duration::from_secs(self.max_delay_secs),
            ),
        }
    }

    pub fn settings(&self) -> FetchSettings {
        FetchSettings {
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            policy: self.policy(),
            workers: self.workers.max(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub page_timeout_secs: u64,
    pub page_max_retries: u32,
    pub page_retry_delay_secs: u64,
    pub page_max_bytes: usize,
    pub min_body_chars: usize,
    pub max_image_candidates: usize,
    /// Empty string disables the placeholder step.
    pub placeholder_image_url: String,
    pub image_timeout_secs: u64,
    pub image_max_bytes: usize,
    pub workers: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            page_timeout_secs: 5,
            page_max_retries: 1,
            page_retry_delay_secs: 1,
            page_max_bytes: 4 * 1024 * 1024,
            min_body_chars: 80,
            max_image_candidates: 5,
            placeholder_image_url: DEFAULT_PLACEHOLDER_IMAGE.to_string(),
            image_timeout_secs: 10,
            image_max_bytes: 8 * 1024 * 1024,
            workers: 10,
        }
    }
}

impl ExtractConfig {
    pub fn settings(&self) -> ExtractSettings {
        let placeholder = self.placeholder_image_url.trim();
        ExtractSettings {
            page_timeout: Duration::from_secs(self.page_timeout_secs.max(1)),
            page_policy: RetryPolicy::fixed(
                self.page_max_retries,
                Duration::from_secs(self.page_retry_delay_secs),
            ),
            page_max_bytes: self.page_max_bytes,
            min_body_chars: self.min_body_chars,
            max_image_candidates: self.max_image_candidates,
            placeholder_image_url: (!placeholder.is_empty()).then(|| placeholder.to_string()),
            workers: self.workers.max(1),
        }
    }

    pub fn image_settings(&self) -> ImageSettings {
        ImageSettings {
            timeout: Duration::from_secs(self.image_timeout_secs.max(1)),
            max_bytes: self.image_max_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub max_posts_per_run: usize,
    pub max_hashtags: usize,
    pub min_hashtag_len: usize,
    pub captions: Vec<String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_posts_per_run: 1,
            max_hashtags: 3,
            min_hashtag_len: 4,
            captions: [
                "What's your take on this?\n",
                "Discuss:\n",
                "Your thoughts?\n",
                "Share your opinion:\n",
                "What do you think about this?\n",
                "Debate:\n",
                "We want to hear from you:\n",
                "Your say:\n",
                "Comment below:\n",
                "Join the conversation:\n",
                "What's on your mind?\n",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
    /// Cancels the run (between sources) once exceeded; 0 disables.
    pub run_timeout_secs: u64,
    /// `HH:MM` local times. Non-empty switches from the interval to these.
    pub daily_times: Vec<String>,
    /// IANA zone names each daily time is applied in.
    pub timezones: Vec<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 6 * 3600,
            run_timeout_secs: 900,
            daily_times: Vec::new(),
            timezones: vec!["Europe/London".into(), "America/New_York".into()],
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }

    /// Every (zone, time) pair; empty when the interval applies.
    pub fn daily_slots(&self) -> Result<Vec<DailySlot>> {
        if self.daily_times.is_empty() {
            return Ok(Vec::new());
        }
        if self.timezones.is_empty() {
            bail!("schedule.daily_times set but schedule.timezones is empty");
        }
        let mut slots = Vec::new();
        for zone in &self.timezones {
            let tz: chrono_tz::Tz = zone
                .trim()
                .parse()
                .map_err(|_| anyhow!("unknown timezone {zone:?}"))?;
            for t in &self.daily_times {
                let time = chrono::NaiveTime::parse_from_str(t.trim(), "%H:%M")
                    .with_context(|| format!("bad daily time {t:?}, expected HH:MM"))?;
                slots.push(DailySlot { tz, time });
            }
        }
        Ok(slots)
    }
}

impl AppConfig {
    /// Sources after region filtering, in configured order.
    pub fn active_sources(&self) -> Vec<Source> {
        if self.include_regions.is_empty() {
            return self.sources.clone();
        }
        self.sources
            .iter()
            .filter(|s| {
                self.include_regions
                    .iter()
                    .any(|r| r.eq_ignore_ascii_case(&s.region))
            })
            .cloned()
            .collect()
    }

    /// Active sources, or an error when there is nothing to fetch.
    pub fn require_sources(&self) -> Result<Vec<Source>> {
        let sources = self.active_sources();
        if sources.is_empty() {
            if self.sources.is_empty() {
                bail!("configuration has no sources");
            }
            bail!(
                "no sources match include_regions {:?}",
                self.include_regions
            );
        }
        Ok(sources)
    }

    pub fn require_thresholds(&self) -> Result<Thresholds> {
        self.thresholds
            .ok_or_else(|| anyhow!("configuration has no [thresholds] section"))
    }
}

/// Load from an explicit path. Supports TOML or JSON.
pub fn load_from(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mut cfg = parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing config {}", path.display()))?;
    cfg.sources = clean_sources(std::mem::take(&mut cfg.sources));
    Ok(cfg)
}

/// Load using env var + fallbacks (see module docs).
pub fn load_default() -> Result<AppConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        }
        bail!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display());
    }
    let toml_p = PathBuf::from(DEFAULT_TOML_PATH);
    if toml_p.exists() {
        return load_from(&toml_p);
    }
    let json_p = PathBuf::from(DEFAULT_JSON_PATH);
    if json_p.exists() {
        return load_from(&json_p);
    }
    bail!("no configuration found (set {ENV_CONFIG_PATH} or create {DEFAULT_TOML_PATH})")
}

fn parse_config(s: &str, hint_ext: &str) -> Result<AppConfig> {
    match hint_ext {
        "toml" => Ok(toml::from_str(s)?),
        "json" => Ok(serde_json::from_str(s)?),
        _ => {
            if let Ok(v) = serde_json::from_str(s) {
                return Ok(v);
            }
            toml::from_str(s).map_err(|e| anyhow!("unsupported config format: {e}"))
        }
    }
}

/// Trim fields, drop incomplete entries, keep the first occurrence of each feed URL.
fn clean_sources(items: Vec<Source>) -> Vec<Source> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        let name = it.name.trim().to_string();
        let url = it.url.trim().to_string();
        if name.is_empty() || url.is_empty() {
            tracing::warn!(target: "config", name = %name, url = %url, "ignoring incomplete source");
            continue;
        }
        if !seen.insert(url.clone()) {
            tracing::debug!(target: "config", name = %name, url = %url, "duplicate source url ignored");
            continue;
        }
        let region = match it.region.trim() {
            "" => "global".to_string(),
            r => r.to_ascii_lowercase(),
        };
        out.push(Source { name, url, region });
    }
    out
}
