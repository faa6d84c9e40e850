// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod error;
pub mod http;
pub mod retry;
pub mod telemetry;

// Feed side: parsing, fetching with retry, multi-source aggregation
pub mod ingest;

// Article side: page body, image fallback chain, sentiment
pub mod extract;
pub mod image;
pub mod sentiment;

// Account side: follow/skip decisions and the follow-back loop
pub mod engage;

pub mod pipeline;
pub mod publish;

// ---- Re-exports for stable public API ----
pub use crate::config::AppConfig;
pub use crate::engage::{decide, decide_at, CandidateAccount, Decision, ReasonCode, Thresholds, Verdict};
pub use crate::error::{FetchError, RetryError};
pub use crate::extract::{ContentExtractor, EnrichedArticle, ExtractionStatus};
pub use crate::image::ImageValidator;
pub use crate::ingest::types::{RawArticle, Source};
pub use crate::ingest::{SourceAggregator, FetchSettings};
pub use crate::pipeline::{spawn_daily_scheduler, spawn_scheduler, DailySlot, Pipeline, RunReport};
pub use crate::retry::RetryPolicy;
