// src/engage/followback.rs
//! Follow-back loop: page through candidates, decide, hand FOLLOW verdicts
//! to a [`FollowAction`]. Follow results are logged and counted, never retried.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{decide_at, CandidateAccount, Decision, ReasonCode, Thresholds, Verdict};

/// Upper bound on accounts per page query.
pub const PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidatePage {
    pub accounts: Vec<CandidateAccount>,
    /// `None` when this was the last page.
    pub cursor: Option<String>,
}

/// Platform query collaborator.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn next_page(&self, cursor: Option<&str>) -> anyhow::Result<CandidatePage>;
}

/// Posting collaborator for follows. Owns its own credentials.
#[async_trait]
pub trait FollowAction: Send + Sync {
    async fn follow(&self, handle: &str) -> anyhow::Result<()>;
}

/// Dry-run action: logs instead of following.
#[derive(Debug, Clone, Default)]
pub struct LogFollowAction;

#[async_trait]
impl FollowAction for LogFollowAction {
    async fn follow(&self, handle: &str) -> anyhow::Result<()> {
        tracing::info!(target: "followback", handle, "dry run: would follow");
        Ok(())
    }
}

/// Candidates read from a JSON file, served in pages of [`PAGE_LIMIT`].
/// Accepts a bare array or `{"followers": [...]}`.
#[derive(Debug, Clone)]
pub struct JsonFileCandidates {
    accounts: Vec<CandidateAccount>,
    page_size: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CandidateFile {
    List(Vec<CandidateAccount>),
    Wrapped { followers: Vec<CandidateAccount> },
}

impl JsonFileCandidates {
    pub fn new(accounts: Vec<CandidateAccount>) -> Self {
        Self {
            accounts,
            page_size: PAGE_LIMIT,
        }
    }

    pub fn with_page_size(mut self, n: usize) -> Self {
        self.page_size = n.clamp(1, PAGE_LIMIT);
        self
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading candidates from {}", path.display()))?;
        let parsed: CandidateFile = serde_json::from_str(&raw)
            .with_context(|| format!("parsing candidates {}", path.display()))?;
        let accounts = match parsed {
            CandidateFile::List(v) => v,
            CandidateFile::Wrapped { followers } => followers,
        };
        Ok(Self::new(accounts))
    }
}

#[async_trait]
impl CandidateSource for JsonFileCandidates {
    async fn next_page(&self, cursor: Option<&str>) -> anyhow::Result<CandidatePage> {
        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .with_context(|| format!("invalid cursor {c:?}"))?,
            None => 0,
        };
        let end = (start + self.page_size).min(self.accounts.len());
        let accounts = self.accounts.get(start..end).unwrap_or_default().to_vec();
        let cursor = (end < self.accounts.len()).then(|| end.to_string());
        Ok(CandidatePage { accounts, cursor })
    }
}

/// Handles already followed, from a JSON array of strings.
pub fn load_handles(path: &Path) -> anyhow::Result<HashSet<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading handles from {}", path.display()))?;
    let list: Vec<String> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing handles {}", path.display()))?;
    Ok(list.into_iter().map(|h| h.trim().to_string()).collect())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FollowBackReport {
    pub pages: usize,
    pub evaluated: usize,
    pub already_following: usize,
    pub followed: usize,
    pub follow_failures: usize,
    pub skipped: BTreeMap<ReasonCode, usize>,
    pub verdicts: Vec<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cancelled: bool,
}

/// Drain `candidates` page by page. Cancellation is checked between pages;
/// a failing page query ends the loop and keeps the verdicts produced so far.
pub async fn run_follow_back(
    candidates: &dyn CandidateSource,
    action: &dyn FollowAction,
    thresholds: &Thresholds,
    already_following: &HashSet<String>,
    cancel: &CancellationToken,
) -> FollowBackReport {
    let now = Utc::now();
    let mut report = FollowBackReport::default();
    let mut cursor: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            tracing::warn!(target: "followback", pages = report.pages, "follow-back cancelled");
            report.cancelled = true;
            break;
        }

        let page = match candidates.next_page(cursor.as_deref()).await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(
                    target: "followback",
                    cursor = cursor.as_deref().unwrap_or(""),
                    error = %e,
                    "candidate query failed, stopping"
                );
                report.error = Some(format!("{e:#}"));
                break;
            }
        };
        report.pages += 1;

        for account in &page.accounts {
            if already_following.contains(&account.handle) {
                report.already_following += 1;
                tracing::debug!(target: "followback", handle = %account.handle, "already following");
                continue;
            }

            let verdict = decide_at(account, thresholds, now);
            report.evaluated += 1;

            match verdict.decision {
                Decision::Follow => match action.follow(&verdict.handle).await {
                    Ok(()) => {
                        report.followed += 1;
                        counter!("followback_follows_total", "outcome" => "success").increment(1);
                        tracing::info!(target: "followback", handle = %verdict.handle, "followed back");
                    }
                    Err(e) => {
                        report.follow_failures += 1;
                        counter!("followback_follows_total", "outcome" => "failure").increment(1);
                        tracing::error!(
                            target: "followback",
                            handle = %verdict.handle,
                            error = %e,
                            "follow failed"
                        );
                    }
                },
                Decision::Skip => {
                    *report.skipped.entry(verdict.reason).or_default() += 1;
                }
            }
            report.verdicts.push(verdict);
        }

        match page.cursor {
            Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                tracing::warn!(target: "followback", cursor = %next, "cursor did not advance, stopping");
                break;
            }
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    tracing::info!(
        target: "followback",
        pages = report.pages,
        evaluated = report.evaluated,
        followed = report.followed,
        failures = report.follow_failures,
        already_following = report.already_following,
        "follow-back finished"
    );
    report
}
