//! engage — follow/skip decisions for candidate accounts.
//!
//! The engine is a pure function of (candidate, thresholds, now). Rules are
//! checked in a fixed order and the first failing one names the reason:
//! avatar, followers, posts, inactivity. Thresholds are inclusive.

pub mod followback;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

pub const DEFAULT_FOLLOWER_THRESHOLD: u64 = 10;
pub const DEFAULT_POST_THRESHOLD: u64 = 5;
pub const DEFAULT_INACTIVITY_WINDOW_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_follower_threshold")]
    pub follower_threshold: u64,
    #[serde(default = "default_post_threshold")]
    pub post_threshold: u64,
    #[serde(default = "default_inactivity_window_days")]
    pub inactivity_window_days: i64,
}

fn default_follower_threshold() -> u64 {
    DEFAULT_FOLLOWER_THRESHOLD
}
fn default_post_threshold() -> u64 {
    DEFAULT_POST_THRESHOLD
}
fn default_inactivity_window_days() -> i64 {
    DEFAULT_INACTIVITY_WINDOW_DAYS
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            follower_threshold: DEFAULT_FOLLOWER_THRESHOLD,
            post_threshold: DEFAULT_POST_THRESHOLD,
            inactivity_window_days: DEFAULT_INACTIVITY_WINDOW_DAYS,
        }
    }
}

impl Thresholds {
    pub fn inactivity_window(&self) -> Duration {
        Duration::days(self.inactivity_window_days.max(0))
    }
}

/// A profile as the platform reports it. Field aliases accept the
/// camelCase shape of typical social API payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateAccount {
    pub handle: String,
    #[serde(default, alias = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default, alias = "followersCount")]
    pub follower_count: u64,
    #[serde(default, alias = "postsCount")]
    pub post_count: u64,
    #[serde(default, alias = "lastActive", alias = "lastSeenAt")]
    pub last_active: Option<DateTime<Utc>>,
}

impl CandidateAccount {
    pub fn has_avatar(&self) -> bool {
        self.avatar.as_deref().is_some_and(|a| !a.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Follow,
    Skip,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Follow => "FOLLOW",
            Decision::Skip => "SKIP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    NoAvatar,
    LowFollowers,
    LowActivity,
    Inactive,
    Eligible,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::NoAvatar => "NO_AVATAR",
            ReasonCode::LowFollowers => "LOW_FOLLOWERS",
            ReasonCode::LowActivity => "LOW_ACTIVITY",
            ReasonCode::Inactive => "INACTIVE",
            ReasonCode::Eligible => "ELIGIBLE",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome for one candidate. `decision` is FOLLOW iff `reason` is ELIGIBLE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub handle: String,
    pub decision: Decision,
    pub reason: ReasonCode,
    /// Human-readable reason, e.g. `9 followers < threshold 10`.
    pub message: String,
}

/// Rule evaluation only: no logging, no metrics.
pub fn evaluate(candidate: &CandidateAccount, t: &Thresholds, now: DateTime<Utc>) -> ReasonCode {
    if !candidate.has_avatar() {
        return ReasonCode::NoAvatar;
    }
    if candidate.follower_count < t.follower_threshold {
        return ReasonCode::LowFollowers;
    }
    if candidate.post_count < t.post_threshold {
        return ReasonCode::LowActivity;
    }
    if let Some(last) = candidate.last_active {
        if now.signed_duration_since(last) > t.inactivity_window() {
            return ReasonCode::Inactive;
        }
    }
    ReasonCode::Eligible
}

/// One-line explanation of `reason` with the numbers that produced it.
pub fn explain(
    reason: ReasonCode,
    candidate: &CandidateAccount,
    t: &Thresholds,
    now: DateTime<Utc>,
) -> String {
    match reason {
        ReasonCode::NoAvatar => "no profile picture".to_string(),
        ReasonCode::LowFollowers => format!(
            "{} followers < threshold {}",
            candidate.follower_count, t.follower_threshold
        ),
        ReasonCode::LowActivity => format!(
            "{} posts < threshold {}",
            candidate.post_count, t.post_threshold
        ),
        ReasonCode::Inactive => {
            let days = candidate
                .last_active
                .map(|last| now.signed_duration_since(last).num_days())
                .unwrap_or_default();
            format!(
                "last active {days}d ago > {}d window",
                t.inactivity_window_days
            )
        }
        ReasonCode::Eligible => format!(
            "{} followers, {} posts, meets all thresholds",
            candidate.follower_count, candidate.post_count
        ),
    }
}

/// Decide against an explicit clock reading. Logs and counts the verdict.
pub fn decide_at(candidate: &CandidateAccount, t: &Thresholds, now: DateTime<Utc>) -> Verdict {
    let reason = evaluate(candidate, t, now);
    let message = explain(reason, candidate, t, now);
    let decision = if reason == ReasonCode::Eligible {
        Decision::Follow
    } else {
        Decision::Skip
    };

    counter!(
        "engage_verdicts_total",
        "decision" => decision.as_str(),
        "reason" => reason.as_str()
    )
    .increment(1);

    match decision {
        Decision::Follow => tracing::info!(
            target: "engage",
            handle = %candidate.handle,
            decision = decision.as_str(),
            reason = reason.as_str(),
            detail = %message,
            "candidate eligible"
        ),
        Decision::Skip => tracing::warn!(
            target: "engage",
            handle = %candidate.handle,
            decision = decision.as_str(),
            reason = reason.as_str(),
            detail = %message,
            "skipping candidate"
        ),
    }

    Verdict {
        handle: candidate.handle.clone(),
        decision,
        reason,
        message,
    }
}

/// Decide using the current time.
pub fn decide(candidate: &CandidateAccount, t: &Thresholds) -> Verdict {
    decide_at(candidate, t, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn account(followers: u64, posts: u64) -> CandidateAccount {
        CandidateAccount {
            handle: "alice.example".into(),
            display_name: None,
            avatar: Some("https://cdn.example/a.jpg".into()),
            follower_count: followers,
            post_count: posts,
            last_active: None,
        }
    }

    #[test]
    fn rule_order_picks_first_failure() {
        let t = Thresholds::default();
        let mut c = account(0, 0);
        c.avatar = None;
        assert_eq!(evaluate(&c, &t, now()), ReasonCode::NoAvatar);

        c.avatar = Some("   ".into());
        assert_eq!(evaluate(&c, &t, now()), ReasonCode::NoAvatar);

        assert_eq!(evaluate(&account(9, 0), &t, now()), ReasonCode::LowFollowers);
        assert_eq!(evaluate(&account(10, 4), &t, now()), ReasonCode::LowActivity);
        assert_eq!(evaluate(&account(10, 5), &t, now()), ReasonCode::Eligible);
    }

    #[test]
    fn inactivity_window_is_inclusive_and_optional() {
        let t = Thresholds::default();
        let mut c = account(50, 50);

        c.last_active = Some(now() - Duration::days(90));
        assert_eq!(evaluate(&c, &t, now()), ReasonCode::Eligible);

        c.last_active = Some(now() - Duration::days(90) - Duration::seconds(1));
        assert_eq!(evaluate(&c, &t, now()), ReasonCode::Inactive);

        c.last_active = None;
        assert_eq!(evaluate(&c, &t, now()), ReasonCode::Eligible);
    }

    #[test]
    fn verdict_serializes_with_reason_codes() {
        let v = decide_at(&account(9, 100), &Thresholds::default(), now());
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["decision"], "SKIP");
        assert_eq!(json["reason"], "LOW_FOLLOWERS");

        let v = decide_at(&account(10, 5), &Thresholds::default(), now());
        assert_eq!(v.decision, Decision::Follow);
        assert_eq!(v.reason.to_string(), "ELIGIBLE");
    }

    #[test]
    fn camel_case_payloads_are_accepted() {
        let c: CandidateAccount = serde_json::from_str(
            r#"{"handle":"bob.example","avatar":"https://x/y.png","followersCount":12,"postsCount":7,"lastSeenAt":"2025-05-30T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(c.follower_count, 12);
        assert_eq!(evaluate(&c, &Thresholds::default(), now()), ReasonCode::Eligible);
    }
}
