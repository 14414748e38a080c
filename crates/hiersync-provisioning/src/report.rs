//! Run report.
//!
//! Summarizes one run per stage; stages that did not run are `None`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::accounting::AccountingReport;
use crate::builder::SkippedUser;
use crate::cache::CacheReconcile;
use crate::materialize::MaterializeReport;
use crate::snapshot::MembershipSnapshot;

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Every stage ran but some users failed accounting.
    CompletedWithFailures,
}

/// Complete report of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Snapshot summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotSummary>,
    /// Cache outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSummary>,
    /// Materializer counters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub materialize: Option<MaterializeReport>,
    /// Accounting outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accounting: Option<AccountingReport>,
}

/// Shape of the snapshot a run worked on.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSummary {
    pub root: String,
    pub groups: usize,
    pub memberships: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub skipped_users: Vec<SkippedUser>,
}

impl SnapshotSummary {
    pub fn new(snapshot: &MembershipSnapshot, skipped_users: Vec<SkippedUser>) -> Self {
        Self {
            root: snapshot.root.clone(),
            groups: snapshot.groups.len(),
            memberships: snapshot.membership_count(),
            skipped_users,
        }
    }
}

/// What the cache stage did.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    pub path: PathBuf,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<PathBuf>,
    pub prior_corrupt: bool,
}

impl CacheSummary {
    pub fn new(path: impl Into<PathBuf>, outcome: &CacheReconcile) -> Self {
        Self {
            path: path.into(),
            changed: outcome.changed,
            archived: outcome.archived.clone(),
            prior_corrupt: outcome.prior_corrupt,
        }
    }
}

impl RunReport {
    /// Start an empty report.
    pub fn begin() -> Self {
        let now = Utc::now();
        Self {
            status: RunStatus::Completed,
            started_at: now,
            completed_at: now,
            snapshot: None,
            cache: None,
            materialize: None,
            accounting: None,
        }
    }

    /// Stamp completion time and derive the status.
    pub fn finish(mut self) -> Self {
        self.completed_at = Utc::now();
        self.status = if self
            .accounting
            .as_ref()
            .is_some_and(AccountingReport::has_failures)
        {
            RunStatus::CompletedWithFailures
        } else {
            RunStatus::Completed
        };
        self
    }

    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }

    /// Human readable summary, one line per stage.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();

        if let Some(snapshot) = &self.snapshot {
            lines.push(format!(
                "snapshot: {} groups, {} memberships under {}",
                snapshot.groups, snapshot.memberships, snapshot.root
            ));
            for skipped in &snapshot.skipped_users {
                lines.push(format!(
                    "  skipped {} in {}: {}",
                    skipped.account, skipped.group, skipped.reason
                ));
            }
        }

        if let Some(cache) = &self.cache {
            let state = match (&cache.archived, cache.changed) {
                (_, false) => "unchanged".to_string(),
                (Some(archive), true) => {
                    format!("updated, previous saved as {}", archive.display())
                }
                (None, true) => "written".to_string(),
            };
            lines.push(format!("cache {}: {state}", cache.path.display()));
            if cache.prior_corrupt {
                lines.push("  previous content was not a valid snapshot".to_string());
            }
        }

        if let Some(m) = &self.materialize {
            lines.push(format!(
                "hierarchy: {} groups, {} created, {} repaired, {} unchanged",
                m.groups, m.created, m.repaired, m.unchanged
            ));
        }

        if let Some(a) = &self.accounting {
            lines.push(format!(
                "accounting ({}): {} users, {} created, {} existing, {} failed",
                a.cluster,
                a.checked,
                a.created.len(),
                a.existing,
                a.failures.len()
            ));
            for failure in &a.failures {
                lines.push(format!("  {}: {}", failure.user, failure.message));
            }
        }

        lines.push(format!("finished in {} ms", self.duration_ms()));
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::AccountingFailure;

    #[test]
    fn test_finish_flags_accounting_failures() {
        let mut report = RunReport::begin();
        report.accounting = Some(AccountingReport {
            cluster: "hpc".to_string(),
            checked: 1,
            failures: vec![AccountingFailure {
                user: "bob".to_string(),
                account: "teamA".to_string(),
                code: "ACCOUNTING_TIMEOUT".to_string(),
                message: "show user timed out after 30s".to_string(),
            }],
            ..AccountingReport::default()
        });

        let report = report.finish();
        assert_eq!(report.status, RunStatus::CompletedWithFailures);
        assert!(report.summary_lines().iter().any(|l| l.contains("bob")));
    }

    #[test]
    fn test_skipped_stages_are_omitted_from_json() {
        let report = RunReport::begin().finish();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["status"], "completed");
        assert!(json.get("cache").is_none());
        assert!(json.get("accounting").is_none());
    }
}
