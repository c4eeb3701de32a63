//! Storage trait shared by every backend.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use scanner_primitives::{
    AnalysisRun, AssessmentSummary, KeyId, RunSummary, ServerAssessment, ServerName,
};

use crate::StoreResult;

/// Append-only store of analysis runs, keyed by composition identity.
///
/// Runs are immutable once appended. Re-analysing a composition appends a new
/// run; nothing is ever overwritten or deleted.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Persists a run.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::DuplicateRun`] if the run id is already
    /// stored for the key, or a backend error.
    async fn append(&self, run: &AnalysisRun) -> StoreResult<()>;

    /// Returns the most recent run for a key, if any.
    async fn latest(&self, key_id: &KeyId) -> StoreResult<Option<AnalysisRun>> {
        Ok(self.history(key_id).await?.pop())
    }

    /// Returns every run for a key, oldest first.
    async fn history(&self, key_id: &KeyId) -> StoreResult<Vec<AnalysisRun>>;

    /// Returns a summary of the latest run of every key, newest first.
    async fn list(&self) -> StoreResult<Vec<RunSummary>>;
}

/// Archive of per-server assessments.
///
/// Each saved assessment gets a record name `<YYYYMMDD-HHMMSS>-<server>.json`
/// derived from its completion time, so names sort chronologically.
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    /// Persists an assessment and returns its record name.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    async fn save(&self, assessment: &ServerAssessment) -> StoreResult<String>;

    /// Summarises every saved assessment, newest first.
    async fn list_assessments(&self) -> StoreResult<Vec<AssessmentSummary>>;
}

/// Picks the record name for an assessment that is not yet `taken`.
///
/// A clash moves the timestamp forward a second at a time.
pub(crate) fn record_name(
    assessment: &ServerAssessment,
    taken: impl Fn(&str) -> bool,
) -> String {
    let mut at = assessment.assessed_at;
    loop {
        let name = format!("{}.json", record_stem(at, &assessment.server));
        if !taken(&name) {
            return name;
        }
        at += Duration::seconds(1);
    }
}

fn record_stem(at: DateTime<Utc>, server: &ServerName) -> String {
    let server: String = server
        .as_str()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}-{server}", at.format("%Y%m%d-%H%M%S"))
}

/// Orders assessment summaries newest first by record name.
pub(crate) fn sort_assessments(summaries: &mut [AssessmentSummary]) {
    summaries.sort_by(|a, b| b.filename.cmp(&a.filename));
}

/// Orders runs oldest first. Completion time decides, run id breaks ties.
pub(crate) fn sort_history(runs: &mut [AnalysisRun]) {
    runs.sort_by(|a, b| {
        (a.provenance().completed_at, a.run_id()).cmp(&(b.provenance().completed_at, b.run_id()))
    });
}

/// Orders summaries newest first.
pub(crate) fn sort_newest_first(summaries: &mut [RunSummary]) {
    summaries.sort_by(|a, b| {
        (b.completed_at, &b.key_id).cmp(&(a.completed_at, &a.key_id))
    });
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Duration, Utc};
    use scanner_primitives::{
        AnalysisFragment, AnalysisRun, CompositionAnalysis, CompositionKey, GovernanceAction,
        Provenance, RiskScore, ServerAssessment, ServerFindings, ServerName, Severity,
        ToolAssessment, ToolRef,
    };

    pub(crate) fn assessment(server: &str, offset_secs: i64) -> ServerAssessment {
        let base: DateTime<Utc> = "2026-01-01T12:00:00Z".parse().unwrap();
        ServerAssessment {
            server: ServerName::new(server).unwrap(),
            overall_risk_score: RiskScore::Medium,
            action: GovernanceAction::Allow,
            findings: ServerFindings {
                tool_assessments: vec![ToolAssessment {
                    tool_name: "get_secret_word".to_owned(),
                    risk_summary: "enticing name".to_owned(),
                    suspicious_language_patterns: Vec::new(),
                    risk_level: Severity::Medium,
                    mitigation_suggestions: Vec::new(),
                }],
                ..ServerFindings::default()
            },
            assessed_at: base + Duration::seconds(offset_secs),
            oracle_model: "rule-based/capability-pairs".to_owned(),
        }
    }

    pub(crate) fn key(a: &str, b: &str) -> CompositionKey {
        CompositionKey::new([
            ToolRef::parse(a, "get_secret_word").unwrap(),
            ToolRef::parse(b, "update_cart").unwrap(),
        ])
        .unwrap()
    }

    pub(crate) fn run_at(key: &CompositionKey, offset_secs: i64) -> AnalysisRun {
        let base: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
        let completed_at = base + Duration::seconds(offset_secs);
        let analysis = CompositionAnalysis::new(
            AnalysisFragment::default(),
            RiskScore::None,
            GovernanceAction::Allow,
            Vec::new(),
        );
        let provenance = Provenance {
            started_at: completed_at - Duration::seconds(1),
            completed_at,
            tool_count: 2,
            groups_enumerated: 1,
            groups_evaluated: 1,
            oracle_model: "rule-based/capability-pairs".to_owned(),
            temperature: 0.0,
        };
        AnalysisRun::new(key.clone(), analysis, provenance)
    }
}
