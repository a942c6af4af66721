use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::StageState;
use crate::consensus::{Decision, OracleOutput, Vote};
use crate::validation::{Problem, ProblemLog, Verdict};

/// Terminal result of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Accepted,
    AcceptedWithWarning,
    Failed,
}

impl StageOutcome {
    /// `None` for non-terminal states.
    pub fn from_state(state: StageState) -> Option<Self> {
        match state {
            StageState::Accepted => Some(StageOutcome::Accepted),
            StageState::AcceptedWithWarning => Some(StageOutcome::AcceptedWithWarning),
            StageState::Failed => Some(StageOutcome::Failed),
            _ => None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        !matches!(self, StageOutcome::Failed)
    }
}

/// One tier's votes and what became of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRun {
    pub tier: String,
    pub model: String,
    pub trials_requested: usize,
    pub votes: Vec<Vote>,
    pub decision: Decision,
    pub verdict: Verdict,
}

/// A supervisor review of an accepted decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorReview {
    /// Index of the tier whose decision was reviewed.
    pub reviewed_tier: usize,
    pub model: String,
    pub votes: Vec<Vote>,
    pub decision: Decision,
    /// Entries removed from the reviewed decision; empty when inconclusive.
    pub removed: Vec<String>,
}

/// Everything tried for one item and stage in one processing attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub item_id: i64,
    pub stage: String,
    pub tiers: Vec<TierRun>,
    pub reviews: Vec<SupervisorReview>,
    pub state_transitions: Vec<StageState>,
    pub outcome: StageOutcome,
    pub problems: ProblemLog,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl EscalationRecord {
    pub fn new(item_id: i64, stage: &str, started_at: DateTime<Utc>, outcome: StageOutcome) -> Self {
        let now = Utc::now();
        Self {
            item_id,
            stage: stage.to_string(),
            tiers: Vec::new(),
            reviews: Vec::new(),
            state_transitions: Vec::new(),
            outcome,
            problems: ProblemLog::new(),
            started_at,
            completed_at: now,
            duration_ms: (now - started_at).num_milliseconds(),
        }
    }

    pub fn oracle_calls(&self) -> usize {
        self.tiers.iter().map(|t| t.votes.len()).sum::<usize>()
            + self.reviews.iter().map(|r| r.votes.len()).sum::<usize>()
    }
}

/// Result of one stage for one item, ready to be checkpointed.
#[derive(Debug, Clone, PartialEq)]
pub struct StageResult {
    pub outcome: StageOutcome,
    /// The accepted decision, after any supervisor removals.
    pub output: Option<OracleOutput>,
    pub problems: ProblemLog,
    pub record: EscalationRecord,
}

impl StageResult {
    /// Accepted without consulting the oracle.
    pub fn resolved(item_id: i64, stage: &str, output: OracleOutput) -> Self {
        let mut record = EscalationRecord::new(item_id, stage, Utc::now(), StageOutcome::Accepted);
        record.state_transitions = vec![StageState::NotStarted, StageState::Accepted];
        Self {
            outcome: StageOutcome::Accepted,
            output: Some(output),
            problems: ProblemLog::new(),
            record,
        }
    }

    /// Failed before any oracle call, e.g. on missing input.
    pub fn failed(item_id: i64, stage: &str, problems: Vec<Problem>) -> Self {
        let problems: ProblemLog = problems.into_iter().collect();
        let mut record = EscalationRecord::new(item_id, stage, Utc::now(), StageOutcome::Failed);
        record.state_transitions = vec![StageState::NotStarted, StageState::Failed];
        record.problems = problems.clone();
        Self {
            outcome: StageOutcome::Failed,
            output: None,
            problems,
            record,
        }
    }

    /// Log a problem found after acceptance; it does not change the outcome.
    pub fn note(&mut self, problem: Problem) {
        self.problems.push(problem.clone());
        self.record.problems.push(problem);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_from_terminal_states_only() {
        assert_eq!(
            StageOutcome::from_state(StageState::AcceptedWithWarning),
            Some(StageOutcome::AcceptedWithWarning)
        );
        assert_eq!(StageOutcome::from_state(StageState::TierAttempt(0)), None);
        assert!(!StageOutcome::Failed.is_accepted());
    }

    #[test]
    fn failed_result_carries_problems_in_record() {
        let result = StageResult::failed(3, "table_index", vec!["balance sheet: no text in file".into()]);
        assert_eq!(result.outcome, StageOutcome::Failed);
        assert_eq!(result.record.problems.len(), 1);
        assert_eq!(result.record.oracle_calls(), 0);
        assert_eq!(
            result.record.state_transitions,
            vec![StageState::NotStarted, StageState::Failed]
        );
    }

    #[test]
    fn notes_are_deduplicated() {
        let mut result = StageResult::resolved(1, "table_index", OracleOutput::Empty);
        result.note("CCP: missing sum(s) detected: index = 1".into());
        result.note("CCP: missing sum(s) detected: index = 1".into());
        assert_eq!(result.problems.len(), 1);
        assert_eq!(result.outcome, StageOutcome::Accepted);
    }

    #[test]
    fn record_serializes() {
        let result = StageResult::resolved(1, "table_index", OracleOutput::Empty);
        let json = serde_json::to_value(&result.record).unwrap();
        assert_eq!(json["outcome"], "accepted");
        assert_eq!(json["state_transitions"][1]["state"], "accepted");
    }
}
