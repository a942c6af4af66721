use std::collections::BTreeMap;

use serde_json::Value;

use super::artifacts::{DocumentSource, SegmentSource};
use crate::error::FatalError;
use crate::escalation::{StagePlan, StageResult, Tier};
use crate::ledger::WorkItem;

/// Both artifact boundaries behind one object.
pub trait Artifacts: SegmentSource + DocumentSource {}

impl<T: SegmentSource + DocumentSource> Artifacts for T {}

/// What a stage can see while it runs for one item.
pub struct StageContext<'a> {
    pub item: &'a WorkItem,
    pub artifacts: &'a dyn Artifacts,
    /// Completed summaries of earlier stages, by stage name.
    pub prior: &'a BTreeMap<String, Value>,
    pub supervisor: &'a Tier,
}

impl StageContext<'_> {
    pub fn prior_i64(&self, stage: &str) -> Option<i64> {
        self.prior.get(stage).and_then(Value::as_i64)
    }
}

pub enum Prepared {
    /// Settled without asking the oracle.
    Done(StageResult),
    Ask(StagePlan),
}

/// One named unit of work in the pipeline.
pub trait Stage {
    /// Also the ledger column name.
    fn name(&self) -> &'static str;

    fn prerequisites(&self) -> &'static [&'static str];

    fn prepare(&self, ctx: &StageContext<'_>) -> Result<Prepared, FatalError>;

    /// Ledger summary for an accepted result; `None` when the answer turns out
    /// to be unusable. May log problems found after acceptance.
    fn summarize(
        &self,
        ctx: &StageContext<'_>,
        result: &mut StageResult,
    ) -> Result<Option<Value>, FatalError>;

    /// Ledger value for a result that was not accepted, letting dependents
    /// run with a degraded input. `None` marks the stage failed.
    fn fallback(&self, _ctx: &StageContext<'_>, _result: &StageResult) -> Option<Value> {
        None
    }
}

/// Ordered stage list.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// The stages of one run: a contiguous slice of the pipeline, every stage
    /// when `requested` is empty.
    pub fn select(&self, requested: &[String]) -> Result<RunStages<'_>, FatalError> {
        let names = self.names();
        let (start, end) = if requested.is_empty() {
            (0, self.stages.len())
        } else {
            let mut positions = Vec::with_capacity(requested.len());
            for name in requested {
                let pos = names
                    .iter()
                    .position(|n| n == name)
                    .ok_or_else(|| FatalError::Config(format!("unknown stage: {name}")))?;
                positions.push(pos);
            }
            positions.sort_unstable();
            positions.dedup();
            let (first, last) = (positions[0], positions[positions.len() - 1]);
            if last - first + 1 != positions.len() {
                return Err(FatalError::Config(format!(
                    "stages must be contiguous in pipeline order: {}",
                    names.join(", ")
                )));
            }
            (first, last + 1)
        };

        if start == end {
            return Err(FatalError::Config("no stages to run".into()));
        }

        Ok(RunStages {
            stages: self.stages[start..end].iter().map(|s| s.as_ref()).collect(),
            previous: names[..start].to_vec(),
        })
    }
}

/// The stages of one run plus the ones before them.
pub struct RunStages<'a> {
    stages: Vec<&'a dyn Stage>,
    previous: Vec<&'static str>,
}

impl<'a> RunStages<'a> {
    pub fn stages(&self) -> &[&'a dyn Stage] {
        &self.stages
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Stages that must already be complete for an item to be processed.
    pub fn previous(&self) -> &[&'static str] {
        &self.previous
    }

    /// Checkpoint column for skip-existing selection.
    pub fn final_stage(&self) -> &'static str {
        self.stages.last().map(|s| s.name()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::filings::filing_pipeline;

    fn select(requested: &[&str]) -> Result<Vec<&'static str>, FatalError> {
        let pipeline = filing_pipeline();
        let requested: Vec<String> = requested.iter().map(|s| s.to_string()).collect();
        pipeline.select(&requested).map(|run| run.names())
    }

    #[test]
    fn empty_selection_runs_everything() {
        assert_eq!(
            select(&[]).unwrap(),
            vec![
                "table_index",
                "sum_units",
                "table_body",
                "table_json",
                "value_column",
                "cash_position",
                "long_term_debt"
            ]
        );
    }

    #[test]
    fn contiguous_slice_with_previous_stages() {
        let pipeline = filing_pipeline();
        let run = pipeline
            .select(&["long_term_debt".to_string(), "cash_position".to_string()])
            .unwrap();
        assert_eq!(run.names(), vec!["cash_position", "long_term_debt"]);
        assert_eq!(
            run.previous(),
            &["table_index", "sum_units", "table_body", "table_json", "value_column"]
        );
        assert_eq!(run.final_stage(), "long_term_debt");
    }

    #[test]
    fn gaps_and_unknown_names_rejected() {
        assert!(matches!(select(&["table_index", "cash_position"]), Err(FatalError::Config(_))));
        assert!(matches!(select(&["balance"]), Err(FatalError::Config(_))));
    }
}
