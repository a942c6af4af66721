use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::FatalError;
use crate::escalation::{EscalationController, StageOutcome, Tier};
use crate::ledger::{
    BatchConfig, Checkpoint, CheckpointStore, Operator, ProblemLedger, SelectionMode, Skipped, StageCommit, WorkItem,
    check_prerequisites, select_batch, with_lock_retry,
};
use crate::oracle::{Oracle, OracleClient};
use crate::pipeline::{Artifacts, Prepared, RunStages, StageContext};
use crate::validation::Problem;

/// How a run ended.
#[derive(Debug)]
pub enum Termination {
    Completed,
    NothingToDo,
    /// The operator refused a destructive run.
    Declined,
    /// Cancelled between items; the item in flight was not committed.
    Interrupted,
    Fatal(FatalError),
}

/// Printed at the end of every run, however it ended.
#[derive(Debug)]
pub struct RunSummary {
    pub mode: Option<SelectionMode>,
    pub stages: Vec<&'static str>,
    pub selected: usize,
    pub processed: usize,
    pub with_problems: usize,
    pub skipped: Vec<Skipped>,
    pub oracle_calls: u64,
    pub elapsed: Duration,
    pub termination: Termination,
}

impl RunSummary {
    fn new(stages: Vec<&'static str>) -> Self {
        Self {
            mode: None,
            stages,
            selected: 0,
            processed: 0,
            with_problems: 0,
            skipped: Vec::new(),
            oracle_calls: 0,
            elapsed: Duration::ZERO,
            termination: Termination::Completed,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.termination, Termination::Fatal(_))
    }
}

/// Ledger status of one stage after an item was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Done(StageOutcome),
    /// No tier was accepted; the stage's fallback value stands in.
    Degraded,
    Failed,
    /// A prerequisite failed in this run, so this stage did not run.
    Blocked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: &'static str,
    pub status: StageStatus,
    pub problems: Vec<Problem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
    pub item: WorkItem,
    pub stages: Vec<StageReport>,
}

impl ItemReport {
    pub fn has_problems(&self) -> bool {
        self.stages.iter().any(|s| !s.problems.is_empty())
    }
}

/// Progress callbacks for the terminal.
pub trait RunObserver {
    fn skipped(&mut self, skipped: &Skipped);
    fn item_started(&mut self, item: &WorkItem, position: usize, total: usize);
    fn item_finished(&mut self, report: &ItemReport);
}

/// Everything a run needs besides the oracle.
pub struct RunContext<'a> {
    pub store: &'a mut CheckpointStore,
    pub problems: &'a ProblemLedger,
    pub artifacts: &'a dyn Artifacts,
    pub operator: &'a mut dyn Operator,
    pub observer: &'a mut dyn RunObserver,
}

/// Drives a batch of work items through the stages of one run, committing
/// each item as a unit.
pub struct BatchOrchestrator<O: Oracle> {
    client: OracleClient<O>,
    controller: EscalationController,
    supervisor: Tier,
    cancel: Arc<AtomicBool>,
}

impl<O: Oracle> BatchOrchestrator<O> {
    pub fn new(client: OracleClient<O>, controller: EscalationController, supervisor: Tier) -> Self {
        Self {
            client,
            controller,
            supervisor,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set it to stop after the current stage; checked between items and
    /// between stages.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn client(&self) -> &OracleClient<O> {
        &self.client
    }

    pub async fn run(&mut self, ctx: RunContext<'_>, stages: &RunStages<'_>, batch: &BatchConfig) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::new(stages.names());
        let calls_before = self.client.calls();

        let result = self.run_batch(ctx, stages, batch, &mut summary).await;

        summary.elapsed = started.elapsed();
        summary.oracle_calls = self.client.calls() - calls_before;
        summary.termination = match result {
            Ok(termination) => termination,
            Err(err) => Termination::Fatal(err),
        };
        info!(
            processed = summary.processed,
            with_problems = summary.with_problems,
            skipped = summary.skipped.len(),
            oracle_calls = summary.oracle_calls,
            termination = ?summary.termination,
            "run finished"
        );
        summary
    }

    async fn run_batch(
        &mut self,
        ctx: RunContext<'_>,
        stages: &RunStages<'_>,
        batch: &BatchConfig,
        summary: &mut RunSummary,
    ) -> Result<Termination, FatalError> {
        let RunContext {
            store,
            problems,
            artifacts,
            operator,
            observer,
        } = ctx;

        let selection = select_batch(store, batch, stages.final_stage())?;
        summary.mode = Some(selection.mode);
        summary.selected = selection.items.len();
        if selection.is_empty() {
            return Ok(Termination::NothingToDo);
        }

        if selection.mode.is_destructive() {
            let prompt = format!(
                "{}: rewrite {} for {} item(s)?",
                selection.mode,
                stages.names().join(", "),
                selection.items.len()
            );
            if !operator.confirm_overwrite(&prompt) {
                return Ok(Termination::Declined);
            }
        }

        let (ready, skipped) = check_prerequisites(store, selection.items, stages.previous())?;
        for s in &skipped {
            observer.skipped(s);
        }
        summary.skipped = skipped;

        let total = ready.len();
        for (position, item) in ready.into_iter().enumerate() {
            if self.cancelled() {
                return Ok(Termination::Interrupted);
            }
            observer.item_started(&item, position + 1, total);

            let Some((report, commits)) = self.process_item(store, problems, artifacts, stages, &item).await? else {
                warn!(item_id = item.id, "interrupted, item not committed");
                return Ok(Termination::Interrupted);
            };

            with_lock_retry(operator, || store.commit_item(item.id, &commits))?;
            summary.processed += 1;
            if report.has_problems() {
                summary.with_problems += 1;
            }
            observer.item_finished(&report);
        }
        Ok(Termination::Completed)
    }

    /// Run every stage for one item. `None` when cancelled part way.
    async fn process_item(
        &mut self,
        store: &CheckpointStore,
        problems: &ProblemLedger,
        artifacts: &dyn Artifacts,
        stages: &RunStages<'_>,
        item: &WorkItem,
    ) -> Result<Option<(ItemReport, Vec<StageCommit>)>, FatalError> {
        let mut prior = BTreeMap::new();
        for stage in stages.previous() {
            if let Checkpoint::Done(value) = store.checkpoint(item.id, stage)? {
                prior.insert(stage.to_string(), value);
            }
        }

        let mut failed: Vec<&str> = Vec::new();
        let mut commits = Vec::with_capacity(stages.stages().len());
        let mut reports = Vec::with_capacity(stages.stages().len());

        for stage in stages.stages() {
            if self.cancelled() {
                return Ok(None);
            }
            let name = stage.name();

            // Blocked is not pending, so skip-existing runs move past the item.
            if stage.prerequisites().iter().any(|p| failed.contains(p)) {
                failed.push(name);
                commits.push(StageCommit {
                    stage: name.to_string(),
                    checkpoint: Checkpoint::Blocked,
                    record: None,
                    problem_ids: Vec::new(),
                });
                reports.push(StageReport {
                    stage: name,
                    status: StageStatus::Blocked,
                    problems: Vec::new(),
                });
                continue;
            }

            let ctx = StageContext {
                item,
                artifacts,
                prior: &prior,
                supervisor: &self.supervisor,
            };
            let mut result = match stage.prepare(&ctx)? {
                Prepared::Done(result) => result,
                Prepared::Ask(plan) => self.controller.run(&mut self.client, item.id, &plan).await?,
            };
            let summary = if result.outcome.is_accepted() {
                stage.summarize(&ctx, &mut result)?
            } else {
                None
            };

            let (checkpoint, status) = match summary {
                Some(value) => {
                    prior.insert(name.to_string(), value.clone());
                    (Checkpoint::Done(value), StageStatus::Done(result.outcome))
                }
                None => {
                    if result.outcome.is_accepted() {
                        warn!(item_id = item.id, stage = name, "accepted answer has no usable summary");
                        result.outcome = StageOutcome::Failed;
                        result.record.outcome = StageOutcome::Failed;
                    }
                    match stage.fallback(&ctx, &result) {
                        Some(value) => {
                            info!(item_id = item.id, stage = name, "stage failed, continuing with fallback");
                            prior.insert(name.to_string(), value.clone());
                            (Checkpoint::Done(value), StageStatus::Degraded)
                        }
                        None => {
                            failed.push(name);
                            (Checkpoint::Failed, StageStatus::Failed)
                        }
                    }
                }
            };

            commits.push(StageCommit {
                stage: name.to_string(),
                checkpoint,
                record: Some(serde_json::to_value(&result.record)?),
                problem_ids: problems.resolve_all(&result.problems)?,
            });
            reports.push(StageReport {
                stage: name,
                status,
                problems: result.problems.into_vec(),
            });
        }

        let report = ItemReport {
            item: item.clone(),
            stages: reports,
        };
        Ok(Some((report, commits)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::{SupervisorPolicy, default_tiers};
    use crate::ledger::operator::scripted::ScriptedOperator;
    use crate::oracle::scripted::ScriptedOracle;
    use crate::oracle::{OracleError, RateLimiter, RetryPolicy};
    use crate::pipeline::artifacts::{MemoryArtifacts, sample_balance_sheet};
    use crate::pipeline::filings::{VOCABULARY, filing_pipeline};
    use crate::pipeline::Pipeline;
    use serde_json::{Value, json};

    const HEADING: &str = "ACME CORPORATION CONDENSED CONSOLIDATED BALANCE SHEETS (Unaudited) (in thousands)";
    const POST_TEXT: &str = "\tSee accompanying notes.";
    const DATES: &str = "['2024-03-31', '2023-12-31']";
    const CCP_ANSWER: &str = r#"{"1": ["Current assets", "Cash and cash equivalents"]}"#;
    const LTD_ANSWER: &str = r#"{"1": ["Long-term debt, non-current"]}"#;

    #[derive(Default)]
    struct Recorder {
        started: Vec<i64>,
        finished: Vec<ItemReport>,
        skipped: Vec<i64>,
    }

    impl RunObserver for Recorder {
        fn skipped(&mut self, skipped: &Skipped) {
            self.skipped.push(skipped.item.id);
        }

        fn item_started(&mut self, item: &WorkItem, _position: usize, _total: usize) {
            self.started.push(item.id);
        }

        fn item_finished(&mut self, report: &ItemReport) {
            self.finished.push(report.clone());
        }
    }

    fn store(n: i64) -> (CheckpointStore, ProblemLedger) {
        let mut store = CheckpointStore::open_in_memory().unwrap();
        store.ensure_stage_columns(&filing_pipeline().names()).unwrap();
        let items: Vec<WorkItem> = (1..=n)
            .map(|id| WorkItem {
                id,
                name: format!("filing-{id}"),
                locator: String::new(),
            })
            .collect();
        store.insert_items(&items).unwrap();
        ProblemLedger::register(&mut store, VOCABULARY).unwrap();
        let ledger = ProblemLedger::load(&store).unwrap();
        (store, ledger)
    }

    fn artifacts() -> MemoryArtifacts {
        MemoryArtifacts {
            segments: vec![format!(
                "{HEADING}\nASSETS\nCurrent assets\nCash and cash equivalents 1,200 900\n\
                 LIABILITIES\nLong-term debt, non-current 5,000 4,800{POST_TEXT}"
            )],
            ..MemoryArtifacts::default()
        }
    }

    fn orchestrator(script: Vec<Result<String, OracleError>>) -> BatchOrchestrator<ScriptedOracle> {
        let client = OracleClient::new(
            ScriptedOracle::new(script),
            RateLimiter::new(Duration::ZERO),
            RetryPolicy {
                max_attempts: 1,
                base_delay_ms: 0,
            },
        );
        let controller = EscalationController::new(default_tiers(), SupervisorPolicy::Lenient);
        BatchOrchestrator::new(client, controller, Tier::supervisor())
    }

    fn answers<S: AsRef<str>>(per_item: &[S], items: usize) -> Vec<Result<String, OracleError>> {
        (0..items)
            .flat_map(|_| per_item.iter().map(|a| Ok(a.as_ref().to_string())))
            .collect()
    }

    // sum_units is capped at three trials, so two agreeing votes settle it;
    // the table stages keep their first valid answer.
    fn happy_item() -> Vec<String> {
        item_script(&[format!("'{POST_TEXT}'").as_str()])
    }

    fn item_script(table_body: &[&str]) -> Vec<String> {
        let mut script = vec!["1000".to_string(); 2];
        script.extend(table_body.iter().map(|a| a.to_string()));
        script.push(sample_balance_sheet().to_string());
        script.extend([DATES.to_string(), DATES.to_string(), DATES.to_string()]);
        script.extend([CCP_ANSWER.to_string(), CCP_ANSWER.to_string(), CCP_ANSWER.to_string()]);
        script.extend([LTD_ANSWER.to_string(), LTD_ANSWER.to_string(), LTD_ANSWER.to_string()]);
        script
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_with(
        orchestrator: &mut BatchOrchestrator<ScriptedOracle>,
        store: &mut CheckpointStore,
        ledger: &ProblemLedger,
        artifacts: &MemoryArtifacts,
        pipeline: &Pipeline,
        requested: &[&str],
        batch: &BatchConfig,
        operator: &mut ScriptedOperator,
        recorder: &mut Recorder,
    ) -> RunSummary {
        let requested: Vec<String> = requested.iter().map(|s| s.to_string()).collect();
        let stages = pipeline.select(&requested).unwrap();
        let ctx = RunContext {
            store,
            problems: ledger,
            artifacts,
            operator,
            observer: recorder,
        };
        orchestrator.run(ctx, &stages, batch).await
    }

    #[tokio::test]
    async fn full_run_checkpoints_every_stage() {
        let (mut store, ledger) = store(2);
        let pipeline = filing_pipeline();
        let mut orchestrator = orchestrator(answers(&happy_item(), 2));
        let mut operator = ScriptedOperator::default();
        let mut recorder = Recorder::default();

        let summary = run_with(
            &mut orchestrator,
            &mut store,
            &ledger,
            &artifacts(),
            &pipeline,
            &[],
            &BatchConfig::default(),
            &mut operator,
            &mut recorder,
        )
        .await;

        assert!(matches!(summary.termination, Termination::Completed));
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.with_problems, 0);
        assert_eq!(summary.oracle_calls, 26);
        assert!(operator.prompts.is_empty());
        assert_eq!(recorder.started, vec![1, 2]);

        for id in 1..=2 {
            assert_eq!(store.checkpoint(id, "table_index").unwrap(), Checkpoint::Done(json!(0)));
            assert_eq!(store.checkpoint(id, "sum_units").unwrap(), Checkpoint::Done(json!(1000)));
            assert_eq!(store.checkpoint(id, "table_body").unwrap(), Checkpoint::Done(json!(POST_TEXT)));
            assert_eq!(store.checkpoint(id, "table_json").unwrap(), Checkpoint::Done(json!(22)));
            assert_eq!(store.checkpoint(id, "value_column").unwrap(), Checkpoint::Done(json!(0)));
            assert_eq!(store.checkpoint(id, "cash_position").unwrap(), Checkpoint::Done(json!(1.2)));
            assert_eq!(store.checkpoint(id, "long_term_debt").unwrap(), Checkpoint::Done(json!(5.0)));
        }
        let record = store.escalation_record(1, "sum_units").unwrap().unwrap();
        assert_eq!(record["outcome"], "accepted");

        // Second run has nothing left to do.
        let summary = run_with(
            &mut orchestrator,
            &mut store,
            &ledger,
            &artifacts(),
            &pipeline,
            &[],
            &BatchConfig::default(),
            &mut operator,
            &mut recorder,
        )
        .await;
        assert!(matches!(summary.termination, Termination::NothingToDo));
        assert_eq!(summary.oracle_calls, 0);
    }

    #[tokio::test]
    async fn failed_stage_blocks_dependents() {
        let (mut store, ledger) = store(1);
        let pipeline = filing_pipeline();
        let mut orchestrator = orchestrator(Vec::new());
        let mut operator = ScriptedOperator::default();
        let mut recorder = Recorder::default();
        let empty = MemoryArtifacts::default();

        let summary = run_with(
            &mut orchestrator,
            &mut store,
            &ledger,
            &empty,
            &pipeline,
            &[],
            &BatchConfig::default(),
            &mut operator,
            &mut recorder,
        )
        .await;

        assert!(matches!(summary.termination, Termination::Completed));
        assert_eq!(summary.with_problems, 1);
        assert_eq!(store.checkpoint(1, "table_index").unwrap(), Checkpoint::Failed);
        assert_eq!(store.checkpoint(1, "sum_units").unwrap(), Checkpoint::Blocked);
        assert_eq!(store.checkpoint(1, "long_term_debt").unwrap(), Checkpoint::Blocked);
        assert_eq!(store.stage_counts("long_term_debt").unwrap().blocked, 1);
        assert_eq!(
            store.item_problems(1).unwrap(),
            vec![("table_index".to_string(), "balance sheet: no text in file".to_string())]
        );

        let report = &recorder.finished[0];
        assert_eq!(report.stages[0].status, StageStatus::Failed);
        assert!(report.stages[1..].iter().all(|s| s.status == StageStatus::Blocked));
    }

    #[tokio::test]
    async fn failed_items_do_not_block_skip_existing() {
        let (mut store, ledger) = store(3);
        let pipeline = filing_pipeline();
        let mut orchestrator = orchestrator(Vec::new());
        let mut operator = ScriptedOperator::default();
        let mut recorder = Recorder::default();
        let empty = MemoryArtifacts::default();
        let batch = BatchConfig {
            batch_size: Some(1),
            ..BatchConfig::default()
        };

        for _ in 0..3 {
            let summary = run_with(
                &mut orchestrator,
                &mut store,
                &ledger,
                &empty,
                &pipeline,
                &[],
                &batch,
                &mut operator,
                &mut recorder,
            )
            .await;
            assert!(matches!(summary.termination, Termination::Completed));
            assert_eq!(summary.processed, 1);
        }

        assert_eq!(recorder.started, vec![1, 2, 3]);
        assert!(store.pending_ids("long_term_debt").unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmatched_post_text_still_converts_table() {
        let (mut store, ledger) = store(1);
        let pipeline = filing_pipeline();
        let script = item_script(&["'nowhere'"; 4]);
        let mut orchestrator = orchestrator(answers(&script, 1));
        let mut operator = ScriptedOperator::default();
        let mut recorder = Recorder::default();

        let summary = run_with(
            &mut orchestrator,
            &mut store,
            &ledger,
            &artifacts(),
            &pipeline,
            &[],
            &BatchConfig::default(),
            &mut operator,
            &mut recorder,
        )
        .await;

        assert!(matches!(summary.termination, Termination::Completed));
        assert_eq!(summary.with_problems, 1);
        assert_eq!(store.checkpoint(1, "table_body").unwrap(), Checkpoint::Done(Value::Null));
        assert_eq!(store.checkpoint(1, "table_json").unwrap(), Checkpoint::Done(json!(22)));
        assert_eq!(store.checkpoint(1, "long_term_debt").unwrap(), Checkpoint::Done(json!(5.0)));
        assert_eq!(
            store.item_problems(1).unwrap(),
            vec![("table_body".to_string(), "post-table text: no match to text block".to_string())]
        );
        assert_eq!(recorder.finished[0].stages[2].status, StageStatus::Degraded);
    }

    #[tokio::test]
    async fn declined_overwrite_changes_nothing() {
        let (mut store, ledger) = store(2);
        let pipeline = filing_pipeline();
        let mut orchestrator = orchestrator(Vec::new());
        let mut operator = ScriptedOperator::confirming(false);
        let mut recorder = Recorder::default();
        let batch = BatchConfig {
            skip_existing: false,
            ..BatchConfig::default()
        };

        let summary = run_with(
            &mut orchestrator,
            &mut store,
            &ledger,
            &artifacts(),
            &pipeline,
            &[],
            &batch,
            &mut operator,
            &mut recorder,
        )
        .await;

        assert!(matches!(summary.termination, Termination::Declined));
        assert_eq!(operator.prompts.len(), 1);
        assert!(operator.prompts[0].contains("2 item(s)"));
        assert!(recorder.started.is_empty());
        assert_eq!(store.checkpoint(1, "table_index").unwrap(), Checkpoint::Pending);
    }

    #[tokio::test]
    async fn cancelled_run_commits_nothing() {
        let (mut store, ledger) = store(2);
        let pipeline = filing_pipeline();
        let mut orchestrator = orchestrator(answers(&happy_item(), 2));
        orchestrator.cancel_flag().store(true, Ordering::SeqCst);
        let mut operator = ScriptedOperator::default();
        let mut recorder = Recorder::default();

        let summary = run_with(
            &mut orchestrator,
            &mut store,
            &ledger,
            &artifacts(),
            &pipeline,
            &[],
            &BatchConfig::default(),
            &mut operator,
            &mut recorder,
        )
        .await;

        assert!(matches!(summary.termination, Termination::Interrupted));
        assert_eq!(summary.processed, 0);
        assert_eq!(store.checkpoint(1, "table_index").unwrap(), Checkpoint::Pending);
    }

    #[tokio::test]
    async fn fatal_oracle_error_stops_before_commit() {
        let (mut store, ledger) = store(2);
        let pipeline = filing_pipeline();
        let mut orchestrator = orchestrator(vec![Err(OracleError::QuotaExhausted("billing".into()))]);
        let mut operator = ScriptedOperator::default();
        let mut recorder = Recorder::default();

        let summary = run_with(
            &mut orchestrator,
            &mut store,
            &ledger,
            &artifacts(),
            &pipeline,
            &[],
            &BatchConfig::default(),
            &mut operator,
            &mut recorder,
        )
        .await;

        assert!(summary.is_fatal());
        assert!(matches!(summary.termination, Termination::Fatal(FatalError::QuotaExhausted(_))));
        assert_eq!(summary.processed, 0);
        assert_eq!(store.checkpoint(1, "table_index").unwrap(), Checkpoint::Pending);
    }

    #[tokio::test]
    async fn missing_prerequisites_are_skipped() {
        let (mut store, ledger) = store(2);
        store
            .commit_item(
                2,
                &[StageCommit {
                    stage: "table_index".into(),
                    checkpoint: Checkpoint::Done(json!(0)),
                    record: None,
                    problem_ids: Vec::new(),
                }],
            )
            .unwrap();
        let pipeline = filing_pipeline();
        let mut orchestrator = orchestrator(answers(&["1000"; 2], 1));
        let mut operator = ScriptedOperator::default();
        let mut recorder = Recorder::default();

        let summary = run_with(
            &mut orchestrator,
            &mut store,
            &ledger,
            &artifacts(),
            &pipeline,
            &["sum_units"],
            &BatchConfig::default(),
            &mut operator,
            &mut recorder,
        )
        .await;

        assert!(matches!(summary.termination, Termination::Completed));
        assert_eq!(recorder.skipped, vec![1]);
        assert_eq!(summary.processed, 1);
        assert_eq!(store.checkpoint(2, "sum_units").unwrap(), Checkpoint::Done(json!(1000)));
    }
}
