use chrono::Utc;
use tracing::{debug, info, warn};

use super::record::{EscalationRecord, StageOutcome, StageResult, SupervisorReview, TierRun};
use super::state::{StageEvent, StageMachine, StageState, SupervisorPolicy, Transition};
use super::supervisor::SupervisorSpec;
use super::tier::Tier;
use crate::consensus::{OracleOutput, OutputShape, collect_votes, majority};
use crate::error::FatalError;
use crate::oracle::{Oracle, OracleClient, OracleRequest};
use crate::validation::{ProblemLog, ValidationGate, Verdict};

/// What one stage asks of the oracle and how the answer is judged.
pub struct StagePlan {
    pub stage: String,
    pub shape: OutputShape,
    pub request: OracleRequest,
    pub gate: ValidationGate,
    pub supervisor: Option<SupervisorSpec>,
    /// Upper bound on any tier's trial count for this stage.
    pub trial_cap: Option<usize>,
    /// Ask each tier up to this many times, one trial at a time, and keep the
    /// first answer that validates instead of voting. For answers that vary
    /// too much between trials to ever agree.
    pub attempts: Option<usize>,
}

/// Runs a stage through the tiers in order, stopping at the first tier whose
/// decision validates.
#[derive(Debug, Clone)]
pub struct EscalationController {
    tiers: Vec<Tier>,
    policy: SupervisorPolicy,
}

impl EscalationController {
    pub fn new(tiers: Vec<Tier>, policy: SupervisorPolicy) -> Self {
        Self { tiers, policy }
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Tiers in the order they are tried for `plan`.
    fn schedule(&self, plan: &StagePlan) -> Vec<Tier> {
        self.tiers
            .iter()
            .flat_map(|tier| {
                let tier = match plan.trial_cap {
                    Some(cap) => tier.capped(cap),
                    None => tier.clone(),
                };
                match plan.attempts {
                    Some(n) => vec![tier.capped(1); tier.trials.min(n).max(1)],
                    None => vec![tier],
                }
            })
            .collect()
    }

    /// Validation failures and inconclusive reviews come back as problems in
    /// the result. Only oracle failures that end the run are errors.
    pub async fn run<O: Oracle>(
        &self,
        client: &mut OracleClient<O>,
        item_id: i64,
        plan: &StagePlan,
    ) -> Result<StageResult, FatalError> {
        let started_at = Utc::now();
        let schedule = self.schedule(plan);
        let mut machine = StageMachine::new(schedule.len(), self.policy);
        let mut problems = ProblemLog::new();
        let mut tier_runs = Vec::new();
        let mut reviews = Vec::new();
        let mut candidate: Option<OracleOutput> = None;

        let mut transition = machine.next(StageEvent::Begin);
        let terminal = loop {
            transition = match transition {
                Transition::Complete(state) => break state,
                Transition::Next(StageState::TierAttempt(i)) => {
                    let Some(tier) = schedule.get(i).cloned() else {
                        break StageState::Failed;
                    };
                    info!(item_id, stage = %plan.stage, tier = %tier.name, trials = tier.trials, "querying tier");

                    let votes = collect_votes(
                        client,
                        &tier.model,
                        &plan.request,
                        plan.shape,
                        tier.trials,
                        tier.seeded,
                    )
                    .await?;
                    let decision = majority(&votes);
                    let verdict = plan.gate.evaluate(&decision);
                    debug!(item_id, stage = %plan.stage, tier = %tier.name, ?verdict, "tier judged");

                    let event = match &verdict {
                        Verdict::Pass => {
                            candidate = Some(decision.clone().into_output());
                            StageEvent::Passed
                        }
                        Verdict::Escalate(found) => {
                            problems.extend(found.iter().cloned());
                            StageEvent::Rejected
                        }
                    };
                    tier_runs.push(TierRun {
                        tier: tier.name,
                        model: tier.model,
                        trials_requested: tier.trials,
                        votes,
                        decision,
                        verdict,
                    });
                    machine.next(event)
                }
                Transition::Next(StageState::Validated(_)) => {
                    let suspect = match (&plan.supervisor, &candidate) {
                        (Some(spec), Some(output)) => spec.is_suspect(output),
                        _ => false,
                    };
                    machine.next(if suspect {
                        StageEvent::Suspect
                    } else {
                        StageEvent::Clean
                    })
                }
                Transition::Next(StageState::SupervisorCheck(i)) => {
                    let (Some(spec), Some(output)) = (&plan.supervisor, &candidate) else {
                        break StageState::Failed;
                    };
                    info!(item_id, stage = %plan.stage, model = %spec.tier.model, "suspect decision, asking supervisor");

                    let votes = collect_votes(
                        client,
                        &spec.tier.model,
                        &spec.request(output),
                        OutputShape::List,
                        spec.tier.trials,
                        spec.tier.seeded,
                    )
                    .await?;
                    let decision = majority(&votes);

                    let (event, removed) = match SupervisorSpec::removal_keys(&decision) {
                        Some(keys) => {
                            candidate = Some(SupervisorSpec::apply(output, &keys));
                            (StageEvent::SupervisorApplied, keys)
                        }
                        None => {
                            warn!(item_id, stage = %plan.stage, "supervisor review inconclusive");
                            problems.push(spec.warning.clone());
                            (StageEvent::SupervisorInconclusive, Vec::new())
                        }
                    };
                    reviews.push(SupervisorReview {
                        reviewed_tier: i,
                        model: spec.tier.model.clone(),
                        votes,
                        decision,
                        removed,
                    });
                    machine.next(event)
                }
                Transition::Next(state) | Transition::Invalid { state, .. } => {
                    warn!(item_id, stage = %plan.stage, %state, "unexpected stage state");
                    break StageState::Failed;
                }
            };
        };

        let outcome = StageOutcome::from_state(terminal).unwrap_or(StageOutcome::Failed);
        let mut record = EscalationRecord::new(item_id, &plan.stage, started_at, outcome);
        record.tiers = tier_runs;
        record.reviews = reviews;
        record.state_transitions = machine.transitions();
        record.problems = problems.clone();

        info!(item_id, stage = %plan.stage, ?outcome, problems = problems.len(), "stage finished");
        Ok(StageResult {
            outcome,
            output: if outcome.is_accepted() { candidate } else { None },
            problems,
            record,
        })
    }
}
