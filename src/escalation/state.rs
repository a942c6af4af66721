use std::fmt;

use serde::{Deserialize, Serialize};

/// States one stage passes through while tiers are tried.
///
/// NOT_STARTED → TIER_ATTEMPT(i) → VALIDATED(i) → [SUPERVISOR_CHECK(i)] → ACCEPTED
///
/// A rejected tier moves on to TIER_ATTEMPT(i + 1); running out of tiers ends
/// in FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "tier", rename_all = "snake_case")]
pub enum StageState {
    NotStarted,
    TierAttempt(usize),
    Validated(usize),
    SupervisorCheck(usize),
    Accepted,
    AcceptedWithWarning,
    Failed,
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageState::Accepted | StageState::AcceptedWithWarning | StageState::Failed
        )
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageState::NotStarted => write!(f, "NOT_STARTED"),
            StageState::TierAttempt(i) => write!(f, "TIER_ATTEMPT({i})"),
            StageState::Validated(i) => write!(f, "VALIDATED({i})"),
            StageState::SupervisorCheck(i) => write!(f, "SUPERVISOR_CHECK({i})"),
            StageState::Accepted => write!(f, "ACCEPTED"),
            StageState::AcceptedWithWarning => write!(f, "ACCEPTED_WITH_WARNING"),
            StageState::Failed => write!(f, "FAILED"),
        }
    }
}

/// What happened in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    Begin,
    /// The tier's decision passed the validation gate.
    Passed,
    /// The tier's decision failed the validation gate.
    Rejected,
    /// The accepted decision looks suspect and needs review.
    Suspect,
    /// Nothing suspect about the accepted decision.
    Clean,
    /// The supervisor returned a usable removal list.
    SupervisorApplied,
    /// The supervisor's answer was empty or unusable.
    SupervisorInconclusive,
}

/// How to treat an inconclusive supervisor review.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorPolicy {
    /// Keep the reviewed decision and record a warning.
    #[default]
    Lenient,
    /// Treat the review as a rejection of the tier.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Next(StageState),
    /// A terminal state was reached.
    Complete(StageState),
    /// The event makes no sense in the current state; nothing changed.
    Invalid { state: StageState, event: StageEvent },
}

/// Drives one stage through [`StageState`]s, keeping the history.
#[derive(Debug, Clone)]
pub struct StageMachine {
    state: StageState,
    history: Vec<StageState>,
    tier_count: usize,
    policy: SupervisorPolicy,
}

impl StageMachine {
    pub fn new(tier_count: usize, policy: SupervisorPolicy) -> Self {
        Self {
            state: StageState::NotStarted,
            history: Vec::new(),
            tier_count,
            policy,
        }
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    /// Every state visited, the current one last.
    pub fn transitions(&self) -> Vec<StageState> {
        let mut all = self.history.clone();
        all.push(self.state);
        all
    }

    pub fn next(&mut self, event: StageEvent) -> Transition {
        use StageEvent as E;
        use StageState as S;

        let target = match (self.state, event) {
            (s, _) if s.is_terminal() => return Transition::Complete(s),
            (S::NotStarted, E::Begin) => self.tier_or_failed(0),
            (S::TierAttempt(i), E::Passed) => S::Validated(i),
            (S::TierAttempt(i), E::Rejected) => self.tier_or_failed(i + 1),
            (S::Validated(_), E::Clean) => S::Accepted,
            (S::Validated(i), E::Suspect) => S::SupervisorCheck(i),
            (S::SupervisorCheck(_), E::SupervisorApplied) => S::Accepted,
            (S::SupervisorCheck(i), E::SupervisorInconclusive) => match self.policy {
                SupervisorPolicy::Lenient => S::AcceptedWithWarning,
                SupervisorPolicy::Strict => self.tier_or_failed(i + 1),
            },
            (state, event) => return Transition::Invalid { state, event },
        };

        self.history.push(self.state);
        self.state = target;
        if target.is_terminal() {
            Transition::Complete(target)
        } else {
            Transition::Next(target)
        }
    }

    fn tier_or_failed(&self, tier: usize) -> StageState {
        if tier < self.tier_count {
            StageState::TierAttempt(tier)
        } else {
            StageState::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tier_accepted() {
        let mut m = StageMachine::new(2, SupervisorPolicy::Lenient);
        assert_eq!(m.next(StageEvent::Begin), Transition::Next(StageState::TierAttempt(0)));
        assert_eq!(m.next(StageEvent::Passed), Transition::Next(StageState::Validated(0)));
        assert_eq!(m.next(StageEvent::Clean), Transition::Complete(StageState::Accepted));

        // Terminal states stay put.
        assert_eq!(m.next(StageEvent::Begin), Transition::Complete(StageState::Accepted));
        assert_eq!(
            m.transitions(),
            vec![
                StageState::NotStarted,
                StageState::TierAttempt(0),
                StageState::Validated(0),
                StageState::Accepted
            ]
        );
    }

    #[test]
    fn rejection_escalates_then_fails() {
        let mut m = StageMachine::new(2, SupervisorPolicy::Lenient);
        m.next(StageEvent::Begin);
        assert_eq!(m.next(StageEvent::Rejected), Transition::Next(StageState::TierAttempt(1)));
        assert_eq!(m.next(StageEvent::Rejected), Transition::Complete(StageState::Failed));
    }

    #[test]
    fn no_tiers_fails_immediately() {
        let mut m = StageMachine::new(0, SupervisorPolicy::Lenient);
        assert_eq!(m.next(StageEvent::Begin), Transition::Complete(StageState::Failed));
    }

    #[test]
    fn supervisor_applied_accepts() {
        let mut m = StageMachine::new(2, SupervisorPolicy::Strict);
        m.next(StageEvent::Begin);
        m.next(StageEvent::Passed);
        assert_eq!(m.next(StageEvent::Suspect), Transition::Next(StageState::SupervisorCheck(0)));
        assert_eq!(
            m.next(StageEvent::SupervisorApplied),
            Transition::Complete(StageState::Accepted)
        );
    }

    #[test]
    fn inconclusive_supervisor_depends_on_policy() {
        let mut lenient = StageMachine::new(2, SupervisorPolicy::Lenient);
        lenient.next(StageEvent::Begin);
        lenient.next(StageEvent::Passed);
        lenient.next(StageEvent::Suspect);
        assert_eq!(
            lenient.next(StageEvent::SupervisorInconclusive),
            Transition::Complete(StageState::AcceptedWithWarning)
        );

        let mut strict = StageMachine::new(2, SupervisorPolicy::Strict);
        strict.next(StageEvent::Begin);
        strict.next(StageEvent::Passed);
        strict.next(StageEvent::Suspect);
        assert_eq!(
            strict.next(StageEvent::SupervisorInconclusive),
            Transition::Next(StageState::TierAttempt(1))
        );
        strict.next(StageEvent::Passed);
        strict.next(StageEvent::Suspect);
        assert_eq!(
            strict.next(StageEvent::SupervisorInconclusive),
            Transition::Complete(StageState::Failed)
        );
    }

    #[test]
    fn invalid_event_changes_nothing() {
        let mut m = StageMachine::new(2, SupervisorPolicy::Lenient);
        let t = m.next(StageEvent::Passed);
        assert_eq!(
            t,
            Transition::Invalid {
                state: StageState::NotStarted,
                event: StageEvent::Passed
            }
        );
        assert_eq!(m.state(), StageState::NotStarted);
        assert_eq!(m.transitions(), vec![StageState::NotStarted]);
    }

    #[test]
    fn state_display() {
        assert_eq!(StageState::TierAttempt(1).to_string(), "TIER_ATTEMPT(1)");
        assert_eq!(StageState::AcceptedWithWarning.to_string(), "ACCEPTED_WITH_WARNING");
    }
}
