use serde::{Deserialize, Serialize};

use super::problem::Problem;
use crate::consensus::{Decision, OracleOutput};

/// A pure, total predicate over a decided output.
pub trait Check {
    fn evaluate(&self, output: &OracleOutput) -> Result<(), Vec<Problem>>;
}

impl<F> Check for F
where
    F: Fn(&OracleOutput) -> Result<(), Vec<Problem>>,
{
    fn evaluate(&self, output: &OracleOutput) -> Result<(), Vec<Problem>> {
        self(output)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "problems", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    /// Try the next tier; the problems are kept either way.
    Escalate(Vec<Problem>),
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

/// Ordered checks for one stage. Evaluation stops at the first failing check.
#[derive(Default)]
pub struct ValidationGate {
    checks: Vec<Box<dyn Check>>,
}

impl ValidationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, check: impl Check + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// An undecided vote is judged as an empty answer.
    pub fn evaluate(&self, decision: &Decision) -> Verdict {
        let output = decision.output().unwrap_or(&OracleOutput::Empty);
        self.evaluate_output(output)
    }

    pub fn evaluate_output(&self, output: &OracleOutput) -> Verdict {
        for check in &self.checks {
            if let Err(problems) = check.evaluate(output) {
                return Verdict::Escalate(problems);
            }
        }
        Verdict::Pass
    }
}

impl std::fmt::Debug for ValidationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationGate")
            .field("checks", &self.checks.len())
            .finish()
    }
}
