use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::output::{OracleOutput, OutputShape};
use crate::error::FatalError;
use crate::oracle::{Oracle, OracleClient, OracleRequest};

/// Seeds are drawn from `[0, SEED_RANGE)`.
pub const SEED_RANGE: u64 = 10_000_000;

/// One trial's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// Zero-based trial index within the tier.
    pub trial: usize,
    pub seed: Option<u64>,
    pub raw: String,
    pub output: OracleOutput,
}

/// Aggregate of a tier's votes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "output", rename_all = "snake_case")]
pub enum Decision {
    Value(OracleOutput),
    Undecided,
}

impl Decision {
    pub fn output(&self) -> Option<&OracleOutput> {
        match self {
            Decision::Value(output) => Some(output),
            Decision::Undecided => None,
        }
    }

    /// Undecided reads as no answer at all.
    pub fn into_output(self) -> OracleOutput {
        match self {
            Decision::Value(output) => output,
            Decision::Undecided => OracleOutput::Empty,
        }
    }
}

/// `ceil(n / 2)`.
pub fn majority_threshold(n: usize) -> usize {
    n.div_ceil(2)
}

/// Canonical forms with their counts, in first-seen order.
fn tally(votes: &[Vote]) -> Vec<(String, usize, usize)> {
    let mut counts: Vec<(String, usize, usize)> = Vec::new();
    for (idx, vote) in votes.iter().enumerate() {
        let key = vote.output.canonical();
        match counts.iter_mut().find(|(k, _, _)| *k == key) {
            Some(entry) => entry.1 += 1,
            None => counts.push((key, 1, idx)),
        }
    }
    counts
}

/// True once the leading answer holds `ceil(trial_count / 2)` votes, at which
/// point no remaining trial can produce an equal or larger rival.
pub fn is_unbeatable(votes: &[Vote], trial_count: usize) -> bool {
    let needed = majority_threshold(trial_count);
    if votes.len() < needed {
        return false;
    }
    tally(votes)
        .iter()
        .map(|(_, count, _)| *count)
        .max()
        .is_some_and(|lead| lead >= needed)
}

/// Majority decision over the collected votes.
///
/// A single vote is returned as is. Otherwise the strictly highest count
/// wins if it reaches `ceil(votes / 2)`; ties and pluralities below that are
/// undecided. The winning value keeps the type of its first vote.
pub fn majority(votes: &[Vote]) -> Decision {
    match votes {
        [] => Decision::Undecided,
        [only] => Decision::Value(only.output.clone()),
        _ => {
            let counts = tally(votes);
            let Some(top) = counts.iter().map(|(_, c, _)| *c).max() else {
                return Decision::Undecided;
            };
            let mut leaders = counts.iter().filter(|(_, c, _)| *c == top);
            let (Some((_, _, first_idx)), None) = (leaders.next(), leaders.next()) else {
                return Decision::Undecided;
            };
            if top >= majority_threshold(votes.len()) {
                Decision::Value(votes[*first_idx].output.clone())
            } else {
                Decision::Undecided
            }
        }
    }
}

pub fn fresh_seed() -> u64 {
    Uuid::new_v4().as_u64_pair().0 % SEED_RANGE
}

/// Run up to `trial_count` sequential trials of `request` against `model`,
/// stopping early once the leading answer is unbeatable.
pub async fn collect_votes<O: Oracle>(
    client: &mut OracleClient<O>,
    model: &str,
    request: &OracleRequest,
    shape: OutputShape,
    trial_count: usize,
    seeded: bool,
) -> Result<Vec<Vote>, FatalError> {
    let trial_count = trial_count.max(1);
    let mut votes = Vec::with_capacity(trial_count);

    for trial in 0..trial_count {
        let seed = seeded.then(fresh_seed);
        let raw = client.call(model, &request.with_seed(seed)).await?;
        let output = OracleOutput::parse(&raw, shape);
        debug!(model, trial, vote = %output, "vote collected");
        votes.push(Vote {
            trial,
            seed,
            raw,
            output,
        });

        if trial_count > 1 && is_unbeatable(&votes, trial_count) {
            if votes.len() < trial_count {
                debug!(model, collected = votes.len(), trial_count, "unbeatable majority, stopping early");
            }
            break;
        }
    }

    Ok(votes)
}
