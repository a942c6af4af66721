//! Second-opinion review of structured answers.
//!
//! A cheap term heuristic decides whether an accepted key-path answer looks
//! suspect; if it does, a reviewer tier is asked which numbered entries to
//! drop.

use serde_json::{Map, Value};

use super::tier::Tier;
use crate::consensus::{Decision, OracleOutput};
use crate::oracle::OracleRequest;
use crate::pipeline::artifacts::KeyPath;
use crate::validation::Problem;
use crate::validation::checks::key_paths;

/// Term lists matched against normalised keys (lowercase, `-` read as a space).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermRules {
    /// Suspect when found in the last key of a path.
    pub black_list: Vec<String>,
    /// Suspect anywhere in a path unless a white-list term also appears.
    pub gray_list: Vec<String>,
    pub white_list: Vec<String>,
    /// Suspect unless one of these appears somewhere in the path.
    pub required: Vec<String>,
}

fn terms(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn normalise(key: &str) -> String {
    key.to_lowercase().replace('-', " ")
}

impl TermRules {
    /// Current cash position.
    pub fn cash_position() -> Self {
        Self {
            black_list: terms(&["escrow", "inventor", "receivable", "tax", "total"]),
            required: terms(&["current"]),
            ..Self::default()
        }
    }

    /// Long-term debt.
    pub fn long_term_debt() -> Self {
        Self {
            black_list: terms(&["tax", "total"]),
            gray_list: terms(&["current", "short term"]),
            white_list: terms(&["non current", "long term", "term debt"]),
            ..Self::default()
        }
    }

    pub fn path_is_suspect(&self, path: &[String]) -> bool {
        let keys: Vec<String> = path.iter().map(|k| normalise(k)).collect();
        let any_key = |list: &[String]| keys.iter().any(|k| list.iter().any(|t| k.contains(t.as_str())));

        let blacklisted = keys
            .last()
            .is_some_and(|last| self.black_list.iter().any(|t| last.contains(t.as_str())));
        let missing_required = !self.required.is_empty() && !any_key(self.required.as_slice());
        let gray_unredeemed = any_key(self.gray_list.as_slice()) && !any_key(self.white_list.as_slice());

        blacklisted || missing_required || gray_unredeemed
    }

    pub fn is_suspect(&self, paths: &[(String, Option<KeyPath>)]) -> bool {
        paths
            .iter()
            .any(|(_, path)| path.as_deref().is_some_and(|p| self.path_is_suspect(p)))
    }
}

/// Review configuration for one stage.
#[derive(Debug, Clone)]
pub struct SupervisorSpec {
    pub tier: Tier,
    pub rules: TermRules,
    pub instructions: String,
    /// Text placed before the serialized key paths in the review request.
    pub preamble: String,
    /// Recorded when the review is inconclusive.
    pub warning: Problem,
}

impl SupervisorSpec {
    pub fn is_suspect(&self, output: &OracleOutput) -> bool {
        output
            .as_object()
            .is_some_and(|paths| self.rules.is_suspect(&key_paths(paths)))
    }

    pub fn request(&self, output: &OracleOutput) -> OracleRequest {
        OracleRequest::new(
            self.instructions.clone(),
            format!("{} {}", self.preamble, output.canonical()),
        )
    }

    /// Keys the reviewer asked to remove. Only a non-empty list counts.
    pub fn removal_keys(decision: &Decision) -> Option<Vec<String>> {
        let items = decision.output()?.as_array()?;
        if items.is_empty() {
            return None;
        }
        Some(
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        )
    }

    /// The reviewed answer without the removed entries.
    pub fn apply(output: &OracleOutput, removals: &[String]) -> OracleOutput {
        match output.as_object() {
            Some(paths) => {
                let kept: Map<String, Value> = paths
                    .iter()
                    .filter(|(key, _)| !removals.contains(key))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                OracleOutput::Structured(Value::Object(kept))
            }
            None => output.clone(),
        }
    }
}
