use std::fmt;

use serde::{Deserialize, Serialize};

/// A named, enumerable condition attached to a work item and stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Problem {
    pub description: String,
}

impl Problem {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }

    /// Problem with a trailing detail, e.g. `CCP: problematic dict path: index = 3`.
    pub fn detailed(base: &str, detail: impl fmt::Display) -> Self {
        Self::new(format!("{base}: {detail}"))
    }

    /// Vocabulary entry this problem maps to: everything before a third
    /// `:`-separated segment.
    pub fn vocabulary_key(&self) -> &str {
        let mut colons = self.description.match_indices(':').map(|(i, _)| i);
        match (colons.next(), colons.next()) {
            (Some(_), Some(second)) => self.description[..second].trim_end(),
            _ => self.description.trim_end(),
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

impl From<&str> for Problem {
    fn from(s: &str) -> Self {
        Problem::new(s)
    }
}

/// Problems logged during one processing attempt, deduplicated and kept in
/// the order first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProblemLog {
    problems: Vec<Problem>,
}

impl ProblemLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the problem was already logged.
    pub fn push(&mut self, problem: Problem) -> bool {
        if self.problems.contains(&problem) {
            return false;
        }
        self.problems.push(problem);
        true
    }

    pub fn extend(&mut self, problems: impl IntoIterator<Item = Problem>) {
        for problem in problems {
            self.push(problem);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Problem> {
        self.problems.iter()
    }

    pub fn into_vec(self) -> Vec<Problem> {
        self.problems
    }
}

impl FromIterator<Problem> for ProblemLog {
    fn from_iter<I: IntoIterator<Item = Problem>>(iter: I) -> Self {
        let mut log = ProblemLog::new();
        log.extend(iter);
        log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_key_drops_detail() {
        let p = Problem::detailed("CCP: problematic dict path", "index = 3");
        assert_eq!(p.description, "CCP: problematic dict path: index = 3");
        assert_eq!(p.vocabulary_key(), "CCP: problematic dict path");

        let p = Problem::new("units: sum reporting units out of range");
        assert_eq!(p.vocabulary_key(), "units: sum reporting units out of range");
    }

    #[test]
    fn log_deduplicates_in_order() {
        let mut log = ProblemLog::new();
        assert!(log.push("a: x".into()));
        assert!(log.push("b: y".into()));
        assert!(!log.push("a: x".into()));
        log.extend([Problem::new("c: z"), Problem::new("b: y")]);

        let descriptions: Vec<_> = log.iter().map(|p| p.description.as_str()).collect();
        assert_eq!(descriptions, vec!["a: x", "b: y", "c: z"]);
    }

    #[test]
    fn serializes_as_plain_strings() {
        let log: ProblemLog = [Problem::new("a: x"), Problem::new("b: y")]
            .into_iter()
            .collect();
        assert_eq!(serde_json::to_string(&log).unwrap(), r#"["a: x","b: y"]"#);
    }
}
