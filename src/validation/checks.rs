//! Canonical checks shared by the filing stages.

use serde_json::{Map, Value};

use super::gate::Check;
use super::problem::Problem;
use crate::consensus::{OracleOutput, OutputShape};
use crate::pipeline::artifacts::{KeyPath, StructuredDocument};

/// Fails on an empty answer.
pub struct Present {
    problem: String,
}

impl Present {
    pub fn new(problem: impl Into<String>) -> Self {
        Self {
            problem: problem.into(),
        }
    }
}

impl Check for Present {
    fn evaluate(&self, output: &OracleOutput) -> Result<(), Vec<Problem>> {
        if output.is_empty() {
            return Err(vec![Problem::new(&self.problem)]);
        }
        Ok(())
    }
}

/// Fails unless the answer has the expected container or scalar type.
pub struct Conforms {
    shape: OutputShape,
    problem: String,
}

impl Conforms {
    pub fn new(shape: OutputShape, problem: impl Into<String>) -> Self {
        Self {
            shape,
            problem: problem.into(),
        }
    }
}

impl Check for Conforms {
    fn evaluate(&self, output: &OracleOutput) -> Result<(), Vec<Problem>> {
        if output.conforms_to(self.shape) {
            Ok(())
        } else {
            Err(vec![Problem::new(&self.problem)])
        }
    }
}

/// Integer answer must belong to a small enumerated set.
pub struct OneOf {
    allowed: Vec<i64>,
    problem: String,
}

impl OneOf {
    pub fn new(allowed: Vec<i64>, problem: impl Into<String>) -> Self {
        Self {
            allowed,
            problem: problem.into(),
        }
    }
}

impl Check for OneOf {
    fn evaluate(&self, output: &OracleOutput) -> Result<(), Vec<Problem>> {
        match output.as_i64() {
            Some(n) if self.allowed.contains(&n) => Ok(()),
            _ => Err(vec![Problem::new(&self.problem)]),
        }
    }
}

/// Integer answer must index into a sequence of `len` elements.
pub struct IndexRange {
    len: usize,
    problem: String,
}

impl IndexRange {
    pub fn new(len: usize, problem: impl Into<String>) -> Self {
        Self {
            len,
            problem: problem.into(),
        }
    }
}

impl Check for IndexRange {
    fn evaluate(&self, output: &OracleOutput) -> Result<(), Vec<Problem>> {
        match output.as_i64().and_then(|n| usize::try_from(n).ok()) {
            Some(idx) if idx < self.len => Ok(()),
            _ => Err(vec![Problem::new(&self.problem)]),
        }
    }
}

/// The segment an index answer points at must carry at least `min_chars`
/// characters of text.
pub struct MinContentLength {
    lengths: Vec<usize>,
    min_chars: usize,
    problem: String,
}

impl MinContentLength {
    pub fn new(lengths: Vec<usize>, min_chars: usize, problem: impl Into<String>) -> Self {
        Self {
            lengths,
            min_chars,
            problem: problem.into(),
        }
    }
}

impl Check for MinContentLength {
    fn evaluate(&self, output: &OracleOutput) -> Result<(), Vec<Problem>> {
        let long_enough = output
            .as_i64()
            .and_then(|n| usize::try_from(n).ok())
            .and_then(|idx| self.lengths.get(idx))
            .is_some_and(|len| *len >= self.min_chars);
        if long_enough {
            Ok(())
        } else {
            Err(vec![Problem::new(&self.problem)])
        }
    }
}

/// Every numbered key path in an object answer must exist in the companion
/// document. Reports one problem per broken path.
pub struct PathsExist<D> {
    document: D,
    problem: String,
}

impl<D: StructuredDocument> PathsExist<D> {
    pub fn new(document: D, problem: impl Into<String>) -> Self {
        Self {
            document,
            problem: problem.into(),
        }
    }
}

impl<D: StructuredDocument> Check for PathsExist<D> {
    fn evaluate(&self, output: &OracleOutput) -> Result<(), Vec<Problem>> {
        let Some(paths) = output.as_object() else {
            return Err(vec![Problem::new(&self.problem)]);
        };
        let problems: Vec<Problem> = self
            .document
            .invalid_paths(&key_paths(paths))
            .into_iter()
            .map(|id| Problem::detailed(&self.problem, format!("index = {id}")))
            .collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// Numbered key paths of an object answer. Entries that are not arrays of
/// strings come back as `None`.
pub fn key_paths(paths: &Map<String, Value>) -> Vec<(String, Option<KeyPath>)> {
    paths
        .iter()
        .map(|(id, path)| {
            let keys = path.as_array().and_then(|keys| {
                keys.iter()
                    .map(|k| k.as_str().map(str::to_string))
                    .collect::<Option<KeyPath>>()
            });
            (id.clone(), keys)
        })
        .collect()
}
