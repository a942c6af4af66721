use std::collections::HashMap;

use rusqlite::params;
use tracing::debug;

use super::store::CheckpointStore;
use crate::error::FatalError;
use crate::validation::{Problem, ProblemLog};

/// Closed vocabulary of problem descriptions, keyed to stable ids.
#[derive(Debug, Clone, Default)]
pub struct ProblemLedger {
    vocabulary: HashMap<String, i64>,
}

impl ProblemLedger {
    /// Add vocabulary entries that are not registered yet. Returns how many
    /// were new.
    pub fn register(store: &mut CheckpointStore, descriptions: &[&str]) -> Result<usize, FatalError> {
        let tx = store.connection_mut().transaction()?;
        let mut added = 0;
        for description in descriptions {
            added += tx.execute(
                "INSERT OR IGNORE INTO problem_vocabulary (description) VALUES (?1)",
                params![description],
            )?;
        }
        tx.commit()?;
        debug!(added, "problem vocabulary registered");
        Ok(added)
    }

    pub fn load(store: &CheckpointStore) -> Result<Self, FatalError> {
        let mut stmt = store
            .connection()
            .prepare("SELECT description, id FROM problem_vocabulary")?;
        let vocabulary = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashMap<String, i64>, _>>()?;
        Ok(Self { vocabulary })
    }

    pub fn len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }

    /// Id of the vocabulary entry a problem belongs to. An unknown entry means
    /// the code and the registered vocabulary have drifted apart.
    pub fn resolve(&self, problem: &Problem) -> Result<i64, FatalError> {
        let key = problem.vocabulary_key();
        self.vocabulary
            .get(key)
            .copied()
            .ok_or_else(|| FatalError::UnregisteredProblem(key.to_string()))
    }

    /// Ids for every logged problem, deduplicated, in log order.
    pub fn resolve_all(&self, problems: &ProblemLog) -> Result<Vec<i64>, FatalError> {
        let mut ids = Vec::with_capacity(problems.len());
        for problem in problems.iter() {
            let id = self.resolve(problem)?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}
