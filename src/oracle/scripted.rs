use std::collections::VecDeque;
use std::sync::Mutex;

use super::client::Oracle;
use super::error::OracleError;
use super::types::OracleRequest;

/// Replays a fixed script of answers and records every request it receives.
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<String, OracleError>>>,
    requests: Mutex<Vec<(String, OracleRequest)>>,
}

impl ScriptedOracle {
    pub fn new(script: Vec<Result<String, OracleError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn answers(answers: &[&str]) -> Self {
        Self::new(answers.iter().map(|a| Ok(a.to_string())).collect())
    }

    /// `(model, request)` pairs in call order.
    pub fn requests(&self) -> Vec<(String, OracleRequest)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

impl Oracle for ScriptedOracle {
    async fn complete(&self, model: &str, request: &OracleRequest) -> Result<String, OracleError> {
        self.requests
            .lock()
            .unwrap()
            .push((model.to_string(), request.clone()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::MalformedResponse("script exhausted".into())))
    }
}
