use console::{Style, Term};
use tracing::warn;

use super::store::is_locked;
use crate::error::FatalError;

/// What to do when the ledger is held by another writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAction {
    Retry,
    Abort,
}

/// The human in the loop: confirms destructive runs and decides what to do
/// about a locked ledger.
pub trait Operator {
    fn confirm_overwrite(&mut self, prompt: &str) -> bool;
    fn ledger_locked(&mut self, detail: &str) -> LockAction;
}

/// Prompts on the terminal. `assume_yes` pre-confirms overwrites but never
/// answers lock prompts.
pub struct ConsoleOperator {
    term: Term,
    assume_yes: bool,
    yellow: Style,
}

impl ConsoleOperator {
    pub fn new(assume_yes: bool) -> Self {
        Self {
            term: Term::stderr(),
            assume_yes,
            yellow: Style::new().yellow().bold(),
        }
    }

    fn ask(&self, question: &str) -> Option<String> {
        self.term.write_line(question).ok()?;
        self.term.read_line().ok().map(|s| s.trim().to_lowercase())
    }
}

impl Operator for ConsoleOperator {
    fn confirm_overwrite(&mut self, prompt: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        let question = format!("{} {prompt} [y/N]", self.yellow.apply_to("?"));
        matches!(self.ask(&question).as_deref(), Some("y" | "yes"))
    }

    fn ledger_locked(&mut self, detail: &str) -> LockAction {
        let question = format!(
            "{} Ledger is locked ({detail}). Close other writers, then [r]etry or [q]uit:",
            self.yellow.apply_to("!")
        );
        match self.ask(&question).as_deref() {
            Some("r" | "retry") => LockAction::Retry,
            _ => LockAction::Abort,
        }
    }
}

/// Run a ledger operation, handing lock contention to the operator until the
/// operation succeeds or they give up.
pub fn with_lock_retry<T>(
    operator: &mut dyn Operator,
    mut op: impl FnMut() -> rusqlite::Result<T>,
) -> Result<T, FatalError> {
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if is_locked(&err) => {
                warn!(error = %err, "ledger locked");
                if operator.ledger_locked(&err.to_string()) == LockAction::Abort {
                    return Err(FatalError::Aborted);
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::scripted::ScriptedOperator;
    use super::*;
    use rusqlite::ffi;

    fn busy() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_BUSY), None)
    }

    #[test]
    fn lock_retried_until_success() {
        let mut operator = ScriptedOperator {
            lock_actions: [LockAction::Retry, LockAction::Retry].into(),
            ..Default::default()
        };
        let mut failures = 2;
        let value = with_lock_retry(&mut operator, || {
            if failures > 0 {
                failures -= 1;
                Err(busy())
            } else {
                Ok(42)
            }
        })
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(operator.prompts.len(), 2);
    }

    #[test]
    fn operator_can_quit() {
        let mut operator = ScriptedOperator {
            lock_actions: [LockAction::Abort].into(),
            ..Default::default()
        };
        let err = with_lock_retry(&mut operator, || Err::<(), _>(busy())).unwrap_err();
        assert!(matches!(err, FatalError::Aborted));
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut operator = ScriptedOperator::default();
        let err = with_lock_retry(&mut operator, || {
            Err::<(), _>(rusqlite::Error::QueryReturnedNoRows)
        })
        .unwrap_err();
        assert!(matches!(err, FatalError::Ledger(_)));
        assert!(operator.prompts.is_empty());
    }

    #[test]
    fn assume_yes_confirms_without_prompting() {
        let mut operator = ConsoleOperator::new(true);
        assert!(operator.confirm_overwrite("overwrite 3 items?"));
    }
}
