pub mod operator;
pub mod problems;
pub mod scheduler;
pub mod store;

pub use operator::{ConsoleOperator, LockAction, Operator, with_lock_retry};
pub use problems::ProblemLedger;
pub use scheduler::{BatchConfig, Selection, SelectionMode, Skipped, check_prerequisites, select_batch};
pub use store::{Checkpoint, CheckpointStore, FAILED_SENTINEL, StageCommit, StageCounts, WorkItem};
