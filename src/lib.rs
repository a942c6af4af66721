//! Consensus-and-escalation engine for extracting balance-sheet figures from
//! SEC filings with LLM oracles.
//!
//! Each work item passes through an ordered list of stages. A stage asks a
//! cheap oracle tier several times, takes the majority answer, validates it
//! and escalates to stronger tiers when validation fails. Results, escalation
//! records and problems are checkpointed per item in a SQLite ledger.

pub mod cli;
pub mod config;
pub mod consensus;
pub mod error;
pub mod escalation;
pub mod ledger;
pub mod oracle;
pub mod orchestrator;
pub mod pipeline;
pub mod ui;
pub mod validation;

pub use error::{FatalError, Result};
