pub mod aggregator;
pub mod output;

pub use aggregator::{Decision, Vote, collect_votes, majority, majority_threshold};
pub use output::{OracleOutput, OutputShape};
