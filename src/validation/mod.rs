pub mod checks;
pub mod gate;
pub mod problem;

pub use gate::{Check, ValidationGate, Verdict};
pub use problem::{Problem, ProblemLog};
