pub mod controller;
pub mod record;
pub mod state;
pub mod supervisor;
pub mod tier;

pub use controller::{EscalationController, StagePlan};
pub use record::{EscalationRecord, StageOutcome, StageResult, SupervisorReview, TierRun};
pub use state::{StageEvent, StageMachine, StageState, SupervisorPolicy, Transition};
pub use supervisor::{SupervisorSpec, TermRules};
pub use tier::{CHEAP_MODEL, STRONG_MODEL, Tier, default_tiers};
