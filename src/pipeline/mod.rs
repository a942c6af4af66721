pub mod artifacts;
pub mod filings;
pub mod prompts;
pub mod stage;

pub use artifacts::{DocumentSource, FsArtifacts, JsonDocument, KeyPath, SegmentSource, StructuredDocument};
pub use filings::{VOCABULARY, filing_pipeline};
pub use stage::{Artifacts, Pipeline, Prepared, RunStages, Stage, StageContext};
