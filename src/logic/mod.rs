pub mod aliases;
pub mod capacity;
pub mod entries;
pub mod interpreter;
pub mod materialize;
pub mod preview;
pub mod sanitize;
pub mod staging_ops;

pub use aliases::{apply_values, is_accepted_node_id, is_shared_reference_id, resolve_aliases};
pub use capacity::{BatchEvaluation, CapacityEvaluator, CapacityOutcome, EvalStats};
pub use entries::save_user_entries_neutral;
pub use interpreter::{OperationInterpreter, StoredOperationInterpreter, EMPTY_SENTINEL};
pub use materialize::{
    store_calculated_values, CalculatedStoreSummary, CreateParams, MaterializeError,
    MaterializedSubmission, Materializer,
};
pub use preview::{PreviewEvaluator, PreviewParams};
pub use sanitize::{sanitize, sanitize_map};
pub use staging_ops::{CommitOutcome, StageParams, StagingError, StagingOps};
