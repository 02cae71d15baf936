// Public fallible APIs in this crate share one concrete error contract (`LabelError`).
// Repeating per-function `# Errors` boilerplate obscures behavior more than it clarifies.
#![allow(
    clippy::missing_errors_doc,
    reason = "crate-wide fallible API uses one explicit error type; per-item boilerplate would duplicate contract"
)]

pub mod clock;
pub mod config;
pub mod context;
pub mod encoder;
pub mod error;
pub mod evaluation;
pub mod extractor;
pub mod input;
pub(crate) mod jsonl;
pub mod lock;
pub mod manifest;
pub mod models;
pub mod orchestrator;
pub mod partition;
pub mod poller;
pub mod reconcile;
pub mod sampling;
pub mod service;
pub mod submitter;
pub mod table;
pub mod taxonomy;
pub mod workspace;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, BackendKind, BatchConfig, ServiceConfig};
pub use context::LabelingContext;
pub use error::{ErrorPayload, LabelError, Result};
pub use evaluation::{EvaluationReport, evaluate, load_annotations};
pub use input::{ExpressionUniverse, load_expression_universe};
pub use orchestrator::{LabelingRun, plan_chunks, run_labeling};
pub use sampling::{AnnotationSample, sample_for_annotation};
pub use service::{BatchService, ScriptedService};
pub use table::ResultTable;
pub use taxonomy::{Category, LabelSet, Taxonomy};
