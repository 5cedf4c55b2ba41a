//! Services module for posting-service.

pub mod confidence;
pub mod database;
pub mod engine;
pub mod matcher;
pub mod metrics;
pub mod poster;
pub mod queue;
pub mod reconciliation;
pub mod subledger;
pub mod sweeper;
pub mod voucher_builder;

pub use confidence::{ConfidenceEvaluator, ExtractionSignal, ExtractorConfidence, Score, Triage};
pub use database::Database;
pub use engine::{PostingEngine, ReviewDecision, SubmitOutcome};
pub use matcher::{MatchDecision, Matcher};
pub use metrics::{get_metrics, init_metrics, record_error};
pub use poster::LedgerPoster;
pub use queue::TaskQueue;
pub use reconciliation::ReconciliationStore;
pub use sweeper::{LeaseSweeper, SweeperConfig};
pub use voucher_builder::{validate_lines, VoucherBuilder};
