pub mod early_stopping;
pub mod evaluate;
pub mod loss;
pub mod trainer;

pub use early_stopping::{EarlyStopping, StopSignal};
pub use evaluate::{evaluate, EvalReport, MetricStatus, DEFAULT_THRESHOLD};
pub use loss::{positive_weight, weighted_bce_with_logits};
pub use trainer::{EpochRecord, StopReason, Trainer, TrainerState, TrainingReport};
