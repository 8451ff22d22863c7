//! # tagtrain-train
//!
//! The training control loop: hyperparameter schedules, word-budgeted
//! minibatching, the epoch loop with per-epoch checkpoint / evaluation /
//! benchmark, and the per-component tournament that composes `model-best`.

pub mod batch;
pub mod checkpoint;
pub mod compose;
pub mod epoch;
pub mod error;
pub mod meta;
pub mod orchestrator;
pub mod progress;
pub mod schedule;

pub use batch::{TokenCount, minibatch_by_words};
pub use checkpoint::CheckpointManager;
pub use compose::{collate_best_model, find_best, ranking_metrics};
pub use epoch::{EpochTrainer, add_multitask_objectives};
pub use error::TrainError;
pub use meta::{EpochRecord, ModelMeta, SpeedRecord};
pub use orchestrator::{Orchestrator, TrainOptions, TrainSummary, train_loop};
pub use schedule::{Law, Schedule};
