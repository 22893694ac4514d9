//! Конвейер: работник реплики, планировщик и сведение шкалы

pub mod reconciler;
pub mod scheduler;
pub mod worker;

pub use reconciler::{check_scale_factor, partition_results, reconcile, rescale, RescaledTimeline};
pub use scheduler::run_batch;
pub use worker::{process_turn, TurnContext};
