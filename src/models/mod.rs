//! Data models for queued OCR tasks.

mod task;

pub use task::{new_task_id, TaskMetrics, TaskRecord, TaskStatus};
