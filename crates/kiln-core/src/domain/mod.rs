//! Domain model (IDs, statuses, records, views).

pub mod ids;
pub mod record;
pub mod state;
pub mod task_type;
pub mod view;

pub use ids::TaskId;
pub use record::{RESULT_PREVIEW_LEN, TaskRecord};
pub use state::{StatusCounts, TaskStatus};
pub use task_type::TaskType;
pub use view::{Submission, TaskView};
