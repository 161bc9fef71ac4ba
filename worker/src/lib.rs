//! The asynchronous task pipeline: a deduplicating bounded queue, a fixed
//! worker pool draining it, and one handler per task type.

pub mod handlers;
pub mod pool;
pub mod queue;

pub use handlers::{
    default_handlers, CloneHandler, HandlerError, HandlerResult, PullHandler, ResetHandler,
    StatsHandler, SwitchHandler, TaskHandler,
};
pub use pool::WorkerPool;
pub use queue::{QueueError, TaskQueue};
