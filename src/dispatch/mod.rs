pub mod manager;
pub mod planner;
pub mod scheduler;

pub use manager::{run_tick, DispatchOptions, TickReport};
pub use planner::{plan_batches, Batch};
pub use scheduler::Scheduler;
