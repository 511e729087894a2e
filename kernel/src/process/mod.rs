//! 任务与线程
//!
//! - `task`: 任务控制块，retain / hold / kill 生命周期
//! - `thread`: 线程控制块，可调度的执行上下文

pub mod task;
pub mod thread;

pub use task::{kill_reason, HoldScope, Task, TaskFlags};
pub use thread::Thread;
