//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! Rux 调度器核心
//!
//! 多核内核中的任务/线程生命周期管理与 round robin 调度：
//! - `sync`: critical / noncritical / ambicritical 约定与跨核心自旋锁
//! - `arch`: 平台需要实现的接口（CPU、时钟、定时器、执行状态、地址空间）
//! - `process`: 任务与线程
//! - `sched`: 就绪队列、调度器、延迟回收
//! - `config`: 构建时由 Kernel.toml 生成的配置
//! - `errno`: 错误码

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod errno;
pub mod process;
pub mod sched;
pub mod sync;

#[cfg(test)]
mod tests;

pub use errno::{Errno, Result};
pub use process::{kill_reason, HoldScope, Task, TaskFlags, Thread};
pub use sched::{Dispatch, Scheduler, TaskId, ThreadId};
pub use sync::{Critical, ScopedCritical};
