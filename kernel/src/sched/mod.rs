//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 调度器模块
//!
//! - `runqueue`: 线程 arena 与共享就绪队列
//! - `sched`: 调度器本体（dispatch、超时、线程增删、垃圾回收）
//! - `percpu`: 每个核心上绑定的线程
//! - `garbage`: 延迟回收队列
//! - `pid`: 任务 ID 分配
//! - `registry`: 任务注册表
//!
//! 调度器是一个显式的值，通过 `&'static Scheduler` 传递。需要全局单例
//! 的平台代码用 [`init`] / [`global`]。

pub mod garbage;
pub mod percpu;
pub mod pid;
pub mod registry;
pub mod runqueue;
pub mod sched;

pub use pid::TaskId;
pub use runqueue::{SchedFlags, ThreadId};
pub use sched::{Dispatch, Scheduler};

use spin::Once;

use crate::arch::Platform;
use crate::config::LOG_LEVEL;
use crate::errno::{Errno, Result};

static GLOBAL: Once<Scheduler> = Once::new();

/// 初始化全局调度器
///
/// 只能调用一次，重复初始化返回 `Errno::DeviceOrResourceBusy`
///
/// @noncritical
pub fn init(platform: &'static dyn Platform) -> Result<&'static Scheduler> {
    log::set_max_level(LOG_LEVEL);

    let scheduler = Scheduler::new(platform)?;
    let mut created = false;
    let global = GLOBAL.call_once(|| {
        created = true;
        scheduler
    });
    if !created {
        log::warn!("sched: init called twice");
        return Err(Errno::DeviceOrResourceBusy);
    }

    log::info!(
        "sched: init: {} cores, quantum {} ticks",
        platform.core_count(),
        global.quantum()
    );
    Ok(global)
}

/// 全局调度器，未初始化时返回 None
pub fn global() -> Option<&'static Scheduler> {
    GLOBAL.get()
}
