//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 任务 ID 管理
//!
//! - ID 0: 保留，不分配给任何任务
//! - ID 1+: 普通任务
//!
//! ID 单调递增，不复用；注册表按 ID 查找任务。

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

pub const TASK_ID_MAX_LIMIT: u32 = 4194304; // 与 PID_MAX_LIMIT 相同，4M

pub const TASK_ID_RESERVED: u32 = 0;

/// 任务标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u32);

impl TaskId {
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 任务 ID 分配器
pub struct TaskIdAllocator {
    next: AtomicU32,
}

impl TaskIdAllocator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(TASK_ID_RESERVED + 1),
        }
    }

    /// 分配一个新 ID，耗尽时返回 None
    ///
    /// @ambicritical
    pub fn alloc(&self) -> Option<TaskId> {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        if id >= TASK_ID_MAX_LIMIT {
            // 回退计数，避免溢出回绕到已分配的 ID
            self.next.store(TASK_ID_MAX_LIMIT, Ordering::Relaxed);
            None
        } else {
            Some(TaskId(id))
        }
    }
}

impl Default for TaskIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
