//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 延迟回收
//!
//! 引用计数归零发生在 critical 上下文里（`release` / `unhold`），而释放
//! 内存必须在 noncritical 上下文中进行。归零的一方只把对象丢进这里，
//! 由 `Scheduler::collect_garbage` 在开中断时逐个销毁。
//!
//! 队列容量在创建时按最大任务数 + 最大线程数预留：每个对象最多被丢弃
//! 一次，而且在销毁之前一直占着自己的注册表/arena 槽位，所以 push 永远
//! 不会触发扩容。

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::process::{Task, Thread};
use crate::sync::{Critical, CriticalLock};

/// 等待销毁的对象
pub enum Garbage {
    /// 两个计数都归零的已杀死任务
    Task(Arc<Task>),
    /// 被回收的已杀死线程
    Thread(Arc<Thread>),
}

pub struct GarbageCollector {
    queue: CriticalLock<Vec<Garbage>>,
}

impl GarbageCollector {
    /// @noncritical
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: CriticalLock::new(Vec::with_capacity(capacity)),
        }
    }

    /// 丢弃一个对象，等待之后销毁
    ///
    /// @critical
    pub fn throw_away(&self, crit: &Critical<'_>, garbage: Garbage) {
        let mut queue = self.queue.lock(crit);
        assert!(
            queue.len() < queue.capacity(),
            "garbage queue overflow ({} entries)",
            queue.len()
        );
        queue.push(garbage);
    }

    /// 取出一个待销毁对象
    ///
    /// @critical
    pub fn pop(&self, crit: &Critical<'_>) -> Option<Garbage> {
        self.queue.lock(crit).pop()
    }

    /// @critical
    pub fn len(&self, crit: &Critical<'_>) -> usize {
        self.queue.lock(crit).len()
    }
}
