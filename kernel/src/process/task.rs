//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 任务 (Task)
//!
//! 任务是类似进程的容器：拥有一个地址空间句柄和一组线程。生命周期由
//! 两个计数控制：
//! - `retain_count`：活跃引用数。调度器每次把任务的线程放到核心上运行
//!   时 retain 一次，线程离开核心时 release。
//! - `hold_count`：销毁顺序计数，初始为 1（代表"还没被杀死"这个隐式
//!   hold）。多步骤的销毁流程在没有任何活跃引用时也可以靠 hold 保证任务
//!   结构不被提前拆掉。
//!
//! 任务在 `killed && retain_count == 0 && hold_count == 0` 成立的那一刻被
//! 交给垃圾回收器，恰好一次。销毁本身（注销、拆线程、释放地址空间）在
//! `Scheduler::collect_garbage` 中以 noncritical 方式完成。

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use bitflags::bitflags;

use crate::arch::MemoryMap;
use crate::config::MAX_THREADS_PER_TASK;
use crate::errno::{Errno, Result};
use crate::sched::garbage::Garbage;
use crate::sched::pid::TaskId;
use crate::sched::runqueue::ThreadId;
use crate::sched::Scheduler;
use crate::sync::{assert_noncritical, Critical, CriticalLock, ScopedCritical};

/// 任务被杀死的原因
pub mod kill_reason {
    /// 正常退出
    pub const NORMAL: u16 = 0;
    /// 异常终止
    pub const ABORT: u16 = 1;
    /// 权限错误
    pub const PERMISSIONS: u16 = 2;
}

bitflags! {
    /// 任务标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskFlags: u32 {
        /// 用户态任务
        const USER = 1 << 0;
    }
}

struct TaskLife {
    retain_count: u32,
    hold_count: u32,
    kill_status: u16,
    killed: bool,
    drained: bool,
}

impl TaskLife {
    /// 归零条件首次成立时返回 true
    fn check_drain(&mut self) -> bool {
        if self.killed && self.retain_count == 0 && self.hold_count == 0 && !self.drained {
            self.drained = true;
            true
        } else {
            false
        }
    }
}

/// 任务控制块
pub struct Task {
    id: TaskId,
    uid: u32,
    flags: TaskFlags,
    scheduler: &'static Scheduler,
    this: Weak<Task>,
    memory_map: CriticalLock<Option<Box<dyn MemoryMap>>>,
    threads: CriticalLock<Vec<ThreadId>>,
    life: CriticalLock<TaskLife>,
}

impl Task {
    /// 创建并注册一个任务
    ///
    /// 新任务 `retain_count == 0`、`hold_count == 1`。调用者要创建线程，
    /// 需要先 [`retain`](Self::retain)。
    ///
    /// # 返回
    /// - `Errno::TryAgain`：任务 ID 耗尽
    /// - `Errno::OutOfMemory`：注册表已满
    ///
    /// @noncritical
    pub fn new(
        scheduler: &'static Scheduler,
        uid: u32,
        flags: TaskFlags,
        memory_map: Box<dyn MemoryMap>,
    ) -> Result<Arc<Task>> {
        assert_noncritical(scheduler.platform());

        // 先占住注册表槽位，表满时不消耗 ID
        let slot = scheduler.reserve_task_slot()?;
        let Some(id) = scheduler.alloc_task_id() else {
            scheduler.cancel_task_slot(slot);
            return Err(Errno::TryAgain);
        };
        let task = Arc::new_cyclic(|this| Task {
            id,
            uid,
            flags,
            scheduler,
            this: this.clone(),
            memory_map: CriticalLock::new(Some(memory_map)),
            threads: CriticalLock::new(Vec::with_capacity(MAX_THREADS_PER_TASK)),
            life: CriticalLock::new(TaskLife {
                retain_count: 0,
                hold_count: 1,
                kill_status: kill_reason::NORMAL,
                killed: false,
                drained: false,
            }),
        });

        scheduler.register_task(slot, &task);
        log::debug!("sched: task {} created (uid {})", id, uid);
        Ok(task)
    }

    /// @ambicritical
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// 用户标识
    ///
    /// @ambicritical
    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// @ambicritical
    pub fn is_user_task(&self) -> bool {
        self.flags.contains(TaskFlags::USER)
    }

    /// @ambicritical
    pub fn flags(&self) -> TaskFlags {
        self.flags
    }

    /// 所属调度器
    ///
    /// @ambicritical
    pub fn scheduler(&self) -> &'static Scheduler {
        self.scheduler
    }

    /// 获取一个活跃引用
    ///
    /// 任务已被杀死且没有 hold 时失败，这表示任务正在销毁，调用者必须
    /// 放弃这次引用尝试。
    ///
    /// @critical
    pub fn retain(&self, crit: &Critical<'_>) -> bool {
        let mut life = self.life.lock(crit);
        if life.killed && life.hold_count == 0 {
            return false;
        }
        life.retain_count += 1;
        true
    }

    /// 释放一个活跃引用
    ///
    /// @critical
    pub fn release(&self, crit: &Critical<'_>) {
        let drained = {
            let mut life = self.life.lock(crit);
            assert!(life.retain_count > 0, "task {} released more than retained", self.id);
            life.retain_count -= 1;
            life.check_drain()
        };
        if drained {
            self.throw_away(crit);
        }
    }

    /// 获取一个 hold，任务已被杀死时失败
    ///
    /// @critical
    pub fn hold(&self, crit: &Critical<'_>) -> bool {
        let mut life = self.life.lock(crit);
        if life.killed {
            return false;
        }
        life.hold_count += 1;
        true
    }

    /// 释放一个 hold
    ///
    /// @critical
    pub fn unhold(&self, crit: &Critical<'_>) {
        let drained = {
            let mut life = self.life.lock(crit);
            assert!(life.hold_count > 0, "task {} unheld more than held", self.id);
            life.hold_count -= 1;
            life.check_drain()
        };
        if drained {
            self.throw_away(crit);
        }
    }

    /// 杀死任务
    ///
    /// 只设置标志和退出状态，不直接释放任何东西。重复调用静默忽略，保留
    /// 第一次的状态。两个计数此时都已为 0 的话，任务立即交给垃圾回收器。
    ///
    /// @critical
    pub fn kill(&self, crit: &Critical<'_>, status: u16) {
        let drained = {
            let mut life = self.life.lock(crit);
            if life.killed {
                return;
            }
            life.kill_status = status;
            life.killed = true;
            life.check_drain()
        };
        log::info!("sched: task {} killed (status {})", self.id, status);
        if drained {
            self.throw_away(crit);
        }
    }

    /// @critical
    pub fn is_killed(&self, crit: &Critical<'_>) -> bool {
        self.life.lock(crit).killed
    }

    /// 被杀死时的状态
    ///
    /// @critical
    pub fn kill_status(&self, crit: &Critical<'_>) -> Option<u16> {
        let life = self.life.lock(crit);
        life.killed.then_some(life.kill_status)
    }

    /// @critical
    pub fn retain_count(&self, crit: &Critical<'_>) -> u32 {
        self.life.lock(crit).retain_count
    }

    /// @critical
    pub fn hold_count(&self, crit: &Critical<'_>) -> u32 {
        self.life.lock(crit).hold_count
    }

    /// 两个计数是否已经归零并交给了垃圾回收器
    ///
    /// @critical
    pub fn is_drained(&self, crit: &Critical<'_>) -> bool {
        self.life.lock(crit).drained
    }

    /// 访问地址空间；任务销毁后返回 None
    ///
    /// @critical
    pub fn with_memory_map<R>(
        &self,
        crit: &Critical<'_>,
        f: impl FnOnce(&dyn MemoryMap) -> R,
    ) -> Option<R> {
        self.memory_map.lock(crit).as_deref().map(f)
    }

    /// 拥有的线程数
    ///
    /// @critical
    pub fn thread_count(&self, crit: &Critical<'_>) -> usize {
        self.threads.lock(crit).len()
    }

    /// 拥有的线程
    ///
    /// @critical
    pub fn contains_thread(&self, crit: &Critical<'_>, id: ThreadId) -> bool {
        self.threads.lock(crit).contains(&id)
    }

    /// 加入线程集合，集合满时返回 `Errno::TryAgain`
    ///
    /// 集合预留了 `MAX_THREADS_PER_TASK` 的容量，push 不会分配。
    ///
    /// @critical
    pub(crate) fn add_thread(&self, crit: &Critical<'_>, id: ThreadId) -> Result<()> {
        let mut threads = self.threads.lock(crit);
        if threads.len() >= MAX_THREADS_PER_TASK {
            return Err(Errno::TryAgain);
        }
        threads.push(id);
        Ok(())
    }

    /// @critical
    pub(crate) fn remove_thread(&self, crit: &Critical<'_>, id: ThreadId) -> bool {
        let mut threads = self.threads.lock(crit);
        match threads.iter().position(|&t| t == id) {
            Some(pos) => {
                threads.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// 销毁时逐个取出线程
    ///
    /// @critical
    pub(crate) fn pop_thread(&self, crit: &Critical<'_>) -> Option<ThreadId> {
        self.threads.lock(crit).pop()
    }

    /// 销毁时取出地址空间，由调用者在 noncritical 上下文中 drop
    ///
    /// @critical
    pub(crate) fn take_memory_map(&self, crit: &Critical<'_>) -> Option<Box<dyn MemoryMap>> {
        self.memory_map.lock(crit).take()
    }

    fn throw_away(&self, crit: &Critical<'_>) {
        log::debug!("sched: task {} drained", self.id);
        // 注册表在销毁前一直持有强引用，upgrade 不会失败
        if let Some(this) = self.this.upgrade() {
            self.scheduler.throw_away(crit, Garbage::Task(this));
        }
    }
}

impl core::fmt::Debug for Task {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("uid", &self.uid)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// 作用域 hold
///
/// 创建时 hold 任务，drop 时 unhold。drop 可能发生在任意中断状态下，
/// 内部自己关中断。
pub struct HoldScope<'a> {
    task: &'a Task,
}

impl<'a> HoldScope<'a> {
    /// 任务已被杀死时返回 None
    ///
    /// @critical
    pub fn new(crit: &Critical<'_>, task: &'a Task) -> Option<Self> {
        if task.hold(crit) {
            Some(Self { task })
        } else {
            None
        }
    }

    pub fn task(&self) -> &'a Task {
        self.task
    }
}

impl Drop for HoldScope<'_> {
    fn drop(&mut self) {
        let scope = ScopedCritical::new(self.task.scheduler.platform());
        self.task.unhold(&scope);
    }
}
