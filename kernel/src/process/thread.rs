//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 线程 (Thread)
//!
//! 线程是可调度的执行上下文，属于且只属于一个任务。线程对任务只有
//! 弱引用，也不参与任务的生命周期计数：调度器在把线程放上核心时才
//! retain 任务。任务的内存由注册表持有，销毁后 [`Thread::task`] 返回 None。
//!
//! 线程自己的 `retain_count` 初始为 1，由创建者持有。线程被杀死后只做
//! 标记，从就绪队列摘除发生在调度扫描或任务销毁时。被杀死、计数归零、
//! 既不在队列里也不在运行的线程会被回收（reap）一次。

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};

use crate::arch::State;
use crate::errno::{Errno, Result};
use crate::process::Task;
use crate::sched::pid::TaskId;
use crate::sched::runqueue::{SchedFlags, ThreadId};
use crate::sched::Scheduler;
use crate::sync::{assert_noncritical, Critical, CriticalLock, ScopedCritical};

struct ThreadLife {
    retain_count: u32,
    killed: bool,
    reaped: bool,
}

/// 线程控制块
pub struct Thread {
    id: ThreadId,
    task: Weak<Task>,
    task_id: TaskId,
    scheduler: &'static Scheduler,
    state: CriticalLock<Option<Box<dyn State>>>,
    life: CriticalLock<ThreadLife>,
}

impl Thread {
    /// 创建线程并加入任务的线程集合和就绪队列
    ///
    /// 调用者必须持有 `task` 的一个活跃引用（retain），否则是致命错误。
    /// 返回的线程已经为调用者 retain 了一次。
    ///
    /// # 返回
    /// - `Errno::NoSuchProcess`：任务已被杀死
    /// - `Errno::OutOfMemory`：线程 arena 已满
    /// - `Errno::TryAgain`：任务的线程集合已满
    ///
    /// @noncritical
    pub fn new(task: &Arc<Task>, state: Box<dyn State>) -> Result<Arc<Thread>> {
        let scheduler = task.scheduler();
        assert_noncritical(scheduler.platform());

        let id = {
            let scope = ScopedCritical::new(scheduler.platform());
            assert!(
                task.retain_count(&scope) > 0,
                "creating a thread on task {} without a live reference",
                task.id()
            );
            if task.is_killed(&scope) {
                return Err(Errno::NoSuchProcess);
            }
            let reserved = scheduler.run_queue(&scope).reserve();
            reserved.ok_or(Errno::OutOfMemory)?
        };

        // 分配在临界区外完成
        let thread = Arc::new(Thread {
            id,
            task: Arc::downgrade(task),
            task_id: task.id(),
            scheduler,
            state: CriticalLock::new(Some(state)),
            life: CriticalLock::new(ThreadLife {
                retain_count: 1,
                killed: false,
                reaped: false,
            }),
        });

        let scope = ScopedCritical::new(scheduler.platform());
        let mut rq = scheduler.run_queue(&scope);
        if let Err(err) = task.add_thread(&scope, id) {
            rq.free(id);
            return Err(err);
        }
        rq.install(id, thread.clone());
        rq.push_tail(id);
        drop(rq);

        log::debug!("sched: thread {} created in task {}", id, task.id());
        Ok(thread)
    }

    /// @ambicritical
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// 所属任务，任务已经销毁时返回 None
    ///
    /// @ambicritical
    pub fn task(&self) -> Option<Arc<Task>> {
        self.task.upgrade()
    }

    /// @ambicritical
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// @critical
    pub fn retain(&self, crit: &Critical<'_>) -> bool {
        let mut life = self.life.lock(crit);
        if life.killed {
            return false;
        }
        life.retain_count += 1;
        true
    }

    /// 释放引用。被杀死的线程计数归零时尝试回收。
    ///
    /// @critical
    pub fn release(&self, crit: &Critical<'_>) {
        let drained = {
            let mut life = self.life.lock(crit);
            assert!(life.retain_count > 0, "thread {} released more than retained", self.id);
            life.retain_count -= 1;
            life.killed && life.retain_count == 0
        };
        if drained {
            self.scheduler.reap(crit, self.id);
        }
    }

    /// 标记线程死亡，不摘除
    ///
    /// @critical
    pub fn kill(&self, crit: &Critical<'_>) {
        let mut life = self.life.lock(crit);
        if !life.killed {
            life.killed = true;
            log::debug!("sched: thread {} killed", self.id);
        }
    }

    /// @critical
    pub fn is_killed(&self, crit: &Critical<'_>) -> bool {
        self.life.lock(crit).killed
    }

    /// @critical
    pub fn retain_count(&self, crit: &Critical<'_>) -> u32 {
        self.life.lock(crit).retain_count
    }

    /// 满足回收条件时打上 reaped 标记，返回是否由本次调用完成回收
    ///
    /// 调用者需持有队列锁并确认线程既不在队列中也不在运行
    pub(crate) fn try_reap(&self, crit: &Critical<'_>) -> bool {
        let mut life = self.life.lock(crit);
        if life.killed && life.retain_count == 0 && !life.reaped {
            life.reaped = true;
            true
        } else {
            false
        }
    }

    /// 任务销毁时无条件回收；已经被回收过时返回 false
    pub(crate) fn mark_reaped(&self, crit: &Critical<'_>) -> bool {
        let mut life = self.life.lock(crit);
        !core::mem::replace(&mut life.reaped, true)
    }

    pub(crate) fn is_reaped(&self, crit: &Critical<'_>) -> bool {
        self.life.lock(crit).reaped
    }

    /// 释放执行状态和 arena 槽位，并从任务的线程集合中移除
    ///
    /// 线程必须已经不在就绪队列中且没有绑定在核心上。
    ///
    /// @noncritical
    pub fn dealloc(&self) {
        let scheduler = self.scheduler;
        assert_noncritical(scheduler.platform());

        // 在临界区外 upgrade，最后一个强引用不会在关中断时放掉
        let task = self.task.upgrade();
        let (slot, state) = {
            let scope = ScopedCritical::new(scheduler.platform());
            let mut rq = scheduler.run_queue(&scope);
            if let Some(node) = rq.node(self.id) {
                assert!(
                    !node.flags.intersects(SchedFlags::QUEUED | SchedFlags::RUNNING),
                    "deallocating thread {} while queued or running",
                    self.id
                );
            }
            let slot = rq.free(self.id);
            drop(rq);
            if let Some(task) = task.as_ref() {
                task.remove_thread(&scope, self.id);
            }
            let state = self.state.lock(&scope).take();
            (slot, state)
        };

        // 平台的执行状态和 arena 中的引用在开中断后释放
        drop(state);
        drop(slot);
        drop(task);
        log::debug!("sched: thread {} deallocated", self.id);
    }

    /// 加载执行状态，不返回
    ///
    /// 只有绑定在当前核心上的线程才能加载。
    ///
    /// @critical
    pub fn load(&self, crit: &Critical<'_>) -> ! {
        let state: *const dyn State = match self.state.lock(crit).as_deref() {
            Some(state) => state as *const dyn State,
            None => panic!("loading thread {} without execution state", self.id),
        };
        // SAFETY: 执行状态只在 dealloc 中取走，而 dealloc 要求线程没有在运行；
        // 这里线程绑定在当前核心上，状态在 load 期间一直有效。
        unsafe { (*state).load() }
    }

    /// 当前核心上运行的线程
    ///
    /// @critical
    pub fn current(scheduler: &Scheduler, crit: &Critical<'_>) -> Option<Arc<Thread>> {
        scheduler.current_thread(crit)
    }

    /// 杀死当前线程并让出核心
    ///
    /// 下一次调度解绑时，线程被摘除并回收（创建者的引用已释放时）。
    ///
    /// @critical
    pub fn exit_current(scheduler: &Scheduler, crit: &Critical<'_>) {
        if let Some(thread) = scheduler.current_thread(crit) {
            thread.kill(crit);
        }
        scheduler.resign(crit);
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("task", &self.task_id)
            .finish_non_exhaustive()
    }
}
