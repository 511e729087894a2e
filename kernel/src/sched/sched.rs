//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 调度器实现
//!
//! 所有核心共享一个就绪队列，按 round robin 轮转：
//! - 调度入口: tick() -> dispatch() -> Thread::load()
//! - 线程在运行期间仍留在队列中，轮转时跳过 RUNNING 的线程
//! - 每个线程带一个绝对截止时间 `next_tick`，未到期的线程不会被选中
//! - 选中线程时 retain 其任务，下一次在同一核心上调度时 release
//!
//! 扫描过程中每访问一个节点就重新获取一次队列锁，其他核心可以在两次
//! 访问之间插入或摘除线程。扫描以第一个访问的节点为哨兵，回到哨兵即
//! 视为一整圈。

use alloc::sync::Arc;

use crate::arch::Platform;
use crate::config::{JIFFIES_PER_MINUTE, MAX_CPUS, MAX_TASKS, MAX_THREADS};
use crate::errno::{Errno, Result};
use crate::process::{Task, Thread};
use crate::sync::{assert_noncritical, Critical, CriticalGuard, CriticalLock, ScopedCritical};

use super::garbage::{Garbage, GarbageCollector};
use super::percpu::HardwareThreadList;
use super::pid::{TaskId, TaskIdAllocator};
use super::registry::TaskRegistry;
use super::runqueue::{RunQueue, SchedFlags, ThreadId};

/// 一次调度的结果
#[derive(Debug)]
pub enum Dispatch {
    /// 选中并绑定到当前核心的线程
    Run(Arc<Thread>),
    /// 没有可运行的线程，定时器已按最近的截止时间设置
    Idle,
}

impl Dispatch {
    pub fn thread(&self) -> Option<&Arc<Thread>> {
        match self {
            Dispatch::Run(thread) => Some(thread),
            Dispatch::Idle => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Dispatch::Idle)
    }
}

/// 扫描时对一个节点的判定
enum Visit {
    /// 正在别的核心上运行，或任务拒绝 retain
    Retry,
    /// 已被杀死，需要摘除
    Dead,
    /// 截止时间未到
    Sleeping { deadline: u64, precise: bool },
    /// 已 retain 任务，可以运行
    Eligible,
}

pub struct Scheduler {
    platform: &'static dyn Platform,
    queue: CriticalLock<RunQueue>,
    cores: HardwareThreadList,
    tasks: CriticalLock<TaskRegistry>,
    task_ids: TaskIdAllocator,
    garbage: GarbageCollector,
}

impl Scheduler {
    /// 按配置的容量创建调度器
    ///
    /// @noncritical
    pub fn new(platform: &'static dyn Platform) -> Result<Self> {
        Self::with_capacity(platform, MAX_THREADS, MAX_TASKS)
    }

    /// 指定线程 arena 和任务注册表容量
    ///
    /// 核心数为 0 或超过 `MAX_CPUS`、容量为 0 时返回 `Errno::InvalidArgument`
    ///
    /// @noncritical
    pub fn with_capacity(
        platform: &'static dyn Platform,
        max_threads: usize,
        max_tasks: usize,
    ) -> Result<Self> {
        assert_noncritical(platform);

        let nr_cores = platform.core_count();
        if nr_cores == 0 || nr_cores > MAX_CPUS {
            log::error!("sched: unsupported core count {} (max {})", nr_cores, MAX_CPUS);
            return Err(Errno::InvalidArgument);
        }
        if max_threads == 0 || max_tasks == 0 {
            return Err(Errno::InvalidArgument);
        }

        Ok(Self {
            platform,
            queue: CriticalLock::new(RunQueue::with_capacity(max_threads)),
            cores: HardwareThreadList::new(nr_cores),
            tasks: CriticalLock::new(TaskRegistry::with_capacity(max_tasks)),
            task_ids: TaskIdAllocator::new(),
            garbage: GarbageCollector::with_capacity(max_tasks + max_threads),
        })
    }

    /// @ambicritical
    pub fn platform(&self) -> &'static dyn Platform {
        self.platform
    }

    /// 一个时间片的 tick 数
    ///
    /// @ambicritical
    pub fn quantum(&self) -> u64 {
        (self.platform.ticks_per_minute() / JIFFIES_PER_MINUTE).max(1)
    }

    pub(crate) fn run_queue<'a>(&'a self, crit: &'a Critical<'_>) -> CriticalGuard<'a, RunQueue> {
        self.queue.lock(crit)
    }

    pub(crate) fn alloc_task_id(&self) -> Option<TaskId> {
        self.task_ids.alloc()
    }

    /// 在注册表中预留一个槽位
    ///
    /// @noncritical
    pub(crate) fn reserve_task_slot(&self) -> Result<usize> {
        let scope = ScopedCritical::new(self.platform);
        let reserved = self.tasks.lock(&scope).reserve();
        reserved
    }

    /// @noncritical
    pub(crate) fn cancel_task_slot(&self, slot: usize) {
        let scope = ScopedCritical::new(self.platform);
        self.tasks.lock(&scope).cancel(slot);
    }

    /// 把新任务放进预留的槽位
    ///
    /// @noncritical
    pub(crate) fn register_task(&self, slot: usize, task: &Arc<Task>) {
        let scope = ScopedCritical::new(self.platform);
        self.tasks.lock(&scope).fill(slot, task.clone());
    }

    /// @critical
    pub(crate) fn throw_away(&self, crit: &Critical<'_>, garbage: Garbage) {
        self.garbage.throw_away(crit, garbage);
    }

    /// 按 ID 查找任务
    ///
    /// @critical
    pub fn find_task(&self, crit: &Critical<'_>, id: TaskId) -> Option<Arc<Task>> {
        self.tasks.lock(crit).find(id).cloned()
    }

    /// 注册的任务数
    ///
    /// @critical
    pub fn nr_tasks(&self, crit: &Critical<'_>) -> usize {
        self.tasks.lock(crit).len()
    }

    /// 就绪队列长度（包括正在运行的线程）
    ///
    /// @critical
    pub fn ready_len(&self, crit: &Critical<'_>) -> usize {
        self.queue.lock(crit).len()
    }

    /// 占用 arena 槽位的线程数
    ///
    /// @critical
    pub fn nr_threads(&self, crit: &Critical<'_>) -> usize {
        self.queue.lock(crit).nr_threads()
    }

    /// 等待回收的对象数
    ///
    /// @critical
    pub fn pending_garbage(&self, crit: &Critical<'_>) -> usize {
        self.garbage.len(crit)
    }

    /// 线程是否在就绪队列中
    ///
    /// @critical
    pub fn is_queued(&self, crit: &Critical<'_>, thread: &Thread) -> bool {
        self.queue.lock(crit).is_queued(thread.id())
    }

    /// 线程当前的截止时间，线程已被回收时返回 None
    ///
    /// @critical
    pub fn next_tick(&self, crit: &Critical<'_>, thread: &Thread) -> Option<u64> {
        self.queue.lock(crit).node(thread.id()).map(|node| node.next_tick)
    }

    /// 当前核心上运行的线程
    ///
    /// @critical
    pub fn current_thread(&self, crit: &Critical<'_>) -> Option<Arc<Thread>> {
        let rq = self.queue.lock(crit);
        let id = self.cores.bound(crit, self.platform.current_core())?;
        rq.node(id).and_then(|node| node.thread.clone())
    }

    /// 把线程放回就绪队列尾部
    ///
    /// 已经在队列中或已被回收时什么也不做，返回 false
    ///
    /// @critical
    pub fn add_thread(&self, crit: &Critical<'_>, thread: &Thread) -> bool {
        let mut rq = self.queue.lock(crit);
        if thread.is_reaped(crit) {
            return false;
        }
        rq.push_tail(thread.id())
    }

    /// 从就绪队列中摘除线程
    ///
    /// 被杀死且没有引用的线程随即被回收
    ///
    /// @critical
    pub fn remove_thread(&self, crit: &Critical<'_>, thread: &Thread) -> bool {
        let mut rq = self.queue.lock(crit);
        let removed = rq.unlink(thread.id());
        self.reap_locked(&rq, crit, thread.id());
        removed
    }

    /// 设置当前线程的截止时间并重新调度
    ///
    /// 线程之后被重新调度时从这里返回
    ///
    /// @critical
    pub fn set_timeout(&self, crit: &Critical<'_>, deadline: u64, precise: bool) {
        self.set_current_deadline(crit, deadline, precise);
        self.platform.save_and_tick();
    }

    /// 让当前线程永久睡眠，直到 [`clear_timeout`](Self::clear_timeout)
    ///
    /// @critical
    pub fn set_infinite_timeout(&self, crit: &Critical<'_>) {
        self.set_current_deadline(crit, u64::MAX, false);
        self.platform.save_and_tick();
    }

    fn set_current_deadline(&self, crit: &Critical<'_>, deadline: u64, precise: bool) {
        let core = self.platform.current_core();
        let mut rq = self.queue.lock(crit);
        let node = self
            .cores
            .bound(crit, core)
            .and_then(|id| rq.node_mut(id));
        let Some(node) = node else {
            panic!("set_timeout with no thread bound to core {}", core);
        };
        node.next_tick = deadline;
        node.flags.set(SchedFlags::PRECISE, precise);
    }

    /// 清除线程的截止时间，使其立即可运行
    ///
    /// 原来有未到期的截止时间时返回 true
    ///
    /// @critical
    pub fn clear_timeout(&self, crit: &Critical<'_>, thread: &Thread) -> bool {
        let mut rq = self.queue.lock(crit);
        let Some(node) = rq.node_mut(thread.id()) else {
            return false;
        };
        let pending = node.next_tick != 0;
        node.next_tick = 0;
        node.flags.remove(SchedFlags::PRECISE);
        pending
    }

    /// 让出核心，不改变截止时间
    ///
    /// @critical
    pub fn resign(&self, _crit: &Critical<'_>) {
        self.platform.save_and_tick();
    }

    /// 调度入口，不返回
    ///
    /// 定时器中断、`resign` 和 `set_timeout` 最终都进入这里。
    ///
    /// @critical
    pub fn tick(&self, crit: &Critical<'_>) -> ! {
        match self.dispatch(crit) {
            Dispatch::Run(thread) => {
                let raw: *const Thread = Arc::as_ptr(&thread);
                // load 不返回，Arc 必须在跳转之前放掉
                drop(thread);
                // SAFETY: 线程绑定在当前核心上，arena 中的引用在解绑之前
                // 不会被释放。
                unsafe { (*raw).load(crit) }
            }
            Dispatch::Idle => self.platform.wait_timeout(),
        }
    }

    /// 选择下一个线程，绑定到当前核心并设置定时器
    ///
    /// @critical
    pub fn dispatch(&self, crit: &Critical<'_>) -> Dispatch {
        let core = self.platform.current_core();
        self.unbind(crit, core);

        let now = self.platform.time();
        let quantum = self.quantum();
        let mut earliest: Option<(u64, bool)> = None;
        let mut retry = false;
        let mut first: Option<ThreadId> = None;
        let mut budget = self.queue.lock(crit).capacity() * 2;

        while budget > 0 {
            budget -= 1;

            let mut rq = self.queue.lock(crit);
            let Some(head) = rq.peek_head() else {
                break;
            };
            match first {
                None => first = Some(head),
                Some(sentinel) if !rq.is_queued(sentinel) || sentinel == head => break,
                Some(_) => {}
            }
            rq.rotate();

            let visit = match rq.node(head) {
                Some(node) => match node.thread.as_ref() {
                    _ if node.flags.contains(SchedFlags::RUNNING) => Visit::Retry,
                    None => Visit::Retry,
                    Some(thread) if thread.is_killed(crit) => Visit::Dead,
                    Some(_) if node.next_tick > now => Visit::Sleeping {
                        deadline: node.next_tick,
                        precise: node.flags.contains(SchedFlags::PRECISE),
                    },
                    Some(thread) if thread.task().is_some_and(|task| task.retain(crit)) => {
                        Visit::Eligible
                    }
                    Some(_) => Visit::Retry,
                },
                None => break,
            };

            match visit {
                Visit::Retry => retry = true,
                Visit::Dead => {
                    rq.unlink(head);
                    if first == Some(head) {
                        first = None;
                    }
                    self.reap_locked(&rq, crit, head);
                }
                Visit::Sleeping { deadline, precise } => {
                    if deadline != u64::MAX && earliest.map_or(true, |(d, _)| deadline < d) {
                        earliest = Some((deadline, precise));
                    }
                }
                Visit::Eligible => {
                    let thread = match rq.node_mut(head) {
                        Some(node) => {
                            node.flags.insert(SchedFlags::RUNNING);
                            node.next_tick = 0;
                            node.thread.clone()
                        }
                        None => None,
                    };
                    let Some(thread) = thread else {
                        panic!("dispatched thread {} vanished from its slot", head);
                    };
                    self.cores.bind(crit, core, head);
                    drop(rq);

                    #[cfg(feature = "debug_log")]
                    log::trace!("sched: core {} -> thread {} at {}", core, head, now);

                    let (target, precise) = match earliest {
                        Some((deadline, precise)) if deadline < now + quantum => (deadline, precise),
                        _ => (now + quantum, true),
                    };
                    self.platform.set_timeout(target - now, precise);
                    return Dispatch::Run(thread);
                }
            }
        }

        let target = match (earliest, retry) {
            (Some((deadline, precise)), true) if deadline < now + quantum => Some((deadline, precise)),
            (_, true) => Some((now + quantum, true)),
            (Some(target), false) => Some(target),
            (None, false) => None,
        };

        #[cfg(feature = "debug_log")]
        log::trace!("sched: core {} idle at {}, wake at {:?}", core, now, target);

        match target {
            Some((deadline, precise)) => self.platform.set_timeout(deadline - now, precise),
            None => self.platform.clear_timeout(),
        }
        Dispatch::Idle
    }

    /// 解绑当前核心上的线程，release 它的任务
    fn unbind(&self, crit: &Critical<'_>, core: usize) {
        let mut rq = self.queue.lock(crit);
        let Some(id) = self.cores.unbind(crit, core) else {
            return;
        };
        if let Some(node) = rq.node_mut(id) {
            node.flags.remove(SchedFlags::RUNNING);
            if let Some(task) = node.thread.as_ref().and_then(|thread| thread.task()) {
                task.release(crit);
            }
        }
        self.reap_locked(&rq, crit, id);
    }

    /// 队列锁外的回收入口（`Thread::release`）
    ///
    /// @critical
    pub(crate) fn reap(&self, crit: &Critical<'_>, id: ThreadId) {
        let rq = self.queue.lock(crit);
        self.reap_locked(&rq, crit, id);
    }

    /// 线程被杀死、没有引用、不在队列中也不在运行时交给垃圾回收器
    fn reap_locked(&self, rq: &RunQueue, crit: &Critical<'_>, id: ThreadId) {
        let Some(node) = rq.node(id) else {
            return;
        };
        if node.flags.intersects(SchedFlags::QUEUED | SchedFlags::RUNNING) {
            return;
        }
        let Some(thread) = node.thread.as_ref() else {
            return;
        };
        if thread.try_reap(crit) {
            self.garbage.throw_away(crit, Garbage::Thread(thread.clone()));
            log::debug!("sched: thread {} reaped", id);
        }
    }

    /// 在所有核心上开始调度，不返回
    ///
    /// 当前核心关中断后唤醒其他核心，然后进入 tick。其他核心被唤醒后
    /// 应在中断入口处调用 `tick`。
    ///
    /// @noncritical
    pub fn start(&self) -> ! {
        assert_noncritical(self.platform);
        self.platform.disable_irq();

        let me = self.platform.current_core();
        for core in (0..self.cores.len()).filter(|&core| core != me) {
            self.platform.wake_core(core);
        }
        log::info!("sched: starting on {} cores", self.cores.len());

        // SAFETY: 上面已经关中断，tick 不返回，令牌不会活到中断重新打开之后
        let crit = unsafe { Critical::assume(self.platform) };
        self.tick(&crit)
    }

    /// 销毁垃圾回收器中的所有对象，返回销毁的个数
    ///
    /// @noncritical
    pub fn collect_garbage(&self) -> usize {
        assert_noncritical(self.platform);

        let mut collected = 0;
        loop {
            let garbage = {
                let scope = ScopedCritical::new(self.platform);
                self.garbage.pop(&scope)
            };
            match garbage {
                Some(Garbage::Task(task)) => self.dispose_task(task),
                Some(Garbage::Thread(thread)) => thread.dealloc(),
                None => break,
            }
            collected += 1;
        }
        collected
    }

    /// 任务销毁：注销、拆除所有线程、释放地址空间
    fn dispose_task(&self, task: Arc<Task>) {
        let registered = {
            let scope = ScopedCritical::new(self.platform);
            let removed = self.tasks.lock(&scope).remove(task.id());
            removed
        };
        drop(registered);

        loop {
            let victim = {
                let scope = ScopedCritical::new(self.platform);
                let mut rq = self.queue.lock(&scope);
                let Some(id) = task.pop_thread(&scope) else {
                    break;
                };
                rq.unlink(id);
                let victim = match rq.node(id) {
                    Some(node) => {
                        assert!(
                            !node.flags.contains(SchedFlags::RUNNING),
                            "tearing down task {} while thread {} is running",
                            task.id(),
                            id
                        );
                        node.thread
                            .as_ref()
                            .filter(|thread| thread.mark_reaped(&scope))
                            .cloned()
                    }
                    None => None,
                };
                victim
            };
            if let Some(thread) = victim {
                thread.dealloc();
            }
        }

        let memory_map = {
            let scope = ScopedCritical::new(self.platform);
            task.take_memory_map(&scope)
        };
        drop(memory_map);

        log::info!("sched: task {} torn down", task.id());
    }
}
