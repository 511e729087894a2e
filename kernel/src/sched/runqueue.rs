//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 线程 arena 与就绪队列
//!
//! 线程记录存放在一个容量固定的槽位数组中，就绪队列的前后链接以槽位下标
//! 表示，入队/出队/摘除都是 O(1) 且不分配内存（这些操作都发生在关中断
//! 的临界区里，临界区里禁止分配）。
//!
//! 槽位带 generation：线程释放后槽位的 generation 加一，持有旧
//! [`ThreadId`] 的查找会失败，而不是访问到新线程。
//!
//! 整个结构由调度器的队列锁保护。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;

use crate::process::Thread;

bitflags! {
    /// 线程的调度状态位
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SchedFlags: u8 {
        /// 在就绪队列链表中
        const QUEUED  = 1 << 0;
        /// 正绑定在某个核心上运行
        const RUNNING = 1 << 1;
        /// 当前截止时间要求精确的定时器
        const PRECISE = 1 << 2;
    }
}

/// 线程标识：arena 下标 + generation
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId {
    index: u32,
    generation: u32,
}

impl ThreadId {
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// 一个已分配槽位中的线程记录
pub struct Node {
    /// 线程对象；槽位刚预留、还没安装线程时为 None
    pub thread: Option<Arc<Thread>>,
    /// 绝对截止时间：0 表示立即可运行，`u64::MAX` 表示永久睡眠
    pub next_tick: u64,
    pub flags: SchedFlags,
    prev: Option<u32>,
    next: Option<u32>,
}

impl Node {
    const fn reserved() -> Self {
        Self {
            thread: None,
            next_tick: 0,
            flags: SchedFlags::empty(),
            prev: None,
            next: None,
        }
    }
}

struct Slot {
    generation: u32,
    node: Option<Node>,
    next_free: Option<u32>,
}

/// 线程 arena + 就绪队列
pub struct RunQueue {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    nr_queued: usize,
    nr_threads: usize,
}

impl RunQueue {
    /// 预分配 `capacity` 个槽位
    ///
    /// @noncritical
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let next_free = if i + 1 < capacity {
                Some((i + 1) as u32)
            } else {
                None
            };
            slots.push(Slot {
                generation: 0,
                node: None,
                next_free,
            });
        }

        Self {
            slots,
            free_head: if capacity > 0 { Some(0) } else { None },
            head: None,
            tail: None,
            nr_queued: 0,
            nr_threads: 0,
        }
    }

    /// 槽位总数
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 已分配的线程数
    pub fn nr_threads(&self) -> usize {
        self.nr_threads
    }

    /// 就绪队列长度
    pub fn len(&self) -> usize {
        self.nr_queued
    }

    pub fn is_empty(&self) -> bool {
        self.nr_queued == 0
    }

    /// 预留一个空槽位，arena 满时返回 None
    pub fn reserve(&mut self) -> Option<ThreadId> {
        let index = self.free_head?;
        let slot = &mut self.slots[index as usize];
        self.free_head = slot.next_free.take();
        slot.node = Some(Node::reserved());
        self.nr_threads += 1;
        Some(ThreadId {
            index,
            generation: slot.generation,
        })
    }

    /// 把线程对象放进预留的槽位
    pub fn install(&mut self, id: ThreadId, thread: Arc<Thread>) {
        let Some(node) = self.node_mut(id) else {
            panic!("install into stale thread slot {}", id);
        };
        assert!(node.thread.is_none(), "thread slot {} already installed", id);
        node.thread = Some(thread);
    }

    /// 释放槽位，返回其中的线程对象
    ///
    /// 线程必须已经不在就绪队列中且没有在运行
    pub fn free(&mut self, id: ThreadId) -> Option<Arc<Thread>> {
        let free_head = self.free_head;
        let slot = self.slot_mut(id)?;
        let flags = slot.node.as_ref()?.flags;
        assert!(
            !flags.intersects(SchedFlags::QUEUED | SchedFlags::RUNNING),
            "freeing thread {} while queued or running",
            id
        );
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        slot.next_free = free_head;
        self.free_head = Some(id.index);
        self.nr_threads -= 1;
        node.thread
    }

    fn slot_mut(&mut self, id: ThreadId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation && slot.node.is_some())
    }

    /// 查找线程记录（generation 不匹配时返回 None）
    pub fn node(&self, id: ThreadId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn node_mut(&mut self, id: ThreadId) -> Option<&mut Node> {
        self.slot_mut(id).and_then(|slot| slot.node.as_mut())
    }

    fn node_at(&mut self, index: u32) -> &mut Node {
        match self.slots[index as usize].node.as_mut() {
            Some(node) => node,
            None => panic!("run queue link points at free slot {}", index),
        }
    }

    fn id_at(&self, index: u32) -> ThreadId {
        ThreadId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// 线程是否在就绪队列中
    pub fn is_queued(&self, id: ThreadId) -> bool {
        self.node(id)
            .map(|node| node.flags.contains(SchedFlags::QUEUED))
            .unwrap_or(false)
    }

    /// 加到队尾，已经在队列中则什么也不做
    pub fn push_tail(&mut self, id: ThreadId) -> bool {
        let tail = self.tail;
        let Some(node) = self.node_mut(id) else {
            return false;
        };
        if node.flags.contains(SchedFlags::QUEUED) {
            return false;
        }
        node.flags.insert(SchedFlags::QUEUED);
        node.prev = tail;
        node.next = None;

        match tail {
            Some(tail) => self.node_at(tail).next = Some(id.index),
            None => self.head = Some(id.index),
        }
        self.tail = Some(id.index);
        self.nr_queued += 1;
        true
    }

    /// 从队列中摘除，不在队列中则返回 false
    pub fn unlink(&mut self, id: ThreadId) -> bool {
        let Some(node) = self.node_mut(id) else {
            return false;
        };
        if !node.flags.contains(SchedFlags::QUEUED) {
            return false;
        }
        node.flags.remove(SchedFlags::QUEUED);
        let prev = node.prev.take();
        let next = node.next.take();

        match prev {
            Some(prev) => self.node_at(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.node_at(next).prev = prev,
            None => self.tail = prev,
        }
        self.nr_queued -= 1;
        true
    }

    /// 弹出队头
    pub fn pop_head(&mut self) -> Option<ThreadId> {
        let id = self.id_at(self.head?);
        self.unlink(id);
        Some(id)
    }

    /// 队头
    pub fn peek_head(&self) -> Option<ThreadId> {
        self.head.map(|index| self.id_at(index))
    }

    /// 轮转一步：弹出队头并立刻放回队尾，返回被轮转的线程
    pub fn rotate(&mut self) -> Option<ThreadId> {
        let id = self.pop_head()?;
        self.push_tail(id);
        Some(id)
    }

    /// 按队列顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let index = cursor?;
            cursor = self.slots[index as usize].node.as_ref().and_then(|n| n.next);
            Some(self.id_at(index))
        })
    }
}
