//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 全局任务注册表
//!
//! 容量固定的槽位表，按 [`TaskId`] 查找任务（对应 find_task_by_pid）。
//! 任务创建时注册，销毁时第一步从这里摘除。

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::pid::TaskId;
use crate::errno::{Errno, Result};
use crate::process::Task;

enum Slot {
    Free,
    /// 已预留，任务还在构造
    Reserved,
    Used(Arc<Task>),
}

pub struct TaskRegistry {
    slots: Vec<Slot>,
    nr_tasks: usize,
}

impl TaskRegistry {
    /// @noncritical
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot::Free);
        Self { slots, nr_tasks: 0 }
    }

    pub fn len(&self) -> usize {
        self.nr_tasks
    }

    pub fn is_empty(&self) -> bool {
        self.nr_tasks == 0
    }

    /// 预留一个槽位，表满时返回 `Errno::OutOfMemory`
    pub fn reserve(&mut self) -> Result<usize> {
        let index = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Slot::Free))
            .ok_or(Errno::OutOfMemory)?;
        self.slots[index] = Slot::Reserved;
        Ok(index)
    }

    /// 放弃预留的槽位
    pub fn cancel(&mut self, index: usize) {
        assert!(
            matches!(self.slots[index], Slot::Reserved),
            "cancelling registry slot {} that is not reserved",
            index
        );
        self.slots[index] = Slot::Free;
    }

    /// 把任务放进预留的槽位
    pub fn fill(&mut self, index: usize, task: Arc<Task>) {
        assert!(
            matches!(self.slots[index], Slot::Reserved),
            "filling registry slot {} that is not reserved",
            index
        );
        self.slots[index] = Slot::Used(task);
        self.nr_tasks += 1;
    }

    /// 摘除任务
    pub fn remove(&mut self, id: TaskId) -> Option<Arc<Task>> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| matches!(slot, Slot::Used(task) if task.id() == id))?;
        self.nr_tasks -= 1;
        match core::mem::replace(slot, Slot::Free) {
            Slot::Used(task) => Some(task),
            _ => None,
        }
    }

    /// 按 ID 查找
    pub fn find(&self, id: TaskId) -> Option<&Arc<Task>> {
        self.slots.iter().find_map(|slot| match slot {
            Slot::Used(task) if task.id() == id => Some(task),
            _ => None,
        })
    }
}
