//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! Per-CPU 线程绑定
//!
//! 记录每个核心上当前运行的线程。绑定和解绑都在持有队列锁时进行，
//! 和线程的 RUNNING 位保持一致。

use alloc::vec::Vec;

use super::runqueue::ThreadId;
use crate::sync::{Critical, CriticalLock};

pub struct HardwareThreadList {
    bound: Vec<CriticalLock<Option<ThreadId>>>,
}

impl HardwareThreadList {
    /// @noncritical
    pub fn new(nr_cores: usize) -> Self {
        let mut bound = Vec::with_capacity(nr_cores);
        bound.resize_with(nr_cores, || CriticalLock::new(None));
        Self { bound }
    }

    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }

    fn slot(&self, core: usize) -> &CriticalLock<Option<ThreadId>> {
        match self.bound.get(core) {
            Some(slot) => slot,
            None => panic!("core {} out of range ({} cores)", core, self.bound.len()),
        }
    }

    /// 核心上绑定的线程
    pub fn bound(&self, crit: &Critical<'_>, core: usize) -> Option<ThreadId> {
        *self.slot(core).lock(crit)
    }

    /// 绑定线程，核心上不能已经有线程
    pub fn bind(&self, crit: &Critical<'_>, core: usize, id: ThreadId) {
        let mut slot = self.slot(core).lock(crit);
        assert!(slot.is_none(), "core {} already running thread {:?}", core, *slot);
        *slot = Some(id);
    }

    /// 解绑并返回原来的线程
    pub fn unbind(&self, crit: &Critical<'_>, core: usize) -> Option<ThreadId> {
        self.slot(core).lock(crit).take()
    }
}
