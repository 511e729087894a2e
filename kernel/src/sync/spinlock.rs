//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 跨核心自旋锁
//!
//! 关中断只能阻止本核心被抢占，其他核心仍然可以并发访问共享结构，
//! 所以共享结构再套一层 `spin::Mutex`。获取锁必须出示 [`Critical`] 令牌：
//! 开着中断自旋会让同核心的中断处理程序在同一把锁上死锁。

use spin::{Mutex, MutexGuard};

use super::critical::Critical;

/// 锁守卫。生命周期不超过出示的令牌，令牌失效前一定会解锁。
pub type CriticalGuard<'a, T> = MutexGuard<'a, T>;

/// 只能在 critical 上下文中获取的自旋锁
pub struct CriticalLock<T: ?Sized> {
    inner: Mutex<T>,
}

impl<T> CriticalLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: ?Sized> CriticalLock<T> {
    /// 自旋直到获得锁
    #[inline]
    pub fn lock<'a>(&'a self, _crit: &'a Critical<'_>) -> CriticalGuard<'a, T> {
        self.inner.lock()
    }

    /// 尝试获取锁，失败立即返回
    #[inline]
    pub fn try_lock<'a>(&'a self, _crit: &'a Critical<'_>) -> Option<CriticalGuard<'a, T>> {
        self.inner.try_lock()
    }

    /// 调试用：锁当前是否被持有
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}
