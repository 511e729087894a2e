//! 同步原语 (Synchronization Primitives)
//!
//! 调度器之下不存在可阻塞的互斥锁，调度器本身就是阻塞的实现者。
//! 所以这里只有两样东西：
//! - `critical` - 中断使能位约定（critical / noncritical / ambicritical）
//! - `spinlock` - 跨核心的短自旋锁，只能在 critical 上下文中获取
//!
//! 核心概念：
//! - 单核上关中断即不可抢占，不需要嵌套加锁
//! - 多核共享结构（就绪队列、生命周期计数）再加一把自旋锁

pub mod critical;
pub mod spinlock;

pub use critical::{assert_critical, assert_noncritical, Critical, ScopedCritical};
pub use spinlock::{CriticalGuard, CriticalLock};
