//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 中断使能位约定
//!
//! 每个操作都属于以下三类之一：
//! - **critical**: 调用者必须已经关闭当前核心的中断，可以在中断处理程序中调用。
//!   类型上表现为一个 [`Critical`] 参数。
//! - **noncritical**: 调用者必须开着中断（操作可能分配内存、触发缺页）。
//!   入口处用 [`assert_noncritical`] 检查。
//! - **ambicritical**: 两种上下文都可以，本身不改变中断状态。
//!
//! 违反约定是致命的编程错误，直接断言失败。

use core::marker::PhantomData;
use core::ops::Deref;

use crate::arch::Cpu;

/// 关中断能力令牌
///
/// 持有 `&Critical` 证明当前核心的中断处于关闭状态。令牌是 `!Send` 的，
/// 不能带到别的核心上。
pub struct Critical<'a> {
    _scope: PhantomData<&'a ()>,
    _not_send: PhantomData<*const ()>,
}

impl<'a> Critical<'a> {
    const fn new() -> Self {
        Self {
            _scope: PhantomData,
            _not_send: PhantomData,
        }
    }

    /// 在中断入口处取得令牌
    ///
    /// 中断处理程序由硬件在关中断状态下进入，不必再保存/恢复中断位。
    ///
    /// # Safety
    /// 调用者必须保证在 `'a` 期间不会重新打开中断。
    pub unsafe fn assume<C: Cpu + ?Sized>(cpu: &'a C) -> Self {
        assert_critical(cpu);
        Self::new()
    }
}

/// 作用域关中断
///
/// 创建时保存中断位并关中断，drop 时恢复。可以嵌套：内层作用域发现
/// 中断已经关闭，drop 时不会提前打开。
///
/// ```ignore
/// let scope = ScopedCritical::new(cpu);
/// task.retain(&scope);
/// // scope drop，中断恢复
/// ```
pub struct ScopedCritical<'a, C: Cpu + ?Sized> {
    cpu: &'a C,
    restore: bool,
    token: Critical<'a>,
}

impl<'a, C: Cpu + ?Sized> ScopedCritical<'a, C> {
    pub fn new(cpu: &'a C) -> Self {
        let restore = cpu.irq_enabled();
        cpu.disable_irq();
        Self {
            cpu,
            restore,
            token: Critical::new(),
        }
    }

    /// 作用域内有效的令牌
    #[inline]
    pub fn token(&self) -> &Critical<'a> {
        &self.token
    }
}

impl<'a, C: Cpu + ?Sized> Deref for ScopedCritical<'a, C> {
    type Target = Critical<'a>;

    fn deref(&self) -> &Critical<'a> {
        &self.token
    }
}

impl<C: Cpu + ?Sized> Drop for ScopedCritical<'_, C> {
    fn drop(&mut self) {
        if self.restore {
            self.cpu.enable_irq();
        }
    }
}

/// 断言当前处于 critical 上下文（中断已关闭）
#[inline]
#[track_caller]
pub fn assert_critical<C: Cpu + ?Sized>(cpu: &C) {
    assert!(
        !cpu.irq_enabled(),
        "critical operation called with interrupts enabled on core {}",
        cpu.current_core()
    );
}

/// 断言当前处于 noncritical 上下文（中断已打开）
#[inline]
#[track_caller]
pub fn assert_noncritical<C: Cpu + ?Sized>(cpu: &C) {
    assert!(
        cpu.irq_enabled(),
        "noncritical operation called with interrupts disabled on core {}",
        cpu.current_core()
    );
}
