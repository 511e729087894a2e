//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 架构相关接口
//!
//! 调度器核心不直接操作硬件，只通过下面这些 trait 调用平台代码：
//! - [`Cpu`]：当前核心编号、中断使能位、唤醒其他核心
//! - [`Clock`]：单调时钟
//! - [`TickTimer`]：当前核心的定时器（one-shot）
//! - [`State`]：保存的线程执行上下文，加载后不再返回
//! - [`MemoryMap`]：任务拥有的地址空间句柄，对调度器不透明
//!
//! 寄存器布局、上下文切换、页表、APIC/PLIC 编程都由实现这些 trait 的
//! 平台代码负责。

/// CPU 核心操作
///
/// 对应 arch/riscv64/cpu.rs 中的 `get_core_id` / `enable_irq` /
/// `disable_irq` / `get_interrupts_state`
pub trait Cpu {
    /// 当前核心编号，范围 `0..core_count()`
    fn current_core(&self) -> usize;

    /// 核心总数
    fn core_count(&self) -> usize;

    /// 当前核心的中断是否使能
    fn irq_enabled(&self) -> bool;

    /// 使能当前核心的中断
    fn enable_irq(&self);

    /// 禁用当前核心的中断
    fn disable_irq(&self);

    /// 唤醒一个空闲核心，使其进入调度循环
    fn wake_core(&self, core: usize);
}

/// 单调时钟
pub trait Clock {
    /// 当前时间（tick）
    fn time(&self) -> u64;

    /// 每分钟的 tick 数
    fn ticks_per_minute(&self) -> u64;
}

/// 当前核心的 tick 定时器
///
/// 所有方法都是 @critical
pub trait TickTimer {
    /// 在 `delay` 个 tick 之后触发一次定时器中断
    ///
    /// `precise` 为 false 时允许平台合并或推迟该中断
    fn set_timeout(&self, delay: u64, precise: bool);

    /// 取消尚未触发的定时器
    fn clear_timeout(&self);

    /// 保存当前线程的执行状态，然后立即重新进入 `Scheduler::tick`
    ///
    /// 线程之后被重新调度时从这里返回
    fn save_and_tick(&self);

    /// 使能中断并等待定时器（或其他中断），不返回
    fn wait_timeout(&self) -> !;
}

/// 线程执行上下文
///
/// 由平台代码创建，线程独占，线程 dealloc 时释放
pub trait State: Send + Sync {
    /// 加载保存的上下文并跳转执行，不返回
    ///
    /// @critical
    fn load(&self) -> !;
}

/// 地址空间句柄
///
/// 任务独占，任务销毁时 drop
pub trait MemoryMap: Send + Sync {}

/// 调度器需要的全部平台能力
pub trait Platform: Cpu + Clock + TickTimer + Send + Sync {}

impl<T: Cpu + Clock + TickTimer + Send + Sync> Platform for T {}
