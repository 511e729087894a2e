//! 单元测试模块
//!
//! 在宿主机上用 `host` 模拟平台驱动调度器，每个 std 线程扮演一个核心。
//!
//! 运行测试：
//! ```bash
//! cargo test --package rux-sched
//! cargo test --package rux-sched --features debug_log
//! ```


mod smp;
mod task_lifecycle;
mod timeout;
