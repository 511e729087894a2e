//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 标准错误代码定义
//!
//! 和 include/uapi/asm-generic/errno.h 保持一致的编号，调度器核心只用到
//! 其中很小的子集：资源耗尽和目标对象已被杀死。
//!
//! 注意：违反 critical/noncritical 约定不是错误码，而是致命断言。

use core::fmt;

/// 标准错误代码
///
/// 使用方法：
/// ```
/// use rux_sched::errno::Errno;
///
/// let err = Errno::OutOfMemory;
/// assert_eq!(err.as_neg_i32(), -12);
/// ```
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Errno {
    /// No such process (ESRCH, 3)
    NoSuchProcess = 3,

    /// Try again (EAGAIN, 11)
    TryAgain = 11,

    /// Out of memory (ENOMEM, 12)
    OutOfMemory = 12,

    /// Device or resource busy (EBUSY, 16)
    DeviceOrResourceBusy = 16,

    /// Invalid argument (EINVAL, 22)
    InvalidArgument = 22,
}

impl Errno {
    /// 获取错误代码的正数值（用于比较）
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// 获取错误代码的负数值（用于系统调用返回）
    #[inline]
    pub const fn as_neg_i32(self) -> i32 {
        -(self as i32)
    }

    /// 获取错误代码的负数值（u64，用于系统调用返回）
    #[inline]
    pub const fn as_neg_u64(self) -> u64 {
        (-(self as i32)) as u64
    }

    /// errno 宏名
    pub const fn name(self) -> &'static str {
        match self {
            Errno::NoSuchProcess => "ESRCH",
            Errno::TryAgain => "EAGAIN",
            Errno::OutOfMemory => "ENOMEM",
            Errno::DeviceOrResourceBusy => "EBUSY",
            Errno::InvalidArgument => "EINVAL",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_i32())
    }
}

/// 调度器核心的 Result 类型
pub type Result<T> = core::result::Result<T, Errno>;

/// 错误代码常量（与 C 头文件同名）
pub const ESRCH: i32 = 3;
pub const EAGAIN: i32 = 11;
pub const ENOMEM: i32 = 12;
pub const EBUSY: i32 = 16;
pub const EINVAL: i32 = 22;
