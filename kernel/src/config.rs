//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 调度器配置常量
//!
//! 常量由 build.rs 根据 Kernel.toml 生成到 OUT_DIR，这里只负责引入

include!(concat!(env!("OUT_DIR"), "/config.rs"));
