//! Rux 调度器核心构建脚本
//!
//! 这个脚本在编译前运行，负责：
//! 1. 解析 Kernel.toml（或 menuconfig 生成的 build/.config）
//! 2. 生成 OUT_DIR/config.rs，由 src/config.rs 通过 include! 引入

use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KernelConfig {
    general: General,
    smp: Smp,
    scheduler: Scheduler,
    debug: Debug,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct General {
    name: String,
    version: String,
}

impl Default for General {
    fn default() -> Self {
        Self {
            name: "Rux".to_string(),
            version: "0.1.0".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Smp {
    max_cpus: usize,
}

impl Default for Smp {
    fn default() -> Self {
        Self { max_cpus: 4 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Scheduler {
    jiffies_per_minute: u64,
    max_threads: usize,
    max_tasks: usize,
    max_threads_per_task: usize,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            jiffies_per_minute: 6000,
            max_threads: 256,
            max_tasks: 64,
            max_threads_per_task: 32,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Debug {
    log_level: String,
}

impl Default for Debug {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// 解析 build/.config 文件（简单 key=value 格式）
///
/// `scheduler_max_threads=128` 会被转换为 `[scheduler] max_threads = 128`
fn parse_dot_config(content: &str) -> toml::Value {
    let mut sections: HashMap<String, toml::map::Map<String, toml::Value>> = HashMap::new();

    for line in content.lines() {
        let line = line.trim();

        // 跳过注释和空行
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();

        // 分割 section_key（使用第一个下划线分割）
        let Some((section, config_key)) = key.trim().split_once('_') else {
            continue;
        };

        let parsed_value = if value == "true" {
            toml::Value::Boolean(true)
        } else if value == "false" {
            toml::Value::Boolean(false)
        } else if let Ok(int_val) = value.parse::<i64>() {
            toml::Value::Integer(int_val)
        } else {
            toml::Value::String(value.trim_matches('"').to_string())
        };

        sections
            .entry(section.to_string())
            .or_default()
            .insert(config_key.to_string(), parsed_value);
    }

    let mut root_map = toml::map::Map::new();
    for (section_name, section_data) in sections {
        root_map.insert(section_name, toml::Value::Table(section_data));
    }
    toml::Value::Table(root_map)
}

fn load_config() -> KernelConfig {
    // 优先使用 build/.config（menuconfig 生成的配置）
    if let Ok(content) = fs::read_to_string("../build/.config") {
        println!("cargo:warning=Using build/.config configuration");
        return parse_dot_config(&content)
            .try_into()
            .expect("build/.config 解析失败");
    }

    // 回退到 Kernel.toml，不存在时使用默认值
    match fs::read_to_string("../Kernel.toml") {
        Ok(content) => toml::from_str(&content).expect("Kernel.toml 解析失败"),
        Err(_) => KernelConfig::default(),
    }
}

fn main() {
    println!("cargo:rerun-if-changed=../Kernel.toml");
    println!("cargo:rerun-if-changed=../build/.config");

    let config = load_config();

    assert!(config.smp.max_cpus > 0, "smp.max_cpus 必须大于 0");
    assert!(config.scheduler.jiffies_per_minute > 0, "scheduler.jiffies_per_minute 必须大于 0");
    assert!(config.scheduler.max_threads > 0, "scheduler.max_threads 必须大于 0");
    assert!(config.scheduler.max_tasks > 0, "scheduler.max_tasks 必须大于 0");

    let log_level = match config.debug.log_level.to_ascii_lowercase().as_str() {
        "off" => "Off",
        "error" => "Error",
        "warn" => "Warn",
        "debug" => "Debug",
        "trace" => "Trace",
        _ => "Info",
    };

    println!("cargo:rustc-env=CARGO_KERNEL_NAME={}", config.general.name);
    println!("cargo:rustc-env=CARGO_KERNEL_VERSION={}", config.general.version);

    generate_config_code(&config, log_level);
}

fn generate_config_code(config: &KernelConfig, log_level: &str) {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR 未设置"));

    let config_code = format!(
        r#"// Rux 调度器配置（自动生成）
//
// 此文件由 build.rs 根据 Kernel.toml 自动生成，请勿手动修改

/// 内核名称
pub const KERNEL_NAME: &str = "{}";

/// 内核版本
pub const KERNEL_VERSION: &str = "{}";

/// 最大 CPU 数量
pub const MAX_CPUS: usize = {};

/// 每分钟 jiffy 数（时间片频率）
pub const JIFFIES_PER_MINUTE: u64 = {};

/// 线程 arena 槽位数
pub const MAX_THREADS: usize = {};

/// 任务注册表容量
pub const MAX_TASKS: usize = {};

/// 每个任务的最大线程数
pub const MAX_THREADS_PER_TASK: usize = {};

/// 默认日志级别
pub const LOG_LEVEL: log::LevelFilter = log::LevelFilter::{};
"#,
        config.general.name,
        config.general.version,
        config.smp.max_cpus,
        config.scheduler.jiffies_per_minute,
        config.scheduler.max_threads,
        config.scheduler.max_tasks,
        config.scheduler.max_threads_per_task,
        log_level,
    );

    let config_file = out_dir.join("config.rs");

    // 只有内容变化时才写入，避免每次编译都更新文件时间戳
    let existing_content = fs::read_to_string(&config_file).unwrap_or_default();
    if existing_content != config_code {
        fs::write(&config_file, &config_code).expect("写入配置文件失败");
    }
}
