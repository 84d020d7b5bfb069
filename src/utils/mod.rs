//! # 工具函数模块
//!
//! 提供美化输出、进度条与日志等工具。
//!
//! ## 依赖关系
//! - 被 `commands/`、`batch/` 和 `main.rs` 使用
//! - 子模块: output, progress, logger

pub mod logger;
pub mod output;
pub mod progress;
