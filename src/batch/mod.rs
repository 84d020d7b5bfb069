//! # 批量处理模块
//!
//! 对一个目录中的多个扫描并行展开。
//!
//! ## 功能
//! - 自动检测输入类型（文件/目录）
//! - 收集匹配的扫描文件
//! - 并行处理与汇总统计
//!
//! ## 依赖关系
//! - 被 `commands/unfold.rs` 使用
//! - 使用 `rayon` 进行并行处理
//! - 使用 `indicatif` 显示进度

pub mod collector;
pub mod runner;

pub use collector::FileCollector;
pub use runner::{BatchRunner, ProcessResult};
