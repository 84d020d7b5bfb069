//! # 解析器模块
//!
//! 提供直通光标定文件的解析器。
//!
//! ## 依赖关系
//! - 被 `commands/` 模块使用
//! - 使用 `models/` 数据模型
//! - 子模块: calibration

pub mod calibration;

pub use calibration::parse_calibration_file;
