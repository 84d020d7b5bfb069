//! # 扫描容器模块
//!
//! 层级扫描数据（NeXus 布局）的内存表示、数据集定位、角度解析与文件存取。
//!
//! ## 依赖关系
//! - 被 `detector/flatfield.rs`、`pipeline/`、`commands/` 使用
//! - 子模块: tree, paths, angles, store

pub mod angles;
pub mod paths;
pub mod store;
pub mod tree;

pub use store::{JsonScanStore, ScanData, ScanNaming};
