//! # 展开流程模块
//!
//! ## 子模块
//! - `cache`: 以标定指纹为键的几何与帧缓存
//! - `run`: 逐帧拉取的展开状态机与并行展开
//!
//! ## 依赖关系
//! - 被 `commands/unfold.rs` 使用
//! - 使用 `detector/`、`nexus/`、`models/`

pub mod cache;
pub mod run;

pub use run::{FrameStep, UnfoldingPipeline};
