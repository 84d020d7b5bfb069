//! # 探测器校正模块
//!
//! XPAD 探测器的布局、几何构建、帧展开与平场累加。
//!
//! ## 依赖关系
//! - 被 `pipeline/` 和 `commands/` 使用
//! - 使用 `models/` 和 `nexus/`
//! - 子模块: layout, geometry, median, unfold, flatfield

pub mod flatfield;
pub mod geometry;
pub mod layout;
pub mod median;
pub mod unfold;

pub use flatfield::{FlatfieldAccumulator, FlatfieldReport, ProgressSink};
pub use geometry::{Geometry, GeometryBuilder};
pub use unfold::FrameUnfolder;
