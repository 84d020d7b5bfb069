//! # 数据模型模块
//!
//! 定义标定记录、图像、展开帧与衍射图的数据模型。
//!
//! ## 依赖关系
//! - 被 `detector/`、`nexus/`、`xrd/`、`pipeline/` 和 `commands/` 使用
//! - 子模块: calibration, image, frame

pub mod calibration;
pub mod frame;
pub mod image;

pub use calibration::{Calibration, CalibrationKey, FlatfieldMode};
pub use frame::{DiffractionDiagram, PixelState, UnfoldedFrame};
pub use image::{Frame, FrameStack, Image2D};
