//! # 衍射图处理模块
//!
//! 提供一维衍射图的积分、峰拟合、导出与绘图。
//!
//! ## 子模块
//! - `diagram`: ψ 窗口积分与 patch 重采样
//! - `lm`: Levenberg-Marquardt 优化器
//! - `fit`: Pearson VII 迭代剥峰
//! - `plot`: 图表生成
//! - `export`: 数据导出
//!
//! ## 依赖关系
//! - 被 `pipeline/` 和 `commands/` 使用
//! - 使用 `models/frame.rs`

pub mod diagram;
pub mod export;
pub mod fit;
pub mod lm;
pub mod plot;

pub use diagram::{aggregate, BinningOptions, DiffractionBinner};
pub use fit::{FitOptions, PeakFitResult, PeakFitter};
pub use plot::PlotOptions;
