//! # fit 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/fit.rs`

use clap::Args;
use std::path::PathBuf;

/// fit 子命令参数
#[derive(Args, Debug)]
pub struct FitArgs {
    /// Diagram CSV written by `unfold` (two_theta, intensity)
    pub input: PathBuf,

    /// Stop stripping peaks below this fraction of the global maximum
    #[arg(long, default_value_t = 0.25)]
    pub threshold: f64,

    /// Half-width of the fit window in samples
    #[arg(long, default_value_t = 890)]
    pub half_width: usize,

    /// Maximum number of fit windows
    #[arg(long, default_value_t = 32)]
    pub max_peaks: usize,

    /// Resample the diagram to this two-theta step (degrees) before fitting
    #[arg(long)]
    pub rebin: Option<f64>,

    /// Peak table output (default: <input>_peaks.csv)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Plot the diagram with fitted peaks (PNG or SVG by extension)
    #[arg(long)]
    pub plot: Option<PathBuf>,
}
