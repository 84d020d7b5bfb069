//! # unfold 子命令 CLI 定义
//!
//! 扫描展开与衍射图生成的参数，单文件与目录批量模式共用。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/unfold.rs`
//! - `DiagramFormat` 也被 `cli/fit.rs` 使用

use clap::{Args, ValueEnum};
use std::path::{Path, PathBuf};

/// 衍射图输出格式
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum DiagramFormat {
    /// CSV data file (two_theta, intensity)
    Csv,
    /// XY data file with '#' header
    Xy,
    /// PNG image
    Png,
    /// SVG vector image
    Svg,
}

impl DiagramFormat {
    pub fn extension(self) -> &'static str {
        match self {
            DiagramFormat::Csv => "csv",
            DiagramFormat::Xy => "xy",
            DiagramFormat::Png => "png",
            DiagramFormat::Svg => "svg",
        }
    }

    pub fn is_image(self) -> bool {
        matches!(self, DiagramFormat::Png | DiagramFormat::Svg)
    }

    /// 从文件扩展名推断，未知扩展名按 PNG 处理
    pub fn from_extension(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_lowercase())
            .as_deref()
        {
            Some("svg") => DiagramFormat::Svg,
            Some("csv") => DiagramFormat::Csv,
            Some("xy") | Some("dat") | Some("txt") => DiagramFormat::Xy,
            _ => DiagramFormat::Png,
        }
    }
}

/// unfold 子命令参数
#[derive(Args, Debug)]
pub struct UnfoldArgs {
    /// Input: scan file or directory of scan files
    pub input: PathBuf,

    /// Direct-beam calibration file (key = value)
    #[arg(short, long, env = "XPAD_CALIBRATION")]
    pub calibration: PathBuf,

    /// Saved flatfield container; enables flatfield correction
    #[arg(long)]
    pub flatfield: Option<PathBuf>,

    /// Apply a 3x3 median filter before remapping (also enabled by the calibration file)
    #[arg(long, default_value_t = false)]
    pub median_filter: bool,

    /// Directory for raw_<frame>.txt exports (also enabled by the calibration file)
    #[arg(long)]
    pub save_unfolded: Option<PathBuf>,

    /// Lower bound of the ψ window in degrees
    #[arg(long, default_value_t = -100.0, allow_hyphen_values = true)]
    pub psi_min: f64,

    /// Upper bound of the ψ window in degrees
    #[arg(long, default_value_t = 100.0, allow_hyphen_values = true)]
    pub psi_max: f64,

    /// 2θ bin width in degrees (default: 1 / pixels-per-degree)
    #[arg(long)]
    pub step: Option<f64>,

    /// Keep the raw bins instead of resampling onto the fixed 0-150° grid
    #[arg(long, default_value_t = false)]
    pub no_patch: bool,

    /// Also write one diagram per frame
    #[arg(long, default_value_t = false)]
    pub per_frame: bool,

    /// Output directory
    #[arg(short, long, default_value = "unfolded")]
    pub output: PathBuf,

    /// Output format for diagrams
    #[arg(short, long, value_enum, default_value = "csv")]
    pub format: DiagramFormat,

    // ─────────────────────────────────────────────────────────────
    // 峰拟合参数
    // ─────────────────────────────────────────────────────────────
    /// Fit Pearson VII peaks on the scan diagram
    #[arg(long, default_value_t = false)]
    pub fit: bool,

    /// Stop stripping peaks below this fraction of the global maximum
    #[arg(long, default_value_t = 0.25)]
    pub threshold: f64,

    /// Half-width of the fit window in samples
    #[arg(long, default_value_t = 890)]
    pub half_width: usize,

    /// Figure width in pixels (for PNG) or points (for SVG)
    #[arg(long, default_value_t = 1200)]
    pub width: u32,

    /// Figure height in pixels (for PNG) or points (for SVG)
    #[arg(long, default_value_t = 800)]
    pub height: u32,

    // ─────────────────────────────────────────────────────────────
    // 批量处理参数
    // ─────────────────────────────────────────────────────────────
    /// Glob pattern for scan files (batch mode, comma separated)
    #[arg(long, default_value = "*.json")]
    pub pattern: String,

    /// Number of parallel jobs (0 = auto, batch mode only)
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,

    /// Recurse into subdirectories (batch mode)
    #[arg(long, default_value_t = false)]
    pub recursive: bool,

    /// Overwrite existing output files
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(DiagramFormat::from_extension(Path::new("a.SVG")), DiagramFormat::Svg);
        assert_eq!(DiagramFormat::from_extension(Path::new("a.dat")), DiagramFormat::Xy);
        assert_eq!(DiagramFormat::from_extension(Path::new("a")), DiagramFormat::Png);
    }
}
