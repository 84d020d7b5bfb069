//! # 统一错误处理模块
//!
//! 定义 xpad-unfold 的所有错误类型，使用 `thiserror` 派生。
//!
//! ## 错误分类
//! - 配置错误（标定参数、命令行参数）：在任何处理开始前返回
//! - 数据错误（形状不匹配、缺少首个扫描、角度无法解析）：阻断当前扫描
//! - 拟合错误：由 `xrd::fit` 在窗口级别捕获并跳过
//!
//! ## 依赖关系
//! - 被所有其他模块使用
//! - 无外部模块依赖

use thiserror::Error;

/// 峰拟合失败原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("normal equations are singular")]
    Singular,

    #[error("degenerate fit window: {0}")]
    Degenerate(String),
}

/// xpad-unfold 统一错误类型
#[derive(Error, Debug)]
pub enum XpadError {
    // ─────────────────────────────────────────────────────────────
    // I/O 错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to read file: {path}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ─────────────────────────────────────────────────────────────
    // 解析错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to parse {format} file: {path}\nReason: {reason}")]
    ParseError {
        format: String,
        path: String,
        reason: String,
    },

    #[error("Invalid scan container '{path}': {source}")]
    JsonError {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────
    // 标定与几何错误
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Flatfield correction requested but no flatfield is loaded")]
    MissingFlatfield,

    // ─────────────────────────────────────────────────────────────
    // 扫描数据错误
    // ─────────────────────────────────────────────────────────────
    #[error("First scan of the flatfield range is missing: {path}")]
    MissingFirstScan { path: String },

    #[error("No {what} dataset found in {path}")]
    MissingDataset { what: String, path: String },

    #[error("Could not resolve {axis} angles in {path}")]
    UnresolvedAngle { axis: String, path: String },

    #[error("{axis} has {available} values but frame {frame} was requested")]
    AngleCountMismatch {
        axis: String,
        available: usize,
        frame: usize,
    },

    // ─────────────────────────────────────────────────────────────
    // 拟合错误
    // ─────────────────────────────────────────────────────────────
    #[error("Peak fit failed: {0}")]
    Fit(#[from] FitError),

    // ─────────────────────────────────────────────────────────────
    // 参数错误
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ─────────────────────────────────────────────────────────────
    // CSV 错误
    // ─────────────────────────────────────────────────────────────
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    // ─────────────────────────────────────────────────────────────
    // 其他
    // ─────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

impl XpadError {
    /// 构造形状不匹配错误
    pub fn shape_mismatch(
        what: impl Into<String>,
        expected: (usize, usize),
        actual: (usize, usize),
    ) -> Self {
        XpadError::ShapeMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, XpadError>;
