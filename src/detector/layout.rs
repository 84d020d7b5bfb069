//! # 探测器布局
//!
//! XPAD S-140 类探测器由若干模块（行）组成，每个模块包含若干芯片（列）。
//! 芯片为 80×120 像素，芯片/模块边界的像素物理上是双宽像素，
//! 校正后每个边界额外占用 3 个像素。
//!
//! 本模块负责：
//! - 从原始帧形状推导模块数与芯片数
//! - 构建单轴重映射表（列表与行表共用同一构建器）
//! - 记录校正图像每一行所属的模块
//!
//! ## 依赖关系
//! - 被 `detector/geometry.rs` 使用
//! - 无外部模块依赖

use crate::error::{Result, XpadError};

/// 芯片宽度（列像素数）
pub const CHIP_SIZE_X: usize = 80;
/// 芯片高度（行像素数）
pub const CHIP_SIZE_Y: usize = 120;
/// 每个边界在校正图像中新增的像素数
pub const GAP_PIXELS: usize = 3;

/// 校正图像中某一行/列的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisCell {
    /// 原始索引一一对应
    Normal(usize),
    /// 双宽边界像素的一半，强度需除以双像素因子
    DoublePixel(usize),
    /// 边界间隙，取两侧邻居平均
    GapAverage,
}

impl AxisCell {
    /// 来源原始索引（间隙无来源）
    pub fn source(self) -> Option<usize> {
        match self {
            AxisCell::Normal(i) | AxisCell::DoublePixel(i) => Some(i),
            AxisCell::GapAverage => None,
        }
    }

    pub fn is_double(self) -> bool {
        matches!(self, AxisCell::DoublePixel(_))
    }

    pub fn is_gap(self) -> bool {
        matches!(self, AxisCell::GapAverage)
    }
}

/// 探测器模块/芯片布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorLayout {
    /// 模块数（行方向分段）
    pub modules: usize,
    /// 每个模块的芯片数（列方向分段）
    pub chips: usize,
}

impl DetectorLayout {
    /// 由原始帧形状 (rows, cols) 推导布局
    pub fn from_shape(rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 || rows % CHIP_SIZE_Y != 0 || cols % CHIP_SIZE_X != 0 {
            return Err(XpadError::shape_mismatch(
                format!(
                    "detector frame (must be a multiple of {}x{} chips)",
                    CHIP_SIZE_Y, CHIP_SIZE_X
                ),
                (
                    rows.div_ceil(CHIP_SIZE_Y).max(1) * CHIP_SIZE_Y,
                    cols.div_ceil(CHIP_SIZE_X).max(1) * CHIP_SIZE_X,
                ),
                (rows, cols),
            ));
        }
        Ok(Self {
            modules: rows / CHIP_SIZE_Y,
            chips: cols / CHIP_SIZE_X,
        })
    }

    /// 列重映射表
    pub fn column_table(&self) -> Vec<AxisCell> {
        axis_table(CHIP_SIZE_X, self.chips)
    }

    /// 行重映射表
    pub fn row_table(&self) -> Vec<AxisCell> {
        axis_table(CHIP_SIZE_Y, self.modules)
    }

    /// 校正图像每一行所属的模块，间隙行归入上方模块
    pub fn row_modules(&self) -> Vec<usize> {
        let mut module = 0;
        self.row_table()
            .iter()
            .map(|cell| {
                if let Some(src) = cell.source() {
                    module = src / CHIP_SIZE_Y;
                }
                module
            })
            .collect()
    }
}

/// 单轴校正长度
fn corrected_len(segment: usize, count: usize) -> usize {
    segment * count + GAP_PIXELS * count.saturating_sub(1)
}

/// 构建单轴重映射表
///
/// 第 s 段起始于校正索引 `(segment + 3) * s`。除首段外，段首像素占两个
/// DoublePixel 单元；除末段外，段尾像素占两个 DoublePixel 单元，其后跟一个
/// GapAverage 单元。
pub fn axis_table(segment: usize, count: usize) -> Vec<AxisCell> {
    let len = corrected_len(segment, count);
    let mut cells = vec![AxisCell::GapAverage; len];
    let stride = segment + GAP_PIXELS;

    for s in 0..count {
        let base = stride * s;
        for x in 0..segment {
            let src = segment * s + x;
            let first = x == 0 && s > 0;
            let last = x == segment - 1 && s + 1 < count;
            if first {
                cells[base - 1] = AxisCell::DoublePixel(src);
                cells[base] = AxisCell::DoublePixel(src);
            } else if last {
                cells[base + x] = AxisCell::DoublePixel(src);
                cells[base + x + 1] = AxisCell::DoublePixel(src);
                cells[base + x + 2] = AxisCell::GapAverage;
            } else {
                cells[base + x] = AxisCell::Normal(src);
            }
        }
    }

    cells
}
