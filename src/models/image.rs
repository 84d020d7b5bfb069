//! # 二维图像数据模型
//!
//! 行主序存储的二维数组，用于原始帧、平场和中间结果。
//!
//! ## 依赖关系
//! - 被 `detector/`、`nexus/` 和 `pipeline/` 使用
//! - 无外部模块依赖

use crate::error::{Result, XpadError};

/// 行主序二维图像
#[derive(Debug, Clone, PartialEq)]
pub struct Image2D<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

/// 原始探测器帧（计数值）
pub type Frame = Image2D<f64>;

impl<T: Copy> Image2D<T> {
    /// 从行主序数据创建，长度必须等于 rows * cols
    pub fn new(rows: usize, cols: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(XpadError::InvalidArgument(format!(
                "image data has {} values, expected {}x{} = {}",
                data.len(),
                rows,
                cols,
                rows * cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// 以常量填充
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// 按 (row, col) 生成每个像素
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { rows, cols, data }
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        self.data[row * self.cols + col] = value;
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// 逐像素映射
    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> Image2D<U> {
        Image2D {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }
}

impl Image2D<f64> {
    /// 逐像素累加另一幅同形状图像
    pub fn add_assign(&mut self, other: &Image2D<f64>) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(XpadError::shape_mismatch(
                "image sum",
                self.shape(),
                other.shape(),
            ));
        }
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
        Ok(())
    }

    /// 有限值像素的平均值
    pub fn finite_mean(&self) -> Option<f64> {
        let (sum, count) = self
            .data
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0_f64, 0usize), |(s, n), v| (s + v, n + 1));
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}

/// 同形状帧的有序集合（一个扫描中的所有图像）
#[derive(Debug, Clone)]
pub struct FrameStack {
    frames: Vec<Frame>,
}

impl FrameStack {
    /// 创建帧栈，所有帧必须形状一致
    pub fn new(frames: Vec<Frame>) -> Result<Self> {
        if let Some(first) = frames.first() {
            let shape = first.shape();
            if let Some(bad) = frames.iter().find(|f| f.shape() != shape) {
                return Err(XpadError::shape_mismatch("frame stack", shape, bad.shape()));
            }
        }
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// 帧形状，空栈返回 None
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.frames.first().map(|f| f.shape())
    }

    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.frames.iter()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}
