//! # 展开帧与衍射图数据模型
//!
//! - `UnfoldedFrame`: 校正后每个像素的 (2θ, ψ, 强度) 与像素状态
//! - `DiffractionDiagram`: 一维衍射图（2θ 递增，空 bin 以 `None` 表示）
//!
//! ## 依赖关系
//! - 被 `detector/unfold.rs`、`xrd/`、`pipeline/` 使用
//! - 无外部模块依赖

use serde::Serialize;

/// 校正后像素的来源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PixelState {
    /// 普通像素，一一映射
    Normal,
    /// 双宽边界像素，强度已按因子缩减
    DoublePixel,
    /// 芯片/模块间隙，取两侧平均
    GapAverage,
    /// 平场无效或邻居无效，不参与积分
    Invalid,
}

impl PixelState {
    pub fn is_valid(self) -> bool {
        self != PixelState::Invalid
    }
}

/// 一帧展开结果，按列优先（列为外层循环）展平
#[derive(Debug, Clone, PartialEq)]
pub struct UnfoldedFrame {
    pub two_theta: Vec<f64>,
    pub psi: Vec<f64>,
    pub intensity: Vec<f64>,
    pub state: Vec<PixelState>,
}

impl UnfoldedFrame {
    /// 像素数
    pub fn len(&self) -> usize {
        self.two_theta.len()
    }

    /// 有效像素的 (2θ, ψ, 强度) 迭代器
    pub fn valid_pixels(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        self.state
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_valid())
            .map(move |(i, _)| (self.two_theta[i], self.psi[i], self.intensity[i]))
    }

    /// 无效像素数量
    pub fn invalid_count(&self) -> usize {
        self.state.iter().filter(|s| !s.is_valid()).count()
    }
}

/// 一维衍射图
#[derive(Debug, Clone, PartialEq)]
pub struct DiffractionDiagram {
    /// bin 中心，严格递增
    pub two_theta: Vec<f64>,
    /// bin 平均强度，`None` 表示空 bin
    pub intensity: Vec<Option<f64>>,
    /// 是否已重采样到固定网格
    pub patched: bool,
}

impl DiffractionDiagram {
    pub fn new(two_theta: Vec<f64>, intensity: Vec<Option<f64>>, patched: bool) -> Self {
        debug_assert_eq!(two_theta.len(), intensity.len());
        Self {
            two_theta,
            intensity,
            patched,
        }
    }

    pub fn len(&self) -> usize {
        self.two_theta.len()
    }

    /// 非空 bin 数量
    pub fn filled_count(&self) -> usize {
        self.intensity.iter().filter(|v| v.is_some()).count()
    }

    /// 导出用的空 bin 填充值：原始图为 -1，重采样图为 NaN
    pub fn empty_fill(&self) -> f64 {
        if self.patched {
            f64::NAN
        } else {
            -1.0
        }
    }

    /// 以填充值展开空 bin 后的 (2θ, 强度) 点列
    pub fn filled_points(&self) -> Vec<(f64, f64)> {
        let fill = self.empty_fill();
        self.two_theta
            .iter()
            .zip(&self.intensity)
            .map(|(&t, v)| (t, v.unwrap_or(fill)))
            .collect()
    }

    /// 仅非空 bin 的点列
    pub fn points(&self) -> Vec<(f64, f64)> {
        self.two_theta
            .iter()
            .zip(&self.intensity)
            .filter_map(|(&t, v)| v.map(|i| (t, i)))
            .collect()
    }
}
