//! # 几何构建
//!
//! 由标定记录、可选平场与帧形状构建不可变的 `Geometry`：
//! 样品-探测器距离、校正后的直通光中心、delta/gamma 偏移、
//! 行列重映射表、双像素因子与逆平场。
//!
//! ## 依赖关系
//! - 被 `detector/unfold.rs` 和 `pipeline/` 使用
//! - 使用 `detector/layout.rs` 的重映射表
//! - 使用 `models/calibration.rs`

use crate::detector::layout::{AxisCell, DetectorLayout, CHIP_SIZE_X, CHIP_SIZE_Y, GAP_PIXELS};
use crate::error::{Result, XpadError};
use crate::models::{Calibration, FlatfieldMode, Image2D, PixelState, UnfoldedFrame};

/// 未使用平场时双像素的强度除数
pub const DOUBLE_PIXEL_FACTOR_WITHOUT_FLATFIELD: f64 = 2.3;
/// 使用平场时双像素的强度除数（平场已包含双像素响应）
pub const DOUBLE_PIXEL_FACTOR_WITH_FLATFIELD: f64 = 1.0;

/// 探测器几何（构建后不可变，可在线程间共享）
#[derive(Debug, Clone)]
pub struct Geometry {
    /// 样品到探测器距离（像素）
    pub distance: f64,
    /// 校正图像中的直通光列坐标
    pub center_x: f64,
    /// 校正图像中的直通光行坐标
    pub center_y: f64,
    /// delta 偏移（度），为标定位置取负
    pub delta_offset: f64,
    /// gamma 偏移（度），为标定位置取负
    pub gamma_offset: f64,
    pub double_pixel_factor: f64,
    pub columns: Vec<AxisCell>,
    pub rows: Vec<AxisCell>,
    /// 校正图像每一行所属的模块
    pub row_modules: Vec<usize>,
    /// 原始帧形状的逆平场，`None` 为无效像素
    pub inverse_flatfield: Image2D<Option<f64>>,
}

impl Geometry {
    /// 校正后图像形状 (rows, cols)
    pub fn corrected_shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    /// 原始帧形状 (rows, cols)
    pub fn raw_shape(&self) -> (usize, usize) {
        self.inverse_flatfield.shape()
    }

    /// 校正后像素总数
    pub fn pixel_count(&self) -> usize {
        self.rows.len() * self.columns.len()
    }

    /// 按模块统计展开帧中的无效像素（帧按列优先展平）
    pub fn invalid_by_module(&self, frame: &UnfoldedFrame) -> Vec<usize> {
        let rows = self.rows.len();
        let modules = self.row_modules.last().map_or(0, |m| m + 1);
        let mut counts = vec![0; modules];
        if rows == 0 {
            return counts;
        }
        for (i, state) in frame.state.iter().enumerate() {
            if *state == PixelState::Invalid {
                counts[self.row_modules[i % rows]] += 1;
            }
        }
        counts
    }
}

/// 几何构建器
pub struct GeometryBuilder<'a> {
    calibration: &'a Calibration,
    flatfield: Option<&'a Image2D<f64>>,
    mode: FlatfieldMode,
}

impl<'a> GeometryBuilder<'a> {
    pub fn new(calibration: &'a Calibration, mode: FlatfieldMode) -> Self {
        Self {
            calibration,
            flatfield: None,
            mode,
        }
    }

    /// 设置平场（仅 `WithFlatfield` 模式使用）
    pub fn flatfield(mut self, flatfield: Option<&'a Image2D<f64>>) -> Self {
        self.flatfield = flatfield;
        self
    }

    /// 为给定的原始帧形状构建几何
    pub fn build(&self, frame_shape: (usize, usize)) -> Result<Geometry> {
        let (raw_rows, raw_cols) = frame_shape;
        let layout = DetectorLayout::from_shape(raw_rows, raw_cols)?;

        let (inverse_flatfield, double_pixel_factor) = match self.mode {
            FlatfieldMode::WithFlatfield => {
                let flat = self.flatfield.ok_or(XpadError::MissingFlatfield)?;
                if flat.shape() != frame_shape {
                    return Err(XpadError::shape_mismatch(
                        "flatfield",
                        frame_shape,
                        flat.shape(),
                    ));
                }
                (
                    inverse_normalized(flat),
                    DOUBLE_PIXEL_FACTOR_WITH_FLATFIELD,
                )
            }
            FlatfieldMode::WithoutFlatfield => (
                Image2D::filled(raw_rows, raw_cols, Some(1.0)),
                DOUBLE_PIXEL_FACTOR_WITHOUT_FLATFIELD,
            ),
        };

        let x = self.calibration.x()[0];
        let y = self.calibration.y()[0];
        let center_x = x + (GAP_PIXELS as f64) * (x / CHIP_SIZE_X as f64).floor();
        let center_y = y + (GAP_PIXELS as f64) * (y / CHIP_SIZE_Y as f64).floor();

        Ok(Geometry {
            distance: self.calibration.distance() / 1f64.to_radians().tan(),
            center_x,
            center_y,
            delta_offset: -self.calibration.delta_position()[0],
            gamma_offset: -self.calibration.gamma_position()[0],
            double_pixel_factor,
            columns: layout.column_table(),
            rows: layout.row_table(),
            row_modules: layout.row_modules(),
            inverse_flatfield,
        })
    }
}

/// 平场归一化到单位均值后取倒数，非有限值标记为无效
fn inverse_normalized(flat: &Image2D<f64>) -> Image2D<Option<f64>> {
    let mean = flat.finite_mean().unwrap_or(0.0);
    flat.map(|v| {
        let inv = mean / v;
        if inv.is_finite() {
            Some(inv)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn calibration() -> Calibration {
        Calibration::new(vec![280.0], vec![120.0], vec![2.5], vec![-1.0]).unwrap()
    }

    #[test]
    fn test_factor_without_flatfield() {
        let calib = calibration();
        let geometry = GeometryBuilder::new(&calib, FlatfieldMode::WithoutFlatfield)
            .build((240, 560))
            .unwrap();
        assert_relative_eq!(geometry.double_pixel_factor, 2.3);
        assert!(geometry
            .inverse_flatfield
            .data()
            .iter()
            .all(|v| *v == Some(1.0)));
    }

    #[test]
    fn test_flatfield_is_normalized_to_unit_mean() {
        let calib = calibration();
        let flat = Image2D::from_fn(240, 560, |r, c| 100.0 + ((r + c) % 5) as f64 * 10.0);
        let geometry = GeometryBuilder::new(&calib, FlatfieldMode::WithFlatfield)
            .flatfield(Some(&flat))
            .build((240, 560))
            .unwrap();
        assert_relative_eq!(geometry.double_pixel_factor, 1.0);

        // 1 / (flat / mean) 的倒数即归一化平场，其均值为 1
        let normalized: Vec<f64> = geometry
            .inverse_flatfield
            .data()
            .iter()
            .map(|v| 1.0 / v.unwrap())
            .collect();
        let mean = normalized.iter().sum::<f64>() / normalized.len() as f64;
        assert_relative_eq!(mean, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_dead_flatfield_pixels_are_invalid() {
        let calib = calibration();
        let mut flat = Image2D::filled(240, 560, 10.0);
        flat.set(5, 7, 0.0);
        let geometry = GeometryBuilder::new(&calib, FlatfieldMode::WithFlatfield)
            .flatfield(Some(&flat))
            .build((240, 560))
            .unwrap();
        assert_eq!(geometry.inverse_flatfield.get(5, 7), None);
        assert!(geometry.inverse_flatfield.get(5, 8).is_some());
    }

    #[test]
    fn test_missing_or_mismatched_flatfield() {
        let calib = calibration();
        let builder = GeometryBuilder::new(&calib, FlatfieldMode::WithFlatfield);
        assert!(matches!(
            builder.build((240, 560)),
            Err(XpadError::MissingFlatfield)
        ));

        let flat = Image2D::filled(120, 560, 1.0);
        let builder = GeometryBuilder::new(&calib, FlatfieldMode::WithFlatfield).flatfield(Some(&flat));
        assert!(matches!(
            builder.build((240, 560)),
            Err(XpadError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_one_gap_column_per_chip_boundary() {
        let calib = calibration();
        let geometry = GeometryBuilder::new(&calib, FlatfieldMode::WithoutFlatfield)
            .build((240, 560))
            .unwrap();
        let gaps: Vec<usize> = geometry
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_gap())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(gaps.len(), 560 / CHIP_SIZE_X - 1);
        for g in gaps {
            assert!(geometry.columns[g - 1].is_double());
            assert!(geometry.columns[g + 1].is_double());
        }
    }

    #[test]
    fn test_center_offsets_and_distance() {
        let calib = calibration();
        let geometry = GeometryBuilder::new(&calib, FlatfieldMode::WithoutFlatfield)
            .build((240, 560))
            .unwrap();
        assert_relative_eq!(geometry.center_x, 289.0);
        assert_relative_eq!(geometry.center_y, 123.0);
        assert_relative_eq!(geometry.delta_offset, -2.5);
        assert_relative_eq!(geometry.gamma_offset, 1.0);
        assert_relative_eq!(geometry.distance, 57.28996, epsilon = 1e-4);
        assert_eq!(geometry.corrected_shape(), (243, 578));
    }

    #[test]
    fn test_invalid_pixels_counted_per_module() {
        let calib = calibration();
        let geometry = GeometryBuilder::new(&calib, FlatfieldMode::WithoutFlatfield)
            .build((240, 560))
            .unwrap();
        let (rows, cols) = geometry.corrected_shape();
        let mut frame = UnfoldedFrame {
            two_theta: vec![0.0; rows * cols],
            psi: vec![0.0; rows * cols],
            intensity: vec![1.0; rows * cols],
            state: vec![PixelState::Normal; rows * cols],
        };
        // 列优先：下标 c * rows + r
        frame.state[3 * rows + 10] = PixelState::Invalid;
        frame.state[5 * rows + 200] = PixelState::Invalid;
        frame.state[9 * rows + 230] = PixelState::Invalid;
        assert_eq!(geometry.invalid_by_module(&frame), vec![1, 2]);
    }
}
