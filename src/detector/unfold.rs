//! # 帧展开
//!
//! 将一帧原始计数转换为角空间数据：
//! 1. 乘以逆平场（无效像素标记为 Invalid）
//! 2. 可选 3×3 中值滤波
//! 3. 按行列重映射表展开，双像素强度除以因子
//! 4. 间隙列、间隙行取两侧平均
//! 5. 依次施加 delta、gamma 旋转，计算每个像素的 2θ 与 ψ
//!
//! 输出按列优先展平（列为外层循环）。
//!
//! ## 依赖关系
//! - 被 `pipeline/run.rs` 调用
//! - 使用 `detector/geometry.rs` 和 `detector/median.rs`

use crate::detector::geometry::Geometry;
use crate::detector::median::median_filter_3x3;
use crate::error::{Result, XpadError};
use crate::models::{Frame, Image2D, PixelState, UnfoldedFrame};

/// 单帧展开器（只读引用几何，可在多线程中共享）
pub struct FrameUnfolder<'g> {
    geometry: &'g Geometry,
    median_filter: bool,
}

impl<'g> FrameUnfolder<'g> {
    pub fn new(geometry: &'g Geometry, median_filter: bool) -> Self {
        Self {
            geometry,
            median_filter,
        }
    }

    /// 展开一帧，`delta`/`gamma` 为该帧的衍射仪角度（度）
    pub fn unfold(&self, frame: &Frame, delta: f64, gamma: f64) -> Result<UnfoldedFrame> {
        let geometry = self.geometry;
        if frame.shape() != geometry.raw_shape() {
            return Err(XpadError::shape_mismatch(
                "frame",
                geometry.raw_shape(),
                frame.shape(),
            ));
        }

        let (intensity, state) = self.correct_intensity(frame);
        let (two_theta, psi) = angular_grid(geometry, delta, gamma);

        let (rows, cols) = geometry.corrected_shape();
        let pixels = geometry.pixel_count();
        let mut out = UnfoldedFrame {
            two_theta: Vec::with_capacity(pixels),
            psi: Vec::with_capacity(pixels),
            intensity: Vec::with_capacity(pixels),
            state: Vec::with_capacity(pixels),
        };
        for c in 0..cols {
            for r in 0..rows {
                out.two_theta.push(two_theta.get(r, c));
                out.psi.push(psi.get(r, c));
                out.intensity.push(intensity.get(r, c).unwrap_or(f64::NAN));
                out.state.push(state.get(r, c));
            }
        }
        Ok(out)
    }

    /// 强度校正：平场、滤波、重映射与间隙插值
    fn correct_intensity(&self, frame: &Frame) -> (Image2D<Option<f64>>, Image2D<PixelState>) {
        let geometry = self.geometry;
        let (raw_rows, raw_cols) = frame.shape();

        let mut flat_corrected = Image2D::from_fn(raw_rows, raw_cols, |r, c| {
            geometry
                .inverse_flatfield
                .get(r, c)
                .map(|inv| inv * frame.get(r, c))
        });
        if self.median_filter {
            flat_corrected = median_filter_3x3(&flat_corrected);
        }

        let (rows, cols) = geometry.corrected_shape();
        let factor = geometry.double_pixel_factor;
        let mut image: Image2D<Option<f64>> = Image2D::filled(rows, cols, None);
        let mut state = Image2D::filled(rows, cols, PixelState::Invalid);

        for (r, row_cell) in geometry.rows.iter().enumerate() {
            for (c, col_cell) in geometry.columns.iter().enumerate() {
                let (Some(sr), Some(sc)) = (row_cell.source(), col_cell.source()) else {
                    continue;
                };
                let doubles = row_cell.is_double() as i32 + col_cell.is_double() as i32;
                let value = flat_corrected.get(sr, sc).map(|v| v / factor.powi(doubles));
                image.set(r, c, value);
                state.set(
                    r,
                    c,
                    match value {
                        None => PixelState::Invalid,
                        Some(_) if doubles > 0 => PixelState::DoublePixel,
                        Some(_) => PixelState::Normal,
                    },
                );
            }
        }

        // 间隙列：同一行左右邻居平均
        for (c, _) in geometry.columns.iter().enumerate().filter(|(_, c)| c.is_gap()) {
            for (r, row_cell) in geometry.rows.iter().enumerate() {
                if row_cell.is_gap() {
                    continue;
                }
                let value = average(image.get(r, c - 1), image.get(r, c + 1));
                image.set(r, c, value);
                state.set(r, c, gap_state(value));
            }
        }

        // 间隙行：上下邻居平均（包含间隙列）
        for (r, _) in geometry.rows.iter().enumerate().filter(|(_, r)| r.is_gap()) {
            for c in 0..cols {
                let value = average(image.get(r - 1, c), image.get(r + 1, c));
                image.set(r, c, value);
                state.set(r, c, gap_state(value));
            }
        }

        (image, state)
    }
}

fn average(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some((a? + b?) / 2.0)
}

fn gap_state(value: Option<f64>) -> PixelState {
    if value.is_some() {
        PixelState::GapAverage
    } else {
        PixelState::Invalid
    }
}

/// numpy 风格符号函数，sign(0) = 0
fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// 计算校正图像每个像素的 (2θ, ψ)，单位为度
///
/// 束流沿 +x；先绕竖直轴转 delta，再绕水平轴转 gamma。
/// 正好位于束流轴上的像素 ψ 无定义，返回 NaN。
pub fn angular_grid(geometry: &Geometry, delta: f64, gamma: f64) -> (Image2D<f64>, Image2D<f64>) {
    let (rows, cols) = geometry.corrected_shape();
    let (sd, cd) = (delta + geometry.delta_offset).to_radians().sin_cos();
    let (sg, cg) = (gamma + geometry.gamma_offset).to_radians().sin_cos();

    let mut two_theta = Image2D::filled(rows, cols, 0.0);
    let mut psi = Image2D::filled(rows, cols, 0.0);

    for r in 0..rows {
        for c in 0..cols {
            let tx = geometry.distance;
            let ty = r as f64 - geometry.center_y;
            let tz = geometry.center_x - c as f64;

            let x1 = tx * cd - tz * sd;
            let y1 = ty;
            let z1 = tx * sd + tz * cd;

            let x = x1 * cg + y1 * sg;
            let y = -x1 * sg + y1 * cg;
            let z = z1;

            let norm = (x * x + y * y + z * z).sqrt();
            two_theta.set(r, c, (x / norm).acos().to_degrees());

            let mut p = sign(z) * (y / (y * y + z * z).sqrt()).acos().to_degrees();
            if p < 0.0 {
                p += 360.0;
            }
            psi.set(r, c, p - 90.0);
        }
    }

    (two_theta, psi)
}
