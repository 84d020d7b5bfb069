//! # 标定数据模型
//!
//! 直通光标定记录：参考点像素坐标、对应的 delta/gamma 角度，
//! 以及由此推导出的每度像素数 (`distance`)。
//!
//! ## 功能
//! - 构造时校验列表长度与数值有效性
//! - 推导 `distance`（不可手动输入）
//! - 生成几何缓存键 `CalibrationKey`
//!
//! ## 依赖关系
//! - 被 `parsers/calibration.rs`、`detector/geometry.rs`、`pipeline/` 使用
//! - 无外部模块依赖

use crate::error::{Result, XpadError};

use serde::{Deserialize, Serialize};

/// 是否使用平场校正
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlatfieldMode {
    WithFlatfield,
    WithoutFlatfield,
}

impl FlatfieldMode {
    pub fn from_flag(use_flatfield: bool) -> Self {
        if use_flatfield {
            FlatfieldMode::WithFlatfield
        } else {
            FlatfieldMode::WithoutFlatfield
        }
    }
}

impl std::fmt::Display for FlatfieldMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlatfieldMode::WithFlatfield => write!(f, "with flatfield"),
            FlatfieldMode::WithoutFlatfield => write!(f, "without flatfield"),
        }
    }
}

/// 直通光标定记录（构造后不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    x: Vec<f64>,
    y: Vec<f64>,
    delta_position: Vec<f64>,
    gamma_position: Vec<f64>,
    /// 每度像素数（推导值）
    distance: f64,
    median_filter: bool,
    save_unfolded_data: bool,
}

impl Calibration {
    /// 创建标定记录并推导 `distance`
    ///
    /// 四个列表必须等长、非空且全部为有限值。
    pub fn new(
        x: Vec<f64>,
        y: Vec<f64>,
        delta_position: Vec<f64>,
        gamma_position: Vec<f64>,
    ) -> Result<Self> {
        let n = x.len();
        if n == 0 {
            return Err(XpadError::InvalidCalibration(
                "at least one reference point is required".to_string(),
            ));
        }
        for (name, list) in [
            ("y", &y),
            ("delta", &delta_position),
            ("gamma", &gamma_position),
        ] {
            if list.len() != n {
                return Err(XpadError::InvalidCalibration(format!(
                    "'{}' has {} values but 'x' has {}",
                    name,
                    list.len(),
                    n
                )));
            }
        }
        let mut all = x
            .iter()
            .chain(&y)
            .chain(&delta_position)
            .chain(&gamma_position);
        if all.any(|v| !v.is_finite()) {
            return Err(XpadError::InvalidCalibration(
                "all calibration values must be finite".to_string(),
            ));
        }

        let distance = pixels_per_degree(&x, &delta_position, &gamma_position);

        Ok(Self {
            x,
            y,
            delta_position,
            gamma_position,
            distance,
            median_filter: false,
            save_unfolded_data: false,
        })
    }

    pub fn with_median_filter(mut self, enabled: bool) -> Self {
        self.median_filter = enabled;
        self
    }

    pub fn with_save_unfolded_data(mut self, enabled: bool) -> Self {
        self.save_unfolded_data = enabled;
        self
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn delta_position(&self) -> &[f64] {
        &self.delta_position
    }

    pub fn gamma_position(&self) -> &[f64] {
        &self.gamma_position
    }

    /// 每度像素数
    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn median_filter(&self) -> bool {
        self.median_filter
    }

    pub fn save_unfolded_data(&self) -> bool {
        self.save_unfolded_data
    }

    /// 参考点数量
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// 几何缓存键：所有标量的位模式 + 平场模式
    pub fn key(&self, mode: FlatfieldMode) -> CalibrationKey {
        let scalars = self
            .x
            .iter()
            .chain(&self.y)
            .chain(&self.delta_position)
            .chain(&self.gamma_position)
            .map(|v| v.to_bits())
            .chain(std::iter::once(self.distance.to_bits()))
            .chain([self.median_filter as u64, self.save_unfolded_data as u64])
            .collect();
        CalibrationKey {
            scalars,
            points: self.len(),
            mode,
        }
    }
}

/// 标定指纹（值类型，可哈希）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CalibrationKey {
    scalars: Vec<u64>,
    points: usize,
    mode: FlatfieldMode,
}

/// 由参考点推导每度像素数
///
/// x 的平均逐点差除以 delta 前两点之差；delta 不动时改用 gamma；
/// 两者都不可用时除以 (n - 1)；只有一个参考点时为 1。
fn pixels_per_degree(x: &[f64], delta: &[f64], gamma: &[f64]) -> f64 {
    let n = x.len();
    if n < 2 {
        return 1.0;
    }

    let mean_step = x.windows(2).map(|w| w[1] - w[0]).sum::<f64>() / (n - 1) as f64;

    let angular_step = [delta, gamma]
        .iter()
        .map(|axis| (axis[0] - axis[1]).abs())
        .find(|step| *step > 0.0);

    match angular_step {
        Some(step) => (mean_step / step).abs(),
        None if mean_step != 0.0 => mean_step.abs(),
        None => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_single_point_distance_is_one() {
        let calib = Calibration::new(vec![280.0], vec![120.0], vec![0.0], vec![0.0]).unwrap();
        assert_relative_eq!(calib.distance(), 1.0);
    }

    #[test]
    fn test_distance_from_delta_scan() {
        // 每 2° 移动 200 像素 -> 100 px/°
        let calib = Calibration::new(
            vec![100.0, 300.0, 500.0],
            vec![120.0; 3],
            vec![0.0, 2.0, 4.0],
            vec![0.0; 3],
        )
        .unwrap();
        assert_relative_eq!(calib.distance(), 100.0);
    }

    #[test]
    fn test_distance_falls_back_to_gamma() {
        let calib = Calibration::new(
            vec![100.0, 150.0],
            vec![120.0, 120.0],
            vec![5.0, 5.0],
            vec![0.0, 0.5],
        )
        .unwrap();
        assert_relative_eq!(calib.distance(), 100.0);
    }

    #[test]
    fn test_unequal_lengths_rejected() {
        let err = Calibration::new(vec![1.0, 2.0], vec![1.0], vec![0.0, 1.0], vec![0.0, 0.0]);
        assert!(matches!(err, Err(XpadError::InvalidCalibration(_))));
    }

    #[test]
    fn test_empty_and_non_finite_rejected() {
        assert!(Calibration::new(vec![], vec![], vec![], vec![]).is_err());
        assert!(Calibration::new(vec![f64::NAN], vec![1.0], vec![0.0], vec![0.0]).is_err());
    }

    #[test]
    fn test_key_depends_on_mode_and_values() {
        let a = Calibration::new(vec![280.0], vec![120.0], vec![0.0], vec![0.0]).unwrap();
        let b = Calibration::new(vec![281.0], vec![120.0], vec![0.0], vec![0.0]).unwrap();
        assert_eq!(
            a.key(FlatfieldMode::WithFlatfield),
            a.clone().key(FlatfieldMode::WithFlatfield)
        );
        assert_ne!(
            a.key(FlatfieldMode::WithFlatfield),
            a.key(FlatfieldMode::WithoutFlatfield)
        );
        assert_ne!(
            a.key(FlatfieldMode::WithFlatfield),
            b.key(FlatfieldMode::WithFlatfield)
        );
        assert_ne!(
            a.key(FlatfieldMode::WithFlatfield),
            a.clone()
                .with_median_filter(true)
                .key(FlatfieldMode::WithFlatfield)
        );
    }
}
