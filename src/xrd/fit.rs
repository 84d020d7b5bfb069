//! # 峰拟合
//!
//! 对一维衍射图迭代剥峰：每次取剩余数据的最大值，在其周围的
//! 固定窗口内用 Pearson VII + 线性背景拟合，记录结果后把窗口
//! 替换为整条曲线的平均值，直到最大值低于阈值。
//!
//! 模型：`f(x) = b + s·x + A·(1 + ((x − c)/w)²)^(−m)`
//!
//! ## 依赖关系
//! - 被 `commands/unfold.rs`、`commands/fit.rs` 调用
//! - 使用 `xrd/lm.rs`

use serde::Serialize;

use crate::error::FitError;
use crate::models::DiffractionDiagram;
use crate::xrd::lm::{optimize, LmConfig, LmModel, LmResult};

/// 参数顺序：背景、斜率、振幅、中心、宽度、指数
const BACKGROUND: usize = 0;
const SLOPE: usize = 1;
const AMPLITUDE: usize = 2;
const CENTER: usize = 3;
const WIDTH: usize = 4;
const EXPONENT: usize = 5;

/// 窗口内最少有效点数
const MIN_WINDOW_POINTS: usize = 7;
/// 背景估计取首尾各几个点
const EDGE_SAMPLES: usize = 5;
const INITIAL_EXPONENT: f64 = 2.0;
const MIN_EXPONENT: f64 = 0.5;
const MAX_EXPONENT: f64 = 100.0;
const MIN_WIDTH: f64 = 1e-9;

/// 剥峰参数
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// 阈值占全局最大值的比例
    pub threshold: f64,
    /// 拟合窗口半宽（样本数）
    pub half_width: usize,
    /// 尝试窗口数上限（含失败的窗口）
    pub max_peaks: usize,
    pub lm: LmConfig,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            threshold: 0.25,
            half_width: 890,
            max_peaks: 32,
            lm: LmConfig::default(),
        }
    }
}

/// 单个峰的拟合结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakFitResult {
    pub background: f64,
    pub slope: f64,
    pub amplitude: f64,
    pub center: f64,
    pub width: f64,
    pub exponent: f64,
    /// 窗口内的残差平方和
    pub chi2: f64,
    pub converged: bool,
    pub iterations: usize,
    /// 窗口内的拟合曲线
    #[serde(skip)]
    pub curve: Vec<(f64, f64)>,
}

impl PeakFitResult {
    fn from_result(result: &LmResult<6>, xs: &[f64]) -> Self {
        let p = &result.params;
        let curve = xs.iter().map(|&x| (x, PearsonVii.evaluate(x, p))).collect();
        Self {
            background: p[BACKGROUND],
            slope: p[SLOPE],
            amplitude: p[AMPLITUDE],
            center: p[CENTER],
            width: p[WIDTH],
            exponent: p[EXPONENT],
            chi2: result.chi2,
            converged: result.converged,
            iterations: result.iterations,
            curve,
        }
    }

    /// 按拟合参数求模型值
    pub fn evaluate(&self, x: f64) -> f64 {
        PearsonVii.evaluate(x, &self.params())
    }

    fn params(&self) -> [f64; 6] {
        [
            self.background,
            self.slope,
            self.amplitude,
            self.center,
            self.width,
            self.exponent,
        ]
    }
}

/// 剥峰结果
#[derive(Debug, Clone)]
pub struct PeakFitReport {
    /// 按发现顺序（从强到弱）
    pub peaks: Vec<PeakFitResult>,
    /// 剥峰后剩余的强度，空 bin 为 NaN
    pub residual: Vec<f64>,
    /// 拟合失败而跳过的窗口数
    pub skipped: usize,
}

impl PeakFitReport {
    /// 剥峰后剩余的最大强度
    pub fn residual_max(&self) -> Option<f64> {
        arg_max(&self.residual).map(|(_, v)| v)
    }
}

/// Pearson VII 峰 + 线性背景
struct PearsonVii;

impl LmModel<6> for PearsonVii {
    fn evaluate(&self, x: f64, p: &[f64; 6]) -> f64 {
        let u = (x - p[CENTER]) / p[WIDTH];
        p[BACKGROUND] + p[SLOPE] * x + p[AMPLITUDE] * (1.0 + u * u).powf(-p[EXPONENT])
    }

    fn jacobian_row(&self, x: f64, p: &[f64; 6]) -> [f64; 6] {
        let (a, w, m) = (p[AMPLITUDE], p[WIDTH], p[EXPONENT]);
        let u = (x - p[CENTER]) / w;
        let g = 1.0 + u * u;
        let shape = g.powf(-m);
        let common = a * 2.0 * m * shape / (g * w);
        [
            1.0,
            x,
            shape,
            common * u,
            common * u * u,
            -a * shape * g.ln(),
        ]
    }

    fn constrain(&self, p: &mut [f64; 6]) {
        p[WIDTH] = p[WIDTH].abs().max(MIN_WIDTH);
        p[EXPONENT] = p[EXPONENT].clamp(MIN_EXPONENT, MAX_EXPONENT);
    }
}

/// 迭代剥峰拟合器
pub struct PeakFitter {
    options: FitOptions,
}

impl PeakFitter {
    pub fn new(options: FitOptions) -> Self {
        Self { options }
    }

    /// 对衍射图剥峰
    pub fn fit(&self, diagram: &DiffractionDiagram) -> PeakFitReport {
        let values: Vec<f64> = diagram
            .intensity
            .iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();
        self.fit_curve(&diagram.two_theta, values)
    }

    /// 对 (x, y) 曲线剥峰，`y` 中的 NaN 视为空点
    pub fn fit_curve(&self, xs: &[f64], mut ys: Vec<f64>) -> PeakFitReport {
        let opts = &self.options;
        let mut peaks = Vec::new();
        let mut skipped = 0;

        let Some((_, global_max)) = arg_max(&ys) else {
            return PeakFitReport {
                peaks,
                residual: ys,
                skipped,
            };
        };
        let limit = opts.threshold * global_max;

        while peaks.len() + skipped < opts.max_peaks {
            let Some((index, current)) = arg_max(&ys) else {
                break;
            };
            if current <= limit {
                break;
            }

            let lo = index.saturating_sub(opts.half_width);
            let hi = (index + opts.half_width + 1).min(ys.len());
            let (wx, wy): (Vec<f64>, Vec<f64>) = xs[lo..hi]
                .iter()
                .zip(&ys[lo..hi])
                .filter(|(x, y)| x.is_finite() && y.is_finite())
                .map(|(&x, &y)| (x, y))
                .unzip();

            match fit_window(&wx, &wy, &opts.lm) {
                Ok(peak) => {
                    log::debug!(
                        "Peak {} at {:.4} (amplitude {:.2})",
                        peaks.len() + 1,
                        peak.center,
                        peak.amplitude
                    );
                    peaks.push(peak);
                }
                Err(e) => {
                    log::warn!("Fit window around {:.4} skipped: {}", xs[index], e);
                    skipped += 1;
                }
            }

            let mean = finite_mean(&ys);
            for y in ys[lo..hi].iter_mut().filter(|y| y.is_finite()) {
                *y = mean;
            }
        }

        PeakFitReport {
            peaks,
            residual: ys,
            skipped,
        }
    }
}

/// 拟合单个窗口
pub fn fit_window(xs: &[f64], ys: &[f64], config: &LmConfig) -> Result<PeakFitResult, FitError> {
    let initial = estimate(xs, ys)?;
    let result = optimize(&PearsonVii, xs, ys, initial, config)?;
    Ok(PeakFitResult::from_result(&result, xs))
}

/// 初值估计
fn estimate(xs: &[f64], ys: &[f64]) -> Result<[f64; 6], FitError> {
    let n = xs.len();
    if n < MIN_WINDOW_POINTS {
        return Err(FitError::Degenerate(format!(
            "{} points in window, need at least {}",
            n, MIN_WINDOW_POINTS
        )));
    }

    let edge = EDGE_SAMPLES.min(n / 2);
    let background = ys[..edge].iter().chain(&ys[n - edge..]).sum::<f64>() / (2 * edge) as f64;
    let slope = regression_slope(xs, ys)
        .ok_or_else(|| FitError::Degenerate("window has no two-theta spread".to_string()))?;

    let Some((peak, max)) = arg_max(ys) else {
        return Err(FitError::Degenerate("window has no finite value".to_string()));
    };
    let amplitude = max - background;
    if !(amplitude > 0.0) {
        return Err(FitError::Degenerate("flat data".to_string()));
    }

    let half = background + amplitude / 2.0;
    let left = (0..peak).rev().take_while(|&i| ys[i] > half).last().unwrap_or(peak);
    let right = (peak + 1..n).take_while(|&i| ys[i] > half).last().unwrap_or(peak);
    let width = xs[right] - xs[left];
    if !(width > 0.0) {
        return Err(FitError::Degenerate("zero peak width".to_string()));
    }

    Ok([background, slope, amplitude, xs[peak], width, INITIAL_EXPONENT])
}

/// 最小二乘直线斜率
fn regression_slope(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let (sxy, sxx) = xs.iter().zip(ys).fold((0.0, 0.0), |(sxy, sxx), (&x, &y)| {
        let dx = x - mean_x;
        (sxy + dx * (y - mean_y), sxx + dx * dx)
    });
    (sxx > 0.0).then(|| sxy / sxx)
}

/// 忽略 NaN 的最大值及其下标
fn arg_max(values: &[f64]) -> Option<(usize, f64)> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}

fn finite_mean(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), &v| (s + v, n + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn synthetic(params: [f64; 6]) -> (Vec<f64>, Vec<f64>) {
        let xs: Vec<f64> = (0..=2000).map(|i| i as f64 * 0.01).collect();
        let ys = xs.iter().map(|&x| PearsonVii.evaluate(x, &params)).collect();
        (xs, ys)
    }

    #[test]
    fn test_recovers_single_peak() {
        let (xs, ys) = synthetic([0.0, 0.0, 1000.0, 10.0, 2.0, 2.0]);
        let fitter = PeakFitter::new(FitOptions {
            half_width: 600,
            ..FitOptions::default()
        });
        let report = fitter.fit_curve(&xs, ys);

        assert_eq!(report.peaks.len(), 1);
        assert_eq!(report.skipped, 0);
        let peak = &report.peaks[0];
        assert_relative_eq!(peak.amplitude, 1000.0, max_relative = 0.05);
        assert_relative_eq!(peak.center, 10.0, max_relative = 0.05);
        assert_relative_eq!(peak.width, 2.0, max_relative = 0.05);
        assert_relative_eq!(peak.exponent, 2.0, max_relative = 0.05);
        assert!(peak.background.abs() < 5.0);
        assert!(peak.slope.abs() < 0.5);
        assert_eq!(peak.curve.len(), 1201);
        assert!(peak.converged);
        assert!(peak.iterations > 0);
        assert!(peak.chi2.is_finite() && peak.chi2 >= 0.0);
        // 剥峰后只剩远离峰心的低强度
        assert!(report.residual_max().unwrap() < 250.0);
    }

    #[test]
    fn test_two_peaks_strongest_first() {
        let (xs, mut ys) = synthetic([0.0, 0.0, 1000.0, 5.0, 0.3, 2.0]);
        let (_, second) = synthetic([0.0, 0.0, 600.0, 15.0, 0.3, 2.0]);
        for (y, s) in ys.iter_mut().zip(second) {
            *y += s;
        }
        let fitter = PeakFitter::new(FitOptions {
            half_width: 300,
            ..FitOptions::default()
        });
        let report = fitter.fit_curve(&xs, ys);

        assert_eq!(report.peaks.len(), 2);
        assert_relative_eq!(report.peaks[0].center, 5.0, max_relative = 0.01);
        assert_relative_eq!(report.peaks[1].center, 15.0, max_relative = 0.01);
    }

    #[test]
    fn test_flat_data_is_skipped_not_fatal() {
        let xs: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let fitter = PeakFitter::new(FitOptions {
            half_width: 10,
            max_peaks: 4,
            ..FitOptions::default()
        });
        let report = fitter.fit_curve(&xs, vec![5.0; 100]);
        assert!(report.peaks.is_empty());
        assert_eq!(report.skipped, 4);
    }

    #[test]
    fn test_small_window_is_degenerate() {
        let result = fit_window(&[1.0, 2.0, 3.0], &[1.0, 5.0, 1.0], &LmConfig::default());
        assert!(matches!(result, Err(FitError::Degenerate(_))));
    }

    #[test]
    fn test_empty_diagram() {
        let diagram = DiffractionDiagram::new(vec![1.0, 2.0], vec![None, None], false);
        let report = PeakFitter::new(FitOptions::default()).fit(&diagram);
        assert!(report.peaks.is_empty());
        assert_eq!(report.residual.len(), 2);
        assert_eq!(report.residual_max(), None);
    }

    #[test]
    fn test_jacobian_matches_finite_difference() {
        let p = [3.0, 0.5, 200.0, 4.0, 1.3, 1.7];
        let x = 4.6;
        let row = PearsonVii.jacobian_row(x, &p);
        for k in 0..6 {
            let h = 1e-6 * p[k].abs().max(1.0);
            let mut up = p;
            let mut down = p;
            up[k] += h;
            down[k] -= h;
            let numeric = (PearsonVii.evaluate(x, &up) - PearsonVii.evaluate(x, &down)) / (2.0 * h);
            assert_relative_eq!(row[k], numeric, max_relative = 1e-5, epsilon = 1e-6);
        }
    }
}
