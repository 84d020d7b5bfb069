//! # 衍射图积分
//!
//! 把展开帧按 ψ 窗口筛选后沿 2θ 均匀分 bin，得到一维衍射图。
//!
//! ## 功能
//! - ψ 窗口掩模，正强度像素按 bin 平均，空 bin 记为 `None`
//! - 可选 patch：重采样到 0-150°、步长 0.0105° 的固定网格
//! - 首尾各去掉一个样本
//! - 按相同步长重采样（对已分 bin 的图是幂等的）
//! - 多帧衍射图合并为整个扫描的衍射图
//!
//! ## 依赖关系
//! - 被 `pipeline/` 和 `commands/unfold.rs` 调用
//! - 使用 `models/frame.rs`

use crate::error::{Result, XpadError};
use crate::models::{DiffractionDiagram, UnfoldedFrame};

/// patch 网格起点（度）
pub const PATCH_START: f64 = 0.0;
/// patch 网格终点（度）
pub const PATCH_END: f64 = 150.0;
/// patch 网格步长（度）
pub const PATCH_STEP: f64 = 0.0105;
/// patch 前丢弃的首尾原始 bin 数
pub const PATCH_EDGE_SKIP: usize = 15;
/// 单个衍射图的 bin 数上限
pub const MAX_BINS: usize = 1_000_000;
/// 2θ 的取值范围（度）
const TWO_THETA_SPAN: f64 = 180.0;

/// 检查 2θ 步长：必须为正，且整个 2θ 范围内的 bin 数不超过 `MAX_BINS`
pub fn check_step(step: f64) -> Result<()> {
    if !(step.is_finite() && step > 0.0) {
        return Err(XpadError::InvalidArgument(format!(
            "two-theta step must be positive, got {}",
            step
        )));
    }
    if TWO_THETA_SPAN / step > MAX_BINS as f64 {
        return Err(XpadError::InvalidArgument(format!(
            "two-theta step {} is too small (more than {} bins over 0-180°)",
            step, MAX_BINS
        )));
    }
    Ok(())
}

/// 积分参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinningOptions {
    /// 2θ bin 宽度（度）
    pub step: f64,
    pub psi_min: f64,
    pub psi_max: f64,
    pub patch: bool,
}

impl BinningOptions {
    /// 默认参数：步长为每度像素数的倒数，ψ ∈ [-100, 100]，启用 patch
    pub fn for_distance(pixels_per_degree: f64) -> Self {
        Self {
            step: 1.0 / pixels_per_degree,
            psi_min: -100.0,
            psi_max: 100.0,
            patch: true,
        }
    }

    fn validate(&self) -> Result<()> {
        check_step(self.step)?;
        if self.psi_min > self.psi_max {
            return Err(XpadError::InvalidArgument(format!(
                "psi window [{}, {}] is empty",
                self.psi_min, self.psi_max
            )));
        }
        Ok(())
    }
}

/// 衍射图积分器
pub struct DiffractionBinner {
    options: BinningOptions,
}

impl DiffractionBinner {
    pub fn new(options: BinningOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    /// 对一帧积分
    pub fn bin(&self, frame: &UnfoldedFrame) -> Result<DiffractionDiagram> {
        self.bin_frames(std::slice::from_ref(frame))
    }

    /// 对多帧的全部像素一起积分
    pub fn bin_frames(&self, frames: &[UnfoldedFrame]) -> Result<DiffractionDiagram> {
        let opts = &self.options;
        let step = opts.step;

        let (min, max) = frames
            .iter()
            .flat_map(|f| f.two_theta.iter())
            .filter(|t| t.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &t| {
                (lo.min(t), hi.max(t))
            });
        if min > max {
            return Ok(DiffractionDiagram::new(Vec::new(), Vec::new(), opts.patch));
        }

        let span = ((max - min) / step).floor();
        if !(span < MAX_BINS as f64) {
            return Err(XpadError::InvalidArgument(format!(
                "two-theta range {:.4}-{:.4}° at step {} exceeds {} bins",
                min, max, step, MAX_BINS
            )));
        }
        let nb_bins = span as usize + 1;
        let mut sums = vec![0.0; nb_bins];
        let mut counts = vec![0usize; nb_bins];

        for frame in frames {
            for (t, psi, intensity) in frame.valid_pixels() {
                // NaN 的 ψ 或 2θ 不满足比较，自动排除
                let in_window = psi >= opts.psi_min && psi <= opts.psi_max;
                if !in_window || !(intensity > 0.0) || !t.is_finite() {
                    continue;
                }
                let bin = (((t - min) / step).floor() as usize).min(nb_bins - 1);
                sums[bin] += intensity;
                counts[bin] += 1;
            }
        }

        let centers: Vec<f64> = (0..nb_bins)
            .map(|i| min + (i as f64 + 0.5) * step)
            .collect();
        let values = average(&sums, &counts);

        let diagram = if opts.patch {
            patch(&centers, &values)
        } else {
            DiffractionDiagram::new(centers, values, false)
        };
        Ok(trim_edges(diagram))
    }
}

/// 重采样到固定 patch 网格
fn patch(centers: &[f64], values: &[Option<f64>]) -> DiffractionDiagram {
    let len = ((PATCH_END - PATCH_START) / PATCH_STEP).round() as usize + 1;
    let end = centers.len().saturating_sub(PATCH_EDGE_SKIP);
    let samples = (PATCH_EDGE_SKIP..end).filter_map(|i| match values[i] {
        Some(v) if v > 0.0 => Some((centers[i], v)),
        _ => None,
    });
    let grid: Vec<f64> = (0..len)
        .map(|i| PATCH_START + i as f64 * PATCH_STEP)
        .collect();
    let intensity = resample(samples, PATCH_START, PATCH_STEP, len);
    DiffractionDiagram::new(grid, intensity, true)
}

/// 就近分配到均匀网格并求平均，超出网格的样本丢弃
fn resample(
    samples: impl Iterator<Item = (f64, f64)>,
    start: f64,
    step: f64,
    len: usize,
) -> Vec<Option<f64>> {
    let mut sums = vec![0.0; len];
    let mut counts = vec![0usize; len];
    for (t, v) in samples {
        let index = ((t - start) / step).round();
        if index < 0.0 || index >= len as f64 || !index.is_finite() {
            continue;
        }
        let index = index as usize;
        sums[index] += v;
        counts[index] += 1;
    }
    average(&sums, &counts)
}

/// 去掉首尾各一个样本
fn trim_edges(mut diagram: DiffractionDiagram) -> DiffractionDiagram {
    if diagram.len() <= 2 {
        return DiffractionDiagram::new(Vec::new(), Vec::new(), diagram.patched);
    }
    diagram.two_theta.pop();
    diagram.intensity.pop();
    diagram.two_theta.remove(0);
    diagram.intensity.remove(0);
    diagram
}

impl DiffractionDiagram {
    /// 以第一个样本为起点、按 `step` 重采样
    pub fn rebin(&self, step: f64) -> Result<DiffractionDiagram> {
        check_step(step)?;
        let (Some(&start), Some(&last)) = (self.two_theta.first(), self.two_theta.last()) else {
            return Ok(self.clone());
        };
        let span = ((last - start) / step).round();
        if !(span < MAX_BINS as f64) {
            return Err(XpadError::InvalidArgument(format!(
                "rebinning {:.4}-{:.4}° at step {} exceeds {} bins",
                start, last, step, MAX_BINS
            )));
        }
        Ok(merge_onto_grid(std::slice::from_ref(self), step))
    }
}

/// 合并多个衍射图：在公共网格上对所有非空样本取平均
///
/// `step` 应为各衍射图自身的步长（patch 网格或积分步长）。
pub fn aggregate(diagrams: &[DiffractionDiagram], step: f64) -> DiffractionDiagram {
    merge_onto_grid(diagrams, step)
}

/// 每个衍射图整体偏移整数个 bin 放入网格
///
/// 偏移只对首个样本取整一次，帧内样本保持相对间距。
fn merge_onto_grid(diagrams: &[DiffractionDiagram], step: f64) -> DiffractionDiagram {
    let patched = !diagrams.is_empty() && diagrams.iter().all(|d| d.patched);
    let Some(start) = diagrams
        .iter()
        .filter_map(|d| d.two_theta.first().copied())
        .reduce(f64::min)
    else {
        return DiffractionDiagram::new(Vec::new(), Vec::new(), patched);
    };

    let placed: Vec<(usize, &DiffractionDiagram)> = diagrams
        .iter()
        .filter_map(|d| {
            let first = *d.two_theta.first()?;
            Some((((first - start) / step).round() as usize, d))
        })
        .collect();
    let len = placed
        .iter()
        .map(|(offset, d)| {
            let first = d.two_theta[0];
            let last = d.two_theta[d.len() - 1];
            offset + ((last - first) / step).round() as usize + 1
        })
        .max()
        .unwrap_or(0);

    let mut sums = vec![0.0; len];
    let mut counts = vec![0usize; len];
    for (offset, d) in &placed {
        let first = d.two_theta[0];
        for (&t, &v) in d.two_theta.iter().zip(&d.intensity) {
            let Some(v) = v.filter(|_| t.is_finite()) else {
                continue;
            };
            let index = offset + ((t - first) / step).round() as usize;
            if index >= len {
                continue;
            }
            sums[index] += v;
            counts[index] += 1;
        }
    }

    let grid = (0..len).map(|i| start + i as f64 * step).collect();
    DiffractionDiagram::new(grid, average(&sums, &counts), patched)
}

fn average(sums: &[f64], counts: &[usize]) -> Vec<Option<f64>> {
    sums.iter()
        .zip(counts)
        .map(|(&s, &n)| if n > 0 { Some(s / n as f64) } else { None })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PixelState;
    use approx::assert_relative_eq;

    fn frame(points: &[(f64, f64, f64)]) -> UnfoldedFrame {
        UnfoldedFrame {
            two_theta: points.iter().map(|p| p.0).collect(),
            psi: points.iter().map(|p| p.1).collect(),
            intensity: points.iter().map(|p| p.2).collect(),
            state: vec![PixelState::Normal; points.len()],
        }
    }

    fn raw_options(step: f64) -> BinningOptions {
        BinningOptions {
            step,
            psi_min: -10.0,
            psi_max: 10.0,
            patch: false,
        }
    }

    #[test]
    fn test_binning_averages_and_masks() {
        // 2θ 0..5，步长 1 -> 6 个 bin，去掉首尾后 4 个
        let f = frame(&[
            (0.0, 0.0, 1.0),
            (1.2, 0.0, 2.0),
            (1.8, 5.0, 4.0),
            (2.5, 50.0, 100.0),
            (2.6, 0.0, -3.0),
            (3.1, f64::NAN, 9.0),
            (4.5, -10.0, 8.0),
            (5.0, 0.0, 1.0),
        ]);
        let diagram = DiffractionBinner::new(raw_options(1.0))
            .unwrap()
            .bin(&f)
            .unwrap();
        assert_eq!(diagram.len(), 4);
        assert_relative_eq!(diagram.two_theta[0], 1.5);
        assert_eq!(diagram.intensity[0], Some(3.0));
        // ψ 超窗、负强度、ψ 为 NaN 都不计入
        assert_eq!(diagram.intensity[1], None);
        assert_eq!(diagram.intensity[2], None);
        assert_eq!(diagram.intensity[3], Some(8.0));
        assert_eq!(diagram.filled_points()[1].1, -1.0);
    }

    #[test]
    fn test_invalid_pixels_are_ignored() {
        let mut f = frame(&[(0.0, 0.0, 1.0), (1.5, 0.0, 5.0), (1.6, 0.0, 7.0), (3.0, 0.0, 1.0)]);
        f.state[2] = PixelState::Invalid;
        let diagram = DiffractionBinner::new(raw_options(1.0))
            .unwrap()
            .bin(&f)
            .unwrap();
        assert_eq!(diagram.intensity[0], Some(5.0));
    }

    #[test]
    fn test_two_theta_strictly_increasing() {
        let points: Vec<_> = (0..500)
            .map(|i| (i as f64 * 0.037, 0.0, 1.0 + i as f64))
            .collect();
        let diagram = DiffractionBinner::new(raw_options(0.1))
            .unwrap()
            .bin(&frame(&points))
            .unwrap();
        assert!(diagram.two_theta.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_rebin_same_step_is_idempotent() {
        let points: Vec<_> = (0..2000)
            .map(|i| {
                let t = 10.0 + i as f64 * 0.0123;
                (t, 0.0, 50.0 + (t * 3.0).sin() * 20.0)
            })
            .collect();
        let step = 0.05;
        let diagram = DiffractionBinner::new(raw_options(step))
            .unwrap()
            .bin(&frame(&points))
            .unwrap();
        let rebinned = diagram.rebin(step).unwrap();

        assert_eq!(rebinned.len(), diagram.len());
        for (a, b) in rebinned.two_theta.iter().zip(&diagram.two_theta) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
        for (a, b) in rebinned.intensity.iter().zip(&diagram.intensity) {
            match (a, b) {
                (Some(a), Some(b)) => assert_relative_eq!(*a, *b, epsilon = 1e-9),
                (None, None) => {}
                _ => panic!("empty bins differ"),
            }
        }
    }

    #[test]
    fn test_patch_grid() {
        let points: Vec<_> = (0..4000)
            .map(|i| (20.0 + i as f64 * 0.005, 0.0, 10.0))
            .collect();
        let options = BinningOptions {
            patch: true,
            ..raw_options(0.02)
        };
        let diagram = DiffractionBinner::new(options)
            .unwrap()
            .bin(&frame(&points))
            .unwrap();
        assert!(diagram.patched);
        // 14287 个网格点去掉首尾
        assert_eq!(diagram.len(), 14285);
        assert_relative_eq!(diagram.two_theta[0], PATCH_STEP);
        let filled = diagram.points();
        assert!(!filled.is_empty());
        assert!(filled.iter().all(|(_, v)| (*v - 10.0).abs() < 1e-12));
        // 丢弃了首尾 15 个原始 bin
        assert!(filled[0].0 >= 20.0 + 15.0 * 0.02 - PATCH_STEP);
        assert!(diagram.filled_points().iter().any(|(_, v)| v.is_nan()));
    }

    #[test]
    fn test_aggregate_averages_frames() {
        let a = DiffractionDiagram::new(vec![1.0, 2.0, 3.0], vec![Some(2.0), None, Some(6.0)], false);
        let b = DiffractionDiagram::new(vec![2.0, 3.0, 4.0], vec![Some(4.0), Some(10.0), None], false);
        let total = aggregate(&[a, b], 1.0);
        assert_eq!(total.len(), 4);
        assert_eq!(
            total.intensity,
            vec![Some(2.0), Some(4.0), Some(8.0), None]
        );
    }

    #[test]
    fn test_aggregate_half_step_offset_leaves_no_holes() {
        // 第二帧相对第一帧错开半个 bin
        let a = DiffractionDiagram::new(
            (0..1000).map(|i| 10.005 + i as f64 * 0.01).collect(),
            vec![Some(1.0); 1000],
            false,
        );
        let b = DiffractionDiagram::new(
            (0..1000).map(|i| 15.01 + i as f64 * 0.01).collect(),
            vec![Some(3.0); 1000],
            false,
        );
        let total = aggregate(&[a, b], 0.01);

        let last = total.intensity.iter().rposition(|v| v.is_some()).unwrap();
        assert_eq!(total.filled_count(), last + 1);
        assert!(total.filled_count() >= 1500);
        assert_eq!(total.intensity[last], Some(3.0));
        assert_relative_eq!(total.two_theta[0], 10.005);
    }

    #[test]
    fn test_rebin_rejects_too_fine_step() {
        let diagram = DiffractionDiagram::new(vec![10.0, 10.1, 10.2], vec![Some(1.0); 3], false);
        assert!(diagram.rebin(1e-9).is_err());
        assert!(diagram.rebin(-0.1).is_err());
        assert_eq!(diagram.rebin(0.05).unwrap().len(), 5);
    }

    #[test]
    fn test_binning_rejects_span_beyond_bin_cap() {
        let binner = DiffractionBinner::new(raw_options(0.001)).unwrap();
        let wide = frame(&[(0.0, 0.0, 1.0), (2.0e3, 0.0, 1.0)]);
        assert!(matches!(binner.bin(&wide), Err(XpadError::InvalidArgument(_))));
        assert!(binner.bin(&frame(&[(0.0, 0.0, 1.0), (180.0, 0.0, 1.0)])).is_ok());
    }

    #[test]
    fn test_invalid_options() {
        assert!(DiffractionBinner::new(raw_options(0.0)).is_err());
        // 0-180° 内超过 MAX_BINS 个 bin
        assert!(DiffractionBinner::new(raw_options(1e-9)).is_err());
        assert!(DiffractionBinner::new(raw_options(1e-3)).is_ok());
        let reversed = BinningOptions {
            psi_min: 5.0,
            psi_max: -5.0,
            ..raw_options(1.0)
        };
        assert!(DiffractionBinner::new(reversed).is_err());
    }
}
