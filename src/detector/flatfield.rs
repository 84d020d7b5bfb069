//! # 平场累加
//!
//! 对编号连续的一组扫描文件，把每个扫描中所有图像帧逐像素求和。
//!
//! ## 规则
//! - 中间缺失的扫描：记录警告并跳过
//! - 不含任何帧的扫描：记录警告，不计入已用扫描
//! - 第一个扫描缺失：直接失败
//! - 形状与累加器不一致的扫描：记录错误，丢弃该扫描
//! - 每处理一个扫描（含跳过）报告一次百分比进度
//! - 结果与扫描处理顺序无关
//!
//! ## 依赖关系
//! - 被 `commands/flatfield.rs` 调用
//! - 使用 `nexus/store.rs` 读取扫描

use crate::error::{Result, XpadError};
use crate::models::Image2D;
use crate::nexus::store::{read_image_stack, ScanNaming, ScanSource};

/// 进度接收端（百分比 0-100）
pub trait ProgressSink {
    fn report(&self, percent: f64);
}

/// 单个扫描的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// 已累加，附帧数
    Added(usize),
    /// 文件存在但不含帧
    Empty,
    /// 文件不存在
    Missing,
    /// 被丢弃（形状不符或无法读取）
    Rejected(String),
}

/// 平场累加结果
#[derive(Debug, Clone)]
pub struct FlatfieldReport {
    pub image: Image2D<f64>,
    pub first: u32,
    pub last: u32,
    pub used: Vec<u32>,
    pub empty: Vec<u32>,
    pub missing: Vec<u32>,
    pub rejected: Vec<(u32, String)>,
    pub frames: usize,
}

/// 平场累加器
pub struct FlatfieldAccumulator<'s> {
    source: &'s dyn ScanSource,
    naming: ScanNaming,
    sum: Option<Image2D<f64>>,
    frames: usize,
}

impl<'s> FlatfieldAccumulator<'s> {
    pub fn new(source: &'s dyn ScanSource, naming: ScanNaming) -> Self {
        Self {
            source,
            naming,
            sum: None,
            frames: 0,
        }
    }

    /// 取出累加和与帧数，尚未累加任何帧时为 `None`
    pub fn into_sum(self) -> Option<(Image2D<f64>, usize)> {
        let frames = self.frames;
        self.sum.map(|sum| (sum, frames))
    }

    /// 累加编号为 `n` 的扫描
    pub fn add_scan(&mut self, n: u32) -> Result<ScanOutcome> {
        let path = self.naming.path_for(n);
        if !self.source.exists(&path) {
            log::warn!("Scan {} not found, skipping: {}", n, path.display());
            return Ok(ScanOutcome::Missing);
        }

        let origin = path.display().to_string();
        let stack = match self
            .source
            .open(&path)
            .and_then(|tree| read_image_stack(&tree, &origin))
        {
            Ok(stack) => stack,
            Err(e) => {
                log::error!("Scan {} could not be read: {}", n, e);
                return Ok(ScanOutcome::Rejected(e.to_string()));
            }
        };

        let Some(shape) = stack.shape() else {
            log::warn!("Scan {} holds no frame, skipping: {}", n, path.display());
            return Ok(ScanOutcome::Empty);
        };
        let mut partial = Image2D::filled(shape.0, shape.1, 0.0);
        for frame in stack.iter() {
            partial.add_assign(frame)?;
        }

        match self.merge(&partial, stack.len()) {
            Ok(()) => Ok(ScanOutcome::Added(stack.len())),
            Err(XpadError::ShapeMismatch {
                expected, actual, ..
            }) => {
                let reason = format!(
                    "frame shape {:?} does not match flatfield shape {:?}",
                    actual, expected
                );
                log::error!("Scan {} dropped: {}", n, reason);
                Ok(ScanOutcome::Rejected(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// 合并一份部分和
    pub fn merge(&mut self, partial: &Image2D<f64>, frames: usize) -> Result<()> {
        match self.sum.as_mut() {
            Some(sum) => sum.add_assign(partial)?,
            None => self.sum = Some(partial.clone()),
        }
        self.frames += frames;
        Ok(())
    }

    /// 累加闭区间 [first, last] 内的所有扫描
    pub fn accumulate(
        mut self,
        first: u32,
        last: u32,
        progress: &dyn ProgressSink,
    ) -> Result<FlatfieldReport> {
        let (first, last) = if first <= last {
            (first, last)
        } else {
            (last, first)
        };

        let first_path = self.naming.path_for(first);
        if !self.source.exists(&first_path) {
            return Err(XpadError::MissingFirstScan {
                path: first_path.display().to_string(),
            });
        }

        let total = (u64::from(last) - u64::from(first) + 1) as f64;
        let (mut used, mut empty, mut missing, mut rejected) =
            (Vec::new(), Vec::new(), Vec::new(), Vec::new());

        for (k, n) in (first..=last).enumerate() {
            match self.add_scan(n)? {
                ScanOutcome::Added(_) => used.push(n),
                ScanOutcome::Empty => empty.push(n),
                ScanOutcome::Missing => missing.push(n),
                ScanOutcome::Rejected(reason) => rejected.push((n, reason)),
            }
            progress.report(clamp_progress(100.0 * (k + 1) as f64 / total));
        }

        let (image, frames) = self.into_sum().ok_or_else(|| {
            XpadError::Other(format!(
                "no usable scan between {} and {}",
                first, last
            ))
        })?;

        Ok(FlatfieldReport {
            image,
            first,
            last,
            used,
            empty,
            missing,
            rejected,
            frames,
        })
    }
}

/// 浮点累计误差导致 99.x% 结束时修正为 100%
fn clamp_progress(percent: f64) -> f64 {
    if percent > 99.0 && percent < 100.0 {
        100.0
    } else {
        percent.min(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nexus::tree::{Dataset, ScanTree};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    /// 内存扫描来源
    struct MemorySource {
        scans: HashMap<PathBuf, ScanTree>,
    }

    impl MemorySource {
        fn new() -> Self {
            Self {
                scans: HashMap::new(),
            }
        }

        fn add(&mut self, n: u32, frames: &[Vec<f64>], shape: (usize, usize)) {
            let data: Vec<f64> = frames.iter().flatten().copied().collect();
            let ds = Dataset::new(vec![frames.len(), shape.0, shape.1], data)
                .unwrap()
                .with_attr("interpretation", "image");
            self.scans.insert(
                naming().path_for(n),
                ScanTree::new().with("/entry/scan_data/image", ds),
            );
        }
    }

    impl ScanSource for MemorySource {
        fn exists(&self, path: &Path) -> bool {
            self.scans.contains_key(path)
        }

        fn open(&self, path: &Path) -> Result<ScanTree> {
            self.scans
                .get(path)
                .cloned()
                .ok_or_else(|| XpadError::FileNotFound {
                    path: path.display().to_string(),
                })
        }
    }

    struct NoProgress;

    impl ProgressSink for NoProgress {
        fn report(&self, _percent: f64) {}
    }

    struct Recorder(RefCell<Vec<f64>>);

    impl ProgressSink for Recorder {
        fn report(&self, percent: f64) {
            self.0.borrow_mut().push(percent);
        }
    }

    fn naming() -> ScanNaming {
        ScanNaming::from_path(Path::new("/scans/flat_1.json")).unwrap()
    }

    fn source() -> MemorySource {
        let mut src = MemorySource::new();
        src.add(3, &[vec![1.0, 2.0, 3.0, 4.0], vec![1.0; 4]], (2, 2));
        src.add(4, &[vec![10.0, 20.0, 30.0, 40.0]], (2, 2));
        src.add(5, &[vec![100.0; 4], vec![5.0; 4], vec![7.0; 4]], (2, 2));
        src
    }

    #[test]
    fn test_sum_over_range() {
        let src = source();
        let report = FlatfieldAccumulator::new(&src, naming())
            .accumulate(3, 5, &NoProgress)
            .unwrap();
        assert_eq!(report.image.data(), &[124.0, 135.0, 146.0, 157.0]);
        assert_eq!(report.used, vec![3, 4, 5]);
        assert_eq!(report.frames, 6);
    }

    #[test]
    fn test_sum_is_order_independent() {
        let src = source();
        let mut forward = FlatfieldAccumulator::new(&src, naming());
        for n in [3, 4, 5] {
            forward.add_scan(n).unwrap();
        }
        let mut shuffled = FlatfieldAccumulator::new(&src, naming());
        for n in [5, 3, 4] {
            shuffled.add_scan(n).unwrap();
        }
        assert_eq!(forward.into_sum(), shuffled.into_sum());
    }

    #[test]
    fn test_scan_without_frames_is_not_used() {
        let mut src = MemorySource::new();
        src.add(1, &[vec![1.0; 4]], (2, 2));
        src.add(2, &[], (2, 2));
        src.add(3, &[vec![2.0; 4]], (2, 2));
        let report = FlatfieldAccumulator::new(&src, naming())
            .accumulate(1, 3, &NoProgress)
            .unwrap();
        assert_eq!(report.used, vec![1, 3]);
        assert_eq!(report.empty, vec![2]);
        assert_eq!(report.frames, 2);

        let mut only_empty = MemorySource::new();
        only_empty.add(1, &[], (2, 2));
        let result = FlatfieldAccumulator::new(&only_empty, naming()).accumulate(1, 1, &NoProgress);
        assert!(matches!(result, Err(XpadError::Other(_))));
    }

    #[test]
    fn test_range_ending_at_u32_max() {
        let mut src = MemorySource::new();
        src.add(u32::MAX - 1, &[vec![1.0; 4]], (2, 2));
        src.add(u32::MAX, &[vec![2.0; 4]], (2, 2));
        let recorder = Recorder(RefCell::new(Vec::new()));
        let report = FlatfieldAccumulator::new(&src, naming())
            .accumulate(u32::MAX - 1, u32::MAX, &recorder)
            .unwrap();
        assert_eq!(report.used, vec![u32::MAX - 1, u32::MAX]);
        assert_eq!(*recorder.0.borrow(), vec![50.0, 100.0]);
    }

    #[test]
    fn test_missing_intermediate_scan_is_skipped() {
        let mut src = MemorySource::new();
        src.add(1, &[vec![1.0; 4]], (2, 2));
        src.add(3, &[vec![2.0; 4]], (2, 2));
        let recorder = Recorder(RefCell::new(Vec::new()));
        let report = FlatfieldAccumulator::new(&src, naming())
            .accumulate(1, 3, &recorder)
            .unwrap();
        assert_eq!(report.missing, vec![2]);
        assert_eq!(report.image.data(), &[3.0; 4]);

        let progress = recorder.0.borrow();
        assert_eq!(progress.len(), 3);
        assert_eq!(*progress.last().unwrap(), 100.0);
    }

    #[test]
    fn test_missing_first_scan_is_fatal() {
        let mut src = MemorySource::new();
        src.add(2, &[vec![1.0; 4]], (2, 2));
        let result = FlatfieldAccumulator::new(&src, naming()).accumulate(1, 2, &NoProgress);
        assert!(matches!(result, Err(XpadError::MissingFirstScan { .. })));
    }

    #[test]
    fn test_shape_mismatch_drops_scan() {
        let mut src = MemorySource::new();
        src.add(1, &[vec![1.0; 4]], (2, 2));
        src.add(2, &[vec![1.0; 6]], (2, 3));
        src.add(3, &[vec![1.0; 4]], (2, 2));
        let report = FlatfieldAccumulator::new(&src, naming())
            .accumulate(1, 3, &NoProgress)
            .unwrap();
        assert_eq!(report.used, vec![1, 3]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, 2);
        assert_eq!(report.image.data(), &[2.0; 4]);
    }

    #[test]
    fn test_reversed_range_is_swapped() {
        let src = source();
        let report = FlatfieldAccumulator::new(&src, naming())
            .accumulate(5, 3, &NoProgress)
            .unwrap();
        assert_eq!((report.first, report.last), (3, 5));
    }

    #[test]
    fn test_progress_clamp() {
        assert_eq!(clamp_progress(99.5), 100.0);
        assert_eq!(clamp_progress(50.0), 50.0);
        assert_eq!(clamp_progress(100.0), 100.0);
    }
}
