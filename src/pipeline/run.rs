//! # 展开流程
//!
//! `UnfoldingPipeline` 持有几何缓存、当前扫描、标定、平场与平场模式。
//! `start_run()` 返回按需拉取的 `UnfoldingRun`：每次 `next_frame()`
//! 展开一帧，全部完成后返回 `FrameStep::Done`。调用方可在任意两帧之间
//! 停止拉取，已展开的帧不会被当作完整结果回放。
//!
//! ## 依赖关系
//! - 被 `commands/unfold.rs` 调用
//! - 使用 `pipeline/cache.rs`、`detector/`、`nexus/store.rs`

use crate::detector::{FrameUnfolder, GeometryBuilder};
use crate::error::{Result, XpadError};
use crate::models::{Calibration, FlatfieldMode, Image2D, UnfoldedFrame};
use crate::nexus::ScanData;
use crate::pipeline::cache::{CacheEntry, GeometryCache};

use rayon::prelude::*;
use std::sync::Arc;

/// 一次拉取的结果
#[derive(Debug, Clone)]
pub enum FrameStep {
    Frame {
        index: usize,
        frame: Arc<UnfoldedFrame>,
    },
    Done,
}

/// 展开流程
pub struct UnfoldingPipeline {
    cache: GeometryCache,
    scan: Option<ScanData>,
    calibration: Option<Calibration>,
    flatfield: Option<Image2D<f64>>,
    mode: FlatfieldMode,
}

impl UnfoldingPipeline {
    pub fn new(mode: FlatfieldMode) -> Self {
        Self {
            cache: GeometryCache::new(),
            scan: None,
            calibration: None,
            flatfield: None,
            mode,
        }
    }

    /// 载入新扫描，缓存全部失效
    pub fn load_scan(&mut self, scan: ScanData) {
        self.cache.clear();
        self.scan = Some(scan);
    }

    /// 更换标定，旧标定的条目失效
    pub fn set_calibration(&mut self, calibration: Calibration) {
        if let Some(old) = &self.calibration {
            if *old != calibration {
                self.cache.invalidate(&old.key(self.mode));
            }
        }
        self.calibration = Some(calibration);
    }

    /// 更换平场，依赖平场的条目失效
    pub fn set_flatfield(&mut self, flatfield: Option<Image2D<f64>>) {
        if let Some(calib) = &self.calibration {
            self.cache.invalidate(&calib.key(FlatfieldMode::WithFlatfield));
        }
        self.flatfield = flatfield;
    }

    /// 取得（或构建）当前标定与模式的缓存条目
    fn entry(&mut self) -> Result<(&mut CacheEntry, &ScanData, bool)> {
        let scan = self
            .scan
            .as_ref()
            .ok_or_else(|| XpadError::InvalidArgument("no scan loaded".to_string()))?;
        let calibration = self
            .calibration
            .as_ref()
            .ok_or_else(|| XpadError::InvalidCalibration("no calibration set".to_string()))?;
        let shape = scan.frames.shape().ok_or_else(|| {
            XpadError::InvalidArgument(format!("scan {} has no frame", scan.origin.display()))
        })?;

        let mode = self.mode;
        let flatfield = self.flatfield.as_ref();
        let entry = self.cache.get_or_build(calibration.key(mode), || {
            GeometryBuilder::new(calibration, mode)
                .flatfield(flatfield)
                .build(shape)
        })?;
        Ok((entry, scan, calibration.median_filter()))
    }

    /// 开始一次逐帧展开
    pub fn start_run(&mut self) -> Result<UnfoldingRun<'_>> {
        let (entry, scan, median_filter) = self.entry()?;
        let replay = entry.is_complete();
        if !replay {
            entry.reset_frames();
        }
        Ok(UnfoldingRun {
            entry,
            scan,
            median_filter,
            next: 0,
            replay,
        })
    }

    /// 并行展开全部帧（已完整缓存时直接返回缓存）
    pub fn unfold_all(&mut self) -> Result<Vec<Arc<UnfoldedFrame>>> {
        let (entry, scan, median_filter) = self.entry()?;
        if entry.is_complete() {
            return Ok(entry.frames().to_vec());
        }

        let unfolder = FrameUnfolder::new(entry.geometry(), median_filter);
        let frames = scan
            .frames
            .frames()
            .par_iter()
            .enumerate()
            .map(|(i, frame)| {
                let (delta, gamma) = scan.angles.for_frame(i)?;
                unfolder.unfold(frame, delta, gamma).map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;

        entry.set_frames(frames.clone());
        Ok(frames)
    }
}

/// 一次逐帧展开
pub struct UnfoldingRun<'p> {
    entry: &'p mut CacheEntry,
    scan: &'p ScanData,
    median_filter: bool,
    next: usize,
    replay: bool,
}

impl<'p> UnfoldingRun<'p> {
    /// 是否在回放缓存
    pub fn is_replay(&self) -> bool {
        self.replay
    }

    /// 扫描帧数
    pub fn len(&self) -> usize {
        self.scan.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scan.frames.is_empty()
    }

    /// 拉取下一帧
    pub fn next_frame(&mut self) -> Result<FrameStep> {
        let index = self.next;

        if self.replay {
            return Ok(match self.entry.frames().get(index) {
                Some(frame) => {
                    self.next += 1;
                    FrameStep::Frame {
                        index,
                        frame: Arc::clone(frame),
                    }
                }
                None => FrameStep::Done,
            });
        }

        let Some(raw) = self.scan.frames.get(index) else {
            self.entry.mark_complete();
            return Ok(FrameStep::Done);
        };
        let (delta, gamma) = self.scan.angles.for_frame(index)?;
        let geometry = self.entry.geometry();
        let frame = FrameUnfolder::new(geometry, self.median_filter).unfold(raw, delta, gamma)?;
        let invalid = geometry.invalid_by_module(&frame);
        if invalid.iter().any(|&n| n > 0) {
            log::debug!("Frame {}: invalid pixels per module {:?}", index, invalid);
        }
        let frame = Arc::new(frame);
        self.entry.push_frame(Arc::clone(&frame));
        self.next += 1;
        Ok(FrameStep::Frame { index, frame })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FrameStack;
    use crate::nexus::angles::{AngleSource, ResolvedAngle, ScanAngles};
    use crate::xrd::{BinningOptions, DiffractionBinner};
    use std::path::PathBuf;

    fn angle(values: Vec<f64>) -> ResolvedAngle {
        ResolvedAngle {
            values,
            source: AngleSource::Motor,
            candidate: "test",
        }
    }

    /// 2 模块 × 7 芯片，3 帧相同的平坦图像
    fn scan() -> ScanData {
        let frame = Image2D::filled(240, 560, 100.0);
        ScanData {
            frames: FrameStack::new(vec![frame.clone(), frame.clone(), frame]).unwrap(),
            angles: ScanAngles {
                delta: angle(vec![0.0, 0.0, 0.0]),
                gamma: angle(vec![0.0]),
            },
            origin: PathBuf::from("scan_1.json"),
        }
    }

    /// 逐位比较（光束中心像素的 ψ 为 NaN）
    fn same_frame(a: &UnfoldedFrame, b: &UnfoldedFrame) -> bool {
        let bits = |v: &[f64]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        bits(&a.two_theta) == bits(&b.two_theta)
            && bits(&a.psi) == bits(&b.psi)
            && bits(&a.intensity) == bits(&b.intensity)
            && a.state == b.state
    }

    fn calibration() -> Calibration {
        Calibration::new(vec![280.0], vec![120.0], vec![0.0], vec![0.0]).unwrap()
    }

    fn pipeline_with(mode: FlatfieldMode) -> UnfoldingPipeline {
        let mut pipeline = UnfoldingPipeline::new(mode);
        pipeline.load_scan(scan());
        pipeline.set_calibration(calibration());
        pipeline
    }

    fn pipeline() -> UnfoldingPipeline {
        pipeline_with(FlatfieldMode::WithoutFlatfield)
    }

    fn drain(mut run: UnfoldingRun<'_>) -> Vec<Arc<UnfoldedFrame>> {
        let mut frames = Vec::new();
        while let FrameStep::Frame { frame, .. } = run.next_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_end_to_end_identical_frames() {
        let mut pipeline = pipeline();
        let run = pipeline.start_run().unwrap();
        assert_eq!(run.len(), 3);
        let frames = drain(run);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].len(), 243 * 578);
        assert!(same_frame(&frames[0], &frames[1]));
        assert!(same_frame(&frames[1], &frames[2]));

        let options = BinningOptions {
            patch: false,
            ..BinningOptions::for_distance(calibration().distance())
        };
        let diagram = DiffractionBinner::new(options)
            .unwrap()
            .bin(&frames[0])
            .unwrap();
        assert_eq!(frames[0].invalid_count(), 0);
        let first = diagram.intensity.iter().position(Option::is_some).unwrap();
        let last = diagram.intensity.iter().rposition(Option::is_some).unwrap();
        assert!(diagram.intensity[first..=last].iter().all(Option::is_some));
    }

    #[test]
    fn test_complete_run_is_replayed() {
        let mut pipeline = pipeline();
        let computed = drain(pipeline.start_run().unwrap());

        let mut run = pipeline.start_run().unwrap();
        assert!(run.is_replay());
        match run.next_frame().unwrap() {
            FrameStep::Frame { index, frame } => {
                assert_eq!(index, 0);
                assert!(Arc::ptr_eq(&frame, &computed[0]));
            }
            FrameStep::Done => panic!("replay ended early"),
        }
    }

    #[test]
    fn test_abandoned_run_is_recomputed() {
        let mut pipeline = pipeline();
        {
            let mut run = pipeline.start_run().unwrap();
            assert!(matches!(run.next_frame().unwrap(), FrameStep::Frame { index: 0, .. }));
        }
        let run = pipeline.start_run().unwrap();
        assert!(!run.is_replay());
        assert_eq!(drain(run).len(), 3);
    }

    #[test]
    fn test_calibration_change_invalidates() {
        let mut pipeline = pipeline();
        drain(pipeline.start_run().unwrap());
        assert_eq!(pipeline.cache.len(), 1);

        let moved = Calibration::new(vec![300.0], vec![120.0], vec![0.0], vec![0.0]).unwrap();
        pipeline.set_calibration(moved);
        assert!(pipeline.cache.is_empty());
        assert!(!pipeline.start_run().unwrap().is_replay());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut sequential = pipeline();
        let expected = drain(sequential.start_run().unwrap());

        let mut parallel = pipeline();
        let frames = parallel.unfold_all().unwrap();
        assert_eq!(frames.len(), expected.len());
        assert!(same_frame(&frames[2], &expected[2]));
        assert!(parallel.start_run().unwrap().is_replay());
    }

    #[test]
    fn test_missing_inputs() {
        let mut empty = UnfoldingPipeline::new(FlatfieldMode::WithoutFlatfield);
        assert!(matches!(empty.start_run(), Err(XpadError::InvalidArgument(_))));
        empty.load_scan(scan());
        assert!(matches!(empty.start_run(), Err(XpadError::InvalidCalibration(_))));

        let mut flat = pipeline_with(FlatfieldMode::WithFlatfield);
        assert!(matches!(flat.start_run(), Err(XpadError::MissingFlatfield)));
    }
}
