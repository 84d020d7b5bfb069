//! # 几何缓存
//!
//! 以标定指纹（含平场模式）为键缓存 `Geometry` 以及当前扫描已展开的帧。
//! 完整的条目可直接回放；中途放弃的运行只保留几何，帧需重新计算。
//!
//! ## 依赖关系
//! - 被 `pipeline/run.rs` 使用
//! - 使用 `models/calibration.rs` 的 `CalibrationKey`

use crate::detector::Geometry;
use crate::error::Result;
use crate::models::{CalibrationKey, UnfoldedFrame};

use std::collections::HashMap;
use std::sync::Arc;

/// 缓存条目
#[derive(Debug, Clone)]
pub struct CacheEntry {
    geometry: Arc<Geometry>,
    frames: Vec<Arc<UnfoldedFrame>>,
    complete: bool,
}

impl CacheEntry {
    fn new(geometry: Geometry) -> Self {
        Self {
            geometry: Arc::new(geometry),
            frames: Vec::new(),
            complete: false,
        }
    }

    pub fn geometry(&self) -> &Arc<Geometry> {
        &self.geometry
    }

    pub fn frames(&self) -> &[Arc<UnfoldedFrame>] {
        &self.frames
    }

    /// 是否已包含扫描的全部帧
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub(crate) fn push_frame(&mut self, frame: Arc<UnfoldedFrame>) {
        self.frames.push(frame);
    }

    pub(crate) fn set_frames(&mut self, frames: Vec<Arc<UnfoldedFrame>>) {
        self.frames = frames;
        self.complete = true;
    }

    pub(crate) fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// 丢弃未完成运行留下的帧
    pub(crate) fn reset_frames(&mut self) {
        self.frames.clear();
        self.complete = false;
    }
}

/// 几何缓存
#[derive(Debug, Default)]
pub struct GeometryCache {
    entries: HashMap<CalibrationKey, CacheEntry>,
}

impl GeometryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 命中则返回已有条目，否则用 `build` 构建几何并插入
    pub fn get_or_build(
        &mut self,
        key: CalibrationKey,
        build: impl FnOnce() -> Result<Geometry>,
    ) -> Result<&mut CacheEntry> {
        use std::collections::hash_map::Entry;

        let cached = self.len();
        match self.entries.entry(key) {
            Entry::Occupied(entry) => {
                log::debug!(
                    "Geometry cache hit ({} frames cached, complete: {})",
                    entry.get().frames.len(),
                    entry.get().complete
                );
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => {
                log::debug!("Geometry cache miss, building geometry ({} cached)", cached);
                let geometry = build()?;
                Ok(entry.insert(CacheEntry::new(geometry)))
            }
        }
    }

    /// 移除一个条目，返回是否存在
    pub fn invalidate(&mut self, key: &CalibrationKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            log::debug!("Geometry cache entry invalidated");
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.is_empty() {
            log::debug!("Geometry cache cleared ({} entries)", self.len());
        }
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::GeometryBuilder;
    use crate::error::XpadError;
    use crate::models::{Calibration, FlatfieldMode};

    fn calibration(x: f64) -> Calibration {
        Calibration::new(vec![x], vec![120.0], vec![0.0], vec![0.0]).unwrap()
    }

    fn build(calib: &Calibration) -> Result<Geometry> {
        GeometryBuilder::new(calib, FlatfieldMode::WithoutFlatfield).build((120, 160))
    }

    #[test]
    fn test_builds_once_per_key() {
        let calib = calibration(100.0);
        let key = calib.key(FlatfieldMode::WithoutFlatfield);
        let mut cache = GeometryCache::new();

        let first = Arc::clone(cache.get_or_build(key.clone(), || build(&calib)).unwrap().geometry());
        let second = cache
            .get_or_build(key, || panic!("geometry rebuilt on a cache hit"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, second.geometry()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_mode_is_part_of_key() {
        let calib = calibration(100.0);
        let mut cache = GeometryCache::new();
        cache
            .get_or_build(calib.key(FlatfieldMode::WithoutFlatfield), || build(&calib))
            .unwrap();
        assert!(!cache.invalidate(&calib.key(FlatfieldMode::WithFlatfield)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let calib = calibration(100.0);
        let key = calib.key(FlatfieldMode::WithFlatfield);
        let mut cache = GeometryCache::new();
        let result = cache.get_or_build(key.clone(), || {
            GeometryBuilder::new(&calib, FlatfieldMode::WithFlatfield).build((120, 160))
        });
        assert!(matches!(result, Err(XpadError::MissingFlatfield)));
        assert!(cache.is_empty());
        assert!(!cache.invalidate(&key));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let a = calibration(100.0);
        let b = calibration(101.0);
        let mut cache = GeometryCache::new();
        for calib in [&a, &b] {
            cache
                .get_or_build(calib.key(FlatfieldMode::WithoutFlatfield), || build(calib))
                .unwrap();
        }
        assert!(cache.invalidate(&a.key(FlatfieldMode::WithoutFlatfield)));
        assert!(!cache.invalidate(&a.key(FlatfieldMode::WithoutFlatfield)));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
