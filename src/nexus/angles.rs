//! # 角度解析
//!
//! 在扫描容器中定位 delta 与 gamma 数组：先按优先级尝试马达通道，
//! 找不到时退回静态元数据。两者都找不到时返回错误，不使用默认值。
//!
//! ## 依赖关系
//! - 被 `nexus/store.rs` 和 `pipeline/` 使用
//! - 使用 `nexus/paths.rs` 的候选列表

use crate::error::{Result, XpadError};
use crate::nexus::paths::{
    first_match, Candidate, DELTA_METADATA, DELTA_MOTOR, GAMMA_METADATA, GAMMA_MOTOR,
};
use crate::nexus::tree::ScanTree;

/// 角度数据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AngleSource {
    /// 扫描中移动的马达通道
    Motor,
    /// 静态元数据
    Metadata,
}

/// 单轴解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAngle {
    pub values: Vec<f64>,
    pub source: AngleSource,
    /// 命中的候选项名称
    pub candidate: &'static str,
}

impl ResolvedAngle {
    /// 第 `frame` 帧的角度：单值广播到所有帧，否则按索引取值
    pub fn for_frame(&self, axis: &str, frame: usize) -> Result<f64> {
        match self.values.as_slice() {
            [single] => Ok(*single),
            values => values
                .get(frame)
                .copied()
                .ok_or_else(|| XpadError::AngleCountMismatch {
                    axis: axis.to_string(),
                    available: values.len(),
                    frame,
                }),
        }
    }
}

/// 一个扫描的 delta/gamma
#[derive(Debug, Clone, PartialEq)]
pub struct ScanAngles {
    pub delta: ResolvedAngle,
    pub gamma: ResolvedAngle,
}

impl ScanAngles {
    /// 第 `frame` 帧的 (delta, gamma)
    pub fn for_frame(&self, frame: usize) -> Result<(f64, f64)> {
        Ok((
            self.delta.for_frame("delta", frame)?,
            self.gamma.for_frame("gamma", frame)?,
        ))
    }
}

/// 角度解析器
pub struct AngleResolver;

impl AngleResolver {
    /// 解析扫描的 delta 与 gamma，`origin` 仅用于错误信息
    pub fn resolve(tree: &ScanTree, origin: &str) -> Result<ScanAngles> {
        Ok(ScanAngles {
            delta: Self::resolve_axis(tree, origin, "delta", DELTA_MOTOR, DELTA_METADATA)?,
            gamma: Self::resolve_axis(tree, origin, "gamma", GAMMA_MOTOR, GAMMA_METADATA)?,
        })
    }

    fn resolve_axis(
        tree: &ScanTree,
        origin: &str,
        axis: &str,
        motor: &[Candidate],
        metadata: &[Candidate],
    ) -> Result<ResolvedAngle> {
        let found = first_match(tree, motor)
            .map(|hit| (hit, AngleSource::Motor))
            .or_else(|| first_match(tree, metadata).map(|hit| (hit, AngleSource::Metadata)));

        match found {
            Some(((candidate, path, dataset), source)) if !dataset.data.is_empty() => {
                log::debug!("{} resolved from '{}' ({})", axis, path, candidate.name);
                Ok(ResolvedAngle {
                    values: dataset.data.clone(),
                    source,
                    candidate: candidate.name,
                })
            }
            _ => Err(XpadError::UnresolvedAngle {
                axis: axis.to_string(),
                path: origin.to_string(),
            }),
        }
    }
}
