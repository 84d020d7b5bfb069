//! # 扫描数据树
//!
//! 以 "路径 -> 数据集" 表示的层级扫描容器，结构与 NeXus 文件一致：
//! 每个数据集包含形状、按行主序展平的 `f64` 数据和字符串属性。
//! 磁盘格式为 JSON（`serde_json`）。
//!
//! ## 依赖关系
//! - 被 `nexus/paths.rs`、`nexus/angles.rs`、`nexus/store.rs` 使用
//! - 使用 `models/image.rs` 转换图像数据集

use crate::error::{Result, XpadError};
use crate::models::{Frame, FrameStack, Image2D};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// 单个 n 维数据集
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
}

impl Dataset {
    /// 创建数据集，数据长度必须与形状一致
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected = shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d));
        if expected != Some(data.len()) {
            return Err(XpadError::InvalidArgument(format!(
                "dataset of shape {:?} does not hold {} values",
                shape,
                data.len()
            )));
        }
        Ok(Self {
            shape,
            data,
            attrs: BTreeMap::new(),
        })
    }

    /// 一维数据集
    pub fn vector(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
            attrs: BTreeMap::new(),
        }
    }

    /// 由二维图像创建
    pub fn from_image(image: &Image2D<f64>) -> Self {
        let (rows, cols) = image.shape();
        Self {
            shape: vec![rows, cols],
            data: image.data().to_vec(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// 按帧拆分：3 维 (n, rows, cols) 或 2 维 (rows, cols)
    pub fn frames(&self) -> Result<FrameStack> {
        let (count, rows, cols) = match self.shape.as_slice() {
            [rows, cols] => (1, *rows, *cols),
            [n, rows, cols] => (*n, *rows, *cols),
            other => {
                return Err(XpadError::InvalidArgument(format!(
                    "image dataset must be 2-D or 3-D, got shape {:?}",
                    other
                )))
            }
        };
        // 帧形状不能为空，且总长度不能溢出
        let Some(size) = rows
            .checked_mul(cols)
            .filter(|&s| s > 0 && count.checked_mul(s) == Some(self.data.len()))
        else {
            return Err(XpadError::InvalidArgument(format!(
                "image dataset of shape {:?} holds {} values",
                self.shape,
                self.data.len()
            )));
        };
        let frames = (0..count)
            .map(|i| Frame::new(rows, cols, self.data[i * size..(i + 1) * size].to_vec()))
            .collect::<Result<Vec<_>>>()?;
        FrameStack::new(frames)
    }
}

/// 扫描容器：路径到数据集的有序映射
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanTree {
    datasets: BTreeMap<String, Dataset>,
}

impl ScanTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, dataset: Dataset) {
        self.datasets.insert(path.to_string(), dataset);
    }

    pub fn with(mut self, path: &str, dataset: Dataset) -> Self {
        self.insert(path, dataset);
        self
    }

    pub fn get(&self, path: &str) -> Option<&Dataset> {
        self.datasets.get(path)
    }

    /// 按路径字典序遍历所有数据集
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Dataset)> {
        self.datasets.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// 从 JSON 文件读取
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| XpadError::FileReadError {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| XpadError::JsonError {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// 写入 JSON 文件
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string(self).map_err(|e| XpadError::JsonError {
            path: path.display().to_string(),
            source: e,
        })?;
        fs::write(path, content).map_err(|e| XpadError::FileWriteError {
            path: path.display().to_string(),
            source: e,
        })
    }
}
