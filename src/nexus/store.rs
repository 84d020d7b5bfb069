//! # 扫描文件存取
//!
//! ## 功能
//! - `ScanSource`: 按路径打开扫描容器（便于测试时替换为内存实现）
//! - `JsonScanStore`: 读取 JSON 扫描容器
//! - `ScanNaming`: 由样例文件名推导同一系列中其他扫描的文件名
//! - 读取扫描（图像帧 + 角度）、读写平场容器
//!
//! ## 依赖关系
//! - 被 `detector/flatfield.rs`、`pipeline/` 和 `commands/` 使用
//! - 使用 `nexus/tree.rs`、`nexus/paths.rs`、`nexus/angles.rs`

use crate::error::{Result, XpadError};
use crate::models::{FrameStack, Image2D};
use crate::nexus::angles::{AngleResolver, ScanAngles};
use crate::nexus::paths::{Lookup, IMAGE, SAVED_IMAGE};
use crate::nexus::tree::{Dataset, ScanTree};

use std::path::{Path, PathBuf};

/// 扫描容器来源
pub trait ScanSource: Sync {
    /// 扫描文件是否存在
    fn exists(&self, path: &Path) -> bool;

    /// 读取整个扫描容器
    fn open(&self, path: &Path) -> Result<ScanTree>;
}

/// JSON 文件扫描来源
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonScanStore;

impl ScanSource for JsonScanStore {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn open(&self, path: &Path) -> Result<ScanTree> {
        if !path.is_file() {
            return Err(XpadError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        ScanTree::load(path)
    }
}

/// 一个扫描的图像与角度
#[derive(Debug, Clone)]
pub struct ScanData {
    pub frames: FrameStack,
    pub angles: ScanAngles,
    pub origin: PathBuf,
}

/// 读取扫描容器中的图像帧
pub fn read_image_stack(tree: &ScanTree, origin: &str) -> Result<FrameStack> {
    match IMAGE.lookup(tree) {
        Lookup::Found { dataset, .. } => dataset.frames(),
        Lookup::NotFound => Err(XpadError::MissingDataset {
            what: IMAGE.name.to_string(),
            path: origin.to_string(),
        }),
    }
}

/// 读取扫描：图像帧与 delta/gamma
pub fn load_scan(source: &dyn ScanSource, path: &Path) -> Result<ScanData> {
    let tree = source.open(path)?;
    let origin = path.display().to_string();
    let frames = read_image_stack(&tree, &origin)?;
    let angles = AngleResolver::resolve(&tree, &origin)?;
    Ok(ScanData {
        frames,
        angles,
        origin: path.to_path_buf(),
    })
}

/// 读取已保存的平场（路径含 `/data` 的图像数据集）
pub fn load_flatfield(source: &dyn ScanSource, path: &Path) -> Result<Image2D<f64>> {
    let tree = source.open(path)?;
    let dataset = match SAVED_IMAGE.lookup(&tree) {
        Lookup::Found { dataset, .. } => dataset,
        Lookup::NotFound => {
            return Err(XpadError::MissingDataset {
                what: SAVED_IMAGE.name.to_string(),
                path: path.display().to_string(),
            })
        }
    };
    let stack = dataset.frames()?;
    match stack.frames() {
        [image] => Ok(image.clone()),
        frames => Err(XpadError::InvalidArgument(format!(
            "flatfield in {} must be a single image, found {} frames",
            path.display(),
            frames.len()
        ))),
    }
}

/// 平场容器：条目 `flatfield_<first>_<last>`，图像数据集 `data`，所用扫描编号 `scans`
pub fn flatfield_tree(image: &Image2D<f64>, first: u32, last: u32, used: &[u32]) -> ScanTree {
    let group = format!("/flatfield_{}_{}", first, last);
    ScanTree::new()
        .with(
            &format!("{}/data", group),
            Dataset::from_image(image)
                .with_attr("interpretation", "image")
                .with_attr("signal", "data"),
        )
        .with(
            &format!("{}/scans", group),
            Dataset::vector(used.iter().map(|&n| f64::from(n)).collect()),
        )
}

/// 保存平场容器
pub fn save_flatfield(
    path: &Path,
    image: &Image2D<f64>,
    first: u32,
    last: u32,
    used: &[u32],
) -> Result<()> {
    flatfield_tree(image, first, last, used).save(path)
}

/// 扫描文件命名规则
///
/// `<prefix><number>[_0001].<ext>`，`_0001` 为多点扫描的后缀。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanNaming {
    dir: PathBuf,
    prefix: String,
    /// 零填充宽度，0 表示不填充
    width: usize,
    suffix: String,
    number: u32,
}

impl ScanNaming {
    /// 从样例文件路径解析
    pub fn from_path(path: &Path) -> Result<Self> {
        let invalid = |reason: &str| XpadError::ParseError {
            format: "scan file name".to_string(),
            path: path.display().to_string(),
            reason: reason.to_string(),
        };

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| invalid("file name is not valid UTF-8"))?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();

        let (body, suffix) = match stem.strip_suffix("_0001") {
            Some(body) if body.ends_with(|c: char| c.is_ascii_digit()) => {
                (body, format!("_0001{}", extension))
            }
            _ => (stem, extension),
        };

        let digits_start = body
            .char_indices()
            .rev()
            .find(|(_, c)| !c.is_ascii_digit())
            .map_or(0, |(i, c)| i + c.len_utf8());
        let digits = &body[digits_start..];
        if digits.is_empty() {
            return Err(invalid("no scan number before the extension"));
        }
        let number: u32 = digits
            .parse()
            .map_err(|_| invalid("scan number is out of range"))?;
        let width = if digits.len() > 1 && digits.starts_with('0') {
            digits.len()
        } else {
            0
        };

        Ok(Self {
            dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            prefix: body[..digits_start].to_string(),
            width,
            suffix,
            number,
        })
    }

    /// 样例文件的扫描编号
    pub fn number(&self) -> u32 {
        self.number
    }

    /// 第 `n` 个扫描的路径
    pub fn path_for(&self, n: u32) -> PathBuf {
        let name = format!(
            "{}{:0width$}{}",
            self.prefix,
            n,
            self.suffix,
            width = self.width
        );
        self.dir.join(name)
    }
}
