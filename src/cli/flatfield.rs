//! # flatfield 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/flatfield.rs`

use clap::Args;
use std::path::PathBuf;

/// flatfield 子命令参数
#[derive(Args, Debug)]
pub struct FlatfieldArgs {
    /// First scan file of the range (its number and naming define the series)
    pub first: PathBuf,

    /// Number of the last scan in the range (inclusive)
    #[arg(short, long)]
    pub last: u32,

    /// Output container (default: flatfield_<first>_<last>.json next to the scans)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Overwrite an existing output file
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,
}
