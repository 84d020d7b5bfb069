//! # CLI 模块
//!
//! 使用 `clap` 定义命令行参数和子命令。
//!
//! ## 命令结构
//! - `flatfield`: 累加一组扫描生成平场
//! - `unfold`: 展开扫描并生成衍射图（可选峰拟合）
//! - `fit`: 对已导出的衍射图做峰拟合
//!
//! ## 依赖关系
//! - 被 `main.rs` 使用
//! - 子模块: flatfield, unfold, fit

pub mod fit;
pub mod flatfield;
pub mod unfold;

use clap::{ArgAction, Parser, Subcommand};

/// xpad-unfold - XPAD 探测器帧校正与展开
#[derive(Parser)]
#[command(name = "xpad-unfold")]
#[command(author = "Changjiang Wu")]
#[command(version)]
#[command(
    about = "Geometry correction, unfolding and peak fitting for XPAD diffraction scans",
    long_about = None
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
pub enum Commands {
    /// Sum the image frames of a range of scans into a flatfield
    Flatfield(flatfield::FlatfieldArgs),

    /// Unfold scan frames to (2θ, ψ, I) and reduce them to diffraction diagrams
    Unfold(unfold::UnfoldArgs),

    /// Fit Pearson VII peaks on an exported diffraction diagram
    Fit(fit::FitArgs),
}
