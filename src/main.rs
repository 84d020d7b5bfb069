//! # xpad-unfold - XPAD 探测器帧展开工具
//!
//! 将 XPAD 面探测器的原始帧校正并展开到 (2θ, ψ) 空间，
//! 积分为一维衍射图，并提供平场累加与 Pearson VII 峰拟合。
//!
//! ## 子命令
//! - `flatfield` - 累加一段扫描生成平场
//! - `unfold`    - 展开扫描帧并生成衍射图（单文件或批量）
//! - `fit`       - 对已保存的衍射图进行剥峰拟合
//!
//! ## 依赖关系
//! ```text
//! main.rs
//!   ├── cli/        (命令行参数定义)
//!   ├── commands/   (命令执行逻辑)
//!   │     ├── parsers/   (校准文件解析)
//!   │     ├── nexus/     (扫描容器读写、角度解析)
//!   │     ├── pipeline/  (几何缓存与逐帧展开)
//!   │     ├── detector/  (探测器布局、几何、校正)
//!   │     ├── xrd/       (积分、拟合、导出、绘图)
//!   │     └── models/    (数据模型)
//!   ├── batch/      (批量处理)
//!   ├── utils/      (输出、进度条、日志)
//!   └── error.rs    (错误处理)
//! ```

mod batch;
mod cli;
mod commands;
mod detector;
mod error;
mod models;
mod nexus;
mod parsers;
mod pipeline;
mod utils;
mod xrd;

use clap::Parser;
use cli::Cli;

fn main() {
    // Initialize colored output for Windows compatibility
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();

    // Ignore failure if a logger is already set
    let _ = utils::logger::init_with_level(utils::logger::level_for_verbosity(cli.verbose));

    if let Err(e) = commands::run(cli.command) {
        utils::output::print_error(&format!("{}", e));
        std::process::exit(1);
    }
}
