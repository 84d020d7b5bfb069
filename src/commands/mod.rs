//! # 命令执行模块
//!
//! 实现各子命令的业务逻辑。
//!
//! ## 依赖关系
//! - 被 `main.rs` 调用
//! - 使用 `cli/`, `parsers/`, `pipeline/`, `nexus/`, `xrd/`, `utils/`
//! - 子模块: flatfield, unfold, fit

pub mod fit;
pub mod flatfield;
pub mod unfold;

use crate::cli::Commands;
use crate::error::Result;

/// 执行命令
pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Flatfield(args) => flatfield::execute(args),
        Commands::Unfold(args) => unfold::execute(args),
        Commands::Fit(args) => fit::execute(args),
    }
}
