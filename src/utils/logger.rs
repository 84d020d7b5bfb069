//! # 日志
//!
//! 为 `log` 门面安装一个最小的 logger，把记录转发到 `utils/output.rs`
//! 的彩色输出。级别由 `--verbose` 决定，启动时调用一次 `init_with_level`。
//!
//! ## 依赖关系
//! - 被 `main.rs` 调用
//! - 使用 `log` crate 和 `utils/output.rs`

use crate::utils::output;

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::sync::OnceLock;

struct TerminalLogger {
    level: LevelFilter,
}

impl Log for TerminalLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let msg = record.args().to_string();
        match record.level() {
            Level::Error => output::print_error(&msg),
            Level::Warn => output::print_warning(&msg),
            Level::Info => output::print_info(&msg),
            Level::Debug | Level::Trace => {
                output::print_debug(&format!("{}: {}", record.target(), msg))
            }
        }
    }

    fn flush(&self) {}
}

static LOGGER: OnceLock<TerminalLogger> = OnceLock::new();

/// 安装 logger，重复调用无效
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| TerminalLogger { level });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// `-v` 次数对应的级别
pub fn level_for_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}
