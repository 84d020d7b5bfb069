//! # 批量执行器
//!
//! 在独立的 rayon 线程池中并行处理扫描文件。
//!
//! ## 功能
//! - 线程数由 `--jobs` 指定，0 表示全部 CPU
//! - 进度条显示
//! - 失败不会中断其他扫描，最后汇总报告
//!
//! ## 依赖关系
//! - 被 `commands/unfold.rs` 调用
//! - 使用 `utils/progress.rs` 创建进度条
//! - 使用 `rayon` 进行并行计算

use crate::error::{Result, XpadError};
use crate::utils::progress;

use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// 单个扫描的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessResult {
    /// 处理成功，附简要说明
    Success(String),
    /// 跳过（如输出已存在）
    Skipped(String),
    /// 处理失败：(文件路径, 错误信息)
    Failed(String, String),
}

impl ProcessResult {
    /// 由处理函数的返回值构造
    pub fn from_outcome(path: &Path, outcome: Result<ProcessResult>) -> Self {
        outcome.unwrap_or_else(|e| ProcessResult::Failed(path.display().to_string(), e.to_string()))
    }
}

/// 批量处理结果统计
#[derive(Debug, Default)]
pub struct BatchResult {
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<(String, String)>,
}

impl BatchResult {
    pub fn merge(&mut self, result: ProcessResult) {
        match result {
            ProcessResult::Success(msg) => {
                log::info!("{}", msg);
                self.success += 1;
            }
            ProcessResult::Skipped(msg) => {
                log::info!("{}", msg);
                self.skipped += 1;
            }
            ProcessResult::Failed(path, err) => {
                self.failed += 1;
                self.failures.push((path, err));
            }
        }
    }

    pub fn total(&self) -> usize {
        self.success + self.skipped + self.failed
    }
}

/// 批量执行器
pub struct BatchRunner {
    jobs: usize,
}

impl BatchRunner {
    pub fn new(jobs: usize) -> Self {
        let jobs = if jobs == 0 { num_cpus::get() } else { jobs };
        Self { jobs }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// 并行处理扫描列表
    pub fn run<F>(&self, files: &[PathBuf], processor: F) -> Result<BatchResult>
    where
        F: Fn(&Path) -> ProcessResult + Sync + Send,
    {
        let pb = progress::create_progress_bar(files.len() as u64, "Unfolding scans");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| XpadError::Other(format!("cannot start worker pool: {}", e)))?;

        let results: Vec<ProcessResult> = pool.install(|| {
            files
                .par_iter()
                .map(|file| {
                    let result = processor(file.as_path());
                    pb.inc(1);
                    result
                })
                .collect()
        });

        pb.finish_and_clear();

        let mut batch_result = BatchResult::default();
        for result in results {
            batch_result.merge(result);
        }
        Ok(batch_result)
    }
}
