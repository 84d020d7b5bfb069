//! # flatfield 子命令实现
//!
//! 按样例文件名推导扫描系列，累加 `[first, last]` 内所有扫描的图像帧，
//! 保存为 `flatfield_<first>_<last>` 容器。
//!
//! ## 依赖关系
//! - 使用 `cli/flatfield.rs` 定义的 FlatfieldArgs
//! - 使用 `detector/flatfield.rs` 累加
//! - 使用 `nexus/store.rs` 读写扫描容器

use crate::cli::flatfield::FlatfieldArgs;
use crate::detector::{FlatfieldAccumulator, FlatfieldReport};
use crate::error::Result;
use crate::nexus::store::save_flatfield;
use crate::nexus::{JsonScanStore, ScanNaming};
use crate::utils::{output, progress};

use std::path::PathBuf;

/// 执行平场累加
pub fn execute(args: FlatfieldArgs) -> Result<()> {
    output::print_header("Flatfield Accumulation");

    let naming = ScanNaming::from_path(&args.first)?;
    let first = naming.number();
    let (lo, hi) = (first.min(args.last), first.max(args.last));

    let output_path = args.output.clone().unwrap_or_else(|| {
        let dir = args.first.parent().map(PathBuf::from).unwrap_or_default();
        dir.join(format!("flatfield_{}_{}.json", lo, hi))
    });
    if output_path.exists() && !args.overwrite {
        output::print_skip(&format!(
            "Output exists, use --overwrite to replace: {}",
            output_path.display()
        ));
        return Ok(());
    }

    output::print_info(&format!(
        "Scans {} to {} ({} files)",
        lo,
        hi,
        u64::from(hi) - u64::from(lo) + 1
    ));

    let store = JsonScanStore;
    let pb = progress::create_percent_bar("Summing frames");
    let result = FlatfieldAccumulator::new(&store, naming).accumulate(lo, hi, &pb);
    pb.finish_and_clear();
    let report = result?;

    print_report(&report);
    save_flatfield(
        &output_path,
        &report.image,
        report.first,
        report.last,
        &report.used,
    )?;
    output::print_saved("flatfield", &output_path);

    Ok(())
}

fn print_report(report: &FlatfieldReport) {
    let (rows, cols) = report.image.shape();
    output::print_field("Scans used", report.used.len());
    output::print_field("Frames summed", report.frames);
    output::print_field("Image shape", format!("{} x {}", rows, cols));
    if let Some(mean) = report.image.finite_mean() {
        output::print_field("Mean counts", format!("{:.1}", mean));
    }

    if !report.empty.is_empty() {
        let numbers: Vec<String> = report.empty.iter().map(|n| n.to_string()).collect();
        output::print_warning(&format!("Scans without frames: {}", numbers.join(", ")));
    }
    if !report.missing.is_empty() {
        let numbers: Vec<String> = report.missing.iter().map(|n| n.to_string()).collect();
        output::print_warning(&format!("Missing scans: {}", numbers.join(", ")));
    }
    for (n, reason) in &report.rejected {
        output::print_warning(&format!("Scan {} dropped: {}", n, reason));
    }
}
