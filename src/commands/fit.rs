//! # fit 子命令实现
//!
//! 对已保存的衍射图 CSV 重新进行 Pearson VII 剥峰拟合。
//!
//! ## 依赖关系
//! - 使用 `cli/fit.rs` 定义的 FitArgs
//! - 使用 `xrd/fit.rs` 拟合，`xrd/export.rs` 读写，`xrd/plot.rs` 绘图

use crate::cli::fit::FitArgs;
use crate::cli::unfold::DiagramFormat;
use crate::commands::unfold::print_peak_table;
use crate::error::{Result, XpadError};
use crate::utils::output;
use crate::xrd::export::{peaks_to_csv, read_diagram_csv};
use crate::xrd::plot::plot_diagram;
use crate::xrd::{FitOptions, PeakFitter, PlotOptions};

/// 执行峰拟合
pub fn execute(args: FitArgs) -> Result<()> {
    output::print_header("Pearson VII Peak Fitting");

    if !args.input.is_file() {
        return Err(XpadError::FileNotFound {
            path: args.input.display().to_string(),
        });
    }
    if !(args.threshold > 0.0 && args.threshold < 1.0) {
        return Err(XpadError::InvalidArgument(format!(
            "threshold must be in (0, 1), got {}",
            args.threshold
        )));
    }
    if args.max_peaks == 0 {
        return Err(XpadError::InvalidArgument(
            "max-peaks must be at least 1".to_string(),
        ));
    }

    let mut diagram = read_diagram_csv(&args.input)?;
    if let Some(step) = args.rebin {
        diagram = diagram.rebin(step)?;
        output::print_field("Rebinned to", format!("{}°", step));
    }
    output::print_field("Input", args.input.display());
    output::print_field(
        "Bins",
        format!("{} ({} filled)", diagram.len(), diagram.filled_count()),
    );
    output::print_field("Patched", diagram.patched);
    output::print_field("Threshold", args.threshold);
    output::print_field("Window half-width", args.half_width);

    let fitter = PeakFitter::new(FitOptions {
        threshold: args.threshold,
        half_width: args.half_width,
        max_peaks: args.max_peaks,
        ..FitOptions::default()
    });
    let report = fitter.fit(&diagram);

    print_peak_table(&report.peaks);
    if let Some(max) = report.residual_max() {
        output::print_field("Residual max", format!("{:.2}", max));
    }
    if report.skipped > 0 {
        output::print_warning(&format!(
            "{} fit window(s) skipped after a failed fit",
            report.skipped
        ));
    }

    let output_path = args.output.clone().unwrap_or_else(|| {
        let stem = args
            .input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("diagram");
        args.input.with_file_name(format!("{}_peaks.csv", stem))
    });
    peaks_to_csv(&report.peaks, &output_path)?;
    output::print_saved("peak table", &output_path);

    if let Some(plot_path) = &args.plot {
        let format = DiagramFormat::from_extension(plot_path);
        if !format.is_image() {
            return Err(XpadError::InvalidArgument(format!(
                "plot output must be .png or .svg: {}",
                plot_path.display()
            )));
        }
        let options = PlotOptions {
            title: args
                .input
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("diagram")
                .to_string(),
            use_svg: format == DiagramFormat::Svg,
            ..PlotOptions::default()
        };
        plot_diagram(&diagram, &report.peaks, plot_path, &options)?;
        output::print_saved("plot", plot_path);
    }

    Ok(())
}
