//! # unfold 子命令实现
//!
//! 展开扫描帧并积分为衍射图。
//!
//! ## 功能
//! - 支持单文件和目录批量处理（rayon 并行）
//! - 可选平场校正、中值滤波与 raw_<frame>.txt 导出
//! - 每帧衍射图 + 整个扫描的合并衍射图
//! - 可选 Pearson VII 峰拟合，结果写入 CSV 并叠加到图表
//!
//! ## 依赖关系
//! - 使用 `cli/unfold.rs` 定义的 UnfoldArgs
//! - 使用 `pipeline/` 展开，`xrd/` 积分、拟合与导出
//! - 使用 `batch/` 模块进行批量处理

use crate::batch::{BatchRunner, FileCollector, ProcessResult};
use crate::cli::unfold::{DiagramFormat, UnfoldArgs};
use crate::error::{Result, XpadError};
use crate::models::{Calibration, DiffractionDiagram, FlatfieldMode, Image2D, UnfoldedFrame};
use crate::nexus::store::{load_flatfield, load_scan};
use crate::nexus::JsonScanStore;
use crate::parsers;
use crate::pipeline::{FrameStep, UnfoldingPipeline};
use crate::utils::{output, progress};
use crate::xrd::diagram::PATCH_STEP;
use crate::xrd::{
    self, aggregate, BinningOptions, DiffractionBinner, FitOptions, PeakFitResult, PeakFitter,
    PlotOptions,
};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 展开配置（批量模式下在线程间共享）
struct UnfoldConfig {
    calibration: Calibration,
    flatfield: Option<Image2D<f64>>,
    mode: FlatfieldMode,
    binning: BinningOptions,
    fit: Option<FitOptions>,
    format: DiagramFormat,
    output_dir: PathBuf,
    raw_dir: Option<PathBuf>,
    per_frame: bool,
    plot: PlotOptions,
    overwrite: bool,
}

/// 单个扫描的处理结果
struct ScanSummary {
    frames: usize,
    diagram: PathBuf,
    filled: usize,
    bins: usize,
    peaks: Vec<PeakFitResult>,
}

/// 执行展开
pub fn execute(args: UnfoldArgs) -> Result<()> {
    output::print_header("XPAD Frame Unfolding");

    if !args.input.exists() {
        return Err(XpadError::FileNotFound {
            path: args.input.display().to_string(),
        });
    }

    let config = build_config(&args)?;
    print_config(&config);

    fs::create_dir_all(&config.output_dir).map_err(|e| XpadError::FileWriteError {
        path: config.output_dir.display().to_string(),
        source: e,
    })?;
    if let Some(dir) = &config.raw_dir {
        fs::create_dir_all(dir).map_err(|e| XpadError::FileWriteError {
            path: dir.display().to_string(),
            source: e,
        })?;
    }

    if args.input.is_file() {
        execute_single_file(&args.input, &config)
    } else {
        execute_batch(&args, Arc::new(config))
    }
}

/// 配置错误在处理开始前返回
fn build_config(args: &UnfoldArgs) -> Result<UnfoldConfig> {
    let calibration = parsers::parse_calibration_file(&args.calibration)?;
    let calibration = if args.median_filter {
        calibration.with_median_filter(true)
    } else {
        calibration
    };

    let flatfield = args
        .flatfield
        .as_deref()
        .map(|path| load_flatfield(&JsonScanStore, path))
        .transpose()?;
    let mode = FlatfieldMode::from_flag(flatfield.is_some());

    let defaults = BinningOptions::for_distance(calibration.distance());
    let binning = BinningOptions {
        step: args.step.unwrap_or(defaults.step),
        psi_min: args.psi_min,
        psi_max: args.psi_max,
        patch: !args.no_patch,
    };
    // 参数检查
    DiffractionBinner::new(binning)?;

    if args.fit && !(args.threshold > 0.0 && args.threshold < 1.0) {
        return Err(XpadError::InvalidArgument(format!(
            "threshold must be in (0, 1), got {}",
            args.threshold
        )));
    }
    let fit = args.fit.then(|| FitOptions {
        threshold: args.threshold,
        half_width: args.half_width,
        ..FitOptions::default()
    });

    let raw_dir = match (&args.save_unfolded, calibration.save_unfolded_data()) {
        (Some(dir), _) => Some(dir.clone()),
        (None, true) => Some(args.output.join("raw")),
        (None, false) => None,
    };

    Ok(UnfoldConfig {
        calibration,
        flatfield,
        mode,
        binning,
        fit,
        format: args.format,
        output_dir: args.output.clone(),
        raw_dir,
        per_frame: args.per_frame,
        plot: PlotOptions {
            width: args.width,
            height: args.height,
            use_svg: args.format == DiagramFormat::Svg,
            ..PlotOptions::default()
        },
        overwrite: args.overwrite,
    })
}

fn print_config(config: &UnfoldConfig) {
    output::print_field("Reference points", config.calibration.len());
    output::print_field(
        "Pixels per degree",
        format!("{:.4}", config.calibration.distance()),
    );
    output::print_field("Flatfield", config.mode);
    output::print_field("Median filter", config.calibration.median_filter());
    output::print_field(
        "ψ window",
        format!("[{}, {}]", config.binning.psi_min, config.binning.psi_max),
    );
    output::print_field("2θ step", format!("{:.5}°", config.binning.step));
    output::print_field("Patch", config.binning.patch);
    println!();
}

/// 单文件模式：逐帧拉取并显示进度
fn execute_single_file(input: &Path, config: &UnfoldConfig) -> Result<()> {
    output::print_info(&format!("Single file mode: '{}'", input.display()));

    let output_file = diagram_path(input, config);
    if output_file.exists() && !config.overwrite {
        output::print_skip(&format!(
            "Output exists, use --overwrite to replace: {}",
            output_file.display()
        ));
        return Ok(());
    }

    let mut pipeline = prepare_pipeline(input, config)?;
    let mut run = pipeline.start_run()?;
    if run.is_empty() {
        return Err(XpadError::InvalidArgument(format!(
            "scan {} has no frame",
            input.display()
        )));
    }
    let total = run.len();
    if run.is_replay() {
        log::debug!("Replaying {} cached frames", total);
    }
    let pb = progress::create_spinner("Unfolding frames");
    let mut frames = Vec::with_capacity(total);
    while let FrameStep::Frame { index, frame } = run.next_frame()? {
        pb.set_message(format!("Unfolded frame {}/{}", index + 1, total));
        frames.push(frame);
    }
    pb.finish_and_clear();

    let summary = reduce_scan(input, &frames, config)?;
    output::print_success(&format!(
        "{} frames unfolded, {}/{} bins filled",
        summary.frames, summary.filled, summary.bins
    ));
    if config.fit.is_some() {
        print_peak_table(&summary.peaks);
    }
    output::print_saved("diagram", &summary.diagram);
    Ok(())
}

/// 批量处理模式
fn execute_batch(args: &UnfoldArgs, config: Arc<UnfoldConfig>) -> Result<()> {
    output::print_info(&format!("Batch mode: directory '{}'", args.input.display()));

    let files = FileCollector::new(args.input.clone())
        .with_pattern(&args.pattern)?
        .recursive(args.recursive)
        .collect()?;

    if files.is_empty() {
        output::print_warning(&format!(
            "No matching scan found with pattern '{}'",
            args.pattern
        ));
        return Ok(());
    }
    output::print_info(&format!("Found {} scan files", files.len()));

    let runner = BatchRunner::new(args.jobs);
    log::info!("Processing {} scans with {} threads", files.len(), runner.jobs());
    let result = runner.run(&files, |file| {
        ProcessResult::from_outcome(file, process_batch_file(file, &config))
    })?;

    output::print_separator();
    output::print_success(&format!(
        "Batch complete: {}/{} success, {} skipped, {} failed",
        result.success,
        result.total(),
        result.skipped,
        result.failed
    ));

    if !result.failures.is_empty() {
        output::print_warning("Failed scans:");
        for (path, err) in result.failures.iter().take(10) {
            output::print_error(&format!("  {}: {}", path, err));
        }
        if result.failures.len() > 10 {
            output::print_warning(&format!("  ... and {} more", result.failures.len() - 10));
        }
    }

    Ok(())
}

/// 批量模式中的单个扫描：帧在当前线程池中并行展开
fn process_batch_file(input: &Path, config: &UnfoldConfig) -> Result<ProcessResult> {
    let output_file = diagram_path(input, config);
    if output_file.exists() && !config.overwrite {
        return Ok(ProcessResult::Skipped(format!(
            "Output exists, skipping: {}",
            output_file.display()
        )));
    }

    let mut pipeline = prepare_pipeline(input, config)?;
    let frames = pipeline.unfold_all()?;
    let summary = reduce_scan(input, &frames, config)?;

    Ok(ProcessResult::Success(format!(
        "{} -> {} ({} frames, {} peaks)",
        input.display(),
        summary.diagram.display(),
        summary.frames,
        summary.peaks.len()
    )))
}

fn prepare_pipeline(input: &Path, config: &UnfoldConfig) -> Result<UnfoldingPipeline> {
    let scan = load_scan(&JsonScanStore, input)?;
    log::info!(
        "{}: {} frames, delta from {:?} ({}), gamma from {:?} ({})",
        input.display(),
        scan.frames.len(),
        scan.angles.delta.source,
        scan.angles.delta.candidate,
        scan.angles.gamma.source,
        scan.angles.gamma.candidate
    );

    let mut pipeline = UnfoldingPipeline::new(config.mode);
    pipeline.set_flatfield(config.flatfield.clone());
    pipeline.set_calibration(config.calibration.clone());
    pipeline.load_scan(scan);
    Ok(pipeline)
}

fn scan_stem(input: &Path) -> &str {
    input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("scan")
}

fn diagram_path(input: &Path, config: &UnfoldConfig) -> PathBuf {
    config.output_dir.join(format!(
        "{}_diagram.{}",
        scan_stem(input),
        config.format.extension()
    ))
}

/// 积分、导出与拟合
fn reduce_scan(
    input: &Path,
    frames: &[Arc<UnfoldedFrame>],
    config: &UnfoldConfig,
) -> Result<ScanSummary> {
    let stem = scan_stem(input);

    if let Some(dir) = &config.raw_dir {
        let frame_dir = dir.join(stem);
        fs::create_dir_all(&frame_dir).map_err(|e| XpadError::FileWriteError {
            path: frame_dir.display().to_string(),
            source: e,
        })?;
        for (i, frame) in frames.iter().enumerate() {
            xrd::export::write_raw_frame(frame, &frame_dir, i)?;
        }
        log::info!("{} raw frame files written to {}", frames.len(), frame_dir.display());
    }

    let invalid: usize = frames.iter().map(|f| f.invalid_count()).sum();
    let pixels: usize = frames.iter().map(|f| f.len()).sum();
    log::debug!("{}: {} of {} pixels invalid", stem, invalid, pixels);

    let binner = DiffractionBinner::new(config.binning)?;
    let diagrams = frames
        .iter()
        .map(|f| binner.bin(f))
        .collect::<Result<Vec<_>>>()?;
    let step = if config.binning.patch {
        PATCH_STEP
    } else {
        config.binning.step
    };
    let scan_diagram = aggregate(&diagrams, step);

    let peaks = match &config.fit {
        Some(options) => {
            let report = PeakFitter::new(options.clone()).fit(&scan_diagram);
            if report.skipped > 0 {
                log::warn!("{}: {} fit windows skipped", stem, report.skipped);
            }
            let peaks_path = config.output_dir.join(format!("{}_peaks.csv", stem));
            xrd::export::peaks_to_csv(&report.peaks, &peaks_path)?;
            report.peaks
        }
        None => Vec::new(),
    };

    let diagram_file = diagram_path(input, config);
    write_diagram(&scan_diagram, &peaks, stem, &diagram_file, config)?;

    if config.per_frame {
        for (i, diagram) in diagrams.iter().enumerate() {
            let path = config.output_dir.join(format!(
                "{}_frame{:03}.{}",
                stem,
                i,
                config.format.extension()
            ));
            write_diagram(diagram, &[], &format!("{} frame {}", stem, i), &path, config)?;
        }
    }

    Ok(ScanSummary {
        frames: frames.len(),
        diagram: diagram_file,
        filled: scan_diagram.filled_count(),
        bins: scan_diagram.len(),
        peaks,
    })
}

fn write_diagram(
    diagram: &DiffractionDiagram,
    peaks: &[PeakFitResult],
    title: &str,
    path: &Path,
    config: &UnfoldConfig,
) -> Result<()> {
    match config.format {
        DiagramFormat::Csv => xrd::export::diagram_to_csv(diagram, path),
        DiagramFormat::Xy => xrd::export::diagram_to_xy(diagram, title, path),
        DiagramFormat::Png | DiagramFormat::Svg => {
            let options = PlotOptions {
                title: title.to_string(),
                ..config.plot.clone()
            };
            xrd::plot::plot_diagram(diagram, peaks, path, &options)
        }
    }
}

/// 打印峰拟合表格
pub(crate) fn print_peak_table(peaks: &[PeakFitResult]) {
    use tabled::{Table, Tabled};

    #[derive(Tabled)]
    struct PeakRow {
        #[tabled(rename = "#")]
        index: usize,
        #[tabled(rename = "2θ (°)")]
        center: String,
        #[tabled(rename = "Amplitude")]
        amplitude: String,
        #[tabled(rename = "Width (°)")]
        width: String,
        #[tabled(rename = "Exponent")]
        exponent: String,
        #[tabled(rename = "Background")]
        background: String,
        #[tabled(rename = "χ²")]
        chi2: String,
        #[tabled(rename = "Iter")]
        iterations: String,
    }

    if peaks.is_empty() {
        output::print_warning("No peak above the threshold");
        return;
    }

    let rows: Vec<PeakRow> = peaks
        .iter()
        .enumerate()
        .map(|(i, p)| PeakRow {
            index: i + 1,
            center: format!("{:.4}", p.center),
            amplitude: format!("{:.1}", p.amplitude),
            width: format!("{:.4}", p.width),
            exponent: format!("{:.3}", p.exponent),
            background: format!("{:.2} + {:.3}·x", p.background, p.slope),
            chi2: format!("{:.3e}", p.chi2),
            iterations: if p.converged {
                p.iterations.to_string()
            } else {
                format!("{}*", p.iterations)
            },
        })
        .collect();

    output::print_header(&format!("{} Fitted Peaks", rows.len()));
    println!("{}", Table::new(&rows));
    if peaks.iter().any(|p| !p.converged) {
        output::print_info("* iteration limit reached before convergence");
    }
}
