//! # 衍射图绘制
//!
//! 使用 `plotters` 绘制一维衍射图，可叠加峰拟合曲线。
//!
//! ## 功能
//! - 空 bin 处断开曲线
//! - 拟合曲线按峰序号标注
//! - 支持 PNG 和 SVG 输出
//!
//! ## 依赖关系
//! - 被 `commands/unfold.rs`、`commands/fit.rs` 调用
//! - 使用 `plotters` 渲染图表

use crate::error::{Result, XpadError};
use crate::models::DiffractionDiagram;
use crate::xrd::fit::PeakFitResult;

use plotters::prelude::*;
use std::path::Path;

/// 图表输出设置
#[derive(Debug, Clone)]
pub struct PlotOptions {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub use_svg: bool,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            title: "Diffraction diagram".to_string(),
            width: 1200,
            height: 800,
            use_svg: false,
        }
    }
}

/// 生成衍射图图表
pub fn plot_diagram(
    diagram: &DiffractionDiagram,
    peaks: &[PeakFitResult],
    output_path: &Path,
    options: &PlotOptions,
) -> Result<()> {
    let size = (options.width, options.height);
    if options.use_svg {
        let root = SVGBackend::new(output_path, size).into_drawing_area();
        draw_diagram(&root, diagram, peaks, &options.title)?;
        root.present().map_err(|e| XpadError::Other(e.to_string()))?;
    } else {
        let root = BitMapBackend::new(output_path, size).into_drawing_area();
        draw_diagram(&root, diagram, peaks, &options.title)?;
        root.present().map_err(|e| XpadError::Other(e.to_string()))?;
    }
    Ok(())
}

/// 连续非空 bin 组成的线段
fn segments(diagram: &DiffractionDiagram) -> Vec<Vec<(f64, f64)>> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    for (&t, v) in diagram.two_theta.iter().zip(&diagram.intensity) {
        match v {
            Some(v) => current.push((t, *v)),
            None if !current.is_empty() => out.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn draw_diagram<DB: DrawingBackend>(
    root: &DrawingArea<DB, plotters::coord::Shift>,
    diagram: &DiffractionDiagram,
    peaks: &[PeakFitResult],
    title: &str,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)
        .map_err(|e| XpadError::Other(format!("{:?}", e)))?;

    let points = diagram.points();
    if points.is_empty() {
        return Err(XpadError::InvalidArgument(
            "diagram has no filled bin to plot".to_string(),
        ));
    }

    let x_min = points.first().map(|p| p.0).unwrap_or(0.0);
    let x_max = points.last().map(|p| p.0).unwrap_or(1.0).max(x_min + 1e-6);
    let y_max = points
        .iter()
        .map(|p| p.1)
        .chain(peaks.iter().flat_map(|p| p.curve.iter().map(|c| c.1)))
        .filter(|y| y.is_finite())
        .fold(0.0f64, f64::max)
        * 1.1;
    let y_max = if y_max > 0.0 { y_max } else { 1.0 };

    let mut chart = ChartBuilder::on(root)
        .caption(title, ("sans-serif", 28).into_font())
        .margin(30)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x_min..x_max, 0.0..y_max)
        .map_err(|e| XpadError::Other(format!("{:?}", e)))?;

    chart
        .configure_mesh()
        .x_desc("2θ (°)")
        .y_desc("Intensity (counts)")
        .x_label_style(("sans-serif", 16))
        .y_label_style(("sans-serif", 16))
        .axis_desc_style(("sans-serif", 18))
        .draw()
        .map_err(|e| XpadError::Other(format!("{:?}", e)))?;

    let line_color = RGBColor(0, 102, 204);
    for segment in segments(diagram) {
        chart
            .draw_series(LineSeries::new(segment, line_color.stroke_width(1)))
            .map_err(|e| XpadError::Other(format!("{:?}", e)))?;
    }

    let fit_color = RGBColor(204, 51, 0);
    for (i, peak) in peaks.iter().enumerate() {
        chart
            .draw_series(LineSeries::new(
                peak.curve.iter().copied(),
                fit_color.stroke_width(2),
            ))
            .map_err(|e| XpadError::Other(format!("{:?}", e)))?;

        let label = format!("#{} {:.3}°", i + 1, peak.center);
        chart
            .draw_series(std::iter::once(Text::new(
                label,
                (peak.center, (peak.background + peak.slope * peak.center + peak.amplitude).min(y_max)),
                ("sans-serif", 12).into_font().color(&BLACK),
            )))
            .map_err(|e| XpadError::Other(format!("{:?}", e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_break_at_empty_bins() {
        let diagram = DiffractionDiagram::new(
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![Some(1.0), Some(2.0), None, None, Some(3.0)],
            false,
        );
        let parts = segments(&diagram);
        assert_eq!(parts, vec![vec![(1.0, 1.0), (2.0, 2.0)], vec![(5.0, 3.0)]]);
    }

    #[test]
    fn test_empty_diagram_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let diagram = DiffractionDiagram::new(vec![1.0], vec![None], false);
        let options = PlotOptions {
            use_svg: true,
            ..PlotOptions::default()
        };
        let result = plot_diagram(&diagram, &[], &dir.path().join("empty.svg"), &options);
        assert!(result.is_err());
    }
}
