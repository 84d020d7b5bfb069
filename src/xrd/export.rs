//! # 数据导出
//!
//! ## 支持格式
//! - CSV: 衍射图 (2θ, intensity)，峰拟合参数表
//! - XY: `#` 注释头 + 制表符分隔的 (2θ, intensity)
//! - `raw_<index>.txt`: 展开帧的逐像素 (2θ, ψ, intensity)
//!
//! 空 bin 按衍射图类型写为 -1（原始）或 NaN（patch）。
//!
//! ## 依赖关系
//! - 被 `commands/unfold.rs`、`commands/fit.rs` 调用
//! - 使用 `csv` 库读写 CSV 文件

use crate::error::{Result, XpadError};
use crate::models::{DiffractionDiagram, UnfoldedFrame};
use crate::xrd::fit::PeakFitResult;

use serde::Deserialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

fn write_error(path: &Path) -> impl Fn(std::io::Error) -> XpadError + '_ {
    move |e| XpadError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    }
}

/// 导出衍射图为 CSV
pub fn diagram_to_csv(diagram: &DiffractionDiagram, output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;

    wtr.write_record(["two_theta", "intensity"])?;
    for (two_theta, intensity) in diagram.filled_points() {
        wtr.write_record(&[format!("{:.6}", two_theta), format!("{:.4}", intensity)])?;
    }

    wtr.flush().map_err(write_error(output_path))?;
    Ok(())
}

/// 导出衍射图为 XY
pub fn diagram_to_xy(diagram: &DiffractionDiagram, title: &str, output_path: &Path) -> Result<()> {
    let file = File::create(output_path).map_err(write_error(output_path))?;
    let mut out = BufWriter::new(file);

    let kind = if diagram.patched { "patched" } else { "raw" };
    let header = format!(
        "# Diffraction diagram: {} ({})\n# Empty bins: {}\n# Columns: 2theta (degrees), Intensity (counts)\n#",
        title,
        kind,
        diagram.empty_fill()
    );
    writeln!(out, "{}", header).map_err(write_error(output_path))?;

    for (two_theta, intensity) in diagram.filled_points() {
        writeln!(out, "{:.6}\t{:.4}", two_theta, intensity).map_err(write_error(output_path))?;
    }

    out.flush().map_err(write_error(output_path))?;
    Ok(())
}

/// 导出峰拟合参数表
pub fn peaks_to_csv(peaks: &[PeakFitResult], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;
    for peak in peaks {
        wtr.serialize(peak)?;
    }
    wtr.flush().map_err(write_error(output_path))?;
    Ok(())
}

/// 写出一帧的逐像素数据到 `dir/raw_<index>.txt`
pub fn write_raw_frame(frame: &UnfoldedFrame, dir: &Path, index: usize) -> Result<PathBuf> {
    let path = dir.join(format!("raw_{}.txt", index));
    let file = File::create(&path).map_err(write_error(&path))?;
    let mut out = BufWriter::new(file);

    for ((t, psi), intensity) in frame.two_theta.iter().zip(&frame.psi).zip(&frame.intensity) {
        writeln!(out, "{} {} {}", t, psi, intensity).map_err(write_error(&path))?;
    }

    out.flush().map_err(write_error(&path))?;
    Ok(path)
}

#[derive(Debug, Deserialize)]
struct DiagramRow {
    two_theta: f64,
    intensity: f64,
}

/// 读取 `diagram_to_csv` 写出的衍射图
///
/// NaN 与负值视为空 bin；出现 NaN 时认为是 patch 后的衍射图。
pub fn read_diagram_csv(path: &Path) -> Result<DiffractionDiagram> {
    if !path.is_file() {
        return Err(XpadError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let mut rdr = csv::Reader::from_path(path)?;

    let mut two_theta = Vec::new();
    let mut intensity = Vec::new();
    let mut patched = false;
    for row in rdr.deserialize() {
        let row: DiagramRow = row?;
        if !row.two_theta.is_finite() {
            return Err(XpadError::ParseError {
                format: "diagram CSV".to_string(),
                path: path.display().to_string(),
                reason: format!("non-finite two_theta at sample {}", two_theta.len() + 1),
            });
        }
        patched |= row.intensity.is_nan();
        two_theta.push(row.two_theta);
        intensity.push((row.intensity >= 0.0).then_some(row.intensity));
    }

    if two_theta.windows(2).any(|w| w[1] <= w[0]) {
        return Err(XpadError::ParseError {
            format: "diagram CSV".to_string(),
            path: path.display().to_string(),
            reason: "two_theta is not strictly increasing".to_string(),
        });
    }

    Ok(DiffractionDiagram::new(two_theta, intensity, patched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PixelState;

    fn diagram(patched: bool) -> DiffractionDiagram {
        DiffractionDiagram::new(vec![10.0, 10.5, 11.0], vec![Some(4.0), None, Some(2.5)], patched)
    }

    #[test]
    fn test_csv_round_trip_keeps_empty_bins() {
        let dir = tempfile::tempdir().unwrap();
        for patched in [false, true] {
            let path = dir.path().join(format!("diagram_{}.csv", patched));
            diagram_to_csv(&diagram(patched), &path).unwrap();

            let loaded = read_diagram_csv(&path).unwrap();
            assert_eq!(loaded.intensity, diagram(patched).intensity);
            assert_eq!(loaded.patched, patched);
        }
    }

    #[test]
    fn test_xy_uses_fill_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diagram.xy");
        diagram_to_xy(&diagram(false), "scan_12", &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<&str> = content.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], "10.500000\t-1.0000");
    }

    #[test]
    fn test_raw_frame_file() {
        let dir = tempfile::tempdir().unwrap();
        let frame = UnfoldedFrame {
            two_theta: vec![1.0, 2.0],
            psi: vec![-3.0, 4.0],
            intensity: vec![5.0, 6.5],
            state: vec![PixelState::Normal; 2],
        };
        let path = write_raw_frame(&frame, dir.path(), 7).unwrap();
        assert!(path.ends_with("raw_7.txt"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1 -3 5\n2 4 6.5\n");
    }

    #[test]
    fn test_peaks_csv_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peaks.csv");
        let peak = PeakFitResult {
            background: 1.0,
            slope: 0.0,
            amplitude: 100.0,
            center: 12.5,
            width: 0.2,
            exponent: 2.0,
            chi2: 0.5,
            converged: true,
            iterations: 12,
            curve: vec![(12.5, 101.0)],
        };
        peaks_to_csv(&[peak], &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(
            "background,slope,amplitude,center,width,exponent,chi2,converged,iterations\n"
        ));
    }

    #[test]
    fn test_read_rejects_unsorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "two_theta,intensity\n2.0,1.0\n1.0,1.0\n").unwrap();
        assert!(matches!(
            read_diagram_csv(&path),
            Err(XpadError::ParseError { .. })
        ));
    }
}
