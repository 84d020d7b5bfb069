//! # 标定文件解析器
//!
//! 解析 `key = value` 形式的直通光标定文件。
//!
//! ## 格式说明
//! ```text
//! # direct beam reference points
//! x = 280, 300
//! y = 120, 120
//! delta = 0, 10
//! gamma = 0, 0
//! median_filter = true
//! save_unfolded_data = false
//! ```
//!
//! 列表以逗号或空白分隔，可用方括号包裹；`delta_position`、
//! `gamma_position` 为 `delta`、`gamma` 的别名。
//!
//! ## 依赖关系
//! - 被 `commands/unfold.rs` 使用
//! - 使用 `models/calibration.rs`

use crate::error::{Result, XpadError};
use crate::models::Calibration;

use regex::Regex;
use std::fs;
use std::path::Path;

/// 解析标定文件
pub fn parse_calibration_file(path: &Path) -> Result<Calibration> {
    if !path.is_file() {
        return Err(XpadError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let content = fs::read_to_string(path).map_err(|e| XpadError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_calibration_content(&content, &path.display().to_string())
}

#[derive(Default)]
struct Fields {
    x: Option<Vec<f64>>,
    y: Option<Vec<f64>>,
    delta: Option<Vec<f64>>,
    gamma: Option<Vec<f64>>,
    median_filter: bool,
    save_unfolded_data: bool,
}

/// 从字符串内容解析标定记录
pub fn parse_calibration_content(content: &str, source: &str) -> Result<Calibration> {
    let line_pattern = Regex::new(r"^\s*([A-Za-z_]+)\s*[=:]\s*(.*?)\s*$")
        .map_err(|e| XpadError::Other(e.to_string()))?;

    let mut fields = Fields::default();

    for (number, raw) in content.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let caps = line_pattern.captures(line).ok_or_else(|| XpadError::ParseError {
            format: "calibration".to_string(),
            path: source.to_string(),
            reason: format!("line {} is not a key = value pair: {}", number + 1, line),
        })?;
        let key = caps[1].to_lowercase();
        let value = &caps[2];

        match key.as_str() {
            "x" => fields.x = Some(parse_list("x", value)?),
            "y" => fields.y = Some(parse_list("y", value)?),
            "delta" | "delta_position" => fields.delta = Some(parse_list("delta", value)?),
            "gamma" | "gamma_position" => fields.gamma = Some(parse_list("gamma", value)?),
            "median_filter" => fields.median_filter = parse_flag(&key, value)?,
            "save_unfolded_data" => fields.save_unfolded_data = parse_flag(&key, value)?,
            _ => {
                return Err(XpadError::ParseError {
                    format: "calibration".to_string(),
                    path: source.to_string(),
                    reason: format!("unknown key '{}' at line {}", key, number + 1),
                })
            }
        }
    }

    let required = |name: &str, list: Option<Vec<f64>>| {
        list.ok_or_else(|| XpadError::InvalidCalibration(format!("'{}' is missing", name)))
    };

    Ok(Calibration::new(
        required("x", fields.x)?,
        required("y", fields.y)?,
        required("delta", fields.delta)?,
        required("gamma", fields.gamma)?,
    )?
    .with_median_filter(fields.median_filter)
    .with_save_unfolded_data(fields.save_unfolded_data))
}

/// 解析数值列表
fn parse_list(key: &str, value: &str) -> Result<Vec<f64>> {
    let trimmed = value.trim_start_matches('[').trim_end_matches(']');
    trimmed
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>().map_err(|_| {
                XpadError::InvalidCalibration(format!("'{}' is not a number in '{}'", s, key))
            })
        })
        .collect()
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(XpadError::InvalidCalibration(format!(
            "'{}' expects true or false, got '{}'",
            key, other
        ))),
    }
}
