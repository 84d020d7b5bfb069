//! # 3×3 中值滤波
//!
//! 只统计有效邻居，边界按最近像素复制扩展；无效像素保持无效。

use crate::models::Image2D;

/// 对可选值图像做 3×3 中值滤波
pub fn median_filter_3x3(image: &Image2D<Option<f64>>) -> Image2D<Option<f64>> {
    let (rows, cols) = image.shape();
    let mut window: Vec<f64> = Vec::with_capacity(9);

    Image2D::from_fn(rows, cols, |r, c| {
        image.get(r, c)?;

        window.clear();
        for dr in [-1isize, 0, 1] {
            for dc in [-1isize, 0, 1] {
                let rr = clamp_index(r as isize + dr, rows);
                let cc = clamp_index(c as isize + dc, cols);
                if let Some(v) = image.get(rr, cc) {
                    window.push(v);
                }
            }
        }
        window.sort_by(|a, b| a.total_cmp(b));
        Some(window[window.len() / 2])
    })
}

#[inline]
fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_single_hot_pixel() {
        let mut img = Image2D::filled(5, 5, Some(10.0));
        img.set(2, 2, Some(1000.0));
        let out = median_filter_3x3(&img);
        assert_eq!(out.get(2, 2), Some(10.0));
    }

    #[test]
    fn test_invalid_pixels_stay_invalid_and_are_ignored() {
        let mut img = Image2D::from_fn(3, 3, |r, c| Some((r * 3 + c) as f64));
        img.set(1, 1, None);
        img.set(0, 0, None);
        let out = median_filter_3x3(&img);
        assert_eq!(out.get(1, 1), None);
        assert_eq!(out.get(0, 0), None);
        // (0,1) 的有效邻居: 1,1,2,2,3,5 (边界复制) -> 上中位数
        assert!(out.get(0, 1).is_some());
    }

    #[test]
    fn test_constant_image_unchanged() {
        let img = Image2D::filled(4, 6, Some(3.5));
        assert_eq!(median_filter_3x3(&img), img);
    }
}
