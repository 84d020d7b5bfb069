//! # Levenberg-Marquardt 优化器
//!
//! 一维曲线拟合用的通用 LM 实现，参数个数为编译期常量。
//! 法方程用带部分选主元的高斯消元求解，主元过小视为奇异。
//!
//! ## 依赖关系
//! - 被 `xrd/fit.rs` 使用
//! - 无外部模块依赖

use crate::error::FitError;

/// LM 迭代参数
#[derive(Debug, Clone)]
pub struct LmConfig {
    pub max_iterations: usize,
    /// 参数变化量收敛阈值（相对）
    pub convergence_threshold: f64,
    pub initial_lambda: f64,
    pub lambda_up: f64,
    pub lambda_down: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            convergence_threshold: 1e-10,
            initial_lambda: 0.001,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

/// 拟合结果
#[derive(Debug, Clone, Copy)]
pub struct LmResult<const N: usize> {
    pub params: [f64; N],
    pub chi2: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// 可被 LM 拟合的一维模型
pub trait LmModel<const N: usize> {
    fn evaluate(&self, x: f64, params: &[f64; N]) -> f64;

    /// 对各参数的偏导
    fn jacobian_row(&self, x: f64, params: &[f64; N]) -> [f64; N];

    /// 更新后施加参数约束
    fn constrain(&self, _params: &mut [f64; N]) {}
}

/// 运行 LM 优化
///
/// 初始点的法方程奇异时返回 `FitError::Singular`；之后遇到奇异
/// 则停止迭代并返回当前最优参数。
pub fn optimize<const N: usize, M: LmModel<N>>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    initial: [f64; N],
    config: &LmConfig,
) -> Result<LmResult<N>, FitError> {
    if xs.len() < N {
        return Err(FitError::Degenerate(format!(
            "{} points for {} parameters",
            xs.len(),
            N
        )));
    }

    let mut params = initial;
    let mut lambda = config.initial_lambda;
    let mut chi2 = compute_chi2(model, xs, ys, &params);
    if !chi2.is_finite() {
        return Err(FitError::Degenerate("initial model is not finite".to_string()));
    }
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        let (hessian, gradient) = normal_equations(model, xs, ys, &params);
        let mut damped = hessian;
        for (i, row) in damped.iter_mut().enumerate() {
            row[i] *= 1.0 + lambda;
        }

        let Some(delta) = solve(&damped, &gradient) else {
            if iter == 0 {
                return Err(FitError::Singular);
            }
            break;
        };

        let mut candidate = params;
        for (p, d) in candidate.iter_mut().zip(delta.iter()) {
            *p += d;
        }
        model.constrain(&mut candidate);

        let new_chi2 = compute_chi2(model, xs, ys, &candidate);
        if new_chi2.is_finite() && new_chi2 < chi2 {
            let relative_step = delta
                .iter()
                .zip(params.iter())
                .map(|(d, p)| d.abs() / p.abs().max(1e-12))
                .fold(0.0f64, f64::max);
            let relative_gain = (chi2 - new_chi2) / chi2.max(f64::MIN_POSITIVE);
            params = candidate;
            chi2 = new_chi2;
            lambda *= config.lambda_down;
            if relative_step < config.convergence_threshold
                || relative_gain < config.convergence_threshold
            {
                converged = true;
                break;
            }
        } else {
            lambda *= config.lambda_up;
            if lambda > 1e10 {
                // 无法继续下降，视为已到极小
                converged = true;
                break;
            }
        }
    }

    if params.iter().any(|p| !p.is_finite()) {
        return Err(FitError::Degenerate("parameters diverged".to_string()));
    }

    Ok(LmResult {
        params,
        chi2,
        converged,
        iterations,
    })
}

fn compute_chi2<const N: usize, M: LmModel<N>>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    params: &[f64; N],
) -> f64 {
    xs.iter()
        .zip(ys)
        .map(|(&x, &y)| {
            let r = y - model.evaluate(x, params);
            r * r
        })
        .sum()
}

/// J^T J 与 J^T r，只计算上三角再镜像
#[allow(clippy::needless_range_loop)]
fn normal_equations<const N: usize, M: LmModel<N>>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    params: &[f64; N],
) -> ([[f64; N]; N], [f64; N]) {
    let mut hessian = [[0.0f64; N]; N];
    let mut gradient = [0.0f64; N];

    for (&x, &y) in xs.iter().zip(ys) {
        let row = model.jacobian_row(x, params);
        let r = y - model.evaluate(x, params);
        for i in 0..N {
            gradient[i] += row[i] * r;
            for j in i..N {
                hessian[i][j] += row[i] * row[j];
            }
        }
    }

    for i in 1..N {
        for j in 0..i {
            hessian[i][j] = hessian[j][i];
        }
    }

    (hessian, gradient)
}

/// 带部分选主元的高斯消元，矩阵奇异时返回 None
#[allow(clippy::needless_range_loop)]
pub fn solve<const N: usize>(a: &[[f64; N]; N], b: &[f64; N]) -> Option<[f64; N]> {
    let mut matrix = *a;
    let mut rhs = *b;

    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |m, v| m.max(v.abs()));
    if !(scale > 0.0) || !scale.is_finite() {
        return None;
    }
    let tolerance = scale * 1e-14;

    for col in 0..N {
        let mut max_row = col;
        let mut max_val = matrix[col][col].abs();
        for row in (col + 1)..N {
            if matrix[row][col].abs() > max_val {
                max_val = matrix[row][col].abs();
                max_row = row;
            }
        }

        if max_val < tolerance {
            return None;
        }

        if max_row != col {
            matrix.swap(col, max_row);
            rhs.swap(col, max_row);
        }

        for row in (col + 1)..N {
            let factor = matrix[row][col] / matrix[col][col];
            let pivot_row = matrix[col];
            for (j, m) in matrix[row].iter_mut().enumerate().skip(col) {
                *m -= factor * pivot_row[j];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f64; N];
    for i in (0..N).rev() {
        let mut sum = rhs[i];
        for (j, &xj) in x.iter().enumerate().skip(i + 1) {
            sum -= matrix[i][j] * xj;
        }
        x[i] = sum / matrix[i][i];
    }

    Some(x)
}
