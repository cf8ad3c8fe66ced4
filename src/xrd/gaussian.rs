//! # 高斯模型
//!
//! 扁平参数向量 `[A₀, c₀, σ₀, A₁, c₁, σ₁, ...]` 表示的多高斯和，
//! 以及对应的解析雅可比矩阵。
//!
//! ## 依赖关系
//! - 被 `xrd/solver.rs` 和 `xrd/fitter.rs` 使用
//! - 使用 nalgebra 存放雅可比矩阵

use nalgebra::DMatrix;

/// 单个高斯 A·exp(−(x−c)²/2σ²)
#[inline]
pub fn gaussian(x: f64, amplitude: f64, center: f64, sigma: f64) -> f64 {
    let d = x - center;
    amplitude * (-(d * d) / (2.0 * sigma * sigma)).exp()
}

/// 在所有采样点上求单个高斯的值
pub fn gaussian_curve(xs: &[f64], amplitude: f64, center: f64, sigma: f64) -> Vec<f64> {
    xs.iter().map(|&x| gaussian(x, amplitude, center, sigma)).collect()
}

/// 多高斯和；参数长度不是 3 的倍数时忽略末尾不完整的三元组
pub fn multi_gaussian(xs: &[f64], params: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; xs.len()];
    for p in params.chunks_exact(3) {
        for (y, &x) in out.iter_mut().zip(xs) {
            *y += gaussian(x, p[0], p[1], p[2]);
        }
    }
    out
}

/// 模型对参数的雅可比矩阵（行 = 采样点，列 = 参数）
pub fn jacobian(xs: &[f64], params: &[f64]) -> DMatrix<f64> {
    let mut jac = DMatrix::zeros(xs.len(), params.len());
    for (k, p) in params.chunks_exact(3).enumerate() {
        let (a, c, s) = (p[0], p[1], p[2]);
        let s2 = s * s;
        for (row, &x) in xs.iter().enumerate() {
            let d = x - c;
            let e = (-(d * d) / (2.0 * s2)).exp();
            jac[(row, 3 * k)] = e;
            jac[(row, 3 * k + 1)] = a * e * d / s2;
            jac[(row, 3 * k + 2)] = a * e * d * d / (s2 * s);
        }
    }
    jac
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gaussian_peak_and_half_width() {
        assert_relative_eq!(gaussian(25.0, 2.0, 25.0, 0.3), 2.0);
        let half = 0.3 * (2.0 * 2f64.ln()).sqrt();
        assert_relative_eq!(gaussian(25.0 + half, 2.0, 25.0, 0.3), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_multi_gaussian_is_sum() {
        let xs = [19.0, 20.0, 21.0];
        let params = [1.0, 20.0, 1.0, 0.5, 21.0, 2.0];
        let sum = multi_gaussian(&xs, &params);
        for (i, &x) in xs.iter().enumerate() {
            let expected = gaussian(x, 1.0, 20.0, 1.0) + gaussian(x, 0.5, 21.0, 2.0);
            assert_relative_eq!(sum[i], expected);
        }
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let xs: Vec<f64> = (0..30).map(|i| 18.0 + i as f64 * 0.2).collect();
        let params = vec![0.8, 21.0, 1.3, 0.3, 23.5, 4.0];
        let jac = jacobian(&xs, &params);

        let h = 1e-6;
        for col in 0..params.len() {
            let mut up = params.clone();
            let mut down = params.clone();
            up[col] += h;
            down[col] -= h;
            let f_up = multi_gaussian(&xs, &up);
            let f_down = multi_gaussian(&xs, &down);
            for row in 0..xs.len() {
                let numeric = (f_up[row] - f_down[row]) / (2.0 * h);
                assert_relative_eq!(jac[(row, col)], numeric, epsilon = 1e-6);
            }
        }
    }
}
