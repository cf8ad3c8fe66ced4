//! # 非线性最小二乘求解器
//!
//! 投影 Levenberg–Marquardt：每步求解
//! `(JᵀJ + λ·diag(JᵀJ)) δ = Jᵀr`，把试探点夹回边界内，
//! 代价下降则接受并减小 λ，否则增大 λ。
//! 位于边界且梯度指向边界外的参数在该步冻结。
//!
//! 失败以 `FitError` 返回，由 `xrd/fitter.rs` 的策略链消化，
//! 不会传播到调用方。
//!
//! ## 依赖关系
//! - 使用 `xrd/gaussian.rs` 的模型和雅可比
//! - 使用 nalgebra Cholesky 分解求解法方程
//! - 使用 `xrd/config.rs` 中的 `SolverConfig`

use super::config::SolverConfig;
use super::gaussian::{jacobian, multi_gaussian};

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// 单次求解失败原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("initial guess violates bounds at parameter {index}")]
    InfeasibleStart { index: usize },

    #[error("non-finite residuals or parameters")]
    NonFinite,

    #[error("normal equations are singular")]
    SingularSystem,

    #[error("evaluation budget of {0} exhausted")]
    EvaluationBudgetExhausted(usize),
}

/// 盒约束 lower ≤ p ≤ upper（闭区间，upper 可为 +∞）
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Self {
        Self { lower, upper }
    }

    /// 第一个越界参数的下标
    pub fn first_violation(&self, params: &[f64]) -> Option<usize> {
        if params.len() != self.lower.len() || params.len() != self.upper.len() {
            return Some(params.len().min(self.lower.len()).min(self.upper.len()));
        }
        params
            .iter()
            .enumerate()
            .position(|(i, p)| !(*p >= self.lower[i] && *p <= self.upper[i]))
    }

    /// 夹入边界，并向内收缩 `margin`（区间足够宽时）
    pub fn clamp_inside(&self, params: &[f64], margin: f64) -> Vec<f64> {
        params
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let (lo, hi) = (self.lower[i], self.upper[i]);
                if hi - lo > 2.0 * margin {
                    p.clamp(lo + margin, hi - margin)
                } else {
                    p.clamp(lo, hi)
                }
            })
            .collect()
    }

    fn project(&self, params: &mut DVector<f64>) {
        for i in 0..params.len() {
            params[i] = params[i].clamp(self.lower[i], self.upper[i]);
        }
    }
}

const MAX_DAMPING: f64 = 1e16;
const MIN_DAMPING: f64 = 1e-12;
const DIAG_FLOOR: f64 = 1e-12;

/// 多高斯最小二乘拟合
///
/// `budget` 为模型与雅可比求值总次数上限。
pub fn levenberg_marquardt(
    xs: &[f64],
    ys: &[f64],
    p0: &[f64],
    bounds: Option<&Bounds>,
    budget: usize,
    config: &SolverConfig,
) -> Result<Vec<f64>, FitError> {
    if p0.iter().any(|p| !p.is_finite()) {
        return Err(FitError::NonFinite);
    }
    if let Some(b) = bounds {
        if let Some(index) = b.first_violation(p0) {
            return Err(FitError::InfeasibleStart { index });
        }
    }

    let data = DVector::from_column_slice(ys);
    let residual = |p: &DVector<f64>| -> DVector<f64> {
        &data - DVector::from_vec(multi_gaussian(xs, p.as_slice()))
    };

    let mut p = DVector::from_column_slice(p0);
    let mut r = residual(&p);
    let mut cost = 0.5 * r.norm_squared();
    let mut evaluations = 1;
    if !cost.is_finite() {
        return Err(FitError::NonFinite);
    }

    let n = p.len();
    let mut lambda = config.initial_damping;

    loop {
        if cost == 0.0 {
            return Ok(p.as_slice().to_vec());
        }
        if evaluations >= budget {
            return Err(FitError::EvaluationBudgetExhausted(budget));
        }

        let jac = jacobian(xs, p.as_slice());
        evaluations += 1;
        let jtj = jac.transpose() * &jac;
        let mut gradient = jac.transpose() * &r;
        if !gradient.iter().all(|g| g.is_finite()) {
            return Err(FitError::NonFinite);
        }

        let frozen = active_constraints(&p, &gradient, bounds);
        for &i in &frozen {
            gradient[i] = 0.0;
        }
        if gradient.amax() == 0.0 {
            return Ok(p.as_slice().to_vec());
        }

        loop {
            let mut a = jtj.clone();
            for i in 0..n {
                a[(i, i)] += lambda * jtj[(i, i)].max(DIAG_FLOOR);
            }
            freeze(&mut a, &frozen);

            let step = match a.cholesky() {
                Some(chol) => chol.solve(&gradient),
                None => {
                    lambda *= 10.0;
                    if lambda > MAX_DAMPING {
                        return Err(FitError::SingularSystem);
                    }
                    continue;
                }
            };

            let mut trial = &p + &step;
            if let Some(b) = bounds {
                b.project(&mut trial);
            }

            let (trial_r, trial_cost) = if trial.iter().all(|v| v.is_finite()) {
                let tr = residual(&trial);
                evaluations += 1;
                let tc = 0.5 * tr.norm_squared();
                (Some(tr), tc)
            } else {
                (None, f64::INFINITY)
            };

            match trial_r {
                Some(tr) if trial_cost.is_finite() && trial_cost < cost => {
                    let step_norm = (&trial - &p).norm();
                    let reduction = cost - trial_cost;
                    let converged = reduction <= config.ftol * cost
                        || step_norm <= config.xtol * (config.xtol + p.norm());

                    p = trial;
                    r = tr;
                    cost = trial_cost;
                    lambda = (lambda / 10.0).max(MIN_DAMPING);

                    if converged {
                        return Ok(p.as_slice().to_vec());
                    }
                    break;
                }
                _ => {
                    lambda *= 10.0;
                    // 无法再下降，视为收敛
                    if lambda > MAX_DAMPING {
                        return Ok(p.as_slice().to_vec());
                    }
                    if evaluations >= budget {
                        return Err(FitError::EvaluationBudgetExhausted(budget));
                    }
                }
            }
        }
    }
}

/// 位于边界且下降方向指向边界外的参数
fn active_constraints(p: &DVector<f64>, gradient: &DVector<f64>, bounds: Option<&Bounds>) -> Vec<usize> {
    let Some(b) = bounds else {
        return Vec::new();
    };
    (0..p.len())
        .filter(|&i| {
            (p[i] <= b.lower[i] && gradient[i] < 0.0) || (p[i] >= b.upper[i] && gradient[i] > 0.0)
        })
        .collect()
}

fn freeze(a: &mut DMatrix<f64>, frozen: &[usize]) {
    let n = a.nrows();
    for &i in frozen {
        for j in 0..n {
            a[(i, j)] = 0.0;
            a[(j, i)] = 0.0;
        }
        a[(i, i)] = 1.0;
    }
}
