//! # 数值辅助函数
//!
//! 均值、标准差、梯形积分、百分位数、相关系数和拟合优度。
//!
//! ## 依赖关系
//! - 被 `xrd/` 各阶段使用
//! - 无外部模块依赖

/// 算术平均；空切片返回 0
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// 总体标准差（ddof = 0）
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// 梯形积分 ∫y dx
pub fn trapezoid(y: &[f64], x: &[f64]) -> f64 {
    y.windows(2)
        .zip(x.windows(2))
        .map(|(yw, xw)| 0.5 * (yw[0] + yw[1]) * (xw[1] - xw[0]))
        .sum()
}

/// 线性插值百分位数（与 numpy 默认方法一致），q ∈ [0, 100]
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Pearson 相关系数；任一序列方差为 0 时返回 None
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let ma = mean(a);
    let mb = mean(b);
    let (mut cov, mut va, mut vb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma) * (x - ma);
        vb += (y - mb) * (y - mb);
    }
    let denom = (va * vb).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return None;
    }
    let r = cov / denom;
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// 决定系数 1 − SS_res/SS_tot；SS_tot = 0 时返回 0
pub fn r_squared(data: &[f64], fit: &[f64]) -> f64 {
    let m = mean(data);
    let ss_tot: f64 = data.iter().map(|d| (d - m) * (d - m)).sum();
    if ss_tot <= 0.0 {
        return 0.0;
    }
    let ss_res: f64 = data.iter().zip(fit).map(|(d, f)| (d - f) * (d - f)).sum();
    1.0 - ss_res / ss_tot
}

/// 均方根误差
pub fn rmse(data: &[f64], fit: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let ss: f64 = data.iter().zip(fit).map(|(d, f)| (d - f) * (d - f)).sum();
    (ss / data.len() as f64).sqrt()
}
