//! # 局部峰质量评估
//!
//! 在峰位附近的窗口内比较"含该峰"与"不含该峰"两个拟合，
//! 得到一个综合质量分数：
//!
//! ```text
//! quality = 0.4·SNR/10 + 0.3·(corr+1)/2 + 0.2·ΔR²_local + 0.1·ΔRMSE/0.05
//! ```
//!
//! ## 依赖关系
//! - 使用 `xrd/numeric.rs`
//! - 被 `xrd/search.rs` 的单峰测试阶段使用

use super::numeric::{mean, pearson, percentile, std_dev};

use serde::{Deserialize, Serialize};

/// 窗口内少于该点数时所有指标为 0
pub const MIN_WINDOW_POINTS: usize = 5;

/// 单个峰的局部指标
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakMetrics {
    /// 含峰拟合的局部 R²
    pub local_r2_with: f64,
    /// 不含峰拟合的局部 R²
    pub local_r2_without: f64,
    pub local_r2_improvement: f64,
    /// RMSE(不含) − RMSE(含)
    pub rmse_improvement: f64,
    /// Σ|残差|(不含) − Σ|残差|(含)
    pub residual_sum_improvement: f64,
    /// 局部最大值减去第 10 百分位数
    pub peak_intensity: f64,
    pub signal_to_noise: f64,
    pub correlation: f64,
    pub quality_score: f64,
}

/// 计算 [pos − w/2, pos + w/2] 窗口内的局部指标
pub fn peak_metrics(
    position: f64,
    angles: &[f64],
    data: &[f64],
    fit_with: &[f64],
    fit_without: &[f64],
    window_width: f64,
) -> PeakMetrics {
    let lo = position - window_width / 2.0;
    let hi = position + window_width / 2.0;
    let window: Vec<usize> = angles
        .iter()
        .enumerate()
        .filter(|(_, a)| **a >= lo && **a <= hi)
        .map(|(i, _)| i)
        .collect();

    if window.len() < MIN_WINDOW_POINTS {
        return PeakMetrics::default();
    }

    let pick = |src: &[f64]| -> Vec<f64> { window.iter().map(|&i| src[i]).collect() };
    let local_data = pick(data);
    let local_with = pick(fit_with);
    let local_without = pick(fit_without);

    let residual_with: Vec<f64> = local_data.iter().zip(&local_with).map(|(d, f)| d - f).collect();
    let residual_without: Vec<f64> = local_data
        .iter()
        .zip(&local_without)
        .map(|(d, f)| d - f)
        .collect();

    let ss_with: f64 = residual_with.iter().map(|r| r * r).sum();
    let ss_without: f64 = residual_without.iter().map(|r| r * r).sum();
    let m = mean(&local_data);
    let ss_tot: f64 = local_data.iter().map(|d| (d - m) * (d - m)).sum();
    let (local_r2_with, local_r2_without) = if ss_tot == 0.0 {
        (0.0, 0.0)
    } else {
        (1.0 - ss_with / ss_tot, 1.0 - ss_without / ss_tot)
    };

    let n = local_data.len() as f64;
    let rmse_improvement = (ss_without / n).sqrt() - (ss_with / n).sqrt();
    let residual_sum_improvement = residual_without.iter().map(|r| r.abs()).sum::<f64>()
        - residual_with.iter().map(|r| r.abs()).sum::<f64>();

    let local_max = local_data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let peak_intensity = local_max - percentile(&local_data, 10.0);

    let noise = std_dev(&residual_with);
    let signal_to_noise = if noise > 0.0 { peak_intensity / noise } else { 0.0 };

    let contribution: Vec<f64> = local_with
        .iter()
        .zip(&local_without)
        .map(|(w, wo)| w - wo)
        .collect();
    let correlation = pearson(&contribution, &residual_without).unwrap_or(0.0);

    let local_r2_improvement = local_r2_with - local_r2_without;
    let quality_score = 0.4 * signal_to_noise / 10.0
        + 0.3 * (correlation + 1.0) / 2.0
        + 0.2 * local_r2_improvement
        + 0.1 * rmse_improvement / 0.05;

    PeakMetrics {
        local_r2_with,
        local_r2_without,
        local_r2_improvement,
        rmse_improvement,
        residual_sum_improvement,
        peak_intensity,
        signal_to_noise,
        correlation,
        quality_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xrd::gaussian::multi_gaussian;
    use approx::assert_relative_eq;

    fn axis() -> Vec<f64> {
        (0..501).map(|i| 20.0 + i as f64 * 0.02).collect()
    }

    #[test]
    fn test_small_window_returns_zeros() {
        let angles = axis();
        let data = vec![1.0; angles.len()];
        let metrics = peak_metrics(100.0, &angles, &data, &data, &data, 4.0);
        assert_eq!(metrics, PeakMetrics::default());
    }

    #[test]
    fn test_real_peak_scores_high() {
        let angles = axis();
        let background = multi_gaussian(&angles, &[0.2, 25.0, 6.0]);
        let data = multi_gaussian(&angles, &[0.2, 25.0, 6.0, 1.0, 25.0, 0.3]);
        // 含峰拟合带一点误差，避免局部残差为零
        let fit_with = multi_gaussian(&angles, &[0.2, 25.0, 6.0, 0.97, 25.01, 0.31]);

        let metrics = peak_metrics(25.0, &angles, &data, &fit_with, &background, 4.0);
        assert!(metrics.local_r2_with > 0.99);
        assert!(metrics.local_r2_improvement > 0.5);
        assert!(metrics.rmse_improvement > 0.0);
        assert!(metrics.residual_sum_improvement > 0.0);
        assert!(metrics.correlation > 0.9);
        assert!(metrics.quality_score > 0.5);
    }

    #[test]
    fn test_identical_fits_have_zero_correlation() {
        let angles = axis();
        let data = multi_gaussian(&angles, &[1.0, 25.0, 0.3]);
        let fit = multi_gaussian(&angles, &[0.2, 25.0, 6.0]);
        let metrics = peak_metrics(25.0, &angles, &data, &fit, &fit, 2.0);
        assert_eq!(metrics.correlation, 0.0);
        assert_relative_eq!(metrics.local_r2_improvement, 0.0);
        assert_relative_eq!(metrics.rmse_improvement, 0.0);
        // 仅剩 0.3·(0+1)/2 与 SNR 项
        let expected = 0.4 * metrics.signal_to_noise / 10.0 + 0.15;
        assert_relative_eq!(metrics.quality_score, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_flat_window_local_r2_is_zero() {
        let angles = axis();
        let data = vec![0.5; angles.len()];
        let fit = vec![0.4; angles.len()];
        let metrics = peak_metrics(25.0, &angles, &data, &fit, &fit, 4.0);
        assert_eq!(metrics.local_r2_with, 0.0);
        assert_eq!(metrics.local_r2_without, 0.0);
        assert_eq!(metrics.peak_intensity, 0.0);
    }
}
