//! # 谱图预处理
//!
//! 归一化、Savitzky–Golay 平滑、平基线扣除与信噪比估计。
//!
//! 每一步都是纯函数：输入谱图不被修改，所有中间数组都保留在
//! `PreprocessedSpectrum` 中供诊断输出使用。
//!
//! ## 依赖关系
//! - 使用 `models/spectrum.rs` 中的 `Spectrum`
//! - 使用 `xrd/config.rs` 中的 `PreprocessConfig`
//! - 使用 nalgebra 求解平滑多项式的最小二乘投影

use super::config::PreprocessConfig;
use super::numeric::{mean, std_dev};
use crate::error::{Result, XrdError};
use crate::models::Spectrum;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// 预处理输出
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessedSpectrum {
    /// 按全局最大值归一化的原始强度
    pub normalized: Vec<f64>,
    /// 平滑后的归一化强度
    pub smoothed: Vec<f64>,
    /// 基线水平（平滑曲线最小值）
    pub baseline_level: f64,
    /// 基线校正并重新归一化后的强度
    pub corrected: Vec<f64>,
    pub signal_to_noise: f64,
    /// 峰检测实际使用的突出度阈值
    pub prominence: f64,
    /// 校正后最大峰高低于阈值（仅作提示）
    pub is_mostly_amorphous: bool,
}

impl PreprocessedSpectrum {
    /// 是否因低信噪比提高了突出度阈值
    pub fn low_snr(&self, config: &PreprocessConfig) -> bool {
        self.signal_to_noise < config.low_snr_threshold
    }
}

/// 执行完整预处理
pub fn preprocess(
    spectrum: &Spectrum,
    min_prominence: f64,
    config: &PreprocessConfig,
) -> Result<PreprocessedSpectrum> {
    let normalized = normalize(spectrum.intensities())?;
    let smoothed = savgol_filter(&normalized, config.smooth_window, config.smooth_order);

    let baseline_level = smoothed.iter().copied().fold(f64::INFINITY, f64::min);
    let mut corrected: Vec<f64> = smoothed
        .iter()
        .map(|v| (v - baseline_level).max(0.0))
        .collect();

    let peak = max_value(&corrected);
    if peak > 0.0 {
        corrected.iter_mut().for_each(|v| *v /= peak);
    }

    let signal_to_noise = estimate_snr(&corrected, config);
    let prominence = adjusted_prominence(signal_to_noise, min_prominence, config);
    let is_mostly_amorphous = max_value(&corrected) < config.mostly_amorphous_height;

    Ok(PreprocessedSpectrum {
        normalized,
        smoothed,
        baseline_level,
        corrected,
        signal_to_noise,
        prominence,
        is_mostly_amorphous,
    })
}

/// 按全局最大值归一化
pub fn normalize(intensities: &[f64]) -> Result<Vec<f64>> {
    let max = max_value(intensities);
    if !(max.is_finite() && max > 0.0) {
        return Err(XrdError::DegenerateInput(format!(
            "cannot normalize: maximum intensity is {}",
            max
        )));
    }
    Ok(intensities.iter().map(|v| v / max).collect())
}

/// 低信噪比时按比例提高突出度阈值（单向调整，不重试）
pub fn adjusted_prominence(snr: f64, min_prominence: f64, config: &PreprocessConfig) -> f64 {
    if snr < config.low_snr_threshold {
        min_prominence * config.low_snr_prominence_scale
    } else {
        min_prominence
    }
}

/// SNR = mean(corrected) / std(corrected − 二次平滑)
fn estimate_snr(corrected: &[f64], config: &PreprocessConfig) -> f64 {
    let resmoothed = savgol_filter(corrected, config.noise_window, config.noise_order);
    let residual: Vec<f64> = corrected
        .iter()
        .zip(&resmoothed)
        .map(|(a, b)| a - b)
        .collect();
    let noise = std_dev(&residual);
    if noise > 0.0 {
        mean(corrected) / noise
    } else {
        0.0
    }
}

fn max_value(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Savitzky–Golay 平滑（interp 边界模式）
///
/// 内部点使用卷积系数；首尾各半个窗口由拟合到首/尾窗口的多项式求值。
/// 信号短于窗口时，窗口缩小为不超过信号长度且大于阶数的最大奇数；
/// 若不存在这样的窗口则原样返回。
pub fn savgol_filter(y: &[f64], window: usize, order: usize) -> Vec<f64> {
    let n = y.len();
    let mut window = window.min(n);
    if window % 2 == 0 {
        window = window.saturating_sub(1);
    }
    if window <= order || window < 3 {
        return y.to_vec();
    }

    let projection = match savgol_projection(window, order) {
        Some(p) => p,
        None => return y.to_vec(),
    };
    let half = window / 2;

    let mut out = vec![0.0; n];

    // 中心系数即投影矩阵第 0 行
    for i in half..n - half {
        out[i] = (0..window)
            .map(|j| projection[(0, j)] * y[i - half + j])
            .sum();
    }

    let left = fit_window(&projection, &y[..window]);
    for (i, slot) in out.iter_mut().take(half).enumerate() {
        *slot = eval_poly(&left, i as f64 - half as f64);
    }

    let right = fit_window(&projection, &y[n - window..]);
    for k in 0..half {
        out[n - half + k] = eval_poly(&right, (k + 1) as f64);
    }

    out
}

/// 窗口局部坐标 x ∈ [−half, half] 上的最小二乘投影 (AᵀA)⁻¹Aᵀ
fn savgol_projection(window: usize, order: usize) -> Option<DMatrix<f64>> {
    let half = (window / 2) as f64;
    let a = DMatrix::from_fn(window, order + 1, |i, j| (i as f64 - half).powi(j as i32));
    let ata = a.transpose() * &a;
    let inv = ata.try_inverse()?;
    Some(inv * a.transpose())
}

fn fit_window(projection: &DMatrix<f64>, segment: &[f64]) -> Vec<f64> {
    (0..projection.nrows())
        .map(|r| {
            segment
                .iter()
                .enumerate()
                .map(|(j, v)| projection[(r, j)] * v)
                .sum()
        })
        .collect()
}

fn eval_poly(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}
