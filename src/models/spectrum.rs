//! # XRD 谱图数据模型
//!
//! 定义不可变的 (2θ, 强度) 谱图以及峰检测产生的候选峰。
//!
//! ## 依赖关系
//! - 被 `parsers/spectrum.rs` 构造
//! - 被 `xrd/` 所有阶段只读使用

use crate::error::{Result, XrdError};

use serde::{Deserialize, Serialize};

/// XRD 谱图：2θ 严格递增的 (角度, 强度) 序列
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spectrum {
    /// 样品名称（通常来自文件名）
    name: String,
    /// 衍射角 2θ（度）
    angles: Vec<f64>,
    /// 原始强度（任意单位）
    intensities: Vec<f64>,
}

impl Spectrum {
    /// 创建并校验谱图
    pub fn new(angles: Vec<f64>, intensities: Vec<f64>) -> Result<Self> {
        if angles.len() != intensities.len() {
            return Err(XrdError::InvalidSpectrum(format!(
                "angle/intensity length mismatch ({} vs {})",
                angles.len(),
                intensities.len()
            )));
        }
        if angles.is_empty() {
            return Err(XrdError::InvalidSpectrum("spectrum is empty".to_string()));
        }
        if let Some(i) = angles
            .iter()
            .zip(&intensities)
            .position(|(a, y)| !a.is_finite() || !y.is_finite())
        {
            return Err(XrdError::InvalidSpectrum(format!(
                "non-finite value at row {}",
                i + 1
            )));
        }
        if let Some(i) = angles.windows(2).position(|w| w[1] <= w[0]) {
            return Err(XrdError::InvalidSpectrum(format!(
                "2θ must be strictly increasing (row {}: {} -> {})",
                i + 2,
                angles[i],
                angles[i + 1]
            )));
        }

        Ok(Self {
            name: "spectrum".to_string(),
            angles,
            intensities,
        })
    }

    /// 设置样品名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    pub fn intensities(&self) -> &[f64] {
        &self.intensities
    }

    pub fn len(&self) -> usize {
        self.angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }

    /// 2θ 范围 (min, max)
    pub fn range(&self) -> (f64, f64) {
        (self.angles[0], self.angles[self.angles.len() - 1])
    }

    /// 平均采样步长（度）；单点谱图返回 0
    pub fn mean_step(&self) -> f64 {
        if self.angles.len() < 2 {
            return 0.0;
        }
        let (lo, hi) = self.range();
        (hi - lo) / (self.angles.len() - 1) as f64
    }
}

/// 峰检测得到的候选峰
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakCandidate {
    /// 采样点下标
    pub index: usize,
    /// 峰位 2θ（度）
    pub position: f64,
    /// 峰高（基线校正后的归一化强度）
    pub height: f64,
    /// 半高宽（度）
    pub width: f64,
    /// 突出度
    pub prominence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spectrum_rejects_unsorted_angles() {
        let result = Spectrum::new(vec![10.0, 12.0, 11.0], vec![1.0, 2.0, 3.0]);
        assert!(matches!(result, Err(XrdError::InvalidSpectrum(_))));
    }

    #[test]
    fn test_spectrum_rejects_length_mismatch() {
        let result = Spectrum::new(vec![10.0, 11.0], vec![1.0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_spectrum_rejects_nan() {
        let result = Spectrum::new(vec![10.0, 11.0], vec![1.0, f64::NAN]);
        assert!(result.is_err());
    }

    #[test]
    fn test_mean_step() {
        let angles: Vec<f64> = (0..11).map(|i| 10.0 + i as f64 * 0.1).collect();
        let s = Spectrum::new(angles, vec![1.0; 11]).unwrap();
        assert!((s.mean_step() - 0.1).abs() < 1e-12);
    }
}
