//! # 拟合流程配置
//!
//! 单一流程由 `FitConfig` 参数化。"fast" 与 "detailed" 两个预设只在少数
//! 调优常数上不同：
//!
//! | 常数 | fast | detailed |
//! |------|------|----------|
//! | 质量分数阈值 | 0.3 | 0.1 |
//! | 高质量豁免阈值 | 0.5 | 0.1 |
//! | 局部评估窗口 | 4° | 2° |
//!
//! ## 依赖关系
//! - 被 `xrd/` 各阶段读取
//! - 由 `commands/fit.rs` 从命令行参数构造

use crate::error::{Result, XrdError};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 流程预设
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PipelineVariant {
    #[default]
    Fast,
    Detailed,
}

/// 结晶分量判定规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClassificationRule {
    /// 必须匹配已知结晶峰位，且高宽比和宽度同时满足
    #[default]
    Strict,
    /// 宽度 < 1° 且（匹配已知峰位 或 高宽比超阈值）
    Legacy,
}

/// 预处理常数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// 平滑窗口（点数，奇数）
    pub smooth_window: usize,
    pub smooth_order: usize,
    /// 噪声估计用的二次平滑窗口
    pub noise_window: usize,
    pub noise_order: usize,
    /// 低于此 SNR 时提高突出度阈值
    pub low_snr_threshold: f64,
    pub low_snr_prominence_scale: f64,
    /// 校正后最大峰高低于此值时标记为"主要为非晶"
    pub mostly_amorphous_height: f64,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            smooth_window: 15,
            smooth_order: 3,
            noise_window: 21,
            noise_order: 3,
            low_snr_threshold: 5.0,
            low_snr_prominence_scale: 1.5,
            mostly_amorphous_height: 0.1,
        }
    }
}

/// 峰检测常数（宽度与间距均以采样点计）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub major_prominence_scale: f64,
    pub major_min_width: f64,
    pub major_distance: usize,
    pub min_width: f64,
    pub distance: usize,
    pub width_pass_distance: usize,
    /// 宽度测量的相对高度（0.5 = 半高宽）
    pub rel_height: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            major_prominence_scale: 5.0,
            major_min_width: 20.0,
            major_distance: 50,
            min_width: 10.0,
            distance: 50,
            width_pass_distance: 20,
            rel_height: 0.5,
        }
    }
}

/// 非线性最小二乘求解器常数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// 有界拟合的函数评估上限
    pub max_evaluations: usize,
    pub unbounded_max_evaluations: usize,
    pub minimal_max_evaluations: usize,
    /// 代价相对下降收敛阈值
    pub ftol: f64,
    /// 参数相对步长收敛阈值
    pub xtol: f64,
    pub initial_damping: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_evaluations: 20_000,
            unbounded_max_evaluations: 25_000,
            minimal_max_evaluations: 15_000,
            ftol: 1e-10,
            xtol: 1e-10,
            initial_damping: 1e-3,
        }
    }
}

/// 完整流程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    pub variant: PipelineVariant,
    /// 区分结晶/非晶分量的高宽比阈值
    pub height_width_threshold: f64,
    /// 峰检测基础突出度
    pub min_prominence: f64,
    /// 严格成功的 R² 门槛
    pub min_r_squared: f64,
    /// 非晶拟合"可接受"的 R² 门槛
    pub amorphous_r_squared: f64,
    /// 组合测试的最大峰数
    pub max_combination_size: usize,
    /// 峰位匹配容差（度）
    pub position_tolerance: f64,
    /// 单峰成功所需的质量分数
    pub quality_threshold: f64,
    /// 全局 R² 不达标时仍可接受的质量分数
    pub quality_override: f64,
    /// 局部质量评估窗口全宽（度）
    pub window_width: f64,
    pub classification: ClassificationRule,
    /// 组合拟合是否在 rayon 线程池上并行
    pub parallel: bool,
    /// 组合搜索的墙钟时间上限
    pub combination_time_limit: Option<Duration>,
    /// 跳过含有单峰质量分数低于此值的峰的组合
    pub prune_quality_floor: Option<f64>,
    pub preprocess: PreprocessConfig,
    pub detection: DetectionConfig,
    pub solver: SolverConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self::fast()
    }
}

impl FitConfig {
    /// "fast" 预设
    pub fn fast() -> Self {
        Self {
            variant: PipelineVariant::Fast,
            height_width_threshold: 0.3,
            min_prominence: 0.008,
            min_r_squared: 0.998,
            amorphous_r_squared: 0.80,
            max_combination_size: 4,
            position_tolerance: 1.0,
            quality_threshold: 0.3,
            quality_override: 0.5,
            window_width: 4.0,
            classification: ClassificationRule::Strict,
            parallel: true,
            combination_time_limit: None,
            prune_quality_floor: None,
            preprocess: PreprocessConfig::default(),
            detection: DetectionConfig::default(),
            solver: SolverConfig::default(),
        }
    }

    /// "detailed" 预设：更宽松的质量门槛和更窄的局部窗口
    pub fn detailed() -> Self {
        Self {
            variant: PipelineVariant::Detailed,
            quality_threshold: 0.1,
            quality_override: 0.1,
            window_width: 2.0,
            ..Self::fast()
        }
    }

    /// 按预设创建
    pub fn for_variant(variant: PipelineVariant) -> Self {
        match variant {
            PipelineVariant::Fast => Self::fast(),
            PipelineVariant::Detailed => Self::detailed(),
        }
    }

    /// 校验参数取值
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("height_width_threshold", self.height_width_threshold),
            ("min_prominence", self.min_prominence),
            ("position_tolerance", self.position_tolerance),
            ("window_width", self.window_width),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(XrdError::InvalidArgument(format!(
                    "{} must be positive (got {})",
                    name, value
                )));
            }
        }

        for (name, value) in [
            ("min_r_squared", self.min_r_squared),
            ("amorphous_r_squared", self.amorphous_r_squared),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(XrdError::InvalidArgument(format!(
                    "{} must lie in (0, 1] (got {})",
                    name, value
                )));
            }
        }

        if self.max_combination_size < 1 {
            return Err(XrdError::InvalidArgument(
                "max_combination_size must be at least 1".to_string(),
            ));
        }

        if self.preprocess.smooth_window % 2 == 0 || self.preprocess.noise_window % 2 == 0 {
            return Err(XrdError::InvalidArgument(
                "smoothing windows must have odd length".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_differ_only_in_tuned_constants() {
        let fast = FitConfig::fast();
        let detailed = FitConfig::detailed();
        assert_eq!(fast.quality_threshold, 0.3);
        assert_eq!(detailed.quality_threshold, 0.1);
        assert_eq!(fast.window_width, 4.0);
        assert_eq!(detailed.window_width, 2.0);
        assert_eq!(fast.min_r_squared, detailed.min_r_squared);
        assert_eq!(fast.max_combination_size, detailed.max_combination_size);
    }

    #[test]
    fn test_default_is_fast() {
        let config = FitConfig::default();
        assert_eq!(config.variant, PipelineVariant::Fast);
        assert_eq!(config.height_width_threshold, 0.3);
        assert_eq!(config.min_prominence, 0.008);
        assert_eq!(config.amorphous_r_squared, 0.80);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = FitConfig::default();
        config.min_r_squared = 1.5;
        assert!(config.validate().is_err());

        let mut config = FitConfig::default();
        config.position_tolerance = 0.0;
        assert!(config.validate().is_err());

        let mut config = FitConfig::default();
        config.max_combination_size = 0;
        assert!(config.validate().is_err());
    }
}
