//! # 拟合结果数据模型
//!
//! 定义高斯分量、单次拟合结果以及构建搜索最终选出的模型。
//!
//! `FitResult` 由组件拟合器每次调用全新构造，构造后不再修改；
//! 构建搜索只比较和丢弃结果，从不编辑。
//!
//! ## 依赖关系
//! - 被 `xrd/fitter.rs` 构造
//! - 被 `xrd/search.rs`, `xrd/report.rs`, `xrd/export.rs`, `xrd/plot.rs` 读取

use serde::{Deserialize, Serialize};
use std::fmt;

/// 分量类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentKind {
    Crystalline,
    Amorphous,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Crystalline => write!(f, "crystalline"),
            ComponentKind::Amorphous => write!(f, "amorphous"),
        }
    }
}

/// 拟合得到的单个高斯分量 A·exp(−(x−c)²/2σ²)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianComponent {
    pub kind: ComponentKind,
    /// 峰高（归一化强度）
    pub amplitude: f64,
    /// 峰位 2θ（度）
    pub center: f64,
    /// 宽度参数 σ（度）
    pub sigma: f64,
    /// 高宽比 amplitude / sigma
    pub hw_ratio: f64,
    /// 梯形积分面积
    pub area: f64,
}

/// 产生优化参数的求解策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStrategy {
    /// 初始猜测直接有界拟合
    Bounded,
    /// 初始猜测夹入边界后有界拟合
    ClampedBounded,
    /// 无界 Levenberg–Marquardt
    Unbounded,
    /// 1–2 个分量的最小模型
    Minimal,
    /// 全部失败，沿用初始猜测
    InitialGuess,
}

impl fmt::Display for FitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitStrategy::Bounded => write!(f, "bounded"),
            FitStrategy::ClampedBounded => write!(f, "clamped-bounded"),
            FitStrategy::Unbounded => write!(f, "unbounded"),
            FitStrategy::Minimal => write!(f, "minimal"),
            FitStrategy::InitialGuess => write!(f, "initial-guess"),
        }
    }
}

/// 单次组件拟合的完整结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// 本次请求的结晶峰位
    pub requested_positions: Vec<f64>,
    /// 结晶分量
    pub crystalline: Vec<GaussianComponent>,
    /// 非晶分量
    pub amorphous: Vec<GaussianComponent>,
    /// 结晶分量之和
    pub crystalline_fit: Vec<f64>,
    /// 非晶分量之和
    pub amorphous_fit: Vec<f64>,
    /// 总拟合曲线
    pub total_fit: Vec<f64>,
    /// 残差 data − total_fit
    pub residuals: Vec<f64>,
    /// 结晶度（%）
    pub crystallinity: f64,
    pub r_squared: f64,
    pub rmse: f64,
    /// 优化后的扁平参数 [A, c, σ, A, c, σ, ...]
    pub parameters: Vec<f64>,
    /// 产生参数的策略
    pub strategy: FitStrategy,
}

impl FitResult {
    /// 是否含有结晶贡献
    pub fn has_crystallinity(&self) -> bool {
        self.crystallinity > 0.0
    }

    /// 所有保留的分量（先结晶后非晶）
    pub fn components(&self) -> impl Iterator<Item = &GaussianComponent> {
        self.crystalline.iter().chain(self.amorphous.iter())
    }

    pub fn crystalline_area(&self) -> f64 {
        self.crystalline.iter().map(|c| c.area).sum()
    }

    pub fn amorphous_area(&self) -> f64 {
        self.amorphous.iter().map(|c| c.area).sum()
    }
}

/// 构建搜索的模型来源阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelStage {
    AmorphousOnly,
    IndividualPeak,
    BestCombination,
    Combined,
    /// 没有任何阶段产出可比较的模型时的兜底
    AmorphousDefault,
}

impl fmt::Display for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelStage::AmorphousOnly => write!(f, "amorphous-only"),
            ModelStage::IndividualPeak => write!(f, "individual-peak"),
            ModelStage::BestCombination => write!(f, "best-combination"),
            ModelStage::Combined => write!(f, "combined"),
            ModelStage::AmorphousDefault => write!(f, "amorphous-default"),
        }
    }
}

/// 一个带来源标注的模型（画廊条目或最终选择）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedModel {
    pub stage: ModelStage,
    /// 展示名称，例如 "Combined (2 Peaks)"
    pub name: String,
    /// 使用的结晶峰位
    pub crystalline_positions: Vec<f64>,
    pub fit: FitResult,
}
