//! # 数据模型模块
//!
//! 定义谱图、候选峰和拟合结果数据模型。
//!
//! ## 依赖关系
//! - 被 `parsers/`, `xrd/` 和 `commands/` 使用
//! - 子模块: spectrum, fit

pub mod fit;
pub mod spectrum;

pub use fit::{ComponentKind, FitResult, FitStrategy, GaussianComponent, ModelStage, SelectedModel};
pub use spectrum::{PeakCandidate, Spectrum};
