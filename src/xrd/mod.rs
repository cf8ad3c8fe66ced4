//! # XRD 拟合模块
//!
//! 把一条粉末 XRD 谱图分解为结晶峰与非晶包，并给出结晶度。
//!
//! ## 子模块
//! - `config`: 流水线配置与预设
//! - `numeric`: 统计与积分工具
//! - `preprocess`: 归一化、平滑、基线与信噪比
//! - `peaks`: 候选峰检测
//! - `gaussian`: 多高斯模型与雅可比
//! - `solver`: 带边界的 Levenberg–Marquardt
//! - `fitter`: 组件拟合与回退策略
//! - `quality`: 局部峰质量评估
//! - `search`: 构建式模型搜索
//! - `report`: 结果汇总与流程入口
//! - `plot`: 图表生成
//! - `export`: 数据导出
//!
//! ## 依赖关系
//! - 被 `commands/fit.rs` 和 `commands/detect.rs` 使用
//! - 使用 `models/spectrum.rs` 和 `models/fit.rs`

pub mod config;
pub mod export;
pub mod fitter;
pub mod gaussian;
pub mod numeric;
pub mod peaks;
pub mod plot;
pub mod preprocess;
pub mod quality;
pub mod report;
pub mod search;
pub mod solver;

pub use config::{ClassificationRule, FitConfig, PipelineVariant};
pub use fitter::{fit_components, FitRequest, PeakRegistry};
pub use peaks::{detect_peaks, PeakDetection};
pub use preprocess::{preprocess, PreprocessedSpectrum};
pub use report::{analyze, fit_spectrum, AnalysisReport};
pub use search::{run_search, SearchContext, SearchOutcome};
