//! # xrdfit
//!
//! 粉末 XRD 谱图的结晶度分析：把谱图分解为窄的结晶高斯峰和宽的非晶高斯包，
//! 由面积比给出结晶度。
//!
//! ```text
//! 原始谱图 → 预处理 → 峰检测 → 构建式模型搜索 → AnalysisReport
//! ```
//!
//! ## 依赖关系
//! - `models/`  (谱图与拟合结果数据模型)
//! - `parsers/` (谱图文件解析)
//! - `xrd/`     (预处理、拟合、搜索、导出与绘图)
//! - `error.rs` (错误处理)

pub mod error;
pub mod models;
pub mod parsers;
pub mod xrd;

pub use error::{Result, XrdError};
pub use xrd::{fit_spectrum, AnalysisReport, FitConfig};
