//! # 解析器模块
//!
//! 提供 XRD 谱图文本文件的解析器。
//!
//! ## 依赖关系
//! - 被 `commands/` 模块使用
//! - 使用 `models/` 数据模型
//! - 子模块: spectrum

pub mod spectrum;

pub use spectrum::{parse_spectrum_content, parse_spectrum_file};
