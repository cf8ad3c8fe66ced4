//! # detect 子命令 CLI 定义
//!
//! 只运行预处理和峰检测，用于在拟合前挑选已知峰位。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/detect.rs`

use clap::Args;
use std::path::PathBuf;

/// detect 子命令参数
#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Input spectrum file
    pub input: PathBuf,

    /// Write the detected peaks to this CSV file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Base peak-detection prominence (normalized intensity)
    #[arg(long, default_value_t = 0.008)]
    pub min_prominence: f64,

    /// Only list the major peaks
    #[arg(long, default_value_t = false)]
    pub major_only: bool,
}
