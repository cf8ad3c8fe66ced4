//! # CLI 模块
//!
//! 使用 `clap` 定义命令行参数和子命令。
//!
//! ## 命令结构
//! - `fit`: 结晶度拟合（单文件或批量目录）
//! - `detect`: 仅预处理与峰检测
//!
//! ## 依赖关系
//! - 被 `main.rs` 使用
//! - 子模块: fit, detect

pub mod detect;
pub mod fit;

use clap::{Parser, Subcommand};

/// xrdfit - XRD 结晶度分析
#[derive(Parser)]
#[command(name = "xrdfit")]
#[command(author = "Changjiang Wu")]
#[command(version)]
#[command(about = "Crystallinity analysis of powder XRD spectra by Gaussian decomposition", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
pub enum Commands {
    /// Fit crystalline and amorphous components and report crystallinity
    Fit(fit::FitArgs),

    /// Preprocess a spectrum and list candidate peaks
    Detect(detect::DetectArgs),
}
