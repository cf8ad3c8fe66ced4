//! # 命令执行模块
//!
//! 实现各子命令的业务逻辑。
//!
//! ## 依赖关系
//! - 被 `main.rs` 调用
//! - 使用 `cli/`, `batch/`, `utils/` 以及 xrdfit 库
//! - 子模块: fit, detect

pub mod detect;
pub mod fit;

use crate::cli::Commands;
use xrdfit::error::Result;

/// 执行命令
pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Fit(args) => fit::execute(args),
        Commands::Detect(args) => detect::execute(args),
    }
}
