//! # xrdfit - XRD 结晶度分析工具
//!
//! 把粉末 XRD 谱图分解为结晶峰与非晶包，计算结晶度。
//!
//! ## 子命令
//! - `fit`    - 结晶度拟合（单文件或批量目录）
//! - `detect` - 预处理与候选峰检测
//!
//! ## 依赖关系
//! ```text
//! main.rs
//!   ├── cli/        (命令行参数定义)
//!   ├── commands/   (命令执行逻辑)
//!   │     └── xrdfit 库 (parsers/, xrd/, models/)
//!   ├── batch/      (批量处理)
//!   └── utils/      (工具函数)
//! ```

mod batch;
mod cli;
mod commands;
mod utils;

use clap::Parser;
use cli::Cli;

fn main() {
    // Initialize colored output for Windows compatibility
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();

    if let Err(e) = commands::run(cli.command) {
        utils::output::print_error(&format!("{}", e));
        std::process::exit(1);
    }
}
