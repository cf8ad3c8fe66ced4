//! # fit 子命令 CLI 定义
//!
//! 对单个谱图文件或整个目录进行结晶度拟合。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/fit.rs`
//! - 由 `FitArgs::fit_config` 映射为 `xrd::FitConfig`

use xrdfit::xrd::{ClassificationRule, FitConfig, PipelineVariant};

use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────
// 枚举参数
// ─────────────────────────────────────────────────────────────

/// 拟合结果输出格式
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// PNG image (detection + fit panels)
    Png,
    /// SVG vector image
    Svg,
    /// CSV data files (fitted spectrum + component table)
    Csv,
    /// JSON report with all arrays and diagnostics
    Json,
}

impl OutputFormat {
    /// 对应的文件扩展名
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Svg => "svg",
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
        }
    }

    /// 从文件扩展名推断输出格式
    pub fn from_path(path: &std::path::Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_lowercase())
            .as_deref()
        {
            Some("svg") => OutputFormat::Svg,
            Some("csv") => OutputFormat::Csv,
            Some("json") => OutputFormat::Json,
            _ => OutputFormat::Png,
        }
    }
}

/// 流程预设
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
pub enum VariantArg {
    /// Stricter quality gate, 4° local window
    #[default]
    Fast,
    /// Permissive quality gate, 2° local window
    Detailed,
}

impl From<VariantArg> for PipelineVariant {
    fn from(v: VariantArg) -> Self {
        match v {
            VariantArg::Fast => PipelineVariant::Fast,
            VariantArg::Detailed => PipelineVariant::Detailed,
        }
    }
}

/// 解析逗号分隔的峰位列表（如 "18.5,19.0"）
pub fn parse_positions(input: &str) -> Result<Vec<f64>, String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(format!(
                "Invalid peak position '{}'. Use comma-separated angles in degrees, e.g. 18.5,19.0",
                s
            )),
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────
// fit 子命令
// ─────────────────────────────────────────────────────────────

/// 单文件模式的默认输出文件
pub const DEFAULT_OUTPUT_FILE: &str = "xrd_fit.png";

/// 批量模式的默认输出目录
pub const DEFAULT_OUTPUT_DIR: &str = "xrd_fit";

/// fit 子命令参数
#[derive(Args, Debug)]
pub struct FitArgs {
    /// Input: spectrum file or directory containing spectrum files
    pub input: PathBuf,

    /// Output: file path (single mode, default xrd_fit.png) or directory (batch mode, default xrd_fit/)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format (auto-detected from extension if not specified)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Known crystalline peak positions in degrees 2θ (e.g., "18.5,19.0")
    #[arg(long, value_parser = parse_positions)]
    pub crystalline: Option<::std::vec::Vec<f64>>,

    /// Known amorphous halo positions in degrees 2θ (e.g., "20,30")
    #[arg(long, value_parser = parse_positions)]
    pub amorphous: Option<::std::vec::Vec<f64>>,

    /// Pipeline preset
    #[arg(long, value_enum, default_value = "fast")]
    pub variant: VariantArg,

    // ─────────────────────────────────────────────────────────────
    // 拟合参数（覆盖预设）
    // ─────────────────────────────────────────────────────────────
    /// Height-to-width ratio threshold separating crystalline from amorphous components
    #[arg(long)]
    pub height_width_threshold: Option<f64>,

    /// Base peak-detection prominence (normalized intensity)
    #[arg(long)]
    pub min_prominence: Option<f64>,

    /// Global R² required for a model to count as successful
    #[arg(long)]
    pub min_r_squared: Option<f64>,

    /// R² at which the amorphous-only model is considered acceptable
    #[arg(long)]
    pub amorphous_r_squared: Option<f64>,

    /// Largest number of peaks tested together
    #[arg(long)]
    pub max_combination_size: Option<usize>,

    /// Peak position matching tolerance in degrees
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Use the looser width/ratio classification rule
    #[arg(long, default_value_t = false)]
    pub legacy_classification: bool,

    /// Fit peak combinations sequentially
    #[arg(long, default_value_t = false)]
    pub sequential: bool,

    /// Wall-clock limit for the combination search, in seconds
    #[arg(long)]
    pub time_limit: Option<f64>,

    /// Skip combinations containing a peak whose quality score is below this value
    #[arg(long)]
    pub prune_quality: Option<f64>,

    // ─────────────────────────────────────────────────────────────
    // 图表参数
    // ─────────────────────────────────────────────────────────────
    /// Figure width in pixels (for PNG) or points (for SVG)
    #[arg(long, default_value_t = 1200)]
    pub width: u32,

    /// Figure height in pixels (for PNG) or points (for SVG)
    #[arg(long, default_value_t = 1000)]
    pub height: u32,

    /// Title for the plot (default: sample name)
    #[arg(long)]
    pub title: Option<String>,

    /// Print stage narration and per-peak metrics
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    // ─────────────────────────────────────────────────────────────
    // 批量处理参数
    // ─────────────────────────────────────────────────────────────
    /// Glob pattern for input files (batch mode, e.g., "*.xy,*.csv")
    #[arg(long, default_value = "*.csv,*.xy,*.txt,*.dat")]
    pub pattern: String,

    /// Number of parallel jobs (0 = auto, batch mode only)
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,

    /// Recurse into subdirectories (batch mode)
    #[arg(long, default_value_t = false)]
    pub recursive: bool,

    /// Overwrite existing output files
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,

    /// Write a one-row-per-file summary CSV (batch mode)
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

impl FitArgs {
    /// 由预设和覆盖参数构造流程配置（未校验）
    pub fn fit_config(&self) -> FitConfig {
        let mut config = FitConfig::for_variant(self.variant.into());

        if let Some(v) = self.height_width_threshold {
            config.height_width_threshold = v;
        }
        if let Some(v) = self.min_prominence {
            config.min_prominence = v;
        }
        if let Some(v) = self.min_r_squared {
            config.min_r_squared = v;
        }
        if let Some(v) = self.amorphous_r_squared {
            config.amorphous_r_squared = v;
        }
        if let Some(v) = self.max_combination_size {
            config.max_combination_size = v;
        }
        if let Some(v) = self.tolerance {
            config.position_tolerance = v;
        }
        if self.legacy_classification {
            config.classification = ClassificationRule::Legacy;
        }
        config.parallel = !self.sequential;
        config.combination_time_limit = self
            .time_limit
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64);
        config.prune_quality_floor = self.prune_quality;

        config
    }

    /// 单文件模式的输出路径
    pub fn output_file(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FILE))
    }

    /// 批量模式的输出目录
    pub fn output_dir(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }

    pub fn crystalline_positions(&self) -> &[f64] {
        self.crystalline.as_deref().unwrap_or(&[])
    }

    pub fn amorphous_positions(&self) -> &[f64] {
        self.amorphous.as_deref().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    fn parse(args: &[&str]) -> FitArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Fit(args) => args,
            _ => panic!("expected fit command"),
        }
    }

    #[test]
    fn test_parse_positions() {
        assert_eq!(parse_positions("18.5,19.0").unwrap(), vec![18.5, 19.0]);
        assert_eq!(parse_positions(" 20 , 30 ,").unwrap(), vec![20.0, 30.0]);
        assert!(parse_positions("").unwrap().is_empty());
        assert!(parse_positions("18.5,abc").is_err());
        assert!(parse_positions("inf").is_err());
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(OutputFormat::from_path("a.SVG".as_ref()), OutputFormat::Svg);
        assert_eq!(OutputFormat::from_path("a.json".as_ref()), OutputFormat::Json);
        assert_eq!(OutputFormat::from_path("a.csv".as_ref()), OutputFormat::Csv);
        assert_eq!(OutputFormat::from_path("a".as_ref()), OutputFormat::Png);
    }

    #[test]
    fn test_defaults_map_to_fast_preset() {
        let args = parse(&["xrdfit", "fit", "sample.xy"]);
        let config = args.fit_config();
        assert_eq!(config.variant, PipelineVariant::Fast);
        assert_eq!(config.classification, ClassificationRule::Strict);
        assert!(config.parallel);
        assert!(config.combination_time_limit.is_none());
        assert!(args.crystalline_positions().is_empty());
    }

    #[test]
    fn test_default_output_depends_on_mode() {
        let args = parse(&["xrdfit", "fit", "spectra"]);
        assert_eq!(args.output_file(), PathBuf::from("xrd_fit.png"));
        assert_eq!(args.output_dir(), PathBuf::from("xrd_fit"));

        let args = parse(&["xrdfit", "fit", "spectra", "-o", "results"]);
        assert_eq!(args.output_dir(), PathBuf::from("results"));
        assert_eq!(args.output_file(), PathBuf::from("results"));
    }

    #[test]
    fn test_flags_override_preset() {
        let args = parse(&[
            "xrdfit",
            "fit",
            "sample.xy",
            "--variant",
            "detailed",
            "--crystalline",
            "18.5,19.0",
            "--amorphous",
            "20,30",
            "--max-combination-size",
            "2",
            "--tolerance",
            "0.5",
            "--legacy-classification",
            "--sequential",
            "--time-limit",
            "1.5",
            "--prune-quality",
            "0.2",
        ]);
        let config = args.fit_config();
        assert_eq!(config.variant, PipelineVariant::Detailed);
        assert_eq!(config.window_width, 2.0);
        assert_eq!(config.max_combination_size, 2);
        assert_eq!(config.position_tolerance, 0.5);
        assert_eq!(config.classification, ClassificationRule::Legacy);
        assert!(!config.parallel);
        assert_eq!(config.combination_time_limit, Some(Duration::from_millis(1500)));
        assert_eq!(config.prune_quality_floor, Some(0.2));
        assert_eq!(args.crystalline_positions(), &[18.5, 19.0]);
        assert_eq!(args.amorphous_positions(), &[20.0, 30.0]);
    }
}
