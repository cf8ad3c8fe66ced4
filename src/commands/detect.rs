//! # detect 子命令实现
//!
//! 只运行预处理与峰检测，打印候选峰表，可选导出 CSV。
//!
//! ## 依赖关系
//! - 使用 `cli/detect.rs` 定义的 DetectArgs
//! - 使用 `xrd/preprocess.rs` 和 `xrd/peaks.rs`
//! - 使用 `xrd/export.rs` 写 CSV

use crate::cli::detect::DetectArgs;
use crate::utils::output;

use xrdfit::error::{Result, XrdError};
use xrdfit::models::PeakCandidate;
use xrdfit::parsers;
use xrdfit::xrd::{self, export, FitConfig};

use tabled::{Table, Tabled};

/// 执行 detect 命令
pub fn execute(args: DetectArgs) -> Result<()> {
    output::print_header("XRD Peak Detection");

    if !(args.min_prominence.is_finite() && args.min_prominence > 0.0) {
        return Err(XrdError::InvalidArgument(format!(
            "min_prominence must be positive (got {})",
            args.min_prominence
        )));
    }

    let spectrum = parsers::parse_spectrum_file(&args.input)?;
    output::print_success(&format!(
        "Loaded spectrum: {} ({} points)",
        spectrum.name(),
        spectrum.len()
    ));

    let config = FitConfig::default();
    let pre = xrd::preprocess(&spectrum, args.min_prominence, &config.preprocess)?;
    let detection = xrd::detect_peaks(&spectrum, &pre.corrected, pre.prominence, &config.detection);

    output::print_info(&format!(
        "SNR {:.1}, detection prominence {:.4}",
        pre.signal_to_noise, pre.prominence
    ));
    if pre.is_mostly_amorphous {
        output::print_warning("Spectrum appears mostly amorphous");
    }

    let peaks = if args.major_only {
        &detection.major
    } else {
        &detection.all
    };

    if peaks.is_empty() {
        output::print_warning("No peaks detected");
    } else {
        print_peak_table(peaks, &detection.major);
    }

    if let Some(path) = &args.output {
        export::peaks_to_csv(peaks, path)?;
        output::print_success(&format!("Peaks saved to '{}'", path.display()));
    }

    Ok(())
}

fn print_peak_table(peaks: &[PeakCandidate], major: &[PeakCandidate]) {
    #[derive(Tabled)]
    struct PeakRow {
        #[tabled(rename = "2θ (°)")]
        position: String,
        #[tabled(rename = "Height")]
        height: String,
        #[tabled(rename = "FWHM (°)")]
        width: String,
        #[tabled(rename = "Prominence")]
        prominence: String,
        #[tabled(rename = "Major")]
        major: String,
    }

    let rows: Vec<PeakRow> = peaks
        .iter()
        .map(|p| PeakRow {
            position: format!("{:.3}", p.position),
            height: format!("{:.4}", p.height),
            width: format!("{:.3}", p.width),
            prominence: format!("{:.4}", p.prominence),
            major: if major.iter().any(|m| m.index == p.index) {
                "*".to_string()
            } else {
                String::new()
            },
        })
        .collect();

    output::print_header(&format!("{} Detected Peaks", rows.len()));
    println!("{}", Table::new(&rows));
}
