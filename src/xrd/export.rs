//! # 拟合结果导出
//!
//! ## 支持格式
//! - 拟合谱图 CSV：2θ、归一化原始强度、基线校正强度、总拟合、结晶/非晶分量、残差
//! - 分量表 CSV：类别、振幅、峰位、宽度、高宽比、面积
//! - 检测峰 CSV：峰位、峰高、半高宽、突出度
//! - 完整报告 JSON（含所有数组）
//! - 批量汇总 CSV
//!
//! ## 依赖关系
//! - 被 `commands/fit.rs` 和 `commands/detect.rs` 调用
//! - 使用 `xrd/report.rs` 的 `AnalysisReport`
//! - 使用 `csv` 和 `serde_json` 写文件

use crate::error::{Result, XrdError};
use crate::models::PeakCandidate;
use crate::xrd::AnalysisReport;

use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// 拟合谱图 CSV 的列名
pub const FITTED_COLUMNS: [&str; 7] = [
    "2Theta_deg",
    "Original_Intensity_normalized",
    "Baseline_Corrected",
    "Total_Fit",
    "Crystalline_Fit",
    "Amorphous_Fit",
    "Residual",
];

/// 批量汇总的一行
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub file: String,
    pub model: String,
    pub crystallinity: f64,
    pub r_squared: f64,
    pub rmse: f64,
    pub snr: f64,
    /// 分号分隔的结晶峰位
    pub peaks: String,
}

impl SummaryRow {
    pub fn from_report(file: &str, report: &AnalysisReport) -> Self {
        let best = report.best();
        Self {
            file: file.to_string(),
            model: best.name.clone(),
            crystallinity: best.fit.crystallinity,
            r_squared: best.fit.r_squared,
            rmse: best.fit.rmse,
            snr: report.preprocessing.signal_to_noise,
            peaks: best
                .crystalline_positions
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(";"),
        }
    }
}

/// 导出逐点拟合数据
pub fn fitted_to_csv(report: &AnalysisReport, output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;
    wtr.write_record(FITTED_COLUMNS)?;

    let pre = &report.preprocessing;
    let fit = &report.best().fit;
    for i in 0..report.angles.len() {
        wtr.write_record(&[
            format!("{:.4}", report.angles[i]),
            format!("{:.6}", pre.normalized[i]),
            format!("{:.6}", pre.corrected[i]),
            format!("{:.6}", fit.total_fit[i]),
            format!("{:.6}", fit.crystalline_fit[i]),
            format!("{:.6}", fit.amorphous_fit[i]),
            format!("{:.6}", fit.residuals[i]),
        ])?;
    }

    flush(wtr, output_path)
}

/// 导出选中模型的分量表
pub fn components_to_csv(report: &AnalysisReport, output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;
    wtr.write_record(["kind", "amplitude", "position", "width", "hw_ratio", "area"])?;

    for c in report.best().fit.components() {
        wtr.write_record(&[
            c.kind.to_string(),
            format!("{:.6}", c.amplitude),
            format!("{:.4}", c.center),
            format!("{:.4}", c.sigma),
            format!("{:.4}", c.hw_ratio),
            format!("{:.6}", c.area),
        ])?;
    }

    flush(wtr, output_path)
}

/// 导出检测到的候选峰
pub fn peaks_to_csv(peaks: &[PeakCandidate], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;
    wtr.write_record(["index", "2theta", "height", "fwhm_deg", "prominence"])?;

    for p in peaks {
        wtr.write_record(&[
            p.index.to_string(),
            format!("{:.4}", p.position),
            format!("{:.6}", p.height),
            format!("{:.4}", p.width),
            format!("{:.6}", p.prominence),
        ])?;
    }

    flush(wtr, output_path)
}

/// 导出完整报告为 JSON
pub fn report_to_json(report: &AnalysisReport, output_path: &Path) -> Result<()> {
    let file = File::create(output_path).map_err(|e| XrdError::FileWriteError {
        path: output_path.display().to_string(),
        source: e,
    })?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)?;
    Ok(())
}

/// 导出批量汇总
pub fn summary_to_csv(rows: &[SummaryRow], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    flush(wtr, output_path)
}

fn flush(mut wtr: csv::Writer<File>, output_path: &Path) -> Result<()> {
    wtr.flush().map_err(|e| XrdError::FileWriteError {
        path: output_path.display().to_string(),
        source: e,
    })
}
