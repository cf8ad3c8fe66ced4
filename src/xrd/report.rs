//! # 分析报告
//!
//! 把选中的模型与预处理、峰检测和构建搜索的诊断信息组合为一条记录，
//! 并提供完整流程的入口 `fit_spectrum`。
//!
//! ## 依赖关系
//! - 串联 `xrd/preprocess.rs` → `xrd/peaks.rs` → `xrd/search.rs`
//! - 被 `commands/fit.rs`、`xrd/export.rs`、`xrd/plot.rs` 使用

use super::config::FitConfig;
use super::peaks::{detect_peaks, PeakDetection};
use super::preprocess::{preprocess, PreprocessedSpectrum};
use super::search::{run_search, SearchContext, SearchOutcome};
use crate::error::{Result, XrdError};
use crate::models::{SelectedModel, Spectrum};

use serde::{Deserialize, Serialize};

/// 一次完整拟合的输出
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// 样品名称
    pub sample: String,
    pub angles: Vec<f64>,
    pub known_crystalline: Vec<f64>,
    pub known_amorphous: Vec<f64>,
    pub preprocessing: PreprocessedSpectrum,
    pub detection: PeakDetection,
    pub search: SearchOutcome,
    /// 本次使用的配置
    pub config: FitConfig,
}

impl AnalysisReport {
    /// 最终选中的模型
    pub fn best(&self) -> &SelectedModel {
        &self.search.selected
    }

    pub fn crystallinity(&self) -> f64 {
        self.best().fit.crystallinity
    }

    pub fn r_squared(&self) -> f64 {
        self.best().fit.r_squared
    }
}

/// 纯组合，不做额外计算
pub fn assemble(
    spectrum: &Spectrum,
    known_crystalline: &[f64],
    known_amorphous: &[f64],
    preprocessing: PreprocessedSpectrum,
    detection: PeakDetection,
    search: SearchOutcome,
    config: &FitConfig,
) -> AnalysisReport {
    AnalysisReport {
        sample: spectrum.name().to_string(),
        angles: spectrum.angles().to_vec(),
        known_crystalline: known_crystalline.to_vec(),
        known_amorphous: known_amorphous.to_vec(),
        preprocessing,
        detection,
        search,
        config: config.clone(),
    }
}

/// 对已校验的谱图运行完整流程
pub fn analyze(
    spectrum: &Spectrum,
    known_crystalline: &[f64],
    known_amorphous: &[f64],
    config: &FitConfig,
) -> Result<AnalysisReport> {
    config.validate()?;
    check_positions("crystalline", known_crystalline)?;
    check_positions("amorphous", known_amorphous)?;

    let pre = preprocess(spectrum, config.min_prominence, &config.preprocess)?;
    let detection = detect_peaks(spectrum, &pre.corrected, pre.prominence, &config.detection);

    let search = run_search(&SearchContext {
        angles: spectrum.angles(),
        corrected: &pre.corrected,
        candidates: &detection.all,
        known_crystalline,
        known_amorphous,
        config,
    });

    Ok(assemble(
        spectrum,
        known_crystalline,
        known_amorphous,
        pre,
        detection,
        search,
        config,
    ))
}

/// 库入口：从原始数组拟合
pub fn fit_spectrum(
    angles: &[f64],
    intensities: &[f64],
    known_crystalline: Option<&[f64]>,
    known_amorphous: Option<&[f64]>,
    config: &FitConfig,
) -> Result<AnalysisReport> {
    let spectrum = Spectrum::new(angles.to_vec(), intensities.to_vec())?;
    analyze(
        &spectrum,
        known_crystalline.unwrap_or(&[]),
        known_amorphous.unwrap_or(&[]),
        config,
    )
}

fn check_positions(kind: &str, positions: &[f64]) -> Result<()> {
    match positions.iter().find(|p| !p.is_finite()) {
        Some(p) => Err(XrdError::InvalidPositions(format!(
            "{} peak position {} is not finite",
            kind, p
        ))),
        None => Ok(()),
    }
}
