//! # 构建搜索
//!
//! 在已知结晶峰位的子集上逐步构建模型，并选出最终模型。
//!
//! ## 阶段
//! 1. 仅非晶拟合
//! 2. 单峰测试（局部质量评估）
//! 3. 峰组合测试（按大小、再按字典序枚举）
//! 4. 用成功峰集做最终组合拟合
//! 5. 模型选择
//!
//! 没有已知结晶峰位时跳过第 2、3 阶段；结果至少是仅非晶拟合。
//! 单次拟合失败只影响该候选，不会中断扫描。
//!
//! ## 依赖关系
//! - 使用 `xrd/fitter.rs` 中的 `fit_components`
//! - 使用 `xrd/quality.rs` 中的 `peak_metrics`
//! - 使用 rayon 并行执行独立拟合，itertools 枚举组合
//! - 被 `xrd/report.rs` 调用

use super::config::FitConfig;
use super::fitter::{fit_components, FitRequest, PeakRegistry};
use super::quality::{peak_metrics, PeakMetrics};
use crate::models::{FitResult, ModelStage, PeakCandidate, SelectedModel};

use itertools::Itertools;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// 回退判定所需的最小 R² 改进
const FALLBACK_IMPROVEMENT: f64 = 0.05;

/// 构建搜索的输入
#[derive(Debug, Clone, Copy)]
pub struct SearchContext<'a> {
    pub angles: &'a [f64],
    /// 基线校正后的强度
    pub corrected: &'a [f64],
    pub candidates: &'a [PeakCandidate],
    pub known_crystalline: &'a [f64],
    pub known_amorphous: &'a [f64],
    pub config: &'a FitConfig,
}

/// 各阶段是否成功
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSuccess {
    pub amorphous: bool,
    pub individual_peaks: bool,
    pub combinations: bool,
    pub combined: bool,
}

/// 仅非晶拟合的评价
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmorphousVerdict {
    /// R² ≥ min_r_squared
    Excellent,
    /// R² ≥ amorphous_r_squared
    Acceptable,
    Insufficient,
}

/// 没有峰达到严格门槛时采用的回退
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fallback {
    BestCombination,
    BestIndividualPeak,
}

/// 单峰测试记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakTrial {
    pub position: f64,
    pub metrics: PeakMetrics,
    pub r_squared: f64,
    pub crystallinity: f64,
    pub successful: bool,
}

/// 组合测试状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombinationStatus {
    Fitted,
    /// 含有单峰质量分数低于下限的峰
    Pruned,
    /// 超过墙钟时间上限，未开始
    TimedOut,
}

/// 单个组合的测试记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinationOutcome {
    pub peaks: Vec<f64>,
    pub status: CombinationStatus,
    pub r_squared: Option<f64>,
    pub crystallinity: Option<f64>,
}

/// 构建搜索输出
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub selected: SelectedModel,
    /// 所有阶段的模型（非晶、最佳单峰、最佳组合、最终组合）
    pub gallery: Vec<SelectedModel>,
    pub phase_success: PhaseSuccess,
    pub amorphous_verdict: AmorphousVerdict,
    pub successful_peaks: Vec<f64>,
    pub peak_trials: Vec<PeakTrial>,
    pub combinations: Vec<CombinationOutcome>,
    pub fallback: Option<Fallback>,
}

impl SearchOutcome {
    pub fn combinations_fitted(&self) -> usize {
        self.combinations
            .iter()
            .filter(|c| c.status == CombinationStatus::Fitted)
            .count()
    }
}

/// 运行构建搜索
pub fn run_search(ctx: &SearchContext) -> SearchOutcome {
    let config = ctx.config;
    let registry = PeakRegistry::new(ctx.known_crystalline);
    let base = FitRequest {
        angles: ctx.angles,
        intensities: ctx.corrected,
        crystalline_positions: &[],
        amorphous_positions: ctx.known_amorphous,
        candidates: ctx.candidates,
        registry: &registry,
        height_width_threshold: config.height_width_threshold,
        include_crystalline: false,
        position_tolerance: config.position_tolerance,
        classification: config.classification,
        solver: &config.solver,
    };
    let fit_with = |positions: &[f64]| {
        fit_components(&FitRequest {
            crystalline_positions: positions,
            include_crystalline: true,
            ..base
        })
    };

    let mut phase_success = PhaseSuccess::default();
    let mut gallery = Vec::new();
    let mut accepted: Option<SelectedModel> = None;

    // 阶段 1：仅非晶
    let amorphous = fit_components(&base);
    let amorphous_r2 = amorphous.r_squared;
    let amorphous_verdict = if amorphous_r2 >= config.min_r_squared {
        AmorphousVerdict::Excellent
    } else if amorphous_r2 >= config.amorphous_r_squared {
        AmorphousVerdict::Acceptable
    } else {
        AmorphousVerdict::Insufficient
    };
    phase_success.amorphous = amorphous_verdict != AmorphousVerdict::Insufficient;
    let amorphous_model = SelectedModel {
        stage: ModelStage::AmorphousOnly,
        name: "Amorphous Only".to_string(),
        crystalline_positions: Vec::new(),
        fit: amorphous,
    };
    if amorphous_verdict == AmorphousVerdict::Excellent {
        accepted = Some(amorphous_model.clone());
    }
    gallery.push(amorphous_model);

    let mut successful_peaks: Vec<f64> = Vec::new();
    let mut peak_trials = Vec::new();
    let mut combinations = Vec::new();
    let mut fallback = None;

    if !ctx.known_crystalline.is_empty() {
        // 阶段 2A：单峰测试
        let amorphous_total = &gallery[0].fit.total_fit;
        let singles: Vec<FitResult> =
            map_ordered(ctx.known_crystalline, config.parallel, |&pos| fit_with(&[pos]));

        let mut best_individual: Option<(f64, FitResult)> = None;
        let mut best_individual_r2 = 0.0;
        for (&position, fit) in ctx.known_crystalline.iter().zip(singles) {
            let metrics = peak_metrics(
                position,
                ctx.angles,
                ctx.corrected,
                &fit.total_fit,
                amorphous_total,
                config.window_width,
            );
            let has_crystallinity = fit.has_crystallinity();
            let successful = has_crystallinity
                && metrics.quality_score > config.quality_threshold
                && (fit.r_squared >= config.min_r_squared
                    || metrics.quality_score > config.quality_override);
            if successful {
                successful_peaks.push(position);
            }

            peak_trials.push(PeakTrial {
                position,
                metrics,
                r_squared: fit.r_squared,
                crystallinity: fit.crystallinity,
                successful,
            });

            if has_crystallinity && fit.r_squared > best_individual_r2 {
                best_individual_r2 = fit.r_squared;
                best_individual = Some((position, fit));
            }
        }

        if let Some((position, fit)) = &best_individual {
            gallery.push(SelectedModel {
                stage: ModelStage::IndividualPeak,
                name: format!("Single Peak {}°", position),
                crystalline_positions: vec![*position],
                fit: fit.clone(),
            });
        }

        // 阶段 2B：组合测试
        let mut best_combination: Option<(Vec<f64>, FitResult)> = None;
        let mut best_combination_r2 = 0.0;
        if ctx.known_crystalline.len() > 1 {
            let fitted = test_combinations(ctx, &peak_trials, &fit_with);
            for (outcome, fit) in fitted {
                if let Some(fit) = fit {
                    if fit.has_crystallinity() && fit.r_squared > best_combination_r2 {
                        best_combination_r2 = fit.r_squared;
                        best_combination = Some((outcome.peaks.clone(), fit));
                    }
                }
                combinations.push(outcome);
            }

            if let Some((peaks, fit)) = &best_combination {
                gallery.push(SelectedModel {
                    stage: ModelStage::BestCombination,
                    name: format!("Combination {} Peaks", peaks.len()),
                    crystalline_positions: peaks.clone(),
                    fit: fit.clone(),
                });

                if best_combination_r2 >= config.min_r_squared
                    && (best_combination_r2 > best_individual_r2 || successful_peaks.is_empty())
                {
                    successful_peaks = peaks.clone();
                    phase_success.combinations = true;
                }
            }
        }

        // 回退
        if successful_peaks.is_empty() {
            match (&best_combination, &best_individual) {
                (Some((peaks, _)), _) if best_combination_r2 > best_individual_r2 => {
                    if best_combination_r2 - amorphous_r2 > FALLBACK_IMPROVEMENT {
                        successful_peaks = peaks.clone();
                        phase_success.combinations = true;
                        fallback = Some(Fallback::BestCombination);
                    }
                }
                (_, Some((position, _))) => {
                    let improvement = peak_trials
                        .iter()
                        .find(|t| t.position == *position)
                        .map_or(0.0, |t| t.metrics.local_r2_improvement);
                    if improvement > FALLBACK_IMPROVEMENT {
                        successful_peaks = vec![*position];
                        phase_success.individual_peaks = true;
                        fallback = Some(Fallback::BestIndividualPeak);
                    }
                }
                _ => {}
            }
        }

        if successful_peaks.len() == 1 {
            phase_success.individual_peaks = true;
        }
    }

    // 阶段 3：最终组合拟合
    if !successful_peaks.is_empty() {
        let combined = SelectedModel {
            stage: ModelStage::Combined,
            name: format!("Combined ({} Peaks)", successful_peaks.len()),
            crystalline_positions: successful_peaks.clone(),
            fit: fit_with(&successful_peaks),
        };
        if combined.fit.r_squared >= config.min_r_squared {
            phase_success.combined = true;
            accepted = Some(combined.clone());
        }
        gallery.push(combined);
    }

    let selected = accepted.unwrap_or_else(|| select_best(&gallery));

    SearchOutcome {
        selected,
        gallery,
        phase_success,
        amorphous_verdict,
        successful_peaks,
        peak_trials,
        combinations,
        fallback,
    }
}

/// 没有被接受的模型时，取画廊中 R² 最高者；全部 ≤ 0 时回到仅非晶
fn select_best(gallery: &[SelectedModel]) -> SelectedModel {
    let mut best: Option<&SelectedModel> = None;
    let mut best_r2 = 0.0;
    for model in gallery {
        if model.fit.r_squared > best_r2 {
            best_r2 = model.fit.r_squared;
            best = Some(model);
        }
    }

    match best {
        Some(model) => model.clone(),
        None => {
            let mut default = gallery[0].clone();
            default.stage = ModelStage::AmorphousDefault;
            default.name = "Amorphous Only (Default)".to_string();
            default
        }
    }
}

/// 枚举 2..=k 大小的组合并拟合；按枚举顺序返回
fn test_combinations<F>(
    ctx: &SearchContext,
    trials: &[PeakTrial],
    fit_with: &F,
) -> Vec<(CombinationOutcome, Option<FitResult>)>
where
    F: Fn(&[f64]) -> FitResult + Sync,
{
    let config = ctx.config;
    let max_size = config.max_combination_size.min(ctx.known_crystalline.len());
    let subsets: Vec<Vec<f64>> = (2..=max_size)
        .flat_map(|size| ctx.known_crystalline.iter().copied().combinations(size))
        .collect();

    let deadline = config
        .combination_time_limit
        .map(|limit| Instant::now() + limit);
    let poor_quality = |peak: f64| match config.prune_quality_floor {
        Some(floor) => trials
            .iter()
            .find(|t| t.position == peak)
            .is_some_and(|t| t.metrics.quality_score < floor),
        None => false,
    };

    map_ordered(&subsets, config.parallel, |peaks| {
        let skipped = |status: CombinationStatus| -> (CombinationOutcome, Option<FitResult>) {
            (
                CombinationOutcome {
                    peaks: peaks.clone(),
                    status,
                    r_squared: None,
                    crystallinity: None,
                },
                None,
            )
        };

        if peaks.iter().any(|&p| poor_quality(p)) {
            return skipped(CombinationStatus::Pruned);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return skipped(CombinationStatus::TimedOut);
        }

        let fit = fit_with(peaks);
        (
            CombinationOutcome {
                peaks: peaks.clone(),
                status: CombinationStatus::Fitted,
                r_squared: Some(fit.r_squared),
                crystallinity: Some(fit.crystallinity),
            },
            Some(fit),
        )
    })
}

/// 顺序或在 rayon 线程池上映射，结果保持输入顺序
fn map_ordered<T, R, F>(items: &[T], parallel: bool, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    if parallel {
        items.par_iter().map(f).collect()
    } else {
        items.iter().map(f).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xrd::gaussian::multi_gaussian;

    fn axis(start: f64, end: f64) -> Vec<f64> {
        let n = ((end - start) / 0.02).round() as usize;
        (0..=n).map(|i| start + i as f64 * 0.02).collect()
    }

    fn run(angles: &[f64], data: &[f64], known: &[f64], config: &FitConfig) -> SearchOutcome {
        let ctx = SearchContext {
            angles,
            corrected: data,
            candidates: &[],
            known_crystalline: known,
            known_amorphous: &[],
            config,
        };
        run_search(&ctx)
    }

    #[test]
    fn test_no_known_peaks_skips_crystalline_stages() {
        let angles = axis(5.0, 35.0);
        let data = multi_gaussian(&angles, &[1.0, 20.0, 4.0]);
        let outcome = run(&angles, &data, &[], &FitConfig::default());

        assert_eq!(outcome.gallery.len(), 1);
        assert!(outcome.peak_trials.is_empty());
        assert!(outcome.combinations.is_empty());
        assert!(outcome.successful_peaks.is_empty());
        assert_eq!(outcome.selected.stage, ModelStage::AmorphousOnly);
        assert_eq!(outcome.selected.fit.crystallinity, 0.0);
    }

    #[test]
    fn test_combinations_enumerated_size_major() {
        let angles = axis(10.0, 30.0);
        let data = multi_gaussian(&angles, &[1.0, 15.0, 0.2, 0.8, 20.0, 0.2, 0.6, 25.0, 0.2]);
        let config = FitConfig {
            max_combination_size: 3,
            ..FitConfig::default()
        };
        let outcome = run(&angles, &data, &[15.0, 20.0, 25.0], &config);

        let order: Vec<Vec<f64>> = outcome.combinations.iter().map(|c| c.peaks.clone()).collect();
        assert_eq!(
            order,
            vec![
                vec![15.0, 20.0],
                vec![15.0, 25.0],
                vec![20.0, 25.0],
                vec![15.0, 20.0, 25.0],
            ]
        );
        assert_eq!(outcome.combinations_fitted(), 4);
        assert_eq!(outcome.peak_trials.len(), 3);
    }

    #[test]
    fn test_zero_time_limit_skips_all_combinations() {
        let angles = axis(10.0, 30.0);
        let data = multi_gaussian(&angles, &[1.0, 15.0, 0.2, 0.8, 20.0, 0.2]);
        let config = FitConfig {
            combination_time_limit: Some(std::time::Duration::ZERO),
            ..FitConfig::default()
        };
        let outcome = run(&angles, &data, &[15.0, 20.0], &config);
        assert_eq!(outcome.combinations.len(), 1);
        assert_eq!(outcome.combinations[0].status, CombinationStatus::TimedOut);
        assert!(outcome.combinations[0].r_squared.is_none());
    }

    #[test]
    fn test_pruning_skips_combinations_with_poor_peaks() {
        let angles = axis(10.0, 30.0);
        let data = multi_gaussian(&angles, &[1.0, 15.0, 0.2, 0.8, 20.0, 0.2]);
        let config = FitConfig {
            prune_quality_floor: Some(f64::INFINITY),
            ..FitConfig::default()
        };
        let outcome = run(&angles, &data, &[15.0, 20.0], &config);
        assert_eq!(outcome.combinations[0].status, CombinationStatus::Pruned);
        assert_eq!(outcome.combinations_fitted(), 0);
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let angles = axis(10.0, 30.0);
        let data = multi_gaussian(&angles, &[1.0, 15.0, 0.2, 0.8, 20.0, 0.2, 0.3, 20.0, 5.0]);
        let known = [15.0, 20.0, 26.0];
        let parallel = run(&angles, &data, &known, &FitConfig::default());
        let sequential = run(
            &angles,
            &data,
            &known,
            &FitConfig {
                parallel: false,
                ..FitConfig::default()
            },
        );

        assert_eq!(parallel.selected.stage, sequential.selected.stage);
        assert_eq!(
            parallel.selected.crystalline_positions,
            sequential.selected.crystalline_positions
        );
        assert_eq!(parallel.selected.fit.parameters, sequential.selected.fit.parameters);
        assert_eq!(parallel.successful_peaks, sequential.successful_peaks);
    }

    /// 模型加一点确定性的起伏，避免残差恰好为零
    fn rippled(angles: &[f64], params: &[f64]) -> Vec<f64> {
        multi_gaussian(angles, params)
            .iter()
            .zip(angles)
            .map(|(y, x)| y + 1e-4 * (37.0 * x).sin())
            .collect()
    }

    #[test]
    fn test_excellent_amorphous_fit_is_accepted() {
        let angles = axis(5.0, 35.0);
        let data = multi_gaussian(&angles, &[1.0, 20.0, 4.0]);
        let outcome = run(&angles, &data, &[], &FitConfig::default());

        assert_eq!(outcome.amorphous_verdict, AmorphousVerdict::Excellent);
        assert!(outcome.phase_success.amorphous);
        assert_eq!(outcome.selected.stage, ModelStage::AmorphousOnly);
        assert_eq!(outcome.selected.name, "Amorphous Only");
        assert!(outcome.peak_trials.is_empty());
        assert_eq!(outcome.fallback, None);
    }

    #[test]
    fn test_single_successful_peak_leads_to_combined_model() {
        let angles = axis(10.0, 40.0);
        let data = rippled(&angles, &[1.0, 25.0, 0.3, 0.3, 20.0, 5.0]);
        let outcome = run(&angles, &data, &[25.0], &FitConfig::default());

        assert_ne!(outcome.amorphous_verdict, AmorphousVerdict::Excellent);
        assert!(outcome.peak_trials[0].successful);
        assert_eq!(outcome.successful_peaks, vec![25.0]);
        assert!(outcome.phase_success.individual_peaks);
        assert!(outcome.phase_success.combined);
        assert_eq!(outcome.fallback, None);
        assert_eq!(outcome.selected.stage, ModelStage::Combined);
        assert_eq!(outcome.selected.name, "Combined (1 Peaks)");
        assert_eq!(outcome.selected.crystalline_positions, vec![25.0]);
    }

    #[test]
    fn test_fallback_to_best_individual_peak() {
        let angles = axis(10.0, 40.0);
        let data = rippled(&angles, &[1.0, 25.0, 0.3, 0.3, 20.0, 5.0]);
        let config = FitConfig {
            quality_threshold: f64::INFINITY,
            ..FitConfig::default()
        };
        let outcome = run(&angles, &data, &[25.0], &config);

        assert!(outcome.peak_trials.iter().all(|t| !t.successful));
        assert_eq!(outcome.fallback, Some(Fallback::BestIndividualPeak));
        assert_eq!(outcome.successful_peaks, vec![25.0]);
        assert!(outcome.phase_success.individual_peaks);
        assert!(!outcome.phase_success.combinations);
        assert_eq!(outcome.selected.stage, ModelStage::Combined);
    }

    #[test]
    fn test_fallback_to_best_combination() {
        let angles = axis(10.0, 30.0);
        let data = rippled(&angles, &[1.0, 15.0, 0.2, 0.8, 20.0, 0.2]);
        // 任何模型都达不到 R² 门槛
        let config = FitConfig {
            quality_threshold: f64::INFINITY,
            min_r_squared: 1.5,
            ..FitConfig::default()
        };
        let outcome = run(&angles, &data, &[15.0, 20.0], &config);

        assert!(outcome.peak_trials.iter().all(|t| !t.successful));
        assert_eq!(outcome.fallback, Some(Fallback::BestCombination));
        assert_eq!(outcome.successful_peaks, vec![15.0, 20.0]);
        assert!(outcome.phase_success.combinations);
        assert!(!outcome.phase_success.individual_peaks);
        assert!(!outcome.phase_success.combined);

        let combined = outcome
            .gallery
            .iter()
            .find(|m| m.stage == ModelStage::Combined)
            .unwrap();
        assert_eq!(combined.crystalline_positions, vec![15.0, 20.0]);
        // 未被接受，取画廊中 R² 最高者
        let best_r2 = outcome
            .gallery
            .iter()
            .map(|m| m.fit.r_squared)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(outcome.selected.fit.r_squared, best_r2);
    }

    #[test]
    fn test_select_best_falls_back_to_default() {
        let angles = axis(10.0, 12.0);
        let flat = vec![0.0; angles.len()];
        // 常数数据的 R² 恒为 0
        let outcome = run(&angles, &flat, &[], &FitConfig::default());
        assert_eq!(outcome.selected.stage, ModelStage::AmorphousDefault);
        assert_eq!(outcome.selected.name, "Amorphous Only (Default)");
    }
}
