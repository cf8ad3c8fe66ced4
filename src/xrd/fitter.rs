//! # 多组分高斯拟合器
//!
//! 给定一组请求的结晶峰位和非晶峰位，构造初始猜测与边界，
//! 依次尝试求解策略，然后把拟合得到的分量分类为结晶/非晶并计算指标。
//!
//! 拟合器无副作用且可重入；跨调用共享的唯一输入是只读的
//! `PeakRegistry`，因此构建搜索可以在线程池上并行调用它。
//!
//! ## 依赖关系
//! - 使用 `xrd/solver.rs` 中的 `levenberg_marquardt`, `Bounds`
//! - 使用 `xrd/gaussian.rs` 和 `xrd/numeric.rs`
//! - 构造 `models/fit.rs` 中的 `FitResult`
//! - 被 `xrd/search.rs` 调用

use super::config::{ClassificationRule, SolverConfig};
use super::gaussian::{gaussian_curve, multi_gaussian};
use super::numeric::{mean, r_squared, rmse, trapezoid};
use super::solver::{levenberg_marquardt, Bounds, FitError};
use crate::models::{ComponentKind, FitResult, FitStrategy, GaussianComponent, PeakCandidate};

use serde::{Deserialize, Serialize};

/// 未指定非晶峰位时使用的默认位置
pub const DEFAULT_AMORPHOUS_POSITIONS: [f64; 2] = [20.0, 30.0];

/// 振幅低于此值的分量不参与报告
pub const MIN_COMPONENT_AMPLITUDE: f64 = 1e-3;

const OVERLAP_DISTANCE: f64 = 1.0;
const OVERLAP_WIDTH_SCALE: f64 = 0.7;
const OVERLAP_MIN_WIDTH: f64 = 0.3;
const UNMATCHED_AMPLITUDE_SCALE: f64 = 0.8;
const UNMATCHED_WIDTH: f64 = 0.5;
const AMORPHOUS_SEED_WIDTH: f64 = 5.0;
const CRYSTALLINE_WIDTH_LIMIT: f64 = 1.0;
const CLAMP_MARGIN: f64 = 1e-6;

/// 整个搜索期间已知的全部结晶峰位（只读）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakRegistry {
    positions: Vec<f64>,
}

impl PeakRegistry {
    pub fn new(positions: &[f64]) -> Self {
        Self {
            positions: positions.to_vec(),
        }
    }

    /// 是否有已知峰位与 `center` 的距离严格小于容差
    pub fn contains_near(&self, center: f64, tolerance: f64) -> bool {
        self.positions.iter().any(|k| (center - k).abs() < tolerance)
    }
}

/// 一次组件拟合的全部输入
#[derive(Debug, Clone, Copy)]
pub struct FitRequest<'a> {
    pub angles: &'a [f64],
    /// 基线校正后的强度
    pub intensities: &'a [f64],
    /// 本次请求的结晶峰位
    pub crystalline_positions: &'a [f64],
    /// 非晶峰位；为空时使用 [20, 30]
    pub amorphous_positions: &'a [f64],
    pub candidates: &'a [PeakCandidate],
    pub registry: &'a PeakRegistry,
    pub height_width_threshold: f64,
    pub include_crystalline: bool,
    pub position_tolerance: f64,
    pub classification: ClassificationRule,
    pub solver: &'a SolverConfig,
}

/// 按顺序尝试的求解策略；全部失败时使用 `FitStrategy::InitialGuess`
pub const STRATEGY_LADDER: [FitStrategy; 4] = [
    FitStrategy::Bounded,
    FitStrategy::ClampedBounded,
    FitStrategy::Unbounded,
    FitStrategy::Minimal,
];

/// 拟合并分类；从不失败
pub fn fit_components(request: &FitRequest) -> FitResult {
    let guess = initial_guess(request);
    let bounds = parameter_bounds(request, &guess);

    let (parameters, strategy) = STRATEGY_LADDER
        .iter()
        .find_map(|&strategy| {
            run_strategy(strategy, request, &guess, &bounds)
                .ok()
                .map(|params| (params, strategy))
        })
        .unwrap_or((guess, FitStrategy::InitialGuess));

    evaluate_parameters(request, parameters, strategy)
}

/// 执行单个求解策略
pub fn run_strategy(
    strategy: FitStrategy,
    request: &FitRequest,
    guess: &[f64],
    bounds: &Bounds,
) -> Result<Vec<f64>, FitError> {
    let solver = request.solver;
    let (x, y) = (request.angles, request.intensities);
    match strategy {
        FitStrategy::Bounded => {
            levenberg_marquardt(x, y, guess, Some(bounds), solver.max_evaluations, solver)
        }
        FitStrategy::ClampedBounded => {
            let clamped = bounds.clamp_inside(guess, CLAMP_MARGIN);
            levenberg_marquardt(x, y, &clamped, Some(bounds), solver.max_evaluations, solver)
        }
        FitStrategy::Unbounded => {
            levenberg_marquardt(x, y, guess, None, solver.unbounded_max_evaluations, solver)
        }
        FitStrategy::Minimal => {
            let (p0, minimal_bounds) = minimal_model(request);
            levenberg_marquardt(x, y, &p0, Some(&minimal_bounds), solver.minimal_max_evaluations, solver)
        }
        FitStrategy::InitialGuess => Ok(guess.to_vec()),
    }
}

/// 构造扁平初始猜测 [A, c, σ, ...]
pub fn initial_guess(request: &FitRequest) -> Vec<f64> {
    let tol = request.position_tolerance;
    let candidates = request.candidates;
    let mut guess = Vec::new();

    if request.include_crystalline {
        for &known in request.crystalline_positions {
            let matched = candidates.iter().find(|c| (c.position - known).abs() < tol);
            // 多个请求峰位认领同一候选峰时，该候选的高度和宽度代表的是合峰
            let shared = matched.is_some_and(|c| {
                request
                    .crystalline_positions
                    .iter()
                    .filter(|k| (c.position - **k).abs() < tol)
                    .count()
                    > 1
            });
            match matched {
                Some(c) if !shared => guess.extend([c.height, known, c.width]),
                _ => {
                    let idx = nearest_index(request.angles, known);
                    let height = request.intensities[idx] * UNMATCHED_AMPLITUDE_SCALE;
                    guess.extend([height, known, UNMATCHED_WIDTH]);
                }
            }
        }

        for (i, c) in candidates.iter().enumerate() {
            let claimed = request
                .crystalline_positions
                .iter()
                .any(|k| (c.position - k).abs() < tol);
            if claimed {
                continue;
            }
            let overlapping = candidates
                .iter()
                .enumerate()
                .any(|(j, o)| i != j && (c.position - o.position).abs() < OVERLAP_DISTANCE);
            let width = if overlapping {
                (c.width * OVERLAP_WIDTH_SCALE).max(OVERLAP_MIN_WIDTH)
            } else {
                c.width
            };
            guess.extend([c.height, c.position, width]);
        }
    }

    let amorphous: &[f64] = if request.amorphous_positions.is_empty() {
        &DEFAULT_AMORPHOUS_POSITIONS
    } else {
        request.amorphous_positions
    };
    let seed_amplitude = mean(request.intensities) / 2.0;
    for &pos in amorphous {
        guess.extend([seed_amplitude, pos, AMORPHOUS_SEED_WIDTH]);
    }

    if guess.is_empty() {
        guess.extend([0.5, 25.0, 10.0]);
    }
    guess
}

/// 每个三元组按"结晶型"或"非晶型"给出边界
pub fn parameter_bounds(request: &FitRequest, guess: &[f64]) -> Bounds {
    let mut lower = Vec::with_capacity(guess.len());
    let mut upper = Vec::with_capacity(guess.len());

    for p in guess.chunks_exact(3) {
        let (center, width) = (p[1], p[2]);
        let crystalline_like = request.include_crystalline
            && (width < 2.0
                || request
                    .crystalline_positions
                    .iter()
                    .any(|k| (center - k).abs() < request.position_tolerance));

        if crystalline_like {
            lower.extend([0.0, center - 0.5, 0.1]);
            upper.extend([f64::INFINITY, center + 0.5, 2.0]);
        } else {
            lower.extend([0.0, center - 5.0, 3.0]);
            upper.extend([f64::INFINITY, center + 5.0, 15.0]);
        }
    }

    Bounds::new(lower, upper)
}

/// 最小模型：一个非晶分量，加上可选的首个请求峰位处的结晶分量
fn minimal_model(request: &FitRequest) -> (Vec<f64>, Bounds) {
    let mut p0 = vec![mean(request.intensities) / 2.0, 25.0, 8.0];
    let mut lower = vec![0.0, 10.0, 3.0];
    let mut upper = vec![f64::INFINITY, 40.0, 20.0];

    if request.include_crystalline {
        if let Some(&pos) = request.crystalline_positions.first() {
            let idx = nearest_index(request.angles, pos);
            p0.extend([request.intensities[idx] * 0.5, pos, 0.8]);
            lower.extend([0.0, pos - 1.0, 0.2]);
            upper.extend([f64::INFINITY, pos + 1.0, 2.0]);
        }
    }

    (p0, Bounds::new(lower, upper))
}

/// 分类分量并计算曲线、结晶度和拟合优度
pub fn evaluate_parameters(
    request: &FitRequest,
    parameters: Vec<f64>,
    strategy: FitStrategy,
) -> FitResult {
    let x = request.angles;
    let mut crystalline = Vec::new();
    let mut amorphous = Vec::new();

    for p in parameters.chunks_exact(3) {
        let (amplitude, center, sigma) = (p[0], p[1], p[2]);
        if !(amplitude.is_finite() && center.is_finite() && sigma.is_finite()) {
            continue;
        }
        if amplitude < MIN_COMPONENT_AMPLITUDE {
            continue;
        }
        // 高斯对 σ 为偶函数
        let sigma = sigma.abs();
        if sigma == 0.0 {
            continue;
        }

        let hw_ratio = amplitude / sigma;
        let kind = if is_crystalline(request, center, sigma, hw_ratio) {
            ComponentKind::Crystalline
        } else {
            ComponentKind::Amorphous
        };
        let component = GaussianComponent {
            kind,
            amplitude,
            center,
            sigma,
            hw_ratio,
            area: trapezoid(&gaussian_curve(x, amplitude, center, sigma), x),
        };
        match kind {
            ComponentKind::Crystalline => crystalline.push(component),
            ComponentKind::Amorphous => amorphous.push(component),
        }
    }

    let crystalline_fit = component_sum(x, &crystalline);
    let amorphous_fit = component_sum(x, &amorphous);
    let total_fit: Vec<f64> = crystalline_fit
        .iter()
        .zip(&amorphous_fit)
        .map(|(c, a)| c + a)
        .collect();
    let residuals: Vec<f64> = request
        .intensities
        .iter()
        .zip(&total_fit)
        .map(|(d, f)| d - f)
        .collect();

    let crystallinity = crystallinity_index(
        trapezoid(&crystalline_fit, x),
        trapezoid(&amorphous_fit, x),
    );

    FitResult {
        requested_positions: request.crystalline_positions.to_vec(),
        r_squared: r_squared(request.intensities, &total_fit),
        rmse: rmse(request.intensities, &total_fit),
        crystalline,
        amorphous,
        crystalline_fit,
        amorphous_fit,
        total_fit,
        residuals,
        crystallinity,
        parameters,
        strategy,
    }
}

/// 100 × A_cryst / (A_cryst + A_amorph)，限制在 [0, 100]
pub fn crystallinity_index(crystalline_area: f64, amorphous_area: f64) -> f64 {
    let total = crystalline_area + amorphous_area;
    if !(total > 0.0) {
        return 0.0;
    }
    let value = 100.0 * crystalline_area / total;
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn is_crystalline(request: &FitRequest, center: f64, sigma: f64, hw_ratio: f64) -> bool {
    if !request.include_crystalline {
        return false;
    }
    let tol = request.position_tolerance;
    let known = request
        .crystalline_positions
        .iter()
        .any(|k| (center - k).abs() < tol)
        || request.registry.contains_near(center, tol);
    let sharp = hw_ratio > request.height_width_threshold;
    let narrow = sigma < CRYSTALLINE_WIDTH_LIMIT;

    match request.classification {
        ClassificationRule::Strict => known && sharp && narrow,
        ClassificationRule::Legacy => narrow && (known || sharp),
    }
}

fn component_sum(x: &[f64], components: &[GaussianComponent]) -> Vec<f64> {
    let params: Vec<f64> = components
        .iter()
        .flat_map(|c| [c.amplitude, c.center, c.sigma])
        .collect();
    multi_gaussian(x, &params)
}

/// 第一个距离最小的采样点
fn nearest_index(angles: &[f64], target: f64) -> usize {
    angles
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(best, best_d), (i, a)| {
            let d = (a - target).abs();
            if d < best_d {
                (i, d)
            } else {
                (best, best_d)
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn axis() -> Vec<f64> {
        (0..1501).map(|i| 10.0 + i as f64 * 0.02).collect()
    }

    fn candidate(index: usize, angles: &[f64], height: f64, width: f64) -> PeakCandidate {
        PeakCandidate {
            index,
            position: angles[index],
            height,
            width,
            prominence: height,
        }
    }

    struct Fixture {
        angles: Vec<f64>,
        data: Vec<f64>,
        candidates: Vec<PeakCandidate>,
        registry: PeakRegistry,
        solver: SolverConfig,
    }

    impl Fixture {
        fn new(params: &[f64]) -> Self {
            let angles = axis();
            let data = multi_gaussian(&angles, params);
            Self {
                angles,
                data,
                candidates: Vec::new(),
                registry: PeakRegistry::default(),
                solver: SolverConfig::default(),
            }
        }

        fn request<'a>(&'a self, positions: &'a [f64], include: bool) -> FitRequest<'a> {
            FitRequest {
                angles: &self.angles,
                intensities: &self.data,
                crystalline_positions: positions,
                amorphous_positions: &[],
                candidates: &self.candidates,
                registry: &self.registry,
                height_width_threshold: 0.3,
                include_crystalline: include,
                position_tolerance: 1.0,
                classification: ClassificationRule::Strict,
                solver: &self.solver,
            }
        }
    }

    #[test]
    fn test_initial_guess_uses_detected_candidate() {
        let mut fx = Fixture::new(&[1.0, 25.0, 0.3]);
        fx.candidates = vec![candidate(750, &fx.angles, 1.0, 0.7)];
        let positions = [25.3];
        let guess = initial_guess(&fx.request(&positions, true));

        // 已知峰 + 两个默认非晶峰；候选峰已被认领
        assert_eq!(guess.len(), 9);
        assert_eq!(&guess[..3], &[1.0, 25.3, 0.7]);
        assert_eq!(guess[4], 20.0);
        assert_eq!(guess[7], 30.0);
    }

    #[test]
    fn test_initial_guess_unmatched_position_uses_data() {
        let fx = Fixture::new(&[1.0, 25.0, 0.3]);
        let positions = [25.0];
        let guess = initial_guess(&fx.request(&positions, true));
        assert_relative_eq!(guess[0], 0.8, epsilon = 1e-12);
        assert_eq!(guess[2], UNMATCHED_WIDTH);
    }

    #[test]
    fn test_shared_candidate_seeds_each_position_from_data() {
        let mut fx = Fixture::new(&[1.0, 18.5, 0.2, 1.0, 19.0, 0.2]);
        // 两个峰合并成一个宽候选峰
        fx.candidates = vec![candidate(448, &fx.angles, 1.4, 1.05)];
        let positions = [18.5, 19.0];
        let guess = initial_guess(&fx.request(&positions, true));

        assert_eq!(guess.len(), 12);
        assert_eq!(guess[1], 18.5);
        assert_eq!(guess[4], 19.0);
        assert_eq!(guess[2], UNMATCHED_WIDTH);
        assert_eq!(guess[5], UNMATCHED_WIDTH);
        assert_relative_eq!(guess[0], fx.data[425] * UNMATCHED_AMPLITUDE_SCALE, epsilon = 1e-12);
        assert_relative_eq!(guess[3], fx.data[450] * UNMATCHED_AMPLITUDE_SCALE, epsilon = 1e-12);
    }

    #[test]
    fn test_overlapping_pair_keeps_both_components() {
        let mut fx = Fixture::new(&[1.0, 18.5, 0.2, 1.0, 19.0, 0.2, 0.3, 20.0, 4.0]);
        fx.candidates = vec![candidate(448, &fx.angles, 1.4, 1.05)];
        let positions = [18.5, 19.0];
        let result = fit_components(&fx.request(&positions, true));

        assert_eq!(result.crystalline.len(), 2);
        assert!(result.r_squared > 0.999, "r2 {}", result.r_squared);
        let mut centers: Vec<f64> = result.crystalline.iter().map(|c| c.center).collect();
        centers.sort_by(f64::total_cmp);
        assert!((centers[0] - 18.5).abs() < 0.05 && (centers[1] - 19.0).abs() < 0.05);
    }

    #[test]
    fn test_initial_guess_shrinks_overlapping_candidates() {
        let mut fx = Fixture::new(&[1.0, 25.0, 0.3]);
        fx.candidates = vec![
            candidate(400, &fx.angles, 0.5, 1.0),
            candidate(420, &fx.angles, 0.4, 0.35),
        ];
        let guess = initial_guess(&fx.request(&[], true));
        assert_relative_eq!(guess[2], 0.7, epsilon = 1e-12);
        assert_relative_eq!(guess[5], 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_bounds_follow_width_and_position() {
        let fx = Fixture::new(&[1.0, 25.0, 0.3]);
        let positions = [25.0];
        let request = fx.request(&positions, true);
        let bounds = parameter_bounds(&request, &[1.0, 25.0, 3.0, 0.2, 20.0, 5.0]);
        assert_eq!(&bounds.lower[..3], &[0.0, 24.5, 0.1]);
        assert_eq!(&bounds.upper[1..3], &[25.5, 2.0]);
        assert_eq!(&bounds.lower[3..], &[0.0, 15.0, 3.0]);
        assert_eq!(&bounds.upper[4..], &[25.0, 15.0]);

        let amorphous_only = fx.request(&positions, false);
        let bounds = parameter_bounds(&amorphous_only, &[1.0, 25.0, 0.5]);
        assert_eq!(bounds.lower, vec![0.0, 20.0, 3.0]);
    }

    #[test]
    fn test_exact_parameters_give_unit_r_squared() {
        let params = [1.0, 25.0, 0.3, 0.2, 22.0, 5.0];
        let fx = Fixture::new(&params);
        let positions = [25.0];
        let result = evaluate_parameters(&fx.request(&positions, true), params.to_vec(), FitStrategy::Bounded);

        assert_relative_eq!(result.r_squared, 1.0, epsilon = 1e-12);
        assert_relative_eq!(result.rmse, 0.0, epsilon = 1e-12);
        assert_eq!(result.crystalline.len(), 1);
        assert_eq!(result.amorphous.len(), 1);
        assert!(result.crystallinity > 0.0 && result.crystallinity < 100.0);
    }

    #[test]
    fn test_classification_rules() {
        // 宽度 0.5、高宽比 2，位置不匹配
        let params = [1.0, 25.0, 0.5];
        let fx = Fixture::new(&params);
        let far = [28.0];

        let strict = evaluate_parameters(&fx.request(&far, true), params.to_vec(), FitStrategy::Bounded);
        assert!(strict.crystalline.is_empty());

        let mut legacy_request = fx.request(&far, true);
        legacy_request.classification = ClassificationRule::Legacy;
        let legacy = evaluate_parameters(&legacy_request, params.to_vec(), FitStrategy::Bounded);
        assert_eq!(legacy.crystalline.len(), 1);
    }

    #[test]
    fn test_registry_positions_count_as_known() {
        let params = [1.0, 25.0, 0.5];
        let mut fx = Fixture::new(&params);
        fx.registry = PeakRegistry::new(&[25.2]);
        let other = [18.0];
        let result = evaluate_parameters(&fx.request(&other, true), params.to_vec(), FitStrategy::Bounded);
        assert_eq!(result.crystalline.len(), 1);
    }

    #[test]
    fn test_small_and_invalid_components_are_dropped() {
        let fx = Fixture::new(&[1.0, 25.0, 0.3]);
        let params = vec![5e-4, 25.0, 0.3, 1.0, 22.0, f64::NAN, 1.0, 23.0, 0.0, 0.5, 20.0, -4.0];
        let result = evaluate_parameters(&fx.request(&[], false), params, FitStrategy::Unbounded);
        assert!(result.crystalline.is_empty());
        assert_eq!(result.amorphous.len(), 1);
        assert_relative_eq!(result.amorphous[0].sigma, 4.0);
    }

    #[test]
    fn test_empty_candidates_have_no_crystallinity() {
        let fx = Fixture::new(&[1.0, 25.0, 0.3, 0.3, 20.0, 6.0]);
        let result = fit_components(&fx.request(&[], false));
        assert!(result.crystalline.is_empty());
        assert_eq!(result.crystallinity, 0.0);
        assert!(result.crystalline_fit.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_single_peak_fit() {
        let fx = Fixture::new(&[1.0, 25.0, 0.3]);
        let positions = [25.0];
        let result = fit_components(&fx.request(&positions, true));
        assert_ne!(result.strategy, FitStrategy::InitialGuess);
        assert!(result.r_squared > 0.99);
        assert!(result.crystallinity > 80.0);
        assert!((0.0..=100.0).contains(&result.crystallinity));
    }

    #[test]
    fn test_far_out_of_range_position_does_not_fail() {
        let fx = Fixture::new(&[1.0, 25.0, 0.3, 0.3, 20.0, 6.0]);
        let positions = [200.0];
        let result = fit_components(&fx.request(&positions, true));
        assert!((0.0..=100.0).contains(&result.crystallinity));
        assert!(result.r_squared.is_finite());
        assert_eq!(result.total_fit.len(), fx.angles.len());
    }

    #[test]
    fn test_removing_crystalline_component_reduces_area() {
        let params = [1.0, 25.0, 0.3, 0.6, 27.0, 0.4, 0.2, 22.0, 5.0];
        let fx = Fixture::new(&params);
        let positions = [25.0, 27.0];
        let result = evaluate_parameters(&fx.request(&positions, true), params.to_vec(), FitStrategy::Bounded);
        assert_eq!(result.crystalline.len(), 2);

        let full = trapezoid(&result.crystalline_fit, &fx.angles);
        for skip in 0..result.crystalline.len() {
            let kept: Vec<GaussianComponent> = result
                .crystalline
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, c)| *c)
                .collect();
            let reduced = trapezoid(&component_sum(&fx.angles, &kept), &fx.angles);
            assert!(reduced < full);
        }
    }

    #[test]
    fn test_crystallinity_index_bounds() {
        assert_eq!(crystallinity_index(0.0, 0.0), 0.0);
        assert_eq!(crystallinity_index(-1.0, 0.5), 0.0);
        assert_relative_eq!(crystallinity_index(1.0, 3.0), 25.0);
        assert_eq!(crystallinity_index(f64::NAN, 1.0), 0.0);
        assert_eq!(crystallinity_index(2.0, -0.5), 100.0);
    }
}
