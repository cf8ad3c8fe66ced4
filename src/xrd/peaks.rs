//! # 峰检测
//!
//! 在基线校正后的强度上寻找局部极大值，并按间距、突出度和宽度过滤。
//!
//! 过滤顺序为 间距 → 突出度 → 宽度，与常见信号处理库的 `find_peaks`
//! 语义一致：
//! - 平台峰取平台中点
//! - 间距过滤按峰高从高到低保留
//! - 突出度以左右两侧最近的更高采样点（或边界）之间的最低点为基底
//! - 宽度在 `峰高 − 突出度 × rel_height` 处线性插值测量
//!
//! ## 依赖关系
//! - 使用 `models/spectrum.rs` 中的 `Spectrum`, `PeakCandidate`
//! - 使用 `xrd/config.rs` 中的 `DetectionConfig`
//! - 被 `xrd/fitter.rs`（初始猜测）和 `xrd/plot.rs` 使用

use super::config::DetectionConfig;
use crate::models::{PeakCandidate, Spectrum};

use serde::{Deserialize, Serialize};

/// 单次局部极大值搜索的过滤条件
#[derive(Debug, Clone, Copy)]
pub struct PeakFilter {
    /// 最小突出度
    pub prominence: f64,
    /// 最小宽度（采样点）
    pub min_width: f64,
    /// 相邻峰最小间距（采样点）
    pub distance: usize,
    pub rel_height: f64,
}

/// 通过全部过滤的峰及其属性
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakProperties {
    pub index: usize,
    pub prominence: f64,
    pub left_base: usize,
    pub right_base: usize,
    /// 宽度（采样点）
    pub width: f64,
}

/// 三轮峰检测的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeakDetection {
    /// 主峰（仅用于可视化）
    pub major: Vec<PeakCandidate>,
    /// 全部候选峰
    pub all: Vec<PeakCandidate>,
}

impl PeakDetection {
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

/// 运行主峰、全部峰和宽度三轮检测
pub fn detect_peaks(
    spectrum: &Spectrum,
    corrected: &[f64],
    prominence: f64,
    config: &DetectionConfig,
) -> PeakDetection {
    let step = spectrum.mean_step();
    let angles = spectrum.angles();

    let major = find_peaks(
        corrected,
        &PeakFilter {
            prominence: prominence * config.major_prominence_scale,
            min_width: config.major_min_width,
            distance: config.major_distance,
            rel_height: config.rel_height,
        },
    );
    let all = find_peaks(
        corrected,
        &PeakFilter {
            prominence,
            min_width: config.min_width,
            distance: config.distance,
            rel_height: config.rel_height,
        },
    );
    let width_pass = find_peaks(
        corrected,
        &PeakFilter {
            prominence,
            min_width: config.min_width,
            distance: config.width_pass_distance,
            rel_height: config.rel_height,
        },
    );

    let to_candidate = |p: &PeakProperties, width_samples: f64| PeakCandidate {
        index: p.index,
        position: angles[p.index],
        height: corrected[p.index],
        width: width_samples * step,
        prominence: p.prominence,
    };

    let major = major.iter().map(|p| to_candidate(p, p.width)).collect();
    let all = all
        .iter()
        .map(|p| {
            // 宽度取自宽度轮中同一下标的峰；该轮未保留时直接测量
            let width = width_pass
                .iter()
                .find(|w| w.index == p.index)
                .map(|w| w.width)
                .unwrap_or_else(|| {
                    peak_width(corrected, p.index, p.prominence, p.left_base, p.right_base, config.rel_height)
                });
            to_candidate(p, width)
        })
        .collect();

    PeakDetection { major, all }
}

/// 带过滤的局部极大值搜索
pub fn find_peaks(x: &[f64], filter: &PeakFilter) -> Vec<PeakProperties> {
    let mut peaks = local_maxima(x);
    if filter.distance > 1 && peaks.len() > 1 {
        peaks = select_by_distance(x, &peaks, filter.distance);
    }

    peaks
        .into_iter()
        .filter_map(|index| {
            let (prominence, left_base, right_base) = peak_prominence(x, index);
            (prominence >= filter.prominence).then_some((index, prominence, left_base, right_base))
        })
        .filter_map(|(index, prominence, left_base, right_base)| {
            let width = peak_width(x, index, prominence, left_base, right_base, filter.rel_height);
            (width >= filter.min_width).then_some(PeakProperties {
                index,
                prominence,
                left_base,
                right_base,
                width,
            })
        })
        .collect()
}

/// 局部极大值下标；平台取中点（向下取整），首尾点不计
pub fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }

    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// 按峰高从高到低保留，移除间距不足的较低峰
fn select_by_distance(x: &[f64], peaks: &[usize], distance: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]));

    let mut keep = vec![true; peaks.len()];
    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        for k in (0..j).rev() {
            if peaks[j] - peaks[k] >= distance {
                break;
            }
            keep[k] = false;
        }
        for k in j + 1..peaks.len() {
            if peaks[k] - peaks[j] >= distance {
                break;
            }
            keep[k] = false;
        }
    }

    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, k)| k.then_some(p))
        .collect()
}

/// 突出度及左右基底下标
pub fn peak_prominence(x: &[f64], peak: usize) -> (f64, usize, usize) {
    let height = x[peak];

    let mut left_min = height;
    let mut left_base = peak;
    let mut i = peak as isize;
    while i >= 0 && x[i as usize] <= height {
        if x[i as usize] < left_min {
            left_min = x[i as usize];
            left_base = i as usize;
        }
        i -= 1;
    }

    let mut right_min = height;
    let mut right_base = peak;
    let mut i = peak;
    while i < x.len() && x[i] <= height {
        if x[i] < right_min {
            right_min = x[i];
            right_base = i;
        }
        i += 1;
    }

    (height - left_min.max(right_min), left_base, right_base)
}

/// 在 `峰高 − 突出度 × rel_height` 处测量宽度（采样点，线性插值）
pub fn peak_width(
    x: &[f64],
    peak: usize,
    prominence: f64,
    left_base: usize,
    right_base: usize,
    rel_height: f64,
) -> f64 {
    let level = x[peak] - prominence * rel_height;

    let mut i = peak;
    while left_base < i && level < x[i] {
        i -= 1;
    }
    let mut left_ip = i as f64;
    if x[i] < level {
        left_ip += (level - x[i]) / (x[i + 1] - x[i]);
    }

    let mut i = peak;
    while i < right_base && level < x[i] {
        i += 1;
    }
    let mut right_ip = i as f64;
    if x[i] < level {
        right_ip -= (level - x[i]) / (x[i - 1] - x[i]);
    }

    right_ip - left_ip
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn open_filter() -> PeakFilter {
        PeakFilter {
            prominence: 0.0,
            min_width: 0.0,
            distance: 1,
            rel_height: 0.5,
        }
    }

    #[test]
    fn test_plateau_midpoint() {
        let x = [0.0, 1.0, 3.0, 3.0, 3.0, 1.0, 0.0];
        assert_eq!(local_maxima(&x), vec![3]);

        let x = [0.0, 2.0, 2.0, 0.0];
        assert_eq!(local_maxima(&x), vec![1]);
    }

    #[test]
    fn test_edges_and_open_plateau_are_not_peaks() {
        assert!(local_maxima(&[5.0, 1.0, 0.0]).is_empty());
        assert!(local_maxima(&[0.0, 1.0, 1.0]).is_empty());
        assert!(local_maxima(&[0.0, 1.0, 2.0, 3.0]).is_empty());
    }

    #[test]
    fn test_distance_keeps_higher_peak() {
        let x = [0.0, 5.0, 0.0, 3.0, 0.0, 0.0, 0.0];
        let filter = PeakFilter {
            distance: 3,
            ..open_filter()
        };
        let peaks: Vec<usize> = find_peaks(&x, &filter).iter().map(|p| p.index).collect();
        assert_eq!(peaks, vec![1]);

        let peaks: Vec<usize> = find_peaks(&x, &open_filter()).iter().map(|p| p.index).collect();
        assert_eq!(peaks, vec![1, 3]);
    }

    #[test]
    fn test_prominence_uses_higher_base() {
        let x = [0.0, 2.0, 1.0, 3.0, 0.0];
        let (prom, left, right) = peak_prominence(&x, 1);
        assert_relative_eq!(prom, 1.0);
        assert_eq!((left, right), (0, 2));

        let (prom, _, _) = peak_prominence(&x, 3);
        assert_relative_eq!(prom, 3.0);

        let filter = PeakFilter {
            prominence: 1.5,
            ..open_filter()
        };
        let peaks: Vec<usize> = find_peaks(&x, &filter).iter().map(|p| p.index).collect();
        assert_eq!(peaks, vec![3]);
    }

    #[test]
    fn test_half_prominence_width() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0, 1.0, 0.0];
        let peaks = find_peaks(&x, &open_filter());
        assert_eq!(peaks.len(), 1);
        assert_relative_eq!(peaks[0].width, 4.0);

        let x = [0.0, 0.0, 4.0, 0.0, 0.0];
        let (prom, l, r) = peak_prominence(&x, 2);
        assert_relative_eq!(peak_width(&x, 2, prom, l, r, 0.5), 1.0);
    }

    #[test]
    fn test_min_width_filter() {
        let x = [0.0, 0.0, 4.0, 0.0, 0.0];
        let filter = PeakFilter {
            min_width: 2.0,
            ..open_filter()
        };
        assert!(find_peaks(&x, &filter).is_empty());
    }

    #[test]
    fn test_detect_peaks_on_gaussian() {
        let angles: Vec<f64> = (0..1501).map(|i| 10.0 + i as f64 * 0.02).collect();
        let corrected: Vec<f64> = angles
            .iter()
            .map(|x| (-(x - 25.0f64).powi(2) / (2.0 * 0.3 * 0.3)).exp())
            .collect();
        let spectrum = Spectrum::new(angles, corrected.clone()).unwrap();
        let detection = detect_peaks(&spectrum, &corrected, 0.008, &DetectionConfig::default());

        assert_eq!(detection.all.len(), 1);
        assert_eq!(detection.major.len(), 1);
        let peak = detection.all[0];
        assert_relative_eq!(peak.position, 25.0, epsilon = 1e-9);
        assert_relative_eq!(peak.height, 1.0, epsilon = 1e-9);
        // FWHM = 2.3548 σ
        assert_relative_eq!(peak.width, 2.3548 * 0.3, epsilon = 0.01);
    }

    #[test]
    fn test_detect_peaks_on_flat_signal_is_empty() {
        let angles: Vec<f64> = (0..100).map(|i| 10.0 + i as f64 * 0.1).collect();
        let spectrum = Spectrum::new(angles, vec![0.0; 100]).unwrap();
        let detection = detect_peaks(&spectrum, &[0.0; 100], 0.008, &DetectionConfig::default());
        assert!(detection.is_empty());
        assert!(detection.major.is_empty());
    }
}
