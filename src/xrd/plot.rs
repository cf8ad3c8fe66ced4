//! # 拟合结果图表
//!
//! 使用 `plotters` 生成上下两栏的分析图：
//! - 上栏：基线校正谱图、检测到的峰、已知结晶/非晶峰位、成功峰的评估窗口
//! - 下栏：选中模型的总拟合、结晶与非晶合成曲线、各分量曲线
//!
//! 支持 PNG 和 SVG 输出。
//!
//! ## 依赖关系
//! - 被 `commands/fit.rs` 调用
//! - 使用 `xrd/report.rs` 的 `AnalysisReport`
//! - 使用 `xrd/gaussian.rs` 计算分量曲线

use crate::error::{Result, XrdError};
use crate::models::ComponentKind;
use crate::xrd::gaussian::gaussian_curve;
use crate::xrd::AnalysisReport;

use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::Path;

const DATA_COLOR: RGBColor = RGBColor(60, 60, 60);
const TOTAL_COLOR: RGBColor = RGBColor(204, 0, 0);
const CRYSTALLINE_COLOR: RGBColor = RGBColor(0, 102, 204);
const AMORPHOUS_COLOR: RGBColor = RGBColor(0, 153, 76);
const MARKER_COLOR: RGBColor = RGBColor(230, 120, 0);

fn plot_err<E: std::fmt::Debug>(e: E) -> XrdError {
    XrdError::PlotError(format!("{:?}", e))
}

/// 生成分析图
pub fn generate_fit_plot(
    report: &AnalysisReport,
    output_path: &Path,
    title: &str,
    width: u32,
    height: u32,
    use_svg: bool,
) -> Result<()> {
    if use_svg {
        let root = SVGBackend::new(output_path, (width, height)).into_drawing_area();
        draw_report(&root, report, title)?;
        root.present().map_err(plot_err)?;
    } else {
        let root = BitMapBackend::new(output_path, (width, height)).into_drawing_area();
        draw_report(&root, report, title)?;
        root.present().map_err(plot_err)?;
    }
    Ok(())
}

fn draw_report<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    report: &AnalysisReport,
    title: &str,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE).map_err(plot_err)?;
    let panels = root.split_evenly((2, 1));
    draw_detection_panel(&panels[0], report, title)?;
    draw_fit_panel(&panels[1], report)?;
    Ok(())
}

fn x_range(report: &AnalysisReport) -> (f64, f64) {
    match (report.angles.first(), report.angles.last()) {
        (Some(lo), Some(hi)) if hi > lo => (*lo, *hi),
        _ => (0.0, 1.0),
    }
}

fn y_range(series: &[&[f64]]) -> (f64, f64) {
    let values = series.iter().flat_map(|s| s.iter().copied()).filter(|v| v.is_finite());
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || hi <= lo {
        return (0.0, 1.0);
    }
    let pad = (hi - lo) * 0.08;
    (lo.min(0.0) - pad, hi + pad)
}

/// 上栏：峰检测
fn draw_detection_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    report: &AnalysisReport,
    title: &str,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let corrected = &report.preprocessing.corrected;
    let (x_min, x_max) = x_range(report);
    let (y_min, y_max) = y_range(&[corrected.as_slice()]);

    let title = format!(
        "{}: peak detection (SNR {:.1})",
        title, report.preprocessing.signal_to_noise
    );
    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 22).into_font())
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("2θ (°)")
        .y_desc("Corrected Intensity")
        .x_label_style(("sans-serif", 14))
        .y_label_style(("sans-serif", 14))
        .axis_desc_style(("sans-serif", 16))
        .draw()
        .map_err(plot_err)?;

    // 成功峰的评估窗口
    let half = report.config.window_width / 2.0;
    for &p in &report.search.successful_peaks {
        chart
            .draw_series(std::iter::once(Rectangle::new(
                [(p - half, y_min), (p + half, y_max)],
                CRYSTALLINE_COLOR.mix(0.08).filled(),
            )))
            .map_err(plot_err)?;
    }

    chart
        .draw_series(LineSeries::new(
            report.angles.iter().copied().zip(corrected.iter().copied()),
            DATA_COLOR.stroke_width(1),
        ))
        .map_err(plot_err)?
        .label("corrected data")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], DATA_COLOR));

    chart
        .draw_series(
            report
                .detection
                .all
                .iter()
                .map(|p| Circle::new((p.position, corrected[p.index]), 3, MARKER_COLOR.filled())),
        )
        .map_err(plot_err)?
        .label("detected peaks")
        .legend(|(x, y)| Circle::new((x + 10, y), 3, MARKER_COLOR.filled()));

    chart
        .draw_series(report.detection.major.iter().map(|p| {
            TriangleMarker::new((p.position, corrected[p.index] + (y_max - y_min) * 0.04), 6, RED.filled())
        }))
        .map_err(plot_err)?
        .label("major peaks")
        .legend(|(x, y)| TriangleMarker::new((x + 10, y), 6, RED.filled()));

    for (positions, color) in [
        (&report.known_crystalline, CRYSTALLINE_COLOR),
        (&report.known_amorphous, AMORPHOUS_COLOR),
    ] {
        for &p in positions.iter().filter(|p| **p >= x_min && **p <= x_max) {
            chart
                .draw_series(std::iter::once(PathElement::new(
                    vec![(p, y_min), (p, y_max)],
                    color.mix(0.6).stroke_width(1),
                )))
                .map_err(plot_err)?;
        }
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .label_font(("sans-serif", 13))
        .draw()
        .map_err(plot_err)?;

    Ok(())
}

/// 下栏：选中模型
fn draw_fit_panel<DB: DrawingBackend>(area: &DrawingArea<DB, Shift>, report: &AnalysisReport) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let best = report.best();
    let fit = &best.fit;
    let corrected = &report.preprocessing.corrected;
    let (x_min, x_max) = x_range(report);
    let (y_min, y_max) = y_range(&[corrected.as_slice(), fit.total_fit.as_slice()]);

    let title = format!(
        "{} | crystallinity {:.1}% | R² {:.4}",
        best.name, fit.crystallinity, fit.r_squared
    );
    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 22).into_font())
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("2θ (°)")
        .y_desc("Corrected Intensity")
        .x_label_style(("sans-serif", 14))
        .y_label_style(("sans-serif", 14))
        .axis_desc_style(("sans-serif", 16))
        .draw()
        .map_err(plot_err)?;

    let xs = &report.angles;

    // 各分量
    for c in fit.components() {
        let color = match c.kind {
            ComponentKind::Crystalline => CRYSTALLINE_COLOR,
            ComponentKind::Amorphous => AMORPHOUS_COLOR,
        };
        let curve = gaussian_curve(xs, c.amplitude, c.center, c.sigma);
        chart
            .draw_series(LineSeries::new(
                xs.iter().copied().zip(curve),
                color.mix(0.35).stroke_width(1),
            ))
            .map_err(plot_err)?;
    }

    let lines: [(&str, &[f64], RGBColor, u32); 4] = [
        ("data", corrected.as_slice(), DATA_COLOR, 1),
        ("crystalline", fit.crystalline_fit.as_slice(), CRYSTALLINE_COLOR, 2),
        ("amorphous", fit.amorphous_fit.as_slice(), AMORPHOUS_COLOR, 2),
        ("total fit", fit.total_fit.as_slice(), TOTAL_COLOR, 2),
    ];
    for (label, ys, color, stroke) in lines {
        chart
            .draw_series(LineSeries::new(
                xs.iter().copied().zip(ys.iter().copied()),
                color.stroke_width(stroke),
            ))
            .map_err(plot_err)?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .label_font(("sans-serif", 13))
        .draw()
        .map_err(plot_err)?;

    Ok(())
}
