//! # fit 子命令实现
//!
//! 对谱图文件进行结晶度拟合。
//!
//! ## 功能
//! - 支持单文件和批量目录处理
//! - 并行批量拟合（rayon）
//! - 输出分析图 (PNG/SVG)、拟合数据 (CSV) 或完整报告 (JSON)
//! - 根据搜索诊断信息打印各阶段结果
//!
//! ## 依赖关系
//! - 使用 `cli/fit.rs` 定义的 FitArgs
//! - 使用 `batch/` 模块进行批量处理
//! - 使用 `xrd/` 模块进行拟合、导出和绘图
//! - 使用 `parsers/` 读取谱图

use crate::batch::{BatchRunner, FileCollector, ProcessResult};
use crate::cli::fit::{FitArgs, OutputFormat};
use crate::utils::{output, progress};

use xrdfit::error::{Result, XrdError};
use xrdfit::models::ModelStage;
use xrdfit::parsers;
use xrdfit::xrd::export::{self, SummaryRow};
use xrdfit::xrd::search::{AmorphousVerdict, CombinationStatus, Fallback};
use xrdfit::xrd::{self, AnalysisReport, FitConfig};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{Table, Tabled};

/// 执行 fit 命令
pub fn execute(args: FitArgs) -> Result<()> {
    output::print_header("XRD Crystallinity Fitting");

    let config = args.fit_config();
    config.validate()?;

    if args.input.is_file() {
        execute_single_file(&args, config)
    } else if args.input.is_dir() {
        execute_batch(&args, config)
    } else {
        Err(XrdError::FileNotFound {
            path: args.input.display().to_string(),
        })
    }
}

/// 输出设置（单文件与批量共用）
struct OutputSettings {
    format: OutputFormat,
    width: u32,
    height: u32,
    title: Option<String>,
}

/// 单文件模式
fn execute_single_file(args: &FitArgs, config: FitConfig) -> Result<()> {
    output::print_info(&format!("Single file mode: '{}'", args.input.display()));

    let spectrum = parsers::parse_spectrum_file(&args.input)?;
    let (lo, hi) = spectrum.range();
    output::print_success(&format!(
        "Loaded spectrum: {} ({} points, 2θ {:.2}°-{:.2}°)",
        spectrum.name(),
        spectrum.len(),
        lo,
        hi
    ));

    if !args.crystalline_positions().is_empty() {
        output::print_info(&format!(
            "Known crystalline peaks: {}",
            format_positions(args.crystalline_positions())
        ));
    }
    if !args.amorphous_positions().is_empty() {
        output::print_info(&format!(
            "Known amorphous halos: {}",
            format_positions(args.amorphous_positions())
        ));
    }

    let spinner = progress::create_spinner("Fitting components...");
    let report = xrd::analyze(
        &spectrum,
        args.crystalline_positions(),
        args.amorphous_positions(),
        &config,
    );
    spinner.finish_and_clear();
    let report = report?;

    print_narration(&report, args.verbose);
    print_gallery_table(&report);
    print_component_table(&report);

    let output_file = args.output_file();
    let settings = OutputSettings {
        format: args
            .format
            .unwrap_or_else(|| OutputFormat::from_path(&output_file)),
        width: args.width,
        height: args.height,
        title: args.title.clone(),
    };
    let written = write_outputs(&report, &output_file, &settings)?;
    for path in written {
        output::print_success(&format!("Saved '{}'", path.display()));
    }

    output::print_separator();
    output::print_done(&format!(
        "{}: crystallinity {:.2}% (R² = {:.4}, model: {})",
        report.sample,
        report.crystallinity(),
        report.r_squared(),
        report.best().name
    ));
    Ok(())
}

/// 批量处理配置
struct BatchFitConfig {
    output_dir: PathBuf,
    config: FitConfig,
    crystalline: Vec<f64>,
    amorphous: Vec<f64>,
    settings: OutputSettings,
    overwrite: bool,
}

/// 批量处理模式
fn execute_batch(args: &FitArgs, config: FitConfig) -> Result<()> {
    output::print_info(&format!("Batch mode: directory '{}'", args.input.display()));

    let files = FileCollector::new(args.input.clone())
        .with_pattern(&args.pattern)?
        .recursive(args.recursive)
        .collect();

    if files.is_empty() {
        output::print_warning(&format!(
            "No matching files found with pattern '{}'",
            args.pattern
        ));
        return Ok(());
    }

    output::print_info(&format!("Found {} spectrum files", files.len()));

    let output_dir = args.output_dir();
    fs::create_dir_all(&output_dir).map_err(|e| XrdError::FileWriteError {
        path: output_dir.display().to_string(),
        source: e,
    })?;

    let format = args.format.unwrap_or(OutputFormat::Png);
    output::print_info(&format!("Output format: {:?}", format));

    let batch = Arc::new(BatchFitConfig {
        output_dir,
        config,
        crystalline: args.crystalline_positions().to_vec(),
        amorphous: args.amorphous_positions().to_vec(),
        settings: OutputSettings {
            format,
            width: args.width,
            height: args.height,
            title: None,
        },
        overwrite: args.overwrite,
    });

    let runner = BatchRunner::new(args.jobs);
    let result = runner.run(files, |file| process_batch_file(file, &batch));

    output::print_separator();
    output::print_success(&format!(
        "Batch complete: {} of {} fitted, {} skipped, {} failed",
        result.success(),
        result.total(),
        result.skipped,
        result.failed()
    ));

    print_summary_table(&result.outputs);

    if let Some(summary_path) = &args.summary {
        export::summary_to_csv(&result.outputs, summary_path)?;
        output::print_success(&format!("Summary saved to '{}'", summary_path.display()));
    }

    if !result.failures.is_empty() {
        output::print_warning("Failed files:");
        for (path, err) in result.failures.iter().take(10) {
            output::print_error(&format!("  {}: {}", path, err));
        }
        if result.failures.len() > 10 {
            output::print_warning(&format!("  ... and {} more", result.failures.len() - 10));
        }
    }

    Ok(())
}

/// 处理批量模式中的单个文件
fn process_batch_file(input: &PathBuf, batch: &Arc<BatchFitConfig>) -> ProcessResult<SummaryRow> {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let output_file = batch
        .output_dir
        .join(format!("{}_fit.{}", stem, batch.settings.format.extension()));

    if output_file.exists() && !batch.overwrite {
        return ProcessResult::Skipped(format!(
            "Output exists, skipping: {}",
            output_file.display()
        ));
    }

    let fitted = parsers::parse_spectrum_file(input)
        .and_then(|spectrum| xrd::analyze(&spectrum, &batch.crystalline, &batch.amorphous, &batch.config))
        .and_then(|report| {
            write_outputs(&report, &output_file, &batch.settings)?;
            Ok(report)
        });

    match fitted {
        Ok(report) => ProcessResult::Success(SummaryRow::from_report(
            &input.display().to_string(),
            &report,
        )),
        Err(e) => ProcessResult::Failed(input.display().to_string(), e.to_string()),
    }
}

/// 按格式写出结果，返回写出的文件
fn write_outputs(report: &AnalysisReport, path: &Path, settings: &OutputSettings) -> Result<Vec<PathBuf>> {
    match settings.format {
        OutputFormat::Png | OutputFormat::Svg => {
            let title = settings.title.as_deref().unwrap_or(&report.sample);
            xrd::plot::generate_fit_plot(
                report,
                path,
                title,
                settings.width,
                settings.height,
                settings.format == OutputFormat::Svg,
            )?;
            Ok(vec![path.to_path_buf()])
        }
        OutputFormat::Csv => {
            export::fitted_to_csv(report, path)?;
            let components = components_path(path);
            export::components_to_csv(report, &components)?;
            Ok(vec![path.to_path_buf(), components])
        }
        OutputFormat::Json => {
            export::report_to_json(report, path)?;
            Ok(vec![path.to_path_buf()])
        }
    }
}

/// "fit.csv" → "fit_components.csv"
fn components_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("xrd_fit");
    path.with_file_name(format!("{}_components.csv", stem))
}

fn format_positions(positions: &[f64]) -> String {
    positions
        .iter()
        .map(|p| format!("{}°", p))
        .collect::<Vec<_>>()
        .join(", ")
}

// ─────────────────────────────────────────────────────────────
// 阶段叙述与表格
// ─────────────────────────────────────────────────────────────

/// 根据搜索诊断信息打印各阶段结果
fn print_narration(report: &AnalysisReport, verbose: bool) {
    let pre = &report.preprocessing;
    let search = &report.search;

    output::print_stage(
        "Preprocess",
        &format!(
            "SNR {:.1}, detection prominence {:.4}",
            pre.signal_to_noise, pre.prominence
        ),
    );
    if pre.low_snr(&report.config.preprocess) {
        output::print_warning("Low signal-to-noise ratio; prominence threshold raised");
    }
    if pre.is_mostly_amorphous {
        output::print_warning("Spectrum appears mostly amorphous");
    }

    output::print_stage(
        "Detect",
        &format!(
            "{} candidate peaks ({} major)",
            report.detection.all.len(),
            report.detection.major.len()
        ),
    );

    for (label, line) in search_stages(report) {
        output::print_stage(label, &line);
    }
    if verbose && !search.peak_trials.is_empty() {
        print_trial_table(report);
    }

    match search.fallback {
        Some(Fallback::BestCombination) => {
            output::print_warning("No peak met the strict criteria; using the best combination")
        }
        Some(Fallback::BestIndividualPeak) => {
            output::print_warning("No peak met the strict criteria; using the best individual peak")
        }
        None => {}
    }

    let best = report.best();
    output::print_stage("Selected", &best.name);
    output::print_metric("Crystallinity", &format!("{:.2} %", best.fit.crystallinity));
    output::print_metric("R²", &format!("{:.5}", best.fit.r_squared));
    output::print_metric("RMSE", &format!("{:.5}", best.fit.rmse));
    if verbose {
        output::print_metric("Solver strategy", &best.fit.strategy.to_string());
        output::print_metric("Crystalline area", &format!("{:.4}", best.fit.crystalline_area()));
        output::print_metric("Amorphous area", &format!("{:.4}", best.fit.amorphous_area()));
    }
}

/// 搜索各阶段的标签和结果描述，顺序与执行顺序一致
fn search_stages(report: &AnalysisReport) -> Vec<(&'static str, String)> {
    let search = &report.search;
    let r2_of = |stage: ModelStage| {
        search
            .gallery
            .iter()
            .find(|m| m.stage == stage)
            .map(|m| m.fit.r_squared)
    };
    let mut stages = Vec::new();

    let verdict = match search.amorphous_verdict {
        AmorphousVerdict::Excellent => "excellent",
        AmorphousVerdict::Acceptable => "acceptable",
        AmorphousVerdict::Insufficient => "insufficient",
    };
    stages.push((
        "Phase 1",
        format!(
            "Amorphous-only fit R² = {:.4} ({})",
            r2_of(ModelStage::AmorphousOnly).unwrap_or(0.0),
            verdict
        ),
    ));

    if report.known_crystalline.is_empty() {
        stages.push(("Phase 2", "skipped, no known crystalline peaks".to_string()));
    } else {
        let passed: Vec<f64> = search
            .peak_trials
            .iter()
            .filter(|t| t.successful)
            .map(|t| t.position)
            .collect();
        stages.push((
            "Phase 2A",
            format!(
                "{} of {} individual peaks passed: {}",
                passed.len(),
                search.peak_trials.len(),
                if passed.is_empty() {
                    "none".to_string()
                } else {
                    format_positions(&passed)
                }
            ),
        ));

        if !search.combinations.is_empty() {
            let count = |status: CombinationStatus| {
                search
                    .combinations
                    .iter()
                    .filter(|c| c.status == status)
                    .count()
            };
            stages.push((
                "Phase 2B",
                format!(
                    "{} combinations fitted, {} pruned, {} timed out",
                    search.combinations_fitted(),
                    count(CombinationStatus::Pruned),
                    count(CombinationStatus::TimedOut)
                ),
            ));
        }
    }

    let combined = match r2_of(ModelStage::Combined) {
        Some(r2) => format!(
            "Combined fit of {} with R² = {:.4} ({})",
            format_positions(&search.successful_peaks),
            r2,
            if search.phase_success.combined {
                "accepted"
            } else {
                "insufficient"
            }
        ),
        None => "skipped, no successful crystalline peaks to combine".to_string(),
    };
    stages.push(("Phase 3", combined));

    stages
}

fn print_gallery_table(report: &AnalysisReport) {
    #[derive(Tabled)]
    struct ModelRow {
        #[tabled(rename = "Model")]
        name: String,
        #[tabled(rename = "Peaks (°)")]
        peaks: String,
        #[tabled(rename = "R²")]
        r_squared: String,
        #[tabled(rename = "RMSE")]
        rmse: String,
        #[tabled(rename = "Crystallinity (%)")]
        crystallinity: String,
        #[tabled(rename = "Solver")]
        strategy: String,
    }

    let rows: Vec<ModelRow> = report
        .search
        .gallery
        .iter()
        .map(|m| ModelRow {
            name: m.name.clone(),
            peaks: m
                .crystalline_positions
                .iter()
                .map(|p| format!("{}", p))
                .collect::<Vec<_>>()
                .join(", "),
            r_squared: format!("{:.4}", m.fit.r_squared),
            rmse: format!("{:.5}", m.fit.rmse),
            crystallinity: format!("{:.2}", m.fit.crystallinity),
            strategy: m.fit.strategy.to_string(),
        })
        .collect();

    if !rows.is_empty() {
        output::print_header("Candidate Models");
        println!("{}", Table::new(&rows));
    }
}

fn print_component_table(report: &AnalysisReport) {
    #[derive(Tabled)]
    struct ComponentRow {
        #[tabled(rename = "Kind")]
        kind: String,
        #[tabled(rename = "2θ (°)")]
        center: String,
        #[tabled(rename = "Amplitude")]
        amplitude: String,
        #[tabled(rename = "σ (°)")]
        sigma: String,
        #[tabled(rename = "H/W")]
        hw_ratio: String,
        #[tabled(rename = "Area")]
        area: String,
    }

    let rows: Vec<ComponentRow> = report
        .best()
        .fit
        .components()
        .map(|c| ComponentRow {
            kind: c.kind.to_string(),
            center: format!("{:.3}", c.center),
            amplitude: format!("{:.4}", c.amplitude),
            sigma: format!("{:.3}", c.sigma),
            hw_ratio: format!("{:.3}", c.hw_ratio),
            area: format!("{:.4}", c.area),
        })
        .collect();

    if !rows.is_empty() {
        output::print_header("Fitted Components");
        println!("{}", Table::new(&rows));
    }
}

fn print_trial_table(report: &AnalysisReport) {
    #[derive(Tabled)]
    struct TrialRow {
        #[tabled(rename = "2θ (°)")]
        position: String,
        #[tabled(rename = "Quality")]
        quality: String,
        #[tabled(rename = "Local ΔR²")]
        local_r2: String,
        #[tabled(rename = "SNR")]
        snr: String,
        #[tabled(rename = "Corr")]
        correlation: String,
        #[tabled(rename = "R²")]
        r_squared: String,
        #[tabled(rename = "Pass")]
        successful: String,
    }

    let rows: Vec<TrialRow> = report
        .search
        .peak_trials
        .iter()
        .map(|t| TrialRow {
            position: format!("{}", t.position),
            quality: format!("{:.3}", t.metrics.quality_score),
            local_r2: format!("{:.4}", t.metrics.local_r2_improvement),
            snr: format!("{:.1}", t.metrics.signal_to_noise),
            correlation: format!("{:.3}", t.metrics.correlation),
            r_squared: format!("{:.4}", t.r_squared),
            successful: if t.successful { "yes" } else { "no" }.to_string(),
        })
        .collect();

    if !rows.is_empty() {
        println!("{}", Table::new(&rows));
    }
}

fn print_summary_table(rows: &[SummaryRow]) {
    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "File")]
        file: String,
        #[tabled(rename = "Model")]
        model: String,
        #[tabled(rename = "Crystallinity (%)")]
        crystallinity: String,
        #[tabled(rename = "R²")]
        r_squared: String,
    }

    let table_rows: Vec<Row> = rows
        .iter()
        .map(|r| Row {
            file: Path::new(&r.file)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&r.file)
                .to_string(),
            model: r.model.clone(),
            crystallinity: format!("{:.2}", r.crystallinity),
            r_squared: format!("{:.4}", r.r_squared),
        })
        .collect();

    if !table_rows.is_empty() {
        output::print_header("Batch Summary");
        println!("{}", Table::new(&table_rows));
    }
}
