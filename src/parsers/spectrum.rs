//! # 谱图文件解析器
//!
//! 解析两列文本格式的 XRD 谱图（.xy / .csv / .txt / .dat）。
//!
//! ## 格式说明
//! ```text
//! # 注释行（跳过）
//! 2Theta,Intensity        # 非数值表头（跳过）
//! 10.00,  152.0           # 分隔符：逗号 / 分号 / 制表符 / 空白
//! 10.02   149.5   0.3     # 多余的列被忽略
//! ```
//!
//! 数据行按 2θ 排序后交给 `Spectrum::new` 校验（重复角度会被拒绝）。
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs` 使用
//! - 使用 `models/spectrum.rs`

use crate::error::{Result, XrdError};
use crate::models::Spectrum;

use regex::Regex;
use std::fs;
use std::path::Path;

/// 解析谱图文件，样品名取文件名主干
pub fn parse_spectrum_file(path: &Path) -> Result<Spectrum> {
    if !path.exists() {
        return Err(XrdError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let content = fs::read_to_string(path).map_err(|e| XrdError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown");

    parse_spectrum_content(&content, name).map_err(|e| match e {
        XrdError::ParseError { reason, .. } => XrdError::ParseError {
            path: path.display().to_string(),
            reason,
        },
        other => other,
    })
}

/// 从字符串内容解析谱图
pub fn parse_spectrum_content(content: &str, name: &str) -> Result<Spectrum> {
    let separator = Regex::new(r"[,;\s]+").map_err(|e| XrdError::Other(e.to_string()))?;

    let mut rows: Vec<(f64, f64)> = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = separator.split(line).filter(|s| !s.is_empty());
        let angle = match fields.next().and_then(|s| s.parse::<f64>().ok()) {
            Some(v) => v,
            // 表头
            None => continue,
        };
        let intensity = fields
            .next()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| XrdError::ParseError {
                path: name.to_string(),
                reason: format!("Missing intensity column at line {}", line_no + 1),
            })?;

        rows.push((angle, intensity));
    }

    if rows.is_empty() {
        return Err(XrdError::ParseError {
            path: name.to_string(),
            reason: "No numeric data rows found".to_string(),
        });
    }

    rows.sort_by(|a, b| a.0.total_cmp(&b.0));
    let (angles, intensities): (Vec<f64>, Vec<f64>) = rows.into_iter().unzip();

    Ok(Spectrum::new(angles, intensities)?.with_name(name))
}
