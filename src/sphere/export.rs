//! Report export
//!
//! Turns an analytics projection into downloadable bytes: CSV, a spreadsheet
//! (HTML table served with the spreadsheet MIME type), a printable HTML report
//! and a PNG bar chart of monthly CO2 reduction. Output depends only on the
//! input data and the current time, which goes into file names and the
//! "Generated" line.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyMetric {
    pub month: String,
    pub co2_reduction: f64,
    pub actions_completed: u64,
    pub participants: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionalImpact {
    pub region: String,
    pub co2_reduction: f64,
    pub impact_percentage: u32,
    pub communities: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTypeShare {
    pub name: String,
    pub value: f64,
    pub percentage: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TotalImpact {
    pub co2_reduction: f64,
    pub participants: u64,
    pub communities: u64,
}

/// Analytics projection handed to every exporter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportData {
    pub metrics: Vec<MonthlyMetric>,
    pub regional: Vec<RegionalImpact>,
    pub action_types: Vec<ActionTypeShare>,
    pub total_impact: TotalImpact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    /// HTML table with a spreadsheet MIME type
    Xlsx,
    /// Printable HTML
    Pdf,
    Png,
}

impl ExportFormat {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "xlsx" | "excel" => Some(ExportFormat::Xlsx),
            "pdf" | "html" => Some(ExportFormat::Pdf),
            "png" | "image" => Some(ExportFormat::Png),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Pdf => "html",
            ExportFormat::Png => "png",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv;charset=utf-8;",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet;charset=utf-8;"
            }
            ExportFormat::Pdf => "text/html;charset=utf-8;",
            ExportFormat::Png => "image/png",
        }
    }
}

/// A finished export, ready to be written somewhere
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub file_name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

impl ExportArtifact {
    /// Writes the artifact into `dir` and returns the full path
    pub async fn save_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(&self.file_name);
        tokio::fs::write(&path, &self.bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("[Export] 💾 saved {} ({} bytes)", path.display(), self.bytes.len());
        Ok(path)
    }
}

/// Renders `data` in `format`, stamping the file name with the current time
pub fn export(data: &ExportData, format: ExportFormat, base_name: &str) -> Result<ExportArtifact> {
    export_at(data, format, base_name, Local::now())
}

pub fn export_at(
    data: &ExportData,
    format: ExportFormat,
    base_name: &str,
    now: DateTime<Local>,
) -> Result<ExportArtifact> {
    let generated = now.format("%-m/%-d/%Y").to_string();
    let bytes = match format {
        ExportFormat::Csv => to_csv(data, &generated).into_bytes(),
        ExportFormat::Xlsx => to_spreadsheet_html(data, &generated).into_bytes(),
        ExportFormat::Pdf => to_report_html(data, &generated).into_bytes(),
        ExportFormat::Png => to_png(data)?,
    };
    Ok(ExportArtifact {
        file_name: format!("{}-{}.{}", base_name, now.timestamp_millis(), format.extension()),
        mime: format.mime(),
        bytes,
    })
}

pub fn to_csv(data: &ExportData, generated: &str) -> String {
    let mut metrics = String::from("Month,CO2 Reduction (kg),Actions Completed,Participants");
    for m in &data.metrics {
        metrics.push('\n');
        metrics.push_str(&csv_line(&[
            m.month.clone(),
            m.co2_reduction.to_string(),
            m.actions_completed.to_string(),
            m.participants.to_string(),
        ]));
    }

    let mut regional = String::from("Region,CO2 Reduction (kg),Impact Percentage,Communities");
    for r in &data.regional {
        regional.push('\n');
        regional.push_str(&csv_line(&[
            r.region.clone(),
            r.co2_reduction.to_string(),
            format!("{}%", r.impact_percentage),
            r.communities.to_string(),
        ]));
    }

    let mut types = String::from("Action Type,Value (kg),Percentage");
    for a in &data.action_types {
        types.push('\n');
        types.push_str(&csv_line(&[
            a.name.clone(),
            a.value.to_string(),
            format!("{}%", a.percentage),
        ]));
    }

    let t = &data.total_impact;
    let summary = format!(
        "Metric,Value\nTotal CO2 Reduction,{}\nTotal Participants,{}\nTotal Communities,{}",
        t.co2_reduction, t.participants, t.communities
    );

    format!(
        "Climate Impact Report\nGenerated: {}\n\nIMPACT SUMMARY\n{}\n\nMONTHLY METRICS\n{}\n\nREGIONAL DATA\n{}\n\nACTION TYPES\n{}",
        csv_field(generated), summary, metrics, regional, types
    )
}

/// Quotes a field holding a separator, quote or line break (RFC 4180)
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line(fields: &[String]) -> String {
    fields.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(",")
}

pub fn to_spreadsheet_html(data: &ExportData, generated: &str) -> String {
    let t = &data.total_impact;
    let mut html = String::from("<table>\n");
    html.push_str("<tr><th colspan=\"4\">CLIMATE IMPACT REPORT</th></tr>\n");
    html.push_str(&format!("<tr><th colspan=\"4\">Generated: {}</th></tr>\n", generated));
    html.push_str("<tr><td></td></tr>\n<tr><th colspan=\"4\">IMPACT SUMMARY</th></tr>\n");
    html.push_str("<tr><th>Metric</th><th>Value</th></tr>\n");
    html.push_str(&format!("<tr><td>Total CO2 Reduction</td><td>{}</td></tr>\n", t.co2_reduction));
    html.push_str(&format!("<tr><td>Total Participants</td><td>{}</td></tr>\n", t.participants));
    html.push_str(&format!("<tr><td>Total Communities</td><td>{}</td></tr>\n", t.communities));

    html.push_str("<tr><td></td></tr>\n<tr><th colspan=\"4\">MONTHLY METRICS</th></tr>\n");
    html.push_str("<tr><th>Month</th><th>CO2 Reduction (kg)</th><th>Actions Completed</th><th>Participants</th></tr>\n");
    for m in &data.metrics {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape(&m.month), m.co2_reduction, m.actions_completed, m.participants
        ));
    }

    html.push_str("<tr><td></td></tr>\n<tr><th colspan=\"4\">REGIONAL DATA</th></tr>\n");
    html.push_str("<tr><th>Region</th><th>CO2 Reduction (kg)</th><th>Impact %</th><th>Communities</th></tr>\n");
    for r in &data.regional {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}%</td><td>{}</td></tr>\n",
            escape(&r.region), r.co2_reduction, r.impact_percentage, r.communities
        ));
    }

    html.push_str("<tr><td></td></tr>\n<tr><th colspan=\"4\">ACTION TYPES</th></tr>\n");
    html.push_str("<tr><th>Action Type</th><th>Value (kg)</th><th>Percentage</th></tr>\n");
    for a in &data.action_types {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}%</td></tr>\n",
            escape(&a.name), a.value, a.percentage
        ));
    }
    html.push_str("</table>\n");
    html
}

const REPORT_STYLE: &str = r#"body { font-family: Arial, sans-serif; margin: 20px; }
h1 { color: #10b981; }
h2 { color: #3b82f6; border-bottom: 2px solid #3b82f6; padding-bottom: 5px; }
table { width: 100%; border-collapse: collapse; margin: 20px 0; }
th, td { border: 1px solid #ddd; padding: 12px; text-align: left; }
th { background-color: #10b981; color: white; }
.metric-card { background-color: #f0fdf4; padding: 20px; margin: 20px 0; border-radius: 8px; }
.value { font-size: 24px; font-weight: bold; color: #10b981; }"#;

pub fn to_report_html(data: &ExportData, generated: &str) -> String {
    let t = &data.total_impact;
    let mut body = String::new();
    body.push_str("<h1>Climate Impact Report</h1>\n");
    body.push_str(&format!("<p>Generated: {}</p>\n", generated));
    body.push_str("<h2>Impact Summary</h2>\n<div class=\"metric-card\">\n");
    body.push_str(&format!(
        "<p><strong>Total CO2 Reduction:</strong> <span class=\"value\">{} kg</span></p>\n",
        group_thousands(t.co2_reduction)
    ));
    body.push_str(&format!(
        "<p><strong>Total Participants:</strong> <span class=\"value\">{}</span></p>\n",
        group_thousands(t.participants as f64)
    ));
    body.push_str(&format!(
        "<p><strong>Total Communities:</strong> <span class=\"value\">{}</span></p>\n</div>\n",
        group_thousands(t.communities as f64)
    ));

    body.push_str("<h2>Monthly Metrics</h2>\n<table>\n");
    body.push_str("<tr><th>Month</th><th>CO2 Reduction (kg)</th><th>Actions Completed</th><th>Participants</th></tr>\n");
    for m in &data.metrics {
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape(&m.month),
            group_thousands(m.co2_reduction),
            m.actions_completed,
            m.participants
        ));
    }
    body.push_str("</table>\n<h2>Regional Data</h2>\n<table>\n");
    body.push_str("<tr><th>Region</th><th>CO2 Reduction (kg)</th><th>Impact %</th><th>Communities</th></tr>\n");
    for r in &data.regional {
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}%</td><td>{}</td></tr>\n",
            escape(&r.region),
            group_thousands(r.co2_reduction),
            r.impact_percentage,
            r.communities
        ));
    }
    body.push_str("</table>\n<h2>Action Types</h2>\n<table>\n");
    body.push_str("<tr><th>Action Type</th><th>Value (kg)</th><th>Percentage</th></tr>\n");
    for a in &data.action_types {
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}%</td></tr>\n",
            escape(&a.name),
            group_thousands(a.value),
            a.percentage
        ));
    }
    body.push_str("</table>\n");

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<style>\n{}\n</style>\n</head>\n<body>\n{}</body>\n</html>\n",
        REPORT_STYLE, body
    )
}

const CHART_WIDTH: u32 = 640;
const CHART_HEIGHT: u32 = 360;
const CHART_MARGIN: u32 = 24;
const BAR_COLOR: Rgb<u8> = Rgb([16, 185, 129]);
const AXIS_COLOR: Rgb<u8> = Rgb([148, 163, 184]);

/// Bar chart of monthly CO2 reduction on a white background
pub fn to_png(data: &ExportData) -> Result<Vec<u8>> {
    let mut img: RgbImage = ImageBuffer::from_pixel(CHART_WIDTH, CHART_HEIGHT, Rgb([255, 255, 255]));
    let baseline = CHART_HEIGHT - CHART_MARGIN;
    let plot_height = baseline - CHART_MARGIN;

    for x in CHART_MARGIN..CHART_WIDTH - CHART_MARGIN {
        img.put_pixel(x, baseline, AXIS_COLOR);
    }
    for y in CHART_MARGIN..=baseline {
        img.put_pixel(CHART_MARGIN, y, AXIS_COLOR);
    }

    let bars = data.metrics.len() as u32;
    let peak = data
        .metrics
        .iter()
        .map(|m| m.co2_reduction)
        .fold(0.0_f64, f64::max);
    if bars > 0 && peak > 0.0 {
        let slot = (CHART_WIDTH - 2 * CHART_MARGIN - 1) / bars;
        let bar_width = (slot * 2 / 3).max(1);
        for (i, m) in data.metrics.iter().enumerate() {
            let height = ((m.co2_reduction.max(0.0) / peak) * plot_height as f64).round() as u32;
            let left = CHART_MARGIN + 1 + i as u32 * slot + (slot - bar_width) / 2;
            for x in left..left + bar_width {
                for y in baseline.saturating_sub(height)..baseline {
                    img.put_pixel(x, y, BAR_COLOR);
                }
            }
        }
    }

    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, ImageFormat::Png)
        .context("failed to encode chart")?;
    Ok(cursor.into_inner())
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `24000` -> `24,000`, keeping up to three decimals
fn group_thousands(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    let negative = rounded < 0.0;
    let text = format!("{}", rounded.abs());
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (text, None),
    };
    let mut grouped = String::new();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let mut out = if negative { format!("-{}", grouped) } else { grouped };
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(&frac);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> ExportData {
        ExportData {
            metrics: vec![MonthlyMetric {
                month: "Jan".into(),
                co2_reduction: 1200.0,
                actions_completed: 45,
                participants: 120,
            }],
            regional: vec![RegionalImpact {
                region: "Asia Tenggara".into(),
                co2_reduction: 8500.0,
                impact_percentage: 35,
                communities: 4,
            }],
            action_types: vec![ActionTypeShare {
                name: "Renewable".into(),
                value: 4500.0,
                percentage: 30,
            }],
            total_impact: TotalImpact {
                co2_reduction: 24000.0,
                participants: 1200,
                communities: 140,
            },
        }
    }

    #[test]
    fn csv_contains_metric_and_summary_lines() {
        let csv = to_csv(&sample(), "1/1/2026");
        let lines: Vec<&str> = csv.lines().collect();
        assert!(lines.contains(&"Jan,1200,45,120"));
        assert!(lines.contains(&"Total CO2 Reduction,24000"));
        assert!(lines.contains(&"Asia Tenggara,8500,35%,4"));
        assert!(lines.contains(&"Renewable,4500,30%"));
    }

    #[test]
    fn csv_quotes_fields_with_separators() {
        let mut data = sample();
        data.regional[0].region = "Berlin, Germany".into();
        data.action_types[0].name = "Solar \"rooftop\"".into();
        let csv = to_csv(&data, "1/1/2026");
        let lines: Vec<&str> = csv.lines().collect();
        assert!(lines.contains(&"\"Berlin, Germany\",8500,35%,4"));
        assert!(lines.contains(&"\"Solar \"\"rooftop\"\"\",4500,30%"));
        assert!(lines.contains(&"Jan,1200,45,120"));

        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn file_name_and_mime_follow_format() {
        let now = Local.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let a = export_at(&sample(), ExportFormat::Pdf, "climate-report", now).unwrap();
        assert_eq!(a.file_name, "climate-report-1700000000000.html");
        assert_eq!(a.mime, "text/html;charset=utf-8;");
        let html = String::from_utf8(a.bytes).unwrap();
        assert!(html.contains("24,000 kg"));

        let x = export_at(&sample(), ExportFormat::Xlsx, "r", now).unwrap();
        assert!(x.file_name.ends_with(".xlsx"));
        assert!(x.mime.starts_with("application/vnd.openxmlformats"));
    }

    #[test]
    fn png_is_a_decodable_chart() {
        let bytes = to_png(&sample()).unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!(img.width(), CHART_WIDTH);
        assert_eq!(img.height(), CHART_HEIGHT);
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(24000.0), "24,000");
        assert_eq!(group_thousands(999.0), "999");
        assert_eq!(group_thousands(1234567.5), "1,234,567.5");
    }

    #[tokio::test]
    async fn save_writes_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = export(&sample(), ExportFormat::Csv, "climate-report").unwrap();
        let path = artifact.save_to(dir.path()).await.unwrap();
        let written = tokio::fs::read_to_string(path).await.unwrap();
        assert!(written.starts_with("Climate Impact Report"));
    }
}
