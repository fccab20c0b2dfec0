use crate::metrics::EvaluationMetrics;
use crate::model_selection::{DataSplit, Partition, PartitionSizes};
use crate::models::{GatingDecision, ModelArtifact, PredictionJob};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Writes evaluation output for a finished fit.
pub trait Reporter: Send + Sync {
    /// Returns the directory the report was written to.
    fn render_and_save(
        &self,
        job: &PredictionJob,
        split: &DataSplit,
        artifact: &ModelArtifact,
        gating: &GatingDecision,
        destination: &Path,
    ) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionReport {
    pub partition: Partition,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub metrics: Option<EvaluationMetrics>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureReport {
    pub name: String,
    pub importance: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSummary {
    pub job_id: i64,
    pub job_name: String,
    pub model_id: Uuid,
    pub model_type: &'static str,
    pub trained_at: DateTime<Utc>,
    pub sizes: PartitionSizes,
    pub partitions: Vec<PartitionReport>,
    pub features: Vec<FeatureReport>,
    pub best_iteration: Option<usize>,
    pub gating: GatingDecision,
}

pub fn summarize_training(
    job: &PredictionJob,
    split: &DataSplit,
    artifact: &ModelArtifact,
    gating: &GatingDecision,
) -> TrainingSummary {
    let partitions = [Partition::Train, Partition::Validation, Partition::Test]
        .into_iter()
        .map(|partition| {
            let frame = split.partition(partition);
            let metrics = (!frame.is_empty())
                .then(|| EvaluationMetrics::evaluate(frame.target(), &artifact.predict(frame)));
            PartitionReport {
                partition,
                start: frame.timestamps().first().copied(),
                end: frame.timestamps().last().copied(),
                metrics,
            }
        })
        .collect();

    let importance = artifact.model.feature_importance();
    let features = artifact
        .feature_names
        .iter()
        .enumerate()
        .map(|(idx, name)| FeatureReport {
            name: name.clone(),
            importance: importance.as_ref().and_then(|values| values.get(idx).copied()),
        })
        .collect();

    TrainingSummary {
        job_id: job.id,
        job_name: job.name.clone(),
        model_id: artifact.id,
        model_type: artifact.model_type.as_str(),
        trained_at: artifact.trained_at,
        sizes: split.sizes(),
        partitions,
        features,
        best_iteration: artifact.best_iteration,
        gating: *gating,
    }
}

/// Static HTML page plus a JSON summary under `<destination>/<job id>/`.
#[derive(Debug, Clone, Default)]
pub struct HtmlReporter;

impl Reporter for HtmlReporter {
    fn render_and_save(
        &self,
        job: &PredictionJob,
        split: &DataSplit,
        artifact: &ModelArtifact,
        gating: &GatingDecision,
        destination: &Path,
    ) -> Result<PathBuf> {
        let summary = summarize_training(job, split, artifact, gating);
        let directory = destination.join(job.id.to_string());
        fs::create_dir_all(&directory)
            .with_context(|| format!("Failed to create report directory {}", directory.display()))?;

        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(directory.join("summary.json"), json)
            .with_context(|| format!("Failed to write summary.json in {}", directory.display()))?;
        fs::write(directory.join("report.html"), render_html(&summary))
            .with_context(|| format!("Failed to write report.html in {}", directory.display()))?;
        Ok(directory)
    }
}

pub fn render_html(summary: &TrainingSummary) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">");
    let _ = write!(
        &mut html,
        "<title>{} training report</title>",
        escape_html(&summary.job_name)
    );
    html.push_str("<style>body{font-family:Arial,Helvetica,sans-serif;margin:24px;color:#111;}h1{margin-bottom:8px;}table{border-collapse:collapse;margin-top:12px;width:100%;}th,td{padding:6px 8px;border:1px solid #d0d0d0;font-size:13px;}tr:nth-child(even){background:#f7f7f7;}th{background:#efefef;text-align:left;}td.num{text-align:right;} .summary-grid{display:flex;gap:16px;flex-wrap:wrap;margin-top:8px;} .summary-card{border:1px solid #d0d0d0;border-radius:6px;padding:12px 16px;min-width:180px;} .summary-label{font-size:12px;color:#555;text-transform:uppercase;letter-spacing:0.05em;} .summary-value{font-size:18px;font-weight:600;color:#111;}</style></head><body>");
    let _ = write!(
        &mut html,
        "<h1>Training report: {} (job {})</h1>",
        escape_html(&summary.job_name),
        summary.job_id
    );

    let verdict = if summary.gating.accepted {
        "accepted"
    } else {
        "rejected, previous model kept"
    };
    html.push_str("<div class=\"summary-grid\">");
    for (label, value) in [
        ("Model", format!("{} ({})", summary.model_type, summary.model_id)),
        ("Trained at", summary.trained_at.to_rfc3339()),
        (
            "Best iteration",
            summary
                .best_iteration
                .map(|iteration| iteration.to_string())
                .unwrap_or_else(|| "n/a".to_string()),
        ),
        ("Verdict", verdict.to_string()),
        ("New score", format_optional(summary.gating.new_score)),
        ("Old score", format_optional(summary.gating.old_score)),
    ] {
        let _ = write!(
            &mut html,
            "<div class=\"summary-card\"><div class=\"summary-label\">{}</div><div class=\"summary-value\">{}</div></div>",
            label,
            escape_html(&value)
        );
    }
    html.push_str("</div>");

    html.push_str("<h2>Partitions</h2><table><thead><tr><th>Partition</th><th>Rows</th><th>Start</th><th>End</th><th>R&sup2;</th><th>RMSE</th><th>MAE</th></tr></thead><tbody>");
    for report in &summary.partitions {
        let rows = report.metrics.map_or(0, |metrics| metrics.rows);
        let _ = write!(
            &mut html,
            "<tr><td>{}</td><td class=\"num\">{}</td><td>{}</td><td>{}</td><td class=\"num\">{}</td><td class=\"num\">{}</td><td class=\"num\">{}</td></tr>",
            report.partition.label(),
            rows,
            format_timestamp(report.start),
            format_timestamp(report.end),
            format_optional(report.metrics.map(|metrics| metrics.r2)),
            format_optional(report.metrics.map(|metrics| metrics.rmse)),
            format_optional(report.metrics.map(|metrics| metrics.mae)),
        );
    }
    html.push_str("</tbody></table>");

    html.push_str("<h2>Features</h2>");
    if summary.features.is_empty() {
        html.push_str("<p>No features were used by this model.</p>");
    } else {
        html.push_str("<table><thead><tr><th>Feature</th><th>Importance</th></tr></thead><tbody>");
        for feature in &summary.features {
            let _ = write!(
                &mut html,
                "<tr><td>{}</td><td class=\"num\">{}</td></tr>",
                escape_html(&feature.name),
                format_optional(feature.importance)
            );
        }
        html.push_str("</tbody></table>");
    }
    html.push_str("</body></html>");
    html
}

fn format_optional(value: Option<f64>) -> String {
    value
        .filter(|value| value.is_finite())
        .map(|value| format!("{:.4}", value))
        .unwrap_or_else(|| "n/a".to_string())
}

fn format_timestamp(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "n/a".to_string())
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
