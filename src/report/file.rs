//! JSON and CSV report files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tracing::info;

use super::{Report, ReportConfig, ReportSink, Result};
use crate::message::ConsolidatedRecord;

const CSV_HEADER: &str = "Title,Url,PublishedDate,Author,FirstScore,SecondScore,ConsensusScore,Notes,Comment,CorrelationId";

/// Writes `weekly-report-<timestamp>-<suffix>.json` and `.csv` into a
/// directory. The timestamp has millisecond resolution and the random suffix
/// keeps reports persisted within the same millisecond apart.
pub struct FileReportSink {
    output_dir: PathBuf,
}

impl FileReportSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn from_config(config: &ReportConfig) -> Self {
        Self::new(config.output_dir.clone())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[async_trait]
impl ReportSink for FileReportSink {
    async fn persist(&self, records: &[ConsolidatedRecord]) -> Result<()> {
        let report = Report::new(records.to_vec(), Utc::now());
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let stem = report_stem(&report);
        let json_path = self.output_dir.join(format!("{stem}.json"));
        let csv_path = self.output_dir.join(format!("{stem}.csv"));

        tokio::fs::write(&json_path, serde_json::to_vec_pretty(&report)?).await?;
        tokio::fs::write(&csv_path, render_csv(&report)).await?;

        info!(
            json = %json_path.display(),
            csv = %csv_path.display(),
            items = report.items.len(),
            week = %report.week,
            "Persisted report"
        );
        Ok(())
    }
}

fn report_stem(report: &Report) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "weekly-report-{}-{}",
        report.generated_at.format("%Y%m%d%H%M%S%3f"),
        &suffix[..8]
    )
}

/// Render one header line plus one line per record.
pub(crate) fn render_csv(report: &Report) -> String {
    let mut out = String::with_capacity(128 * (report.items.len() + 1));
    out.push_str(CSV_HEADER);
    out.push('\n');
    for item in &report.items {
        let fields = [
            quote(&item.title),
            quote(&item.url),
            item.published_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            quote(item.author.as_deref().unwrap_or_default()),
            item.first_score.to_string(),
            item.second_score.to_string(),
            item.consensus_score.to_string(),
            quote(&item.notes),
            quote(&item.comment),
            item.correlation_id.clone(),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

/// Quote a text field. Embedded double quotes become single quotes.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "'"))
}
