//! JSON report files.
//!
//! One file per source and run date: `{json_output_dir}/{date}/{source}.json`.
//! A second run on the same day replaces the earlier file.

use crate::error::HarvestError;
use crate::models::HarvestReport;
use crate::utils::file_stem;
use chrono::NaiveDate;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

/// Write `report` under `json_output_dir` and return the file path.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir, source = %source_id))]
pub async fn write_report(
    report: &HarvestReport,
    source_id: &str,
    date: NaiveDate,
    json_output_dir: &str,
) -> Result<PathBuf, HarvestError> {
    let json = serde_json::to_string_pretty(report)?;

    let full_json_dir = PathBuf::from(json_output_dir).join(date.to_string());
    info!(dir = %full_json_dir.display(), "Ensuring JSON directory exists");
    if let Err(e) = fs::create_dir_all(&full_json_dir).await {
        error!(dir = %full_json_dir.display(), error = %e, "Failed to create JSON dir");
        return Err(e.into());
    }

    let path = full_json_dir.join(format!("{}.json", file_stem(source_id)));
    fs::write(&path, json).await?;
    info!(path = %path.display(), posts = report.posts.len(), "Wrote JSON report");
    Ok(path)
}
