use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use timer_core::{to_table, Delimiter, LapRecord, RowShape};

/// Where and how CSV exports are written.
#[derive(Clone, Debug)]
pub struct ExportTarget {
    pub dir: PathBuf,
    pub prefix: String,
    pub shape: RowShape,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOutcome {
    pub success: bool,
    pub filename: String,
    pub csv_data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `<prefix>_<unixMillis>.csv`
pub fn export_filename(prefix: &str, unix_ms: u64) -> String {
    format!("{}_{}.csv", prefix, unix_ms)
}

/// Render the laps as CSV and write them under the target directory.
/// Write failures are reported in the outcome rather than returned.
pub fn export_to_file(records: &[LapRecord], target: &ExportTarget, unix_ms: u64) -> ExportOutcome {
    let filename = export_filename(&target.prefix, unix_ms);
    let csv_data = to_table(records, Delimiter::Comma, target.shape);
    let path = target.dir.join(&filename);

    let written = fs::create_dir_all(&target.dir).and_then(|_| fs::write(&path, &csv_data));
    match written {
        Ok(()) => {
            log::info!("Exported {} lap(s) to {}", records.len(), path.display());
            ExportOutcome { success: true, filename, csv_data, error: None }
        }
        Err(e) => {
            log::error!("Failed to export laps to {}: {}", path.display(), e);
            ExportOutcome {
                success: false,
                filename,
                csv_data,
                error: Some(format!("Could not write {}: {}", path.display(), e)),
            }
        }
    }
}
