//! Persisted detection records:
//!
//! ```text
//! detection-records/<date>/<time>-<domain>.json      one check
//! detection-records/<date>/<time>-batch-summary.json one batch
//! detection-records/<date>/index.json                every write of the day
//! ```

use crate::error::{E2eError, Result};
use crate::monitor::types::{
    BatchResultSummary, BatchStatsSummary, BatchSummary, DailyIndex, DetectionIndexItem,
    DetectionResult, IndexKind,
};
use crate::util::{extract_domain, read_json, save_json};
use chrono::DateTime;
use std::path::{Path, PathBuf};

pub const RECORDS_DIR: &str = "detection-records";
const INDEX_FILE: &str = "index.json";

/// Writes records below `<root>/detection-records`.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    root: PathBuf,
}

impl ReportWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn day_dir(&self, date: &str) -> PathBuf {
        self.root.join(RECORDS_DIR).join(date)
    }

    /// Save one result and add a `single` entry to the day's index.
    pub fn save_single_result(&self, result: &DetectionResult, date: &str) -> Result<PathBuf> {
        let filename = result_file_name(result);
        let path = self.day_dir(date).join(&filename);
        save_json(&path, result)?;

        self.update_index(
            date,
            DetectionIndexItem {
                timestamp: result.detection_time.clone(),
                kind: IndexKind::Single,
                url: Some(result.url.clone()),
                urls: None,
                detail_path: Some(filename),
                summary_path: None,
            },
        )?;
        Ok(path)
    }

    /// Aggregate a batch, save it and add a `batch` entry to the day's index.
    ///
    /// `timestamp` is the `HHmmss` stamp used in the batch id and file name.
    pub fn generate_batch_summary(
        &self,
        results: &[DetectionResult],
        date: &str,
        timestamp: &str,
    ) -> Result<BatchSummary> {
        let summary = build_batch_summary(results, date, timestamp)?;

        let filename = format!("{}-batch-summary.json", timestamp);
        save_json(&self.day_dir(date).join(&filename), &summary)?;

        self.update_index(
            date,
            DetectionIndexItem {
                timestamp: timestamp.to_string(),
                kind: IndexKind::Batch,
                url: None,
                urls: Some(results.iter().map(|r| r.url.clone()).collect()),
                detail_path: None,
                summary_path: Some(filename),
            },
        )?;

        tracing::info!(
            "Batch {}: {}/{} succeeded",
            summary.batch_id,
            summary.success_count,
            summary.total_urls
        );
        Ok(summary)
    }

    /// Append to `index.json`, creating it for the first record of the day.
    pub fn update_index(&self, date: &str, item: DetectionIndexItem) -> Result<()> {
        let path = self.day_dir(date).join(INDEX_FILE);
        let mut index = read_json::<DailyIndex>(&path).unwrap_or_else(|| DailyIndex {
            date: date.to_string(),
            detections: Vec::new(),
        });
        index.detections.push(item);
        save_json(&path, &index)
    }

    pub fn read_index(&self, date: &str) -> Option<DailyIndex> {
        read_json(&self.day_dir(date).join(INDEX_FILE))
    }
}

fn result_file_name(result: &DetectionResult) -> String {
    format!("{}-{}.json", result.detection_time, extract_domain(&result.url))
}

/// Pure aggregation behind [`ReportWriter::generate_batch_summary`].
pub fn build_batch_summary(
    results: &[DetectionResult],
    date: &str,
    timestamp: &str,
) -> Result<BatchSummary> {
    let (Some(first), Some(last)) = (results.first(), results.last()) else {
        return Err(E2eError::Validation(
            "Cannot summarize an empty batch".to_string(),
        ));
    };

    let successes: Vec<&DetectionResult> = results.iter().filter(|r| r.is_success()).collect();
    let timed: Vec<(&str, f64)> = successes
        .iter()
        .filter_map(|r| r.load_time.map(|t| (r.url.as_str(), t)))
        .collect();

    // Ties go to the earliest result.
    let fastest = timed
        .iter()
        .fold(None::<(&str, f64)>, |best, &(url, t)| match best {
            Some((_, b)) if b <= t => best,
            _ => Some((url, t)),
        });
    let slowest = timed
        .iter()
        .fold(None::<(&str, f64)>, |best, &(url, t)| match best {
            Some((_, b)) if b >= t => best,
            _ => Some((url, t)),
        });
    let average_load_time = (!timed.is_empty())
        .then(|| timed.iter().map(|(_, t)| t).sum::<f64>() / timed.len() as f64);

    let stats = BatchStatsSummary {
        average_load_time,
        fastest_url: fastest.map(|(url, _)| url.to_string()),
        slowest_url: slowest.map(|(url, _)| url.to_string()),
        total_resources_checked: results
            .iter()
            .filter_map(|r| r.resource_check.as_ref())
            .map(|c| c.total_resources)
            .sum(),
        total_failed_resources: results
            .iter()
            .filter_map(|r| r.resource_check.as_ref())
            .map(|c| c.failed_resources.len())
            .sum(),
    };

    let entries = results
        .iter()
        .map(|r| BatchResultSummary {
            url: r.url.clone(),
            status: r.status,
            load_time: r.load_time,
            http_status: r.http_status,
            detail_path: format!("{}/{}/{}", RECORDS_DIR, date, result_file_name(r)),
        })
        .collect();

    Ok(BatchSummary {
        batch_id: format!("batch-{}-{}", date.replace('-', ""), timestamp),
        timestamp: first.timestamp.clone(),
        total_urls: results.len(),
        success_count: successes.len(),
        failed_count: results.len() - successes.len(),
        total_detection_time: elapsed_ms(&first.timestamp, &last.timestamp),
        results: entries,
        summary: stats,
    })
}

/// Milliseconds from `start` to `end`; zero when either does not parse.
fn elapsed_ms(start: &str, end: &str) -> i64 {
    match (
        DateTime::parse_from_rfc3339(start),
        DateTime::parse_from_rfc3339(end),
    ) {
        (Ok(start), Ok(end)) => (end - start).num_milliseconds(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::types::{DetectionStatus, ErrorType, ResourceCheckResult};

    fn success(url: &str, time: &str, stamp: &str, load: f64) -> DetectionResult {
        DetectionResult {
            url: url.to_string(),
            timestamp: stamp.to_string(),
            detection_time: time.to_string(),
            status: DetectionStatus::Success,
            http_status: Some(200),
            load_time: Some(load),
            performance_metrics: None,
            resource_check: Some(ResourceCheckResult {
                total_resources: 3,
                ..ResourceCheckResult::default()
            }),
            screenshot_path: Some("detection-screenshots/x.png".to_string()),
            error: None,
            error_type: None,
        }
    }

    fn failure(url: &str, time: &str, stamp: &str) -> DetectionResult {
        DetectionResult {
            url: url.to_string(),
            timestamp: stamp.to_string(),
            detection_time: time.to_string(),
            status: DetectionStatus::Failed,
            http_status: None,
            load_time: None,
            performance_metrics: None,
            resource_check: None,
            screenshot_path: None,
            error: Some("net::ERR_CONNECTION_REFUSED".to_string()),
            error_type: Some(ErrorType::Navigation),
        }
    }

    fn batch() -> Vec<DetectionResult> {
        vec![
            success("https://a.test/", "100000", "2024-03-07T10:00:00.000Z", 300.0),
            failure("https://b.test/", "100005", "2024-03-07T10:00:05.000Z"),
            success("https://c.test/", "100007", "2024-03-07T10:00:07.500Z", 100.0),
            success("https://d.test/", "100009", "2024-03-07T10:00:09.250Z", 500.0),
        ]
    }

    #[test]
    fn test_batch_stats() {
        let summary = build_batch_summary(&batch(), "2024-03-07", "100010").unwrap();

        assert_eq!(summary.batch_id, "batch-20240307-100010");
        assert_eq!(summary.timestamp, "2024-03-07T10:00:00.000Z");
        assert_eq!(summary.total_urls, 4);
        assert_eq!(summary.success_count, 3);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.total_detection_time, 9250);

        assert_eq!(summary.summary.average_load_time, Some(300.0));
        assert_eq!(summary.summary.fastest_url.as_deref(), Some("https://c.test/"));
        assert_eq!(summary.summary.slowest_url.as_deref(), Some("https://d.test/"));
        assert_eq!(summary.summary.total_resources_checked, 9);
        assert_eq!(summary.summary.total_failed_resources, 0);

        assert_eq!(
            summary.results[1].detail_path,
            "detection-records/2024-03-07/100005-b.test.json"
        );
        assert_eq!(summary.results[1].status, DetectionStatus::Failed);
    }

    #[test]
    fn test_all_failed_has_no_timing_stats() {
        let results = vec![failure("https://b.test/", "100005", "2024-03-07T10:00:05.000Z")];
        let summary = build_batch_summary(&results, "2024-03-07", "100010").unwrap();
        assert_eq!(summary.summary.average_load_time, None);
        assert_eq!(summary.summary.fastest_url, None);
        assert_eq!(summary.total_detection_time, 0);
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(build_batch_summary(&[], "2024-03-07", "100010").is_err());
    }

    #[test]
    fn test_files_and_index_written() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        let results = batch();

        for result in &results {
            writer.save_single_result(result, "2024-03-07").unwrap();
        }
        writer
            .generate_batch_summary(&results, "2024-03-07", "100010")
            .unwrap();

        let day = writer.day_dir("2024-03-07");
        assert!(day.join("100000-a.test.json").exists());
        assert!(day.join("100010-batch-summary.json").exists());

        let saved: DetectionResult = read_json(&day.join("100005-b.test.json")).unwrap();
        assert_eq!(saved, results[1]);

        let index = writer.read_index("2024-03-07").unwrap();
        assert_eq!(index.date, "2024-03-07");
        assert_eq!(index.detections.len(), 5);
        assert_eq!(index.detections[0].kind, IndexKind::Single);
        assert_eq!(index.detections[0].detail_path.as_deref(), Some("100000-a.test.json"));

        let last = index.detections.last().unwrap();
        assert_eq!(last.kind, IndexKind::Batch);
        assert_eq!(last.urls.as_ref().map(Vec::len), Some(4));
        assert_eq!(last.summary_path.as_deref(), Some("100010-batch-summary.json"));
    }
}
